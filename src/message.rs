use crate::context::Context;
use crate::error::{self, ErrorClass};
use crate::handler::Handler;
use crate::headers::Headers;
use crate::session::CompletionFn;
use crate::transfer::{ConnectHandle, ConnectionHandle, ReadHandle, WriteHandle};
use std::cell::RefCell;
use std::rc::Rc;

/// Export message flags.
bitflags::bitflags! {
    pub struct MessageFlags: u32 {
        /// Do not follow 3xx responses.
        const NO_REDIRECT = 0x01;
    }
}

/// Lifecycle states, in transfer order.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum MessageStatus {
    IDLE,
    QUEUED,
    CONNECTING,
    SENDING_REQUEST,
    READING_RESPONSE,
    FINISHED,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum HttpVersion {
    HTTP_1_0,
    HTTP_1_1,
}

/// Who owns a data buffer's storage.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum BufferOwnership {
    SYSTEM_OWNED,
    USER_OWNED,
    STATIC,
}

/// Request or response body storage. System buffers die with the message;
/// user buffers are shared with the caller and survive it; static buffers
/// borrow from the program.
#[derive(Clone, Debug)]
pub enum Buffer {
    SYSTEM(Vec<u8>),
    USER(Rc<RefCell<Vec<u8>>>),
    STATIC(&'static [u8]),
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::SYSTEM(Vec::new())
    }
}

impl Buffer {
    pub fn ownership(&self) -> BufferOwnership {
        match self {
            Buffer::SYSTEM(_) => BufferOwnership::SYSTEM_OWNED,
            Buffer::USER(_) => BufferOwnership::USER_OWNED,
            Buffer::STATIC(_) => BufferOwnership::STATIC,
        }
    }

    /// Copies the current contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            Buffer::SYSTEM(bytes) => bytes.clone(),
            Buffer::USER(shared) => shared.borrow().clone(),
            Buffer::STATIC(bytes) => bytes.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::SYSTEM(bytes) => bytes.len(),
            Buffer::USER(shared) => shared.borrow().len(),
            Buffer::STATIC(bytes) => bytes.len(),
        }
    }

    /// Appends received data. A static buffer is promoted to a system one
    /// first.
    pub fn append(&mut self, data: &[u8]) {
        match self {
            Buffer::SYSTEM(bytes) => bytes.extend_from_slice(data),
            Buffer::USER(shared) => shared.borrow_mut().extend_from_slice(data),
            Buffer::STATIC(prefix) => {
                let mut bytes = prefix.to_vec();
                bytes.extend_from_slice(data);
                *self = Buffer::SYSTEM(bytes);
            }
        }
    }

    /// Empties system storage. User and static storage are the caller's.
    pub fn reset(&mut self) {
        if let Buffer::SYSTEM(bytes) = self {
            bytes.clear();
        }
    }
}

/// One in-flight HTTP request/response pair.
pub struct Message {
    /// HTTP method, "GET" unless given.
    pub method: String,
    pub http_version: HttpVersion,
    /// The destination endpoint. Replacing it drops the prior reference.
    pub context: Rc<Context>,
    pub request_headers: Headers,
    pub response_headers: Headers,
    pub request: Buffer,
    pub response: Buffer,
    pub flags: MessageFlags,
    pub status: MessageStatus,
    pub errorcode: u32,
    pub errorclass: ErrorClass,
    pub errorphrase: String,
    /// Composed request-header bytes, built and used by the transfer layer.
    pub header_buf: Option<Vec<u8>>,
    pub(crate) connect_tag: Option<ConnectHandle>,
    pub(crate) read_tag: Option<ReadHandle>,
    pub(crate) write_tag: Option<WriteHandle>,
    pub(crate) connection: Option<ConnectionHandle>,
    pub(crate) callback: Option<CompletionFn>,
    pub(crate) handlers: Vec<Handler>,
    pub(crate) next_handler_id: u32,
    /// Bumped whenever transient transfer state is torn down, so events
    /// from a dead exchange cannot touch a requeued message.
    pub(crate) exchange: u64,
}

impl Message {
    /// Returns a new idle message bound to the given endpoint context.
    /// A None method means GET.
    pub fn new(context: Rc<Context>, method: Option<&str>) -> Self {
        Self {
            method: method.unwrap_or("GET").to_string(),
            http_version: HttpVersion::HTTP_1_1,
            context,
            request_headers: Headers::new(),
            response_headers: Headers::new(),
            request: Buffer::default(),
            response: Buffer::default(),
            flags: MessageFlags::empty(),
            status: MessageStatus::IDLE,
            errorcode: 0,
            errorclass: ErrorClass::NONE,
            errorphrase: String::new(),
            header_buf: None,
            connect_tag: None,
            read_tag: None,
            write_tag: None,
            connection: None,
            callback: None,
            handlers: Vec::new(),
            next_handler_id: 0,
            exchange: 0,
        }
    }

    /// Like `new`, additionally filling the request buffer.
    pub fn new_full(context: Rc<Context>, method: Option<&str>, request: Buffer) -> Self {
        let mut msg = Self::new(context, method);
        msg.request = request;
        msg
    }

    /// Records an error; class and phrase come from the known-code table.
    pub fn set_error(&mut self, errcode: u32) {
        self.errorcode = errcode;
        self.errorclass = error::error_class(errcode);
        self.errorphrase = error::error_phrase(errcode).to_string();
    }

    /// Records an error with a caller-supplied phrase; the class is still
    /// derived from the code.
    pub fn set_error_full(&mut self, errcode: u32, errphrase: &str) {
        self.errorcode = errcode;
        self.errorclass = error::error_class(errcode);
        self.errorphrase = errphrase.to_string();
    }

    /// Records a handler-raised error; the class is forced to HANDLER.
    pub fn set_handler_error(&mut self, errcode: u32, errphrase: &str) {
        self.errorcode = errcode;
        self.errorclass = ErrorClass::HANDLER;
        self.errorphrase = errphrase.to_string();
    }

    /// Rebinds the message to a new endpoint context, dropping the prior
    /// reference.
    pub fn set_context(&mut self, context: Rc<Context>) {
        self.context = context;
    }

    pub fn context(&self) -> Rc<Context> {
        Rc::clone(&self.context)
    }

    /// Clears per-exchange response state before a (re)send.
    pub(crate) fn reset_response(&mut self) {
        self.response_headers.clear();
        self.response.reset();
        self.errorcode = 0;
        self.errorclass = ErrorClass::NONE;
        self.errorphrase.clear();
    }
}
