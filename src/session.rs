use crate::auth::AuthScheme;
use crate::context::{Context, Origin};
use crate::error::{ErrorClass, KnownError};
use crate::handler::{self, Handler, HandlerEvent, HandlerFilter, HandlerFn, HandlerPhase, UserData};
use crate::kettle_warn;
use crate::log::{self, LogCode, Logger};
use crate::main_loop::{MainLoop, Source};
use crate::message::{Buffer, BufferOwnership, Message, MessageStatus};
use crate::transfer::{TransferEngine, TransferEvent};
use crate::uri::Uri;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Identity of a message while it lives in the session. Keys are never
/// reused.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MessageKey(u64);

/// Completion callback, invoked once when a message finishes or is
/// cancelled. Requeueing inside the callback keeps the message alive; not
/// requeueing frees it.
pub type CompletionFn = Box<dyn FnMut(&mut Session, MessageKey)>;

/// Process-wide authenticate callback: given the challenge scheme and
/// realm, it may write credentials into the URI.
pub type AuthCallbackFn = Box<dyn FnMut(AuthScheme, &mut Uri, &str)>;

/// The engine instance: owns every message, the ambient loop, the transfer
/// engine, the set of active requests, and the process-wide authentication
/// callback. Scheduling is single-threaded cooperative; everything happens
/// from `iterate`.
pub struct Session {
    pub(crate) transfer: Box<dyn TransferEngine>,
    pub(crate) main_loop: MainLoop,
    pub(crate) messages: HashMap<MessageKey, Message>,
    next_key: u64,
    /// Messages between queue and completion.
    active: HashSet<MessageKey>,
    queued: VecDeque<MessageKey>,
    origins: HashMap<(String, String, u16), Rc<Origin>>,
    proxy: Option<Rc<Context>>,
    pub(crate) auth_callback: Option<AuthCallbackFn>,
    log_channel: (Sender<log::Message>, Receiver<log::Message>),
    pub(crate) logger: Logger,
}

impl Session {
    pub fn new(transfer: Box<dyn TransferEngine>) -> Self {
        let log_channel = channel();
        let logger = Logger::new(log_channel.0.clone());
        Self {
            transfer,
            main_loop: MainLoop::new(),
            messages: HashMap::new(),
            next_key: 0,
            active: HashSet::new(),
            queued: VecDeque::new(),
            origins: HashMap::new(),
            proxy: None,
            auth_callback: None,
            log_channel,
            logger,
        }
    }

    /// Resolves an endpoint context for a URI. Contexts against the same
    /// (scheme, host, port) origin share auth state.
    pub fn context_from_uri(&mut self, uri: Uri) -> Option<Rc<Context>> {
        if uri.host.is_empty() {
            return None;
        }
        let origin_key = (uri.scheme.clone(), uri.host.to_ascii_lowercase(), uri.port);
        let origin = self
            .origins
            .entry(origin_key)
            .or_insert_with(|| Rc::new(Origin::new()));
        Some(Rc::new(Context::new(uri, Rc::clone(origin))))
    }

    /// Creates a new idle message against the given endpoint context. A
    /// None method means GET.
    pub fn new_message(&mut self, context: Rc<Context>, method: Option<&str>) -> MessageKey {
        self.insert(Message::new(context, method))
    }

    /// Like `new_message`, additionally filling the request buffer.
    pub fn new_message_full(
        &mut self,
        context: Rc<Context>,
        method: Option<&str>,
        request: Buffer,
    ) -> MessageKey {
        self.insert(Message::new_full(context, method, request))
    }

    fn insert(&mut self, msg: Message) -> MessageKey {
        self.next_key += 1;
        let msg_key = MessageKey(self.next_key);
        self.messages.insert(msg_key, msg);
        msg_key
    }

    pub fn message(&self, msg_key: MessageKey) -> Option<&Message> {
        self.messages.get(&msg_key)
    }

    pub fn message_mut(&mut self, msg_key: MessageKey) -> Option<&mut Message> {
        self.messages.get_mut(&msg_key)
    }

    /// True between queue and completion.
    pub fn is_active(&self, msg_key: MessageKey) -> bool {
        self.active.contains(&msg_key)
    }

    pub fn active_requests(&self) -> usize {
        self.active.len()
    }

    pub fn set_proxy(&mut self, proxy: Option<Rc<Context>>) {
        self.proxy = proxy;
    }

    pub fn proxy(&self) -> Option<Rc<Context>> {
        self.proxy.clone()
    }

    /// Registers the process-wide authenticate callback.
    pub fn set_auth_callback(&mut self, auth_fn: Option<AuthCallbackFn>) {
        self.auth_callback = auth_fn;
    }

    /// Current loop time in milliseconds.
    pub fn loop_time_ms(&self) -> u64 {
        self.main_loop.now_ms()
    }

    /// Drains and returns all log records received so far.
    pub fn get_logs(&self) -> Vec<log::Message> {
        let mut logs = Vec::with_capacity(8);
        while let Ok(message) = self.log_channel.1.try_recv() {
            logs.push(message);
        }
        logs
    }

    /// Returns the next log record, if any.
    pub fn get_next_log(&self) -> Option<log::Message> {
        self.log_channel.1.try_recv().ok()
    }

    // ------------------------------------------------------------------
    // Queueing and completion
    // ------------------------------------------------------------------

    /// Queues the message for sending; it progresses while the loop runs.
    /// If this message has been processed before, resources from the prior
    /// run are freed first.
    ///
    /// If the response buffer is user-owned the message is not queued and
    /// the callback is invoked at once with a CANCELLED error.
    ///
    /// Upon completion the callback is invoked; if it does not requeue the
    /// message, the message is freed.
    pub fn queue(&mut self, msg_key: MessageKey, callback: Option<CompletionFn>) {
        match self.messages.get_mut(&msg_key) {
            Some(msg) => msg.callback = callback,
            None => return,
        }
        self.queue_internal(msg_key);
    }

    /// Requeues with the saved completion callback.
    pub fn requeue(&mut self, msg_key: MessageKey) {
        if self.messages.contains_key(&msg_key) {
            self.queue_internal(msg_key);
        }
    }

    fn queue_internal(&mut self, msg_key: MessageKey) {
        let user_owned = self
            .messages
            .get(&msg_key)
            .map(|msg| msg.response.ownership() == BufferOwnership::USER_OWNED)
            .unwrap_or(true);
        if user_owned {
            // The engine cannot write into caller-owned response storage.
            kettle_warn!(
                self.logger,
                LogCode::RESPONSE_BUFFER_USER_OWNED,
                "Queued message has a user-owned response buffer"
            );
            if let Some(msg) = self.messages.get_mut(&msg_key) {
                msg.set_error(KnownError::CANCELLED);
            }
            self.issue_callback(msg_key);
            return;
        }

        self.cleanup(msg_key);
        if let Some(msg) = self.messages.get_mut(&msg_key) {
            msg.reset_response();
            msg.status = MessageStatus::QUEUED;
        }
        self.active.insert(msg_key);
        self.queued.push_back(msg_key);
        self.main_loop.push(Source::PROCESS_QUEUE);
    }

    /// Synchronously sends the message: queues it without a callback and
    /// drives the loop until the transfer is finished or a transport error
    /// occurs. The message is not freed upon return.
    ///
    /// Returns the error class of the completed exchange.
    pub fn send(&mut self, msg_key: MessageKey) -> ErrorClass {
        self.queue(msg_key, None);
        loop {
            let done = match self.messages.get(&msg_key) {
                Some(msg) => {
                    msg.status == MessageStatus::FINISHED || msg.errorclass == ErrorClass::TRANSPORT
                }
                None => true,
            };
            if done || !self.iterate(true) {
                break;
            }
        }
        self.messages
            .get(&msg_key)
            .map(|msg| msg.errorclass)
            .unwrap_or(ErrorClass::NONE)
    }

    /// Frees temporary resources created while processing the message:
    /// outstanding read/write/connect operations are cancelled, the
    /// connection is released, and the message leaves the active set.
    /// Headers and data buffers are left intact. Idempotent.
    pub fn cleanup(&mut self, msg_key: MessageKey) {
        if let Some(msg) = self.messages.get_mut(&msg_key) {
            if let Some(tag) = msg.read_tag.take() {
                self.transfer.cancel_read(tag);
            }
            if let Some(tag) = msg.write_tag.take() {
                self.transfer.cancel_write(tag);
            }
            if let Some(tag) = msg.connect_tag.take() {
                self.transfer.cancel_connect(tag);
            }
            if let Some(connection) = msg.connection.take() {
                self.transfer.release_connection(connection);
            }
            // Anything still in flight for this exchange is now stale.
            msg.exchange += 1;
        }
        self.active.remove(&msg_key);
    }

    /// Destroys the message: cleanup, then release of everything it owns.
    pub fn free(&mut self, msg_key: MessageKey) {
        self.cleanup(msg_key);
        self.finalize(msg_key);
    }

    fn finalize(&mut self, msg_key: MessageKey) {
        if let Some(msg) = self.messages.remove(&msg_key) {
            for handler in &msg.handlers {
                if let Some(tag) = handler.timeout_tag {
                    self.main_loop.remove_timeout(tag);
                }
            }
        }
    }

    /// Completes the message: cleans up first, so a callback that iterates
    /// the loop cannot cause re-entrant I/O on this message, then invokes
    /// the completion callback. If the callback did not requeue the
    /// message, the message is destroyed.
    pub fn issue_callback(&mut self, msg_key: MessageKey) {
        self.cleanup(msg_key);

        let callback = self
            .messages
            .get_mut(&msg_key)
            .and_then(|msg| msg.callback.take());
        if let Some(mut callback) = callback {
            callback(self, msg_key);

            let requeued = self
                .messages
                .get(&msg_key)
                .map(|msg| msg.status == MessageStatus::QUEUED)
                .unwrap_or(false);
            if requeued {
                // Keep the saved callback for the next completion unless
                // the requeue installed a fresh one.
                if let Some(msg) = self.messages.get_mut(&msg_key) {
                    if msg.callback.is_none() {
                        msg.callback = Some(callback);
                    }
                }
            } else {
                self.finalize(msg_key);
            }
        }
    }

    /// Cancels a running message: the completion callback is issued once
    /// with a CANCELLED error. If not requeued by the callback, the
    /// message is destroyed.
    pub fn cancel(&mut self, msg_key: MessageKey) {
        if let Some(msg) = self.messages.get_mut(&msg_key) {
            msg.set_error(KnownError::CANCELLED);
        }
        self.issue_callback(msg_key);
    }

    // ------------------------------------------------------------------
    // Handler registry
    // ------------------------------------------------------------------

    /// Registers a handler on the message. A TIMEOUT filter arms its
    /// one-shot timer immediately.
    pub fn add_handler_full(
        &mut self,
        msg_key: MessageKey,
        name: Option<&str>,
        event: HandlerEvent,
        phase: HandlerPhase,
        filter: HandlerFilter,
        callback: HandlerFn,
        user_data: Option<UserData>,
    ) {
        let handler_id = match self.messages.get_mut(&msg_key) {
            Some(msg) => {
                msg.next_handler_id += 1;
                msg.next_handler_id
            }
            None => return,
        };
        let timeout_tag = if let HandlerFilter::TIMEOUT(seconds) = &filter {
            Some(self.main_loop.add_timeout(
                *seconds,
                Source::HANDLER_TIMEOUT {
                    msg: msg_key,
                    handler: handler_id,
                },
            ))
        } else {
            None
        };
        if let Some(msg) = self.messages.get_mut(&msg_key) {
            msg.handlers.push(Handler {
                id: handler_id,
                name: name.map(|n| n.to_string()),
                event,
                phase,
                filter,
                callback,
                user_data,
                timeout_tag,
            });
        }
    }

    /// Registers an anonymous LAST-phase handler.
    pub fn add_handler(
        &mut self,
        msg_key: MessageKey,
        event: HandlerEvent,
        filter: HandlerFilter,
        callback: HandlerFn,
        user_data: Option<UserData>,
    ) {
        self.add_handler_full(
            msg_key,
            None,
            event,
            HandlerPhase::LAST,
            filter,
            callback,
            user_data,
        );
    }

    /// Removes the first handler whose name matches, ignoring ASCII case.
    pub fn remove_handler(&mut self, msg_key: MessageKey, name: &str) {
        self.remove_handler_at(msg_key, |handler| {
            handler
                .name
                .as_ref()
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        });
    }

    /// Removes the first handler registered with the given callback.
    pub fn remove_handler_by_func(&mut self, msg_key: MessageKey, callback: HandlerFn) {
        self.remove_handler_at(msg_key, |handler| handler.callback == callback);
    }

    /// Removes the first handler registered with the given callback and
    /// user data.
    pub fn remove_handler_by_func_and_data(
        &mut self,
        msg_key: MessageKey,
        callback: HandlerFn,
        user_data: &UserData,
    ) {
        self.remove_handler_at(msg_key, |handler| {
            handler.callback == callback
                && handler
                    .user_data
                    .as_ref()
                    .map(|data| Rc::ptr_eq(data, user_data))
                    .unwrap_or(false)
        });
    }

    fn remove_handler_at<F: Fn(&Handler) -> bool>(&mut self, msg_key: MessageKey, matches: F) {
        let removed = self.messages.get_mut(&msg_key).and_then(|msg| {
            msg.handlers
                .iter()
                .position(matches)
                .map(|at| msg.handlers.remove(at))
        });
        if let Some(handler) = removed {
            if let Some(tag) = handler.timeout_tag {
                self.main_loop.remove_timeout(tag);
            }
        }
    }

    /// Names of the message's named handlers, in attachment order.
    pub fn list_handlers(&self, msg_key: MessageKey) -> Vec<String> {
        self.messages
            .get(&msg_key)
            .map(|msg| {
                msg.handlers
                    .iter()
                    .filter_map(|handler| handler.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fires the handler pipeline for one lifecycle event.
    ///
    /// Returns true when the message was consumed (completed or requeued).
    pub fn run_handlers(&mut self, msg_key: MessageKey, event: HandlerEvent) -> bool {
        handler::run_handlers(self, msg_key, event)
    }

    // ------------------------------------------------------------------
    // Loop driving
    // ------------------------------------------------------------------

    /// Dispatches one loop source. With `block` set, a pending timer may
    /// fire early by advancing the loop clock to its deadline.
    ///
    /// Returns false when there was nothing to dispatch.
    pub fn iterate(&mut self, block: bool) -> bool {
        let source = match self.main_loop.pop(block) {
            Some(source) => source,
            None => return false,
        };
        match source {
            Source::PROCESS_QUEUE => self.process_queue(),
            Source::TRANSFER { msg, exchange, event } => {
                self.dispatch_transfer(msg, exchange, event)
            }
            Source::HANDLER_TIMEOUT { msg, handler } => handler::fire_timeout(self, msg, handler),
        }
        true
    }

    fn process_queue(&mut self) {
        while let Some(msg_key) = self.queued.pop_front() {
            // Only active requests run; a cleanup while queued stalls the
            // message until it is queued again.
            let runnable = self.active.contains(&msg_key)
                && self
                    .messages
                    .get(&msg_key)
                    .map(|msg| msg.status == MessageStatus::QUEUED)
                    .unwrap_or(false);
            if runnable {
                self.start_exchange(msg_key);
            }
        }
    }

    fn start_exchange(&mut self, msg_key: MessageKey) {
        let exchange = match self.messages.get_mut(&msg_key) {
            Some(msg) => {
                msg.status = MessageStatus::CONNECTING;
                msg.exchange
            }
            None => return,
        };
        if handler::run_handlers(self, msg_key, HandlerEvent::PREPARE) {
            return;
        }
        // A PREPARE handler may have stopped, requeued or killed the
        // message; connect only if it is still ours to drive.
        let connect_tag = match self.messages.get(&msg_key) {
            Some(msg) if msg.status == MessageStatus::CONNECTING && msg.exchange == exchange => {
                self.transfer.connect(&mut self.main_loop, msg_key, exchange, msg)
            }
            _ => return,
        };
        if let Some(msg) = self.messages.get_mut(&msg_key) {
            msg.connect_tag = Some(connect_tag);
        }
    }

    fn dispatch_transfer(&mut self, msg_key: MessageKey, exchange: u64, event: TransferEvent) {
        let live = self
            .messages
            .get(&msg_key)
            .map(|msg| msg.exchange == exchange)
            .unwrap_or(false);
        if !live {
            return;
        }
        match event {
            TransferEvent::CONNECTED { connection } => {
                match self.messages.get_mut(&msg_key) {
                    Some(msg) if msg.status == MessageStatus::CONNECTING => {
                        msg.connect_tag = None;
                        msg.connection = Some(connection);
                        msg.status = MessageStatus::SENDING_REQUEST;
                    }
                    _ => return,
                }
                let (read_tag, write_tag) = match self.messages.get(&msg_key) {
                    Some(msg) => self.transfer.start(&mut self.main_loop, msg_key, exchange, msg),
                    None => return,
                };
                if let Some(msg) = self.messages.get_mut(&msg_key) {
                    msg.read_tag = Some(read_tag);
                    msg.write_tag = Some(write_tag);
                }
            }
            TransferEvent::WROTE_BODY => {
                match self.messages.get_mut(&msg_key) {
                    Some(msg) if msg.status == MessageStatus::SENDING_REQUEST => {
                        msg.write_tag = None;
                        msg.status = MessageStatus::READING_RESPONSE;
                    }
                    _ => return,
                }
                handler::run_handlers(self, msg_key, HandlerEvent::DATA_SENT);
            }
            TransferEvent::GOT_HEADERS { code, headers } => {
                match self.messages.get_mut(&msg_key) {
                    Some(msg) if msg.status >= MessageStatus::SENDING_REQUEST => {
                        msg.status = MessageStatus::READING_RESPONSE;
                        for (name, value) in &headers {
                            msg.response_headers.add(name, value);
                        }
                        msg.set_error(code);
                    }
                    _ => return,
                }
                handler::run_handlers(self, msg_key, HandlerEvent::HEADERS);
            }
            TransferEvent::GOT_CHUNK { data } => {
                match self.messages.get_mut(&msg_key) {
                    Some(msg) if msg.status == MessageStatus::READING_RESPONSE => {
                        msg.response.append(&data);
                    }
                    _ => return,
                }
                handler::run_handlers(self, msg_key, HandlerEvent::DATA);
            }
            TransferEvent::DONE => {
                match self.messages.get_mut(&msg_key) {
                    Some(msg) if msg.status == MessageStatus::READING_RESPONSE => {
                        msg.read_tag = None;
                        msg.write_tag = None;
                        msg.status = MessageStatus::FINISHED;
                    }
                    _ => return,
                }
                handler::run_handlers(self, msg_key, HandlerEvent::FINISHED);
            }
            TransferEvent::CANT_CONNECT => {
                match self.messages.get_mut(&msg_key) {
                    Some(msg) => {
                        msg.connect_tag = None;
                        msg.set_error(KnownError::CANT_CONNECT);
                    }
                    None => return,
                }
                self.issue_callback(msg_key);
            }
            TransferEvent::IO_ERROR => {
                match self.messages.get_mut(&msg_key) {
                    Some(msg) => msg.set_error(KnownError::IO_ERROR),
                    None => return,
                }
                self.issue_callback(msg_key);
            }
        }
    }
}
