use crate::main_loop::MainLoop;
use crate::message::Message;
use crate::session::MessageKey;

/// Tag for a pending connect. Cancellation is idempotent.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ConnectHandle(pub u64);

/// Tag for an active response read. Cancellation is idempotent.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ReadHandle(pub u64);

/// Tag for an active request write. Cancellation is idempotent.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct WriteHandle(pub u64);

/// An established connection owned by the pool.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ConnectionHandle(pub u64);

/// Parsed wire artifacts delivered by a transfer engine. Events arrive on
/// the loop stamped with the exchange generation they belong to; stale
/// events are dropped by the dispatcher.
#[derive(Clone, Debug)]
pub enum TransferEvent {
    /// The connect completed and the pool handed out a connection.
    CONNECTED { connection: ConnectionHandle },
    /// The request line, headers and body were fully written.
    WROTE_BODY,
    /// The response status line and header block were read.
    GOT_HEADERS { code: u32, headers: Vec<(String, String)> },
    /// One decoded chunk of the response body.
    GOT_CHUNK { data: Vec<u8> },
    /// The response was fully read.
    DONE,
    /// The connect failed.
    CANT_CONNECT,
    /// The connection failed mid-transfer.
    IO_ERROR,
}

/// Contract with the socket transfer engine. The engine owns byte pumping
/// and wire parsing; it reports progress by scheduling `TransferEvent`s on
/// the loop for the (message, exchange) pair it was started with.
pub trait TransferEngine {
    /// Starts connecting the message to its endpoint.
    fn connect(
        &mut self,
        lp: &mut MainLoop,
        msg_key: MessageKey,
        exchange: u64,
        msg: &Message,
    ) -> ConnectHandle;

    /// Starts the request/response transfer on the established connection.
    fn start(
        &mut self,
        lp: &mut MainLoop,
        msg_key: MessageKey,
        exchange: u64,
        msg: &Message,
    ) -> (ReadHandle, WriteHandle);

    fn cancel_connect(&mut self, tag: ConnectHandle);

    fn cancel_read(&mut self, tag: ReadHandle);

    fn cancel_write(&mut self, tag: WriteHandle);

    /// Returns a connection to the pool.
    fn release_connection(&mut self, connection: ConnectionHandle);
}

/// Inert engine: hands out tags and never delivers an event. Useful when
/// only the registry and pipeline are exercised.
#[derive(Default)]
pub struct NullTransfer {
    next_tag: u64,
}

impl NullTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    fn tag(&mut self) -> u64 {
        self.next_tag += 1;
        self.next_tag
    }
}

impl TransferEngine for NullTransfer {
    fn connect(
        &mut self,
        _lp: &mut MainLoop,
        _msg_key: MessageKey,
        _exchange: u64,
        _msg: &Message,
    ) -> ConnectHandle {
        ConnectHandle(self.tag())
    }

    fn start(
        &mut self,
        _lp: &mut MainLoop,
        _msg_key: MessageKey,
        _exchange: u64,
        _msg: &Message,
    ) -> (ReadHandle, WriteHandle) {
        (ReadHandle(self.tag()), WriteHandle(self.tag()))
    }

    fn cancel_connect(&mut self, _tag: ConnectHandle) {}

    fn cancel_read(&mut self, _tag: ReadHandle) {}

    fn cancel_write(&mut self, _tag: WriteHandle) {}

    fn release_connection(&mut self, _connection: ConnectionHandle) {}
}
