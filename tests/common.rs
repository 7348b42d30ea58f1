use kettle::error::ErrorClass;
use kettle::main_loop::{MainLoop, Source};
use kettle::message::{Message, MessageStatus};
use kettle::session::{CompletionFn, MessageKey, Session};
use kettle::transfer::{
    ConnectHandle, ConnectionHandle, ReadHandle, TransferEngine, TransferEvent, WriteHandle,
};
use kettle::uri::Uri;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// One scripted wire exchange. Each connect consumes the next script.
#[allow(dead_code)]
pub enum Script {
    /// The connect fails.
    ConnectFail,
    /// Connects and writes the request; the server never answers.
    Silent,
    /// Connects and writes the request; the connection then drops.
    IoError,
    /// A complete exchange with the given status, headers and body.
    Respond {
        code: u32,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static [u8],
    },
}

/// Bookkeeping shared between the test and its mock transfer engine.
#[derive(Default)]
pub struct MockState {
    pub scripts: VecDeque<Script>,
    pub started: usize,
    /// Request target observed at each transfer start.
    pub started_uris: Vec<String>,
    pub cancelled_connects: Vec<ConnectHandle>,
    pub cancelled_reads: Vec<ReadHandle>,
    pub cancelled_writes: Vec<WriteHandle>,
    pub released_connections: Vec<ConnectionHandle>,
    next_tag: u64,
    current: Option<Script>,
}

impl MockState {
    fn tag(&mut self) -> u64 {
        self.next_tag += 1;
        self.next_tag
    }
}

/// Transfer engine driven entirely by scripts; progress is reported by
/// scheduling events on the loop, the way a socket engine would from its
/// readiness callbacks.
pub struct MockTransfer {
    pub state: Rc<RefCell<MockState>>,
}

impl TransferEngine for MockTransfer {
    fn connect(
        &mut self,
        lp: &mut MainLoop,
        msg_key: MessageKey,
        exchange: u64,
        _msg: &Message,
    ) -> ConnectHandle {
        let mut state = self.state.borrow_mut();
        let tag = state.tag();
        match state.scripts.pop_front() {
            Some(Script::ConnectFail) => {
                lp.push(Source::TRANSFER {
                    msg: msg_key,
                    exchange,
                    event: TransferEvent::CANT_CONNECT,
                });
            }
            Some(script) => {
                state.current = Some(script);
                let connection = ConnectionHandle(state.tag());
                lp.push(Source::TRANSFER {
                    msg: msg_key,
                    exchange,
                    event: TransferEvent::CONNECTED { connection },
                });
            }
            // Nothing scripted: the connect hangs.
            None => {}
        }
        ConnectHandle(tag)
    }

    fn start(
        &mut self,
        lp: &mut MainLoop,
        msg_key: MessageKey,
        exchange: u64,
        msg: &Message,
    ) -> (ReadHandle, WriteHandle) {
        let mut state = self.state.borrow_mut();
        state.started += 1;
        state.started_uris.push(msg.context.uri().to_string());
        let read = ReadHandle(state.tag());
        let write = WriteHandle(state.tag());
        let push = |lp: &mut MainLoop, event: TransferEvent| {
            lp.push(Source::TRANSFER {
                msg: msg_key,
                exchange,
                event,
            })
        };
        match state.current.take() {
            Some(Script::Respond { code, headers, body }) => {
                push(lp, TransferEvent::WROTE_BODY);
                push(
                    lp,
                    TransferEvent::GOT_HEADERS {
                        code,
                        headers: headers
                            .iter()
                            .map(|(name, value)| (name.to_string(), value.to_string()))
                            .collect(),
                    },
                );
                if !body.is_empty() {
                    push(lp, TransferEvent::GOT_CHUNK { data: body.to_vec() });
                }
                push(lp, TransferEvent::DONE);
            }
            Some(Script::Silent) => push(lp, TransferEvent::WROTE_BODY),
            Some(Script::IoError) => {
                push(lp, TransferEvent::WROTE_BODY);
                push(lp, TransferEvent::IO_ERROR);
            }
            _ => {}
        }
        (read, write)
    }

    fn cancel_connect(&mut self, tag: ConnectHandle) {
        self.state.borrow_mut().cancelled_connects.push(tag);
    }

    fn cancel_read(&mut self, tag: ReadHandle) {
        self.state.borrow_mut().cancelled_reads.push(tag);
    }

    fn cancel_write(&mut self, tag: WriteHandle) {
        self.state.borrow_mut().cancelled_writes.push(tag);
    }

    fn release_connection(&mut self, connection: ConnectionHandle) {
        self.state.borrow_mut().released_connections.push(connection);
    }
}

/// Session plus the shared mock state behind its transfer engine.
pub struct Test {
    pub session: Session,
    pub state: Rc<RefCell<MockState>>,
}

#[allow(dead_code)]
impl Test {
    pub fn new() -> Self {
        let state = Rc::new(RefCell::new(MockState::default()));
        let session = Session::new(Box::new(MockTransfer {
            state: Rc::clone(&state),
        }));
        Test { session, state }
    }

    pub fn script(&self, script: Script) {
        self.state.borrow_mut().scripts.push_back(script);
    }

    pub fn msg(&mut self, url: &str) -> MessageKey {
        let uri = Uri::parse(url).expect("test url must parse");
        let ctx = self
            .session
            .context_from_uri(uri)
            .expect("test context must resolve");
        self.session.new_message(ctx, None)
    }

    /// Pumps the loop dry, advancing past timer deadlines.
    pub fn run(&mut self) {
        while self.session.iterate(true) {}
    }

    /// Pumps until the message reaches the wanted status.
    pub fn run_until_status(&mut self, msg_key: MessageKey, status: MessageStatus) {
        while self.session.message(msg_key).map(|msg| msg.status) != Some(status) {
            assert!(
                self.session.iterate(true),
                "loop ran dry before status {:?}",
                status
            );
        }
    }

    pub fn started(&self) -> usize {
        self.state.borrow().started
    }
}

/// One observed completion callback invocation.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub errorcode: u32,
    pub errorclass: ErrorClass,
    pub errorphrase: String,
    pub status: MessageStatus,
    pub body: Vec<u8>,
}

/// Records every completion callback invocation for later assertions.
#[derive(Clone, Default)]
pub struct Tracker(pub Rc<RefCell<Vec<Outcome>>>);

#[allow(dead_code)]
impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> CompletionFn {
        let outcomes = Rc::clone(&self.0);
        Box::new(move |session: &mut Session, msg_key: MessageKey| {
            if let Some(msg) = session.message(msg_key) {
                outcomes.borrow_mut().push(Outcome {
                    errorcode: msg.errorcode,
                    errorclass: msg.errorclass,
                    errorphrase: msg.errorphrase.clone(),
                    status: msg.status,
                    body: msg.response.to_vec(),
                });
            }
        })
    }

    pub fn count(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn single(&self) -> Outcome {
        let outcomes = self.0.borrow();
        assert_eq!(outcomes.len(), 1, "expected exactly one completion");
        outcomes[0].clone()
    }
}

/// Asserts that the completion callback ran exactly once with the expected
/// error code and class.
#[macro_export]
macro_rules! assert_completed_once {
    ($tracker:expr, $code:expr, $class:expr) => {{
        let outcome = $tracker.single();
        assert_eq!(outcome.errorcode, $code);
        assert_eq!(outcome.errorclass, $class);
    }};
}
