use crate::error::ErrorClass;
use crate::global_handlers::{self, BuiltinHandler};
use crate::log::LogCode;
use crate::{kettle_error, kettle_warn};
use crate::main_loop::TimerId;
use crate::message::{Message, MessageStatus};
use crate::session::{MessageKey, Session};
use std::any::Any;
use std::rc::Rc;

/// Lifecycle events a handler can subscribe to.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum HandlerEvent {
    PREPARE,
    HEADERS,
    DATA,
    DATA_SENT,
    FINISHED,
}

/// Positions a per-message handler before or after the built-in globals.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum HandlerPhase {
    FIRST,
    LAST,
}

/// Gates handler invocation at its event. Strings are owned by the handler.
#[derive(Clone, Debug)]
pub enum HandlerFilter {
    /// Always fires.
    ANY,
    /// Fires when the response headers contain the named header.
    HEADER(String),
    /// Fires when the message error code equals the given code.
    ERROR_CODE(u32),
    /// Fires when the message error class equals the given class.
    ERROR_CLASS(ErrorClass),
    /// Never fires from the pipeline; fires from its own timer after the
    /// given number of seconds.
    TIMEOUT(u32),
}

/// What a handler callback tells the dispatch engine to do next.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum HandlerResult {
    /// Proceed to the next handler.
    CONTINUE,
    /// Stop the pipeline.
    STOP,
    /// Terminate the message with its current error.
    KILL,
    /// Requeue the message with its saved completion callback.
    RESEND,
    /// Re-run the pipeline for this event from the top.
    RESTART,
}

/// Opaque per-handler user data.
pub type UserData = Rc<dyn Any>;

/// Handler callback. Plain fn pointers keep removal-by-callback meaningful.
pub type HandlerFn = fn(&mut Session, MessageKey, Option<&UserData>) -> HandlerResult;

/// One registered per-message handler.
pub struct Handler {
    pub(crate) id: u32,
    pub(crate) name: Option<String>,
    pub(crate) event: HandlerEvent,
    pub(crate) phase: HandlerPhase,
    pub(crate) filter: HandlerFilter,
    pub(crate) callback: HandlerFn,
    pub(crate) user_data: Option<UserData>,
    pub(crate) timeout_tag: Option<TimerId>,
}

impl Handler {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn event(&self) -> HandlerEvent {
        self.event
    }
}

/// A RESTART storm past this many re-entries is reported and abandoned.
const RESTART_LIMIT: u32 = 64;

/// What one handler invocation did to the pipeline.
enum Disposition {
    /// Keep going.
    CONTINUE,
    /// The pipeline stopped; the caller may keep driving the message.
    STOPPED,
    /// The message was completed or requeued; the caller must let go.
    CONSUMED,
    /// Re-evaluate the pipeline against the mutated message.
    RESTART,
}

fn filter_matches(msg: &Message, filter: &HandlerFilter) -> bool {
    match filter {
        HandlerFilter::ANY => true,
        HandlerFilter::HEADER(name) => msg.response_headers.get_one(name).is_some(),
        HandlerFilter::ERROR_CODE(code) => msg.errorcode == *code,
        HandlerFilter::ERROR_CLASS(class) => msg.errorclass == *class,
        HandlerFilter::TIMEOUT(_) => false,
    }
}

/// Interprets one handler's result against the message's current state.
fn interpret(
    session: &mut Session,
    msg_key: MessageKey,
    event: HandlerEvent,
    result: HandlerResult,
) -> Disposition {
    let (status, errorclass) = match session.messages.get(&msg_key) {
        Some(msg) => (msg.status, msg.errorclass),
        // The callback destroyed its own message.
        None => return Disposition::CONSUMED,
    };
    match result {
        HandlerResult::STOP => {
            if event == HandlerEvent::FINISHED && errorclass != ErrorClass::INFORMATIONAL {
                session.issue_callback(msg_key);
                Disposition::CONSUMED
            } else {
                Disposition::STOPPED
            }
        }
        HandlerResult::KILL => {
            session.issue_callback(msg_key);
            Disposition::CONSUMED
        }
        HandlerResult::RESEND => {
            if status != MessageStatus::QUEUED {
                session.requeue(msg_key);
            }
            Disposition::CONSUMED
        }
        HandlerResult::RESTART => Disposition::RESTART,
        HandlerResult::CONTINUE => {
            // A handler that requeued through a side channel is a resend.
            if status == MessageStatus::QUEUED {
                Disposition::CONSUMED
            } else {
                Disposition::CONTINUE
            }
        }
    }
}

/// Runs one per-message handler if its event, phase and filter match. The
/// handler is re-resolved by id so a callback earlier in the pipeline may
/// have removed it.
fn run_message_handler(
    session: &mut Session,
    msg_key: MessageKey,
    event: HandlerEvent,
    phase: HandlerPhase,
    handler_id: u32,
) -> Disposition {
    let (callback, user_data) = {
        let msg = match session.messages.get(&msg_key) {
            Some(msg) => msg,
            None => return Disposition::CONSUMED,
        };
        let handler = match msg.handlers.iter().find(|h| h.id == handler_id) {
            Some(handler) => handler,
            None => return Disposition::CONTINUE,
        };
        if handler.event != event || handler.phase != phase {
            return Disposition::CONTINUE;
        }
        if !filter_matches(msg, &handler.filter) {
            return Disposition::CONTINUE;
        }
        (handler.callback, handler.user_data.clone())
    };
    let result = callback(session, msg_key, user_data.as_ref());
    interpret(session, msg_key, event, result)
}

/// Runs one built-in handler if its event and filter match.
fn run_builtin_handler(
    session: &mut Session,
    msg_key: MessageKey,
    event: HandlerEvent,
    builtin: &BuiltinHandler,
) -> Disposition {
    {
        let msg = match session.messages.get(&msg_key) {
            Some(msg) => msg,
            None => return Disposition::CONSUMED,
        };
        if builtin.event != event || !global_handlers::builtin_filter_matches(msg, &builtin.filter) {
            return Disposition::CONTINUE;
        }
    }
    let result = (builtin.callback)(session, msg_key, None);
    interpret(session, msg_key, event, result)
}

/// Runs every per-message handler of one phase, in registration order.
fn run_message_pass(
    session: &mut Session,
    msg_key: MessageKey,
    event: HandlerEvent,
    phase: HandlerPhase,
) -> Disposition {
    let handler_ids: Vec<u32> = match session.messages.get(&msg_key) {
        Some(msg) => msg.handlers.iter().map(|h| h.id).collect(),
        None => return Disposition::CONSUMED,
    };
    for handler_id in handler_ids {
        match run_message_handler(session, msg_key, event, phase, handler_id) {
            Disposition::CONTINUE => {}
            other => return other,
        }
    }
    Disposition::CONTINUE
}

/// Runs every built-in handler, in table order.
fn run_global_pass(session: &mut Session, msg_key: MessageKey, event: HandlerEvent) -> Disposition {
    for builtin in global_handlers::table() {
        match run_builtin_handler(session, msg_key, event, builtin) {
            Disposition::CONTINUE => {}
            other => return other,
        }
    }
    Disposition::CONTINUE
}

/// Runs the handler pipeline for one lifecycle event: per-message FIRST
/// handlers in registration order, then the built-in globals, then
/// per-message LAST handlers. After a full pass at FINISHED with a
/// non-informational error class, the completion callback is issued.
///
/// Returns true when the message was consumed (completion callback issued
/// or requeued); false when the caller may continue driving it.
pub(crate) fn run_handlers(session: &mut Session, msg_key: MessageKey, event: HandlerEvent) -> bool {
    let mut restarts = 0u32;
    'restart: loop {
        if restarts > RESTART_LIMIT {
            kettle_error!(
                session.logger,
                LogCode::HANDLER_RESTART_LIMIT,
                format!("Handler pipeline for {:?} restarted {} times", event, restarts)
            );
            return false;
        }

        // Pre-global handlers
        match run_message_pass(session, msg_key, event, HandlerPhase::FIRST) {
            Disposition::CONTINUE => {}
            Disposition::STOPPED => return false,
            Disposition::CONSUMED => return true,
            Disposition::RESTART => {
                restarts += 1;
                continue 'restart;
            }
        }

        // Global handlers
        match run_global_pass(session, msg_key, event) {
            Disposition::CONTINUE => {}
            Disposition::STOPPED => return false,
            Disposition::CONSUMED => return true,
            Disposition::RESTART => {
                restarts += 1;
                continue 'restart;
            }
        }

        // Post-global handlers
        match run_message_pass(session, msg_key, event, HandlerPhase::LAST) {
            Disposition::CONTINUE => {}
            Disposition::STOPPED => return false,
            Disposition::CONSUMED => return true,
            Disposition::RESTART => {
                restarts += 1;
                continue 'restart;
            }
        }

        // Issue the final callback once the exchange is really done.
        let errorclass = match session.messages.get(&msg_key) {
            Some(msg) => msg.errorclass,
            None => return true,
        };
        if event == HandlerEvent::FINISHED && errorclass != ErrorClass::INFORMATIONAL {
            session.issue_callback(msg_key);
            return true;
        }
        return false;
    }
}

/// Fires a timed handler from its timer. The handler only runs if its
/// declared lifecycle event has not happened yet; each event has its own
/// liveness gate. KILL cancels the message, RESEND requeues it with the
/// saved completion callback; the timer is one-shot either way.
pub(crate) fn fire_timeout(session: &mut Session, msg_key: MessageKey, handler_id: u32) {
    let (event, callback, user_data, status, headers_empty, has_server_message) = {
        let msg = match session.messages.get_mut(&msg_key) {
            Some(msg) => msg,
            None => return,
        };
        let has_server_message = msg.handlers.iter().any(|h| {
            h.name
                .as_ref()
                .map(|name| name.eq_ignore_ascii_case("server-message"))
                .unwrap_or(false)
        });
        let status = msg.status;
        let headers_empty = msg.response_headers.is_empty();
        let handler = match msg.handlers.iter_mut().find(|h| h.id == handler_id) {
            Some(handler) => handler,
            None => return,
        };
        handler.timeout_tag = None;
        (
            handler.event,
            handler.callback,
            handler.user_data.clone(),
            status,
            headers_empty,
            has_server_message,
        )
    };

    let expired = match event {
        HandlerEvent::PREPARE => status < MessageStatus::SENDING_REQUEST,
        HandlerEvent::HEADERS | HandlerEvent::DATA => {
            !(status >= MessageStatus::READING_RESPONSE && !headers_empty)
        }
        HandlerEvent::FINISHED => status != MessageStatus::FINISHED,
        HandlerEvent::DATA_SENT => !has_server_message,
    };
    if !expired {
        return;
    }
    kettle_warn!(
        session.logger,
        LogCode::TIMEOUT_EXPIRED,
        format!("Timed handler for {:?} fired before its event", event)
    );

    match callback(session, msg_key, user_data.as_ref()) {
        HandlerResult::KILL => session.cancel(msg_key),
        HandlerResult::RESEND => session.requeue(msg_key),
        _ => {}
    }
}
