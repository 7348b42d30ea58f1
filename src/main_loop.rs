use crate::session::MessageKey;
use crate::transfer::TransferEvent;
use std::collections::VecDeque;

/// Tag for an armed one-shot timeout.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TimerId(u64);

/// Work items dispatched by the loop.
#[derive(Debug)]
pub enum Source {
    /// Drain the queued-message list and start their exchanges.
    PROCESS_QUEUE,
    /// A transfer engine event for one exchange of one message.
    TRANSFER {
        msg: MessageKey,
        exchange: u64,
        event: TransferEvent,
    },
    /// A timed handler's timer expired.
    HANDLER_TIMEOUT { msg: MessageKey, handler: u32 },
}

struct Timeout {
    id: TimerId,
    due_ms: u64,
    source: Source,
}

/// The ambient cooperative loop: ready sources dispatch FIFO, timers fire
/// one-shot. The clock is a monotonic millisecond counter; a blocking
/// iteration with no ready source advances it to the earliest deadline, so
/// timer semantics are exact without wall-clock sleeps.
#[derive(Default)]
pub struct MainLoop {
    now_ms: u64,
    next_timer: u64,
    timeouts: Vec<Timeout>,
    pending: VecDeque<Source>,
}

impl MainLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current loop time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Schedules a source for immediate dispatch, after everything already
    /// pending.
    pub fn push(&mut self, source: Source) {
        self.pending.push_back(source);
    }

    /// Arms a one-shot timeout that dispatches the source after the given
    /// number of seconds.
    pub fn add_timeout(&mut self, seconds: u32, source: Source) -> TimerId {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        self.timeouts.push(Timeout {
            id,
            due_ms: self.now_ms + u64::from(seconds) * 1000,
            source,
        });
        id
    }

    /// Disarms a timeout. Removing an already-fired timer is a no-op.
    pub fn remove_timeout(&mut self, id: TimerId) {
        self.timeouts.retain(|timeout| timeout.id != id);
    }

    /// True when a source is ready or a timer is armed.
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.timeouts.is_empty()
    }

    /// Takes the next dispatchable source. Ready sources win over timers;
    /// when only timers remain and `block` is set, the clock advances to
    /// the earliest deadline.
    pub fn pop(&mut self, block: bool) -> Option<Source> {
        if let Some(source) = self.pending.pop_front() {
            return Some(source);
        }
        let earliest = self
            .timeouts
            .iter()
            .enumerate()
            .min_by_key(|(_, timeout)| timeout.due_ms)
            .map(|(at, timeout)| (at, timeout.due_ms))?;
        let (at, due_ms) = earliest;
        if due_ms > self.now_ms && !block {
            return None;
        }
        self.now_ms = self.now_ms.max(due_ms);
        Some(self.timeouts.remove(at).source)
    }
}
