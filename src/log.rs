use chrono::{DateTime, Utc};
use std::{sync::mpsc::Sender, time::SystemTime};

/// Severity of a logged engine event.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum LogLevel {
    ERROR,
    WARNING,
}

/// Engine log codes.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum LogCode {
    /// A message with a user-owned response buffer was queued.
    RESPONSE_BUFFER_USER_OWNED,
    /// A Location header did not parse as an absolute URL.
    INVALID_REDIRECT_URL,
    /// No recognized scheme in an authentication challenge.
    UNKNOWN_AUTH_SCHEME,
    /// Authentication was required but no credentials could be found.
    MISSING_CREDENTIALS,
    /// A handler kept returning RESTART past the per-dispatch limit.
    HANDLER_RESTART_LIMIT,
    /// A timed handler fired before its lifecycle event arrived.
    TIMEOUT_EXPIRED,
}

/// A single log record.
#[derive(Clone, Debug)]
pub struct Message {
    /// Log message severity.
    pub level: LogLevel,
    /// Log message code.
    pub code: LogCode,
    /// The log message.
    pub msg: String,
    /// Source file the log was raised from.
    pub file: String,
    /// Line number the log was raised from.
    pub line: u32,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
}

/// Sender handle for the session's log channel.
#[derive(Clone)]
pub struct Logger {
    sender: Sender<Message>,
}

impl Logger {
    pub fn new(sender: Sender<Message>) -> Self {
        Self { sender }
    }

    /// Sends one record down the log channel. Records are dropped if the
    /// receiving side is gone.
    pub fn log<S: Into<String>>(&self, level: LogLevel, code: LogCode, msg: S, file: &str, line: u32) {
        let _ = self.sender.send(Message {
            level,
            code,
            msg: msg.into(),
            file: file.to_string(),
            line,
            timestamp: DateTime::<Utc>::from(SystemTime::now()),
        });
    }
}

/// Logs an error-level record with the caller's file and line.
#[macro_export]
macro_rules! kettle_error {
    ($logger:expr, $code:expr, $msg:expr) => {
        $logger.log($crate::log::LogLevel::ERROR, $code, $msg, file!(), line!())
    };
}

/// Logs a warning-level record with the caller's file and line.
#[macro_export]
macro_rules! kettle_warn {
    ($logger:expr, $code:expr, $msg:expr) => {
        $logger.log($crate::log::LogLevel::WARNING, $code, $msg, file!(), line!())
    };
}
