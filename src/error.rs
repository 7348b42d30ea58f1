use lazy_static::lazy_static;
use std::collections::HashMap;

/// Partitions the error code space. HTTP status codes map to the first five
/// classes by century; engine codes carry their class in the table below.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ErrorClass {
    /// No error has been recorded yet.
    NONE,
    /// 1xx responses. Suppresses the implicit final callback at FINISHED.
    INFORMATIONAL,
    /// 2xx responses.
    SUCCESS,
    /// 3xx responses.
    REDIRECT,
    /// 4xx responses.
    CLIENT_ERROR,
    /// 5xx responses.
    SERVER_ERROR,
    /// Connection and I/O failures. Terminates synchronous send loops.
    TRANSPORT,
    /// Errors raised by handler callbacks.
    HANDLER,
    /// The message was cancelled.
    CANCELLED,
    /// Malformed peer data or an invalid redirect target.
    MALFORMED,
    /// Authentication against the destination failed.
    CANT_AUTHENTICATE,
    /// Authentication against the proxy failed.
    CANT_AUTHENTICATE_PROXY,
}

/// Export engine error codes. These live below the HTTP status space.
pub struct KnownError;

impl KnownError {
    pub const CANCELLED: u32 = 1;
    pub const CANT_RESOLVE: u32 = 2;
    pub const CANT_RESOLVE_PROXY: u32 = 3;
    pub const CANT_CONNECT: u32 = 4;
    pub const CANT_CONNECT_PROXY: u32 = 5;
    pub const IO_ERROR: u32 = 6;
    pub const MALFORMED: u32 = 7;
    pub const CANT_AUTHENTICATE: u32 = 8;
    pub const CANT_AUTHENTICATE_PROXY: u32 = 9;
}

lazy_static! {
    /// Class and phrase for every known error code. HTTP codes absent from
    /// this table still derive a class from their century.
    static ref ERROR_DEFS: HashMap<u32, (ErrorClass, &'static str)> = {
        let mut defs = HashMap::new();
        defs.insert(KnownError::CANCELLED, (ErrorClass::CANCELLED, "Cancelled"));
        defs.insert(KnownError::CANT_RESOLVE, (ErrorClass::TRANSPORT, "Cannot resolve hostname"));
        defs.insert(
            KnownError::CANT_RESOLVE_PROXY,
            (ErrorClass::TRANSPORT, "Cannot resolve proxy hostname"),
        );
        defs.insert(KnownError::CANT_CONNECT, (ErrorClass::TRANSPORT, "Cannot connect to destination"));
        defs.insert(KnownError::CANT_CONNECT_PROXY, (ErrorClass::TRANSPORT, "Cannot connect to proxy"));
        defs.insert(KnownError::IO_ERROR, (ErrorClass::TRANSPORT, "Connection terminated unexpectedly"));
        defs.insert(
            KnownError::MALFORMED,
            (ErrorClass::MALFORMED, "Malformed data or invalid internal state"),
        );
        defs.insert(
            KnownError::CANT_AUTHENTICATE,
            (ErrorClass::CANT_AUTHENTICATE, "Authentication Failed"),
        );
        defs.insert(
            KnownError::CANT_AUTHENTICATE_PROXY,
            (ErrorClass::CANT_AUTHENTICATE_PROXY, "Proxy Authentication Failed"),
        );
        defs.insert(100, (ErrorClass::INFORMATIONAL, "Continue"));
        defs.insert(101, (ErrorClass::INFORMATIONAL, "Protocol Switch"));
        defs.insert(200, (ErrorClass::SUCCESS, "OK"));
        defs.insert(201, (ErrorClass::SUCCESS, "Created"));
        defs.insert(202, (ErrorClass::SUCCESS, "Accepted"));
        defs.insert(204, (ErrorClass::SUCCESS, "No Content"));
        defs.insert(206, (ErrorClass::SUCCESS, "Partial Content"));
        defs.insert(300, (ErrorClass::REDIRECT, "Multiple Choices"));
        defs.insert(301, (ErrorClass::REDIRECT, "Moved Permanently"));
        defs.insert(302, (ErrorClass::REDIRECT, "Found"));
        defs.insert(303, (ErrorClass::REDIRECT, "See Other"));
        defs.insert(304, (ErrorClass::REDIRECT, "Not Modified"));
        defs.insert(305, (ErrorClass::REDIRECT, "Use Proxy"));
        defs.insert(307, (ErrorClass::REDIRECT, "Temporary Redirect"));
        defs.insert(400, (ErrorClass::CLIENT_ERROR, "Bad Request"));
        defs.insert(401, (ErrorClass::CLIENT_ERROR, "Unauthorized"));
        defs.insert(403, (ErrorClass::CLIENT_ERROR, "Forbidden"));
        defs.insert(404, (ErrorClass::CLIENT_ERROR, "Not Found"));
        defs.insert(405, (ErrorClass::CLIENT_ERROR, "Method Not Allowed"));
        defs.insert(407, (ErrorClass::CLIENT_ERROR, "Proxy Authentication Required"));
        defs.insert(408, (ErrorClass::CLIENT_ERROR, "Request Timeout"));
        defs.insert(500, (ErrorClass::SERVER_ERROR, "Internal Server Error"));
        defs.insert(501, (ErrorClass::SERVER_ERROR, "Not Implemented"));
        defs.insert(502, (ErrorClass::SERVER_ERROR, "Bad Gateway"));
        defs.insert(503, (ErrorClass::SERVER_ERROR, "Service Unavailable"));
        defs
    };
}

/// Derives the error class for a code.
pub fn error_class(code: u32) -> ErrorClass {
    if let Some((class, _)) = ERROR_DEFS.get(&code) {
        return *class;
    }
    match code {
        100..=199 => ErrorClass::INFORMATIONAL,
        200..=299 => ErrorClass::SUCCESS,
        300..=399 => ErrorClass::REDIRECT,
        400..=499 => ErrorClass::CLIENT_ERROR,
        500..=599 => ErrorClass::SERVER_ERROR,
        _ => ErrorClass::NONE,
    }
}

/// Returns the canonical phrase for a code, or "Unknown Error".
pub fn error_phrase(code: u32) -> &'static str {
    if let Some((_, phrase)) = ERROR_DEFS.get(&code) {
        phrase
    } else {
        "Unknown Error"
    }
}

/// True for codes in the transport class, which terminate synchronous sends.
pub fn is_transport(code: u32) -> bool {
    error_class(code) == ErrorClass::TRANSPORT
}
