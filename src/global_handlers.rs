use crate::auth::Auth;
use crate::error::{ErrorClass, KnownError};
use crate::handler::{HandlerEvent, HandlerFn, HandlerResult, UserData};
use crate::kettle_warn;
use crate::log::LogCode;
use crate::message::{Message, MessageFlags};
use crate::session::{MessageKey, Session};
use crate::uri::Uri;

/// Filter shape for the fixed table; built-ins own no strings.
pub(crate) enum BuiltinFilter {
    HEADER(&'static str),
    ERROR_CODE(u32),
}

/// One process-wide handler. These run between the per-message FIRST and
/// LAST phases, in table order.
pub(crate) struct BuiltinHandler {
    pub name: &'static str,
    pub event: HandlerEvent,
    pub filter: BuiltinFilter,
    pub callback: HandlerFn,
}

/// Handle redirect response codes 300, 301, 302, 303 and 305; handle
/// authorization; handle proxy authorization.
static GLOBAL_HANDLERS: [BuiltinHandler; 3] = [
    BuiltinHandler {
        name: "redirect",
        event: HandlerEvent::HEADERS,
        filter: BuiltinFilter::HEADER("Location"),
        callback: redirect_handler,
    },
    BuiltinHandler {
        name: "authenticate",
        event: HandlerEvent::HEADERS,
        filter: BuiltinFilter::ERROR_CODE(401),
        callback: authenticate_handler,
    },
    BuiltinHandler {
        name: "proxy-authenticate",
        event: HandlerEvent::HEADERS,
        filter: BuiltinFilter::ERROR_CODE(407),
        callback: proxy_authenticate_handler,
    },
];

pub(crate) fn table() -> &'static [BuiltinHandler] {
    &GLOBAL_HANDLERS
}

pub(crate) fn builtin_filter_matches(msg: &Message, filter: &BuiltinFilter) -> bool {
    match filter {
        BuiltinFilter::HEADER(name) => msg.response_headers.get_one(name).is_some(),
        BuiltinFilter::ERROR_CODE(code) => msg.errorcode == *code,
    }
}

/// Follows a 3xx response to the URL in its Location header, carrying the
/// original URI's credentials along when the target has none.
fn redirect_handler(
    session: &mut Session,
    msg_key: MessageKey,
    _user_data: Option<&UserData>,
) -> HandlerResult {
    let (old_uri, new_loc) = {
        let msg = match session.messages.get(&msg_key) {
            Some(msg) => msg,
            None => return HandlerResult::CONTINUE,
        };
        if msg.errorclass != ErrorClass::REDIRECT || msg.flags.contains(MessageFlags::NO_REDIRECT) {
            return HandlerResult::CONTINUE;
        }
        let new_loc = match msg.response_headers.get_one("Location") {
            Some(new_loc) => new_loc.to_string(),
            None => return HandlerResult::CONTINUE,
        };
        (msg.context.uri().clone(), new_loc)
    };

    let mut new_uri = match Uri::parse(&new_loc) {
        Some(new_uri) => new_uri,
        None => return invalid_redirect(session, msg_key, &new_loc),
    };

    // Copy auth info from the original URI.
    if old_uri.user.is_some() && new_uri.user.is_none() {
        new_uri.set_auth(old_uri.user, old_uri.password, old_uri.authmech);
    }

    let new_ctx = match session.context_from_uri(new_uri) {
        Some(new_ctx) => new_ctx,
        None => return invalid_redirect(session, msg_key, &new_loc),
    };
    if let Some(msg) = session.messages.get_mut(&msg_key) {
        msg.set_context(new_ctx);
    }
    HandlerResult::RESEND
}

fn invalid_redirect(session: &mut Session, msg_key: MessageKey, new_loc: &str) -> HandlerResult {
    kettle_warn!(
        session.logger,
        LogCode::INVALID_REDIRECT_URL,
        format!("Redirect to unusable location {}", new_loc)
    );
    if let Some(msg) = session.messages.get_mut(&msg_key) {
        msg.set_error_full(KnownError::MALFORMED, "Invalid Redirect URL");
    }
    HandlerResult::RESTART
}

fn authenticate_handler(
    session: &mut Session,
    msg_key: MessageKey,
    _user_data: Option<&UserData>,
) -> HandlerResult {
    authorize(session, msg_key, false)
}

fn proxy_authenticate_handler(
    session: &mut Session,
    msg_key: MessageKey,
    _user_data: Option<&UserData>,
) -> HandlerResult {
    authorize(session, msg_key, true)
}

/// Negotiates authentication after a 401 or 407: parses the challenge,
/// finds credentials (endpoint URI first, then the process-wide auth
/// callback), and binds the resulting auth to the endpoint origin for the
/// resend. Failures record a CANT_AUTHENTICATE[_PROXY] error and restart
/// the pipeline so filters see the new error state.
fn authorize(session: &mut Session, msg_key: MessageKey, proxy: bool) -> HandlerResult {
    let ctx = if proxy {
        match session.proxy() {
            Some(ctx) => ctx,
            None => return cant_authenticate(session, msg_key, proxy),
        }
    } else {
        match session.messages.get(&msg_key) {
            Some(msg) => msg.context(),
            None => return HandlerResult::CONTINUE,
        }
    };

    let challenge_header = if proxy { "Proxy-Authenticate" } else { "WWW-Authenticate" };
    let challenges: Vec<String> = match session
        .messages
        .get(&msg_key)
        .and_then(|msg| msg.response_headers.get_all(challenge_header))
    {
        Some(values) => values.to_vec(),
        None => return cant_authenticate(session, msg_key, proxy),
    };

    let mut auth = match Auth::from_challenges(&challenges) {
        Some(auth) => auth,
        None => {
            kettle_warn!(
                session.logger,
                LogCode::UNKNOWN_AUTH_SCHEME,
                format!("No usable challenge in {}", challenge_header)
            );
            let errcode = auth_errcode(proxy);
            let errphrase = if proxy {
                "Unknown authentication scheme required by proxy"
            } else {
                "Unknown authentication scheme required"
            };
            if let Some(msg) = session.messages.get_mut(&msg_key) {
                msg.set_error_full(errcode, errphrase);
            }
            return HandlerResult::RESTART;
        }
    };

    // Call the registered authenticate callback so it may fill in
    // credentials the URI does not carry.
    let mut uri = ctx.uri().clone();
    if uri.user.is_none() {
        if let Some(auth_fn) = session.auth_callback.as_mut() {
            auth_fn(auth.scheme(), &mut uri, auth.realm());
        }
    }
    if uri.user.is_none() {
        return cant_authenticate(session, msg_key, proxy);
    }

    // Initialize with auth data (possibly returned from the auth callback).
    auth.initialize(&uri);

    if let Some(old_auth) = ctx.auth() {
        if !auth.supersedes(&old_auth) {
            return cant_authenticate(session, msg_key, proxy);
        }
    }

    ctx.bind_auth(auth);

    HandlerResult::RESEND
}

fn auth_errcode(proxy: bool) -> u32 {
    if proxy {
        KnownError::CANT_AUTHENTICATE_PROXY
    } else {
        KnownError::CANT_AUTHENTICATE
    }
}

fn cant_authenticate(session: &mut Session, msg_key: MessageKey, proxy: bool) -> HandlerResult {
    kettle_warn!(
        session.logger,
        LogCode::MISSING_CREDENTIALS,
        "No usable credentials for authentication retry"
    );
    if let Some(msg) = session.messages.get_mut(&msg_key) {
        msg.set_error(auth_errcode(proxy));
    }
    HandlerResult::RESTART
}
