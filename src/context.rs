use crate::auth::Auth;
use crate::uri::Uri;
use std::cell::RefCell;

/// State shared by every context resolved against the same
/// (scheme, host, port) origin. The bound auth lives here so a retried
/// message finds it regardless of which context instance it holds.
#[derive(Debug, Default)]
pub struct Origin {
    auth: RefCell<Option<Auth>>,
}

impl Origin {
    pub fn new() -> Self {
        Self {
            auth: RefCell::new(None),
        }
    }
}

/// An endpoint context: a parsed URI plus its origin affinity. Contexts are
/// shared through `Rc`; a message holds exactly one.
#[derive(Debug)]
pub struct Context {
    uri: Uri,
    origin: std::rc::Rc<Origin>,
}

impl Context {
    pub(crate) fn new(uri: Uri, origin: std::rc::Rc<Origin>) -> Self {
        Self { uri, origin }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Looks up the auth currently bound to this context's origin.
    pub fn auth(&self) -> Option<Auth> {
        self.origin.auth.borrow().clone()
    }

    /// Binds an auth to this context's origin, replacing any prior one.
    pub fn bind_auth(&self, auth: Auth) {
        *self.origin.auth.borrow_mut() = Some(auth);
    }
}
