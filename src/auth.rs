use crate::uri::Uri;
use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    multi::many0,
    sequence::{delimited, preceded, separated_pair},
    IResult,
};

/// Recognized challenge schemes, ordered by strength.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum AuthScheme {
    BASIC = 1,
    DIGEST = 2,
}

/// Authentication state negotiated from a challenge and bound to an endpoint
/// origin. Carries the credential material used on retransmission; computing
/// the per-request authorization value is the wire layer's concern.
#[derive(Clone, Debug, PartialEq)]
pub struct Auth {
    scheme: AuthScheme,
    realm: String,
    user: Option<String>,
    /// Scheme credential material. For Basic this is the base64 token.
    token: Option<String>,
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

/// Matches one HTTP token.
fn token<'a>() -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    move |input| take_while1(is_token_char)(input)
}

/// Matches a double-quoted string and returns its contents.
fn quoted_string<'a>() -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    move |input| delimited(char('"'), take_while(|c| c != '"'), char('"'))(input)
}

/// Matches one `name=value` challenge parameter, value either a token or a
/// quoted string.
fn param<'a>() -> impl Fn(&'a str) -> IResult<&'a str, (&'a str, &'a str)> {
    move |input| {
        let (input, _) = take_while(|c| c == ' ' || c == ',')(input)?;
        separated_pair(token(), char('='), alt((quoted_string(), token())))(input)
    }
}

/// Matches one challenge: a scheme token followed by its parameters.
///
/// Returns a tuple of the remaining unconsumed data and the matched scheme
/// and parameter list
fn challenge<'a>() -> impl Fn(&'a str) -> IResult<&'a str, (&'a str, Vec<(&'a str, &'a str)>)> {
    move |input| {
        let (input, _) = take_while(|c| c == ' ')(input)?;
        let (input, scheme) = token()(input)?;
        let (input, params) = many0(preceded(take_while(|c| c == ' '), param()))(input)?;
        Ok((input, (scheme, params)))
    }
}

impl Auth {
    /// Builds an Auth from the value list of a WWW-Authenticate or
    /// Proxy-Authenticate header. When several values carry recognized
    /// schemes the strongest wins.
    ///
    /// Returns None when no value carries a recognized scheme.
    pub fn from_challenges(values: &[String]) -> Option<Auth> {
        let mut best: Option<Auth> = None;
        for value in values {
            let (scheme, params) = match challenge()(value) {
                Ok((_, parsed)) => parsed,
                Err(_) => continue,
            };
            let scheme = if scheme.eq_ignore_ascii_case("basic") {
                AuthScheme::BASIC
            } else if scheme.eq_ignore_ascii_case("digest") {
                AuthScheme::DIGEST
            } else {
                continue;
            };
            if best.as_ref().map(|b| b.scheme >= scheme).unwrap_or(false) {
                continue;
            }
            let realm = params
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("realm"))
                .map(|(_, value)| value.to_string())
                .unwrap_or_default();
            best = Some(Auth {
                scheme,
                realm,
                user: None,
                token: None,
            });
        }
        best
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Initializes the auth with the credentials carried by the URI,
    /// possibly populated by the process-wide auth callback.
    pub fn initialize(&mut self, uri: &Uri) {
        self.user = uri.user.clone();
        if let Some(user) = &uri.user {
            let password = uri.password.as_deref().unwrap_or("");
            self.token = match self.scheme {
                AuthScheme::BASIC => Some(base64::encode(format!("{}:{}", user, password))),
                // The digest response is computed per request by the wire
                // layer from the challenge nonce; retain the raw material.
                AuthScheme::DIGEST => Some(format!("{}:{}:{}", user, self.realm, password)),
            };
        }
    }

    /// Whether this auth replaces a previously bound one. Re-binding an
    /// identical auth would retry a challenge that already failed.
    pub fn supersedes(&self, prior: &Auth) -> bool {
        self.scheme != prior.scheme || self.realm != prior.realm || self.token != prior.token
    }

    /// The request Authorization value for schemes that need no per-request
    /// material.
    pub fn authorization(&self) -> Option<String> {
        match self.scheme {
            AuthScheme::BASIC => self.token.as_ref().map(|token| format!("Basic {}", token)),
            AuthScheme::DIGEST => None,
        }
    }
}
