use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::AuthenticError;

#[cfg(feature = "jwt")]
mod jwt;
mod memoized;
mod simple;
mod timeout;

#[cfg(feature = "jwt")]
pub use jwt::*;
pub use memoized::*;
pub use simple::*;
pub use timeout::*;

/// A backing operation that produces fresh credentials.
///
/// This is usually a call to an identity service (an OAuth token exchange, a Keystone login),
/// but can be a fixed identity/secret pair.
///
/// Failures are reported through the variants of [`AuthenticError`]:
/// - [`AuthenticError::Authorization`] with a fatal kind means the identity is rejected and
///   fetching again is pointless.
/// - Anything else is treated as transient, and the next access fetches again.
pub trait CredentialSource {
    type Credentials;

    fn fetch(&self) -> Result<Self::Credentials, AuthenticError>;
}

impl<S: CredentialSource + ?Sized> CredentialSource for Arc<S> {
    type Credentials = S::Credentials;

    fn fetch(&self) -> Result<Self::Credentials, AuthenticError> {
        (**self).fetch()
    }
}

pub trait FetchedToken {
    fn token(&self) -> &[u8];
}

pub trait FetchedUsernamePassword {
    fn username(&self) -> &str;
    fn password(&self) -> &str;
}

impl<T: FetchedToken + ?Sized> FetchedToken for Arc<T> {
    fn token(&self) -> &[u8] {
        (**self).token()
    }
}

impl<T: FetchedUsernamePassword + ?Sized> FetchedUsernamePassword for Arc<T> {
    fn username(&self) -> &str {
        (**self).username()
    }
    fn password(&self) -> &str {
        (**self).password()
    }
}

/// An identity and secret, with an optional session token derived from them by a login call.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    identity: Cow<'static, str>,
    secret: Cow<'static, str>,
    session_token: Option<Vec<u8>>,
}

impl SessionCredentials {
    pub fn new(identity: impl Into<Cow<'static, str>>, secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
            session_token: None,
        }
    }

    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn session_token(&self) -> Option<&[u8]> {
        self.session_token.as_deref()
    }
}

// Secrets stay out of logs.
impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// The session token, or the secret itself for APIs that take the secret as a token.
impl FetchedToken for SessionCredentials {
    fn token(&self) -> &[u8] {
        match &self.session_token {
            Some(token) => token,
            None => self.secret.as_bytes(),
        }
    }
}

impl FetchedUsernamePassword for SessionCredentials {
    fn username(&self) -> &str {
        &self.identity
    }
    fn password(&self) -> &str {
        &self.secret
    }
}

/// A [`CredentialSource`] calling a closure.
///
/// Created with [`from_fn`].
pub struct FnSource<F> {
    f: F,
}

/// Use a closure as the backing fetch.
///
/// The closure may fail with any error type. Errors are classified with
/// [`AuthenticError::from_boxed`], so an [`crate::AuthorizationError`] wrapped inside another
/// error is still recognised.
pub fn from_fn<F, T, E>(f: F) -> FnSource<F>
where
    F: Fn() -> Result<T, E>,
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    FnSource { f }
}

impl<F, T, E> CredentialSource for FnSource<F>
where
    F: Fn() -> Result<T, E>,
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    type Credentials = T;

    fn fetch(&self) -> Result<T, AuthenticError> {
        (self.f)().map_err(|err| AuthenticError::from_boxed(err.into()))
    }
}

impl<F> fmt::Debug for FnSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource").finish_non_exhaustive()
    }
}
