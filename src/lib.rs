//! # renewal
//!
//! Keep HTTP API calls authenticated when credentials expire.
//!
//! Many cloud APIs hand out session tokens that silently expire. When that happens the API
//! answers with `401 Unauthorized` and some provider-specific message saying the session needs
//! to be renewed. Other `401` responses mean the identity is simply not allowed in, and
//! retrying them only hammers the identity service.
//!
//! `renewal` separates those cases and performs the renew-and-retry dance:
//!
//! ```ignore
//! // One-time code, per provider context:
//! let credentials = Arc::new(
//!     MemoizedCredential::new(keystone_login).with_expiration(Duration::from_secs(60)),
//! );
//! let executor = CommandExecutor::new(
//!     ReqwestTransport::new(reqwest::blocking::Client::new()),
//!     credentials,
//!     HeaderAuthenticator::new("X-Auth-Token"),
//! )
//! .with_policy(RetryOnRenew::new().with_max_failures(2));
//!
//! // Per-request code:
//! let request = Request::get("https://compute.example.com/v2/servers".parse()?);
//! let response = executor.execute(&mut Command::new("listServers", request))?;
//! ```
//!
//! The executor applies the current credentials to the request and sends it. If the response
//! is classified as a renewable authorization failure, the cached credentials are invalidated,
//! fetched again, re-applied and the request is resent. A fatal authorization failure is
//! returned to the caller and also recorded in the credential cache, so that every later caller
//! fails fast instead of repeating a login that is known to be rejected.
//!
//! The credential cache ([`credential::MemoizedCredential`]) performs at most one backing fetch
//! at a time regardless of how many threads ask for credentials, and keeps the result for a
//! configurable session interval.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

pub mod authenticator;
pub mod clock;
pub mod command;
pub mod config;
pub mod credential;
pub mod exchange;
pub mod executor;
pub mod policy;
pub mod sensitive;

#[cfg(feature = "reqwest_blocking")]
pub mod reqwest;

pub use authenticator::{
    BasicAuthenticator, BearerAuthenticator, HeaderAuthenticator, RequestAuthenticator,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandState};
pub use config::RenewalConfig;
pub use exchange::{Request, Response};
pub use executor::{CommandExecutor, Transport};
pub use policy::{MessageClassifier, ResponseClassifier, RetryDecision, RetryOnRenew};

/// Whether an authorization failure can be fixed by logging in again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthorizationErrorKind {
    /// The credentials expired. A fresh login is expected to succeed.
    Renewable,
    /// The identity is not allowed in. Logging in again will not help.
    Fatal,
}

impl std::fmt::Display for AuthorizationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Renewable => f.write_str("renewable"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

/// An authorization failure reported by an API or by a credential fetch.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{kind} authorization failure: {message}")]
pub struct AuthorizationError {
    kind: AuthorizationErrorKind,
    message: String,
    status: Option<StatusCode>,
}

impl AuthorizationError {
    pub fn renewable(message: impl Into<String>) -> Self {
        Self {
            kind: AuthorizationErrorKind::Renewable,
            message: message.into(),
            status: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: AuthorizationErrorKind::Fatal,
            message: message.into(),
            status: None,
        }
    }

    /// Attach the HTTP status of the response this failure was read from.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn kind(&self) -> AuthorizationErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn is_renewable(&self) -> bool {
        self.kind == AuthorizationErrorKind::Renewable
    }
}

/// Coarse classification of an [`AuthenticError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureClass {
    RenewableAuth,
    FatalAuth,
    Transient,
    BudgetExceeded,
}

#[derive(Error, Debug, Clone)]
pub enum AuthenticError {
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error("gave up renewing credentials after {failures} failures (last status {status})")]
    RetryBudgetExceeded { failures: u32, status: StatusCode },

    #[error("credential fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("credential fetch failed: {0}")]
    Fetch(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    #[error("transport failed: {0}")]
    Transport(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    #[error("invalid credential header: {0}")]
    InvalidHeader(String),

    #[error("{0}")]
    Other(String),
}

impl AuthenticError {
    /// Wrap an error raised while fetching credentials.
    ///
    /// Authorization failures nested anywhere in the source chain are preserved, see
    /// [`AuthenticError::from_boxed`].
    pub fn fetch<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::from_boxed(Box::new(error))
    }

    /// Wrap an error raised by the HTTP transport.
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Arc::new(error))
    }

    /// Classify an arbitrary error.
    ///
    /// Walks the `source()` chain looking for an [`AuthorizationError`] or an
    /// [`AuthenticError`]. Anything else is a transient [`AuthenticError::Fetch`] failure.
    pub fn from_boxed(error: Box<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(&*error);
        while let Some(err) = cause {
            if let Some(authorization) = err.downcast_ref::<AuthorizationError>() {
                return Self::Authorization(authorization.clone());
            }
            if let Some(authentic) = err.downcast_ref::<AuthenticError>() {
                return authentic.clone();
            }
            cause = err.source();
        }
        Self::Fetch(Arc::from(error))
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::Authorization(err) if err.is_renewable() => FailureClass::RenewableAuth,
            Self::Authorization(_) => FailureClass::FatalAuth,
            Self::RetryBudgetExceeded { .. } => FailureClass::BudgetExceeded,
            _ => FailureClass::Transient,
        }
    }

    /// The authorization failure carried by this error, if any.
    pub fn authorization(&self) -> Option<&AuthorizationError> {
        match self {
            Self::Authorization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::convert::Infallible> for AuthenticError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl From<http::header::InvalidHeaderValue> for AuthenticError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for AuthenticError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}
