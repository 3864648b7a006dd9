//! Settings for one provider context.

use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::credential::{CredentialSource, MemoizedCredential, TimeoutSource};
use crate::policy::{MessageClassifier, RetryOnRenew, DEFAULT_MAX_FAILURES};
use crate::AuthenticError;

/// Timeout applied by [`RenewalConfig::memoize_bounded`] when none is configured.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Renewal settings, usually deserialized from the application's own configuration.
///
/// Every field has a default, so a partial document is enough:
///
/// ```
/// let config: renewal::RenewalConfig =
///     serde_json::from_str(r#"{"session_interval_secs": 300, "renew_markers": ["lease renew"]}"#)
///         .unwrap();
/// assert_eq!(config.max_failures, 2);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// How long fetched credentials are reused.
    pub session_interval_secs: u64,
    /// How many renewals one command may perform.
    pub max_failures: u32,
    /// The status the provider uses for authorization failures.
    pub unauthorized_status: u16,
    /// Substrings of the error message that mean "please renew".
    pub renew_markers: Vec<String>,
    /// JSON keys searched for the error message.
    pub message_keys: Vec<String>,
    /// Renew on an unauthorized response with no readable message.
    pub retry_on_empty_body: bool,
    /// Upper bound on one credential fetch, in milliseconds.
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            session_interval_secs: 60,
            max_failures: DEFAULT_MAX_FAILURES,
            unauthorized_status: StatusCode::UNAUTHORIZED.as_u16(),
            renew_markers: vec!["renew".to_owned(), "expired".to_owned()],
            message_keys: vec!["message".to_owned()],
            retry_on_empty_body: false,
            fetch_timeout_ms: None,
        }
    }
}

impl RenewalConfig {
    pub fn session_interval(&self) -> Duration {
        Duration::from_secs(self.session_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    pub fn classifier(&self) -> Result<MessageClassifier, AuthenticError> {
        let status = StatusCode::from_u16(self.unauthorized_status)
            .map_err(|err| AuthenticError::Other(format!("unauthorized_status: {err}")))?;
        Ok(MessageClassifier::new()
            .with_unauthorized_status(status)
            .with_renew_markers(self.renew_markers.clone())
            .with_message_keys(self.message_keys.clone())
            .with_retry_on_empty_body(self.retry_on_empty_body))
    }

    pub fn policy(&self) -> Result<RetryOnRenew, AuthenticError> {
        Ok(RetryOnRenew::with_classifier(self.classifier()?).with_max_failures(self.max_failures))
    }

    /// Cache credentials from `source` for the session interval.
    ///
    /// `fetch_timeout_ms` is not applied here, since the fetch is called directly. Use
    /// [`RenewalConfig::memoize_bounded`] to bound it.
    pub fn memoize<S: CredentialSource>(&self, source: S) -> MemoizedCredential<S> {
        MemoizedCredential::new(source).with_expiration(self.session_interval())
    }

    /// Like [`RenewalConfig::memoize`], with each fetch bounded by `fetch_timeout_ms`, or by
    /// [`DEFAULT_FETCH_TIMEOUT`] when that is not set.
    pub fn memoize_bounded<S>(&self, source: S) -> MemoizedCredential<TimeoutSource<S>>
    where
        S: CredentialSource + Send + Sync + 'static,
        S::Credentials: Send + 'static,
    {
        let timeout = self.fetch_timeout().unwrap_or(DEFAULT_FETCH_TIMEOUT);
        self.memoize(TimeoutSource::new(source, timeout))
    }
}
