//! Deciding whether a failed attempt is worth renewing credentials for.

use std::borrow::Cow;

use http::header::HeaderName;
use http::StatusCode;
use serde_json::Value;

use crate::{AuthorizationError, Command, Request, Response};

/// Default number of renewals allowed per command.
pub const DEFAULT_MAX_FAILURES: u32 = 2;

/// Per-provider inspection of a response.
///
/// Returns `None` when the response is not an authorization failure. Otherwise returns the
/// failure, classified as renewable or fatal.
pub trait ResponseClassifier {
    fn classify(&self, response: &Response) -> Option<AuthorizationError>;
}

impl<F> ResponseClassifier for F
where
    F: Fn(&Response) -> Option<AuthorizationError>,
{
    fn classify(&self, response: &Response) -> Option<AuthorizationError> {
        self(response)
    }
}

/// Classifies an unauthorized response by the message in its JSON error body.
///
/// A response with the unauthorized status (401 unless configured otherwise) is renewable when
/// the error message contains one of the renew markers, compared case-insensitively. The
/// message is the first string found under one of the message keys, searching nested objects
/// and arrays, so `{"message": ..}`, `{"error": {"message": ..}}` and `[{"message": ..}]` all
/// work.
///
/// An empty or non-JSON body, or one without a message, is fatal unless
/// [`MessageClassifier::with_retry_on_empty_body`] says otherwise.
#[derive(Clone, Debug)]
pub struct MessageClassifier {
    unauthorized: StatusCode,
    renew_markers: Vec<Cow<'static, str>>,
    message_keys: Vec<Cow<'static, str>>,
    retry_on_empty_body: bool,
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self {
            unauthorized: StatusCode::UNAUTHORIZED,
            renew_markers: vec!["renew".into(), "expired".into()],
            message_keys: vec!["message".into()],
            retry_on_empty_body: false,
        }
    }
}

impl MessageClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The status this provider uses for authorization failures.
    #[must_use]
    pub fn with_unauthorized_status(mut self, status: StatusCode) -> Self {
        self.unauthorized = status;
        self
    }

    /// Replace the substrings that mark a message as "please renew".
    #[must_use]
    pub fn with_renew_markers<I, M>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Cow<'static, str>>,
    {
        self.renew_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the JSON keys searched for the error message.
    #[must_use]
    pub fn with_message_keys<I, M>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Cow<'static, str>>,
    {
        self.message_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Treat an unauthorized response without a readable message as renewable.
    #[must_use]
    pub fn with_retry_on_empty_body(mut self, retry: bool) -> Self {
        self.retry_on_empty_body = retry;
        self
    }

    fn is_renewal(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.renew_markers
            .iter()
            .any(|marker| message.contains(&marker.to_lowercase()))
    }

    fn error_message(&self, body: &[u8]) -> Option<String> {
        let value: Value = serde_json::from_slice(body).ok()?;
        match value {
            Value::String(message) => Some(message),
            value => self.find_message(&value).map(str::to_owned),
        }
    }

    fn find_message<'v>(&self, value: &'v Value) -> Option<&'v str> {
        match value {
            Value::Object(map) => {
                for key in &self.message_keys {
                    if let Some(Value::String(message)) = map.get(&**key) {
                        return Some(message.as_str());
                    }
                }
                map.values().find_map(|nested| self.find_message(nested))
            }
            Value::Array(items) => items.iter().find_map(|item| self.find_message(item)),
            _ => None,
        }
    }
}

impl ResponseClassifier for MessageClassifier {
    fn classify(&self, response: &Response) -> Option<AuthorizationError> {
        if response.status() != self.unauthorized {
            return None;
        }
        let error = match response.body().and_then(|body| self.error_message(body)) {
            Some(message) if self.is_renewal(&message) => AuthorizationError::renewable(message),
            Some(message) => AuthorizationError::fatal(message),
            None if self.retry_on_empty_body => {
                AuthorizationError::renewable("unauthorized without an error message")
            }
            None => AuthorizationError::fatal("unauthorized without an error message"),
        };
        Some(error.with_status(response.status()))
    }
}

/// What the executor should do with a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Not an authorization failure. Hand the response to the caller.
    Complete,
    /// Credentials expired. Renew them and send again.
    Renew(AuthorizationError),
    /// Renewing cannot help.
    Fatal(AuthorizationError),
    /// Credentials expired again, but the command has used up its renewals.
    BudgetExhausted(AuthorizationError),
}

// Headers identifying a login call: the identity headers are present and the token header is
// not. A 401 on such a call means the identity itself was refused.
#[derive(Clone, Debug)]
struct LoginHeaders {
    identity: Vec<HeaderName>,
    token: HeaderName,
}

/// Renew credentials when a response says they expired, a bounded number of times.
///
/// The policy keeps no state of its own. The only counter it consults is the command's, so any
/// number of commands can be evaluated concurrently with one policy.
#[derive(Clone, Debug)]
pub struct RetryOnRenew<K = MessageClassifier> {
    classifier: K,
    max_failures: u32,
    login_headers: Option<LoginHeaders>,
}

impl Default for RetryOnRenew<MessageClassifier> {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryOnRenew<MessageClassifier> {
    pub fn new() -> Self {
        Self::with_classifier(MessageClassifier::default())
    }
}

impl<K> RetryOnRenew<K> {
    pub fn with_classifier(classifier: K) -> Self {
        Self {
            classifier,
            max_failures: DEFAULT_MAX_FAILURES,
            login_headers: None,
        }
    }

    /// Set how many times one command may renew credentials.
    #[must_use]
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Never renew on a 401 answering the login call itself.
    ///
    /// A request carrying every `identity` header and no `token` header is taken to be a login
    /// call, e.g. `X-Auth-User` and `X-Auth-Key` without `X-Auth-Token`.
    #[must_use]
    pub fn with_login_headers<I>(mut self, identity: I, token: HeaderName) -> Self
    where
        I: IntoIterator<Item = HeaderName>,
    {
        self.login_headers = Some(LoginHeaders {
            identity: identity.into_iter().collect(),
            token,
        });
        self
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn classifier(&self) -> &K {
        &self.classifier
    }

    fn is_login_request(&self, request: &Request) -> bool {
        match &self.login_headers {
            Some(login) => {
                let headers = request.headers();
                !login.identity.is_empty()
                    && login.identity.iter().all(|name| headers.contains_key(name))
                    && !headers.contains_key(&login.token)
            }
            None => false,
        }
    }
}

impl<K: ResponseClassifier> RetryOnRenew<K> {
    /// Classify the response to the command's current request.
    pub fn decide(&self, command: &Command, response: &Response) -> RetryDecision {
        let failure = match self.classifier.classify(response) {
            Some(failure) => failure,
            None => return RetryDecision::Complete,
        };
        if !failure.is_renewable() {
            return RetryDecision::Fatal(failure);
        }
        if self.is_login_request(command.current_request()) {
            let mut refused = AuthorizationError::fatal(failure.message());
            if let Some(status) = failure.status() {
                refused = refused.with_status(status);
            }
            return RetryDecision::Fatal(refused);
        }
        if command.failures() >= self.max_failures {
            return RetryDecision::BudgetExhausted(failure);
        }
        RetryDecision::Renew(failure)
    }

    /// Whether the command should be sent again with renewed credentials.
    ///
    /// Counts the failure against the command when returning `true`.
    pub fn should_retry(&self, command: &mut Command, response: &Response) -> bool {
        match self.decide(command, response) {
            RetryDecision::Renew(_) => {
                command.record_failure();
                true
            }
            _ => false,
        }
    }
}
