//! The renew-and-retry loop.

use std::borrow::Cow;
use std::sync::Arc;

use crate::authenticator::RequestAuthenticator;
use crate::clock::{Clock, SystemClock};
use crate::credential::{CredentialSource, MemoizedCredential};
use crate::policy::{MessageClassifier, ResponseClassifier, RetryDecision, RetryOnRenew};
use crate::{AuthenticError, Command, CommandState, Request, Response};

/// Sends a request and waits for its response.
///
/// Errors are transport failures (timeouts, refused connections). They are handed to the caller
/// unchanged and never trigger a renewal.
pub trait Transport {
    fn send(&self, request: Request) -> Result<Response, AuthenticError>;
}

impl<F> Transport for F
where
    F: Fn(Request) -> Result<Response, AuthenticError>,
{
    fn send(&self, request: Request) -> Result<Response, AuthenticError> {
        self(request)
    }
}

/// Runs commands, renewing credentials when a response says they expired.
///
/// The credential cache is shared: many executors, on many threads, may hold the same
/// `Arc<MemoizedCredential>`. Attempts of one command are strictly sequential.
pub struct CommandExecutor<T, S, A, K = MessageClassifier, C = SystemClock>
where
    S: CredentialSource,
{
    transport: T,
    credentials: Arc<MemoizedCredential<S, C>>,
    authenticator: A,
    policy: RetryOnRenew<K>,
}

impl<T, S, A, C> CommandExecutor<T, S, A, MessageClassifier, C>
where
    S: CredentialSource,
{
    pub fn new(transport: T, credentials: Arc<MemoizedCredential<S, C>>, authenticator: A) -> Self {
        Self {
            transport,
            credentials,
            authenticator,
            policy: RetryOnRenew::new(),
        }
    }
}

impl<T, S, A, K, C> CommandExecutor<T, S, A, K, C>
where
    S: CredentialSource,
{
    /// Replace the default policy, e.g. to use a provider-specific classifier.
    pub fn with_policy<L>(self, policy: RetryOnRenew<L>) -> CommandExecutor<T, S, A, L, C> {
        CommandExecutor {
            transport: self.transport,
            credentials: self.credentials,
            authenticator: self.authenticator,
            policy,
        }
    }

    pub fn credentials(&self) -> &Arc<MemoizedCredential<S, C>> {
        &self.credentials
    }

    pub fn policy(&self) -> &RetryOnRenew<K> {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T, S, A, K, C> CommandExecutor<T, S, A, K, C>
where
    T: Transport,
    S: CredentialSource,
    A: RequestAuthenticator<S::Credentials>,
    K: ResponseClassifier,
    C: Clock,
{
    /// Run `command` until it succeeds or fails for good.
    ///
    /// Returns the first response that is not an authorization failure, whatever its status.
    /// Fails with:
    /// - [`AuthenticError::Authorization`] when the response or a credential fetch refused the
    ///   identity. The failure is also recorded in the credential cache.
    /// - [`AuthenticError::RetryBudgetExceeded`] when credentials kept expiring.
    /// - Any transport or credential fetch error, unchanged.
    pub fn execute(&self, command: &mut Command) -> Result<Response, AuthenticError> {
        let span = tracing::debug_span!("command", name = %command.name());
        let _enter = span.enter();

        let mut used = self.credentials.get()?;
        command.replace_request(self.authenticator.authenticate(command.request().clone(), &*used)?);

        let mut state = CommandState::Sending;
        loop {
            state = match state {
                CommandState::Sending => {
                    command.record_attempt();
                    match self.transport.send(command.current_request().clone()) {
                        Ok(response) => CommandState::Evaluating(response),
                        Err(err) => CommandState::FailedFatal(err),
                    }
                }
                CommandState::Evaluating(response) => match self.policy.decide(command, &response) {
                    RetryDecision::Complete => CommandState::Succeeded(response),
                    RetryDecision::Renew(failure) => {
                        tracing::info!(
                            failures = command.failures(),
                            status = %response.status(),
                            "credentials expired, renewing"
                        );
                        CommandState::Reauthenticating(failure)
                    }
                    RetryDecision::Fatal(failure) => {
                        tracing::warn!(error = %failure, "authorization refused");
                        self.credentials.authorization_slot().set(failure.clone());
                        CommandState::FailedFatal(failure.into())
                    }
                    RetryDecision::BudgetExhausted(failure) => {
                        tracing::warn!(
                            failures = command.failures(),
                            error = %failure,
                            "credentials still expired after renewing"
                        );
                        CommandState::FailedFatal(AuthenticError::RetryBudgetExceeded {
                            failures: command.failures(),
                            status: response.status(),
                        })
                    }
                },
                CommandState::Reauthenticating(_) => {
                    self.credentials.invalidate(&used);
                    match self.reauthenticate(command) {
                        Ok(fresh) => {
                            used = fresh;
                            CommandState::Sending
                        }
                        Err(err) => CommandState::FailedFatal(err),
                    }
                }
                CommandState::Succeeded(response) => return Ok(response),
                CommandState::FailedFatal(err) => return Err(err),
            };
        }
    }

    /// Build and run a command in one go.
    pub fn send(
        &self,
        name: impl Into<Cow<'static, str>>,
        request: Request,
    ) -> Result<Response, AuthenticError> {
        self.execute(&mut Command::new(name, request))
    }

    fn reauthenticate(
        &self,
        command: &mut Command,
    ) -> Result<Arc<S::Credentials>, AuthenticError> {
        let fresh = self.credentials.get()?;
        let request = self
            .authenticator
            .authenticate(command.request().clone(), &*fresh)?;
        command.record_failure();
        command.replace_request(request);
        Ok(fresh)
    }
}
