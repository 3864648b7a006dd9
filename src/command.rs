use std::borrow::Cow;

use crate::{AuthenticError, AuthorizationError, Request, Response};

/// One logical API call and its retry bookkeeping.
///
/// The command keeps the request as the caller built it, without credentials, and the request
/// most recently sent, with credentials applied. Only the executor and the retry policy change
/// the current request and the counters.
#[derive(Clone, Debug)]
pub struct Command {
    name: Cow<'static, str>,
    request: Request,
    current: Request,
    failures: u32,
    attempts: u32,
}

impl Command {
    /// Create a command for the operation `name`, e.g. `"listServers"`.
    pub fn new(name: impl Into<Cow<'static, str>>, request: Request) -> Self {
        Self {
            name: name.into(),
            current: request.clone(),
            request,
            failures: 0,
            attempts: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The request as built by the caller.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The request sent by the latest attempt, with credentials applied.
    pub fn current_request(&self) -> &Request {
        &self.current
    }

    /// Number of renewable authorization failures seen so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Number of times the request has been handed to the transport.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub(crate) fn replace_request(&mut self, request: Request) {
        self.current = request;
    }
}

/// Where a command's retry loop is.
///
/// ```text
/// Sending ──response──▶ Evaluating ──complete──▶ Succeeded
///    ▲                      │ │
///    │                renew │ └─fatal / budget──▶ FailedFatal
///    │                      ▼
///    └──rewritten── Reauthenticating
/// ```
#[derive(Debug)]
pub enum CommandState {
    Sending,
    Evaluating(Response),
    Reauthenticating(AuthorizationError),
    Succeeded(Response),
    FailedFatal(AuthenticError),
}

impl CommandState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::FailedFatal(_))
    }
}
