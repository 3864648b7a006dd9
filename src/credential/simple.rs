use std::borrow::Cow;
use std::sync::Arc;

use crate::AuthenticError;

use super::{CredentialSource, SessionCredentials};

/// Fixed credentials that never need a login call.
///
/// Fetching never fails and always hands out the same `Arc`, so wrapping this in a
/// [`super::MemoizedCredential`] only adds the sticky authorization slot.
#[derive(Clone, Debug)]
pub struct StaticCredential {
    current: Arc<SessionCredentials>,
}

impl StaticCredential {
    pub fn new(credentials: SessionCredentials) -> Self {
        Self {
            current: Arc::new(credentials),
        }
    }

    /// A fixed API key or bearer token.
    pub fn token(token: impl Into<Vec<u8>>) -> Self {
        Self::new(SessionCredentials::new("", "").with_session_token(token))
    }

    /// A fixed username and password, e.g. for basic authentication.
    pub fn username_password(
        username: impl Into<Cow<'static, str>>,
        password: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(SessionCredentials::new(username, password))
    }

    pub fn credentials(&self) -> &SessionCredentials {
        &self.current
    }
}

impl CredentialSource for StaticCredential {
    type Credentials = Arc<SessionCredentials>;

    fn fetch(&self) -> Result<Self::Credentials, AuthenticError> {
        Ok(self.current.clone())
    }
}
