//! Applying credentials to outbound requests.

use std::borrow::Cow;

use crate::credential::{FetchedToken, FetchedUsernamePassword};
use crate::sensitive::SetSensitiveHeader;
use crate::{AuthenticError, Request};

/// Per-provider rewrite of a request with a set of credentials.
///
/// Applied to the caller's original request on every attempt, so implementations should
/// replace, not append, any header they set.
pub trait RequestAuthenticator<Credentials: ?Sized> {
    fn authenticate(
        &self,
        request: Request,
        credentials: &Credentials,
    ) -> Result<Request, AuthenticError>;
}

impl<F, Credentials> RequestAuthenticator<Credentials> for F
where
    F: Fn(Request, &Credentials) -> Result<Request, AuthenticError>,
    Credentials: ?Sized,
{
    fn authenticate(
        &self,
        request: Request,
        credentials: &Credentials,
    ) -> Result<Request, AuthenticError> {
        self(request, credentials)
    }
}

/// Leaves requests untouched.
///
/// Identical to not authenticating, but allows minimal code changes when changing providers.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuthentication;

impl<Credentials: ?Sized> RequestAuthenticator<Credentials> for NoAuthentication {
    fn authenticate(&self, request: Request, _: &Credentials) -> Result<Request, AuthenticError> {
        Ok(request)
    }
}

/// Authentication using a token in a specified header, e.g. `X-Auth-Token`.
#[derive(Clone, Debug)]
pub struct HeaderAuthenticator {
    header_name: Cow<'static, str>,
}

impl HeaderAuthenticator {
    pub fn new(header_name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }
}

impl<Credentials> RequestAuthenticator<Credentials> for HeaderAuthenticator
where
    Credentials: FetchedToken + ?Sized,
{
    fn authenticate(
        &self,
        mut request: Request,
        credentials: &Credentials,
    ) -> Result<Request, AuthenticError> {
        request.set_sensitive_header(&*self.header_name, credentials.token())?;
        Ok(request)
    }
}

/// Authentication using a bearer token in the HTTP Authorization header.
#[derive(Clone, Debug)]
pub struct BearerAuthenticator {
    auth_scheme: Cow<'static, str>,
}

impl Default for BearerAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl BearerAuthenticator {
    pub fn new() -> Self {
        Self {
            auth_scheme: "Bearer".into(),
        }
    }

    /// Change the default `Bearer` scheme to another string.
    ///
    /// Some systems use a bearer token, but use a scheme name other
    /// than `Bearer`.
    #[must_use]
    pub fn with_auth_scheme(mut self, auth_scheme: impl Into<Cow<'static, str>>) -> Self {
        self.auth_scheme = auth_scheme.into();
        self
    }
}

impl<Credentials> RequestAuthenticator<Credentials> for BearerAuthenticator
where
    Credentials: FetchedToken + ?Sized,
{
    fn authenticate(
        &self,
        mut request: Request,
        credentials: &Credentials,
    ) -> Result<Request, AuthenticError> {
        let token = credentials.token();
        let mut value = Vec::with_capacity(self.auth_scheme.len() + 1 + token.len());
        value.extend(self.auth_scheme.as_bytes());
        value.push(b' ');
        value.extend(token);
        request.set_sensitive_header(http::header::AUTHORIZATION, value)?;
        Ok(request)
    }
}

/// Authentication using HTTP Basic authentication on every call without waiting for a
/// challenge.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicAuthenticator;

impl BasicAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

impl<Credentials> RequestAuthenticator<Credentials> for BasicAuthenticator
where
    Credentials: FetchedUsernamePassword + ?Sized,
{
    fn authenticate(
        &self,
        mut request: Request,
        credentials: &Credentials,
    ) -> Result<Request, AuthenticError> {
        let value =
            ::http_auth::basic::encode_credentials(credentials.username(), credentials.password());
        request.set_sensitive_header(http::header::AUTHORIZATION, value)?;
        Ok(request)
    }
}
