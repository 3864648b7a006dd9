use http::header::HeaderName;
use http::HeaderValue;

use crate::{AuthenticError, Request};

/// Insert a header whose value must not show up in debug output or logs.
///
/// Credential headers replace any previous value, so re-applying fresh credentials to a request
/// that already carries stale ones leaves exactly one value behind.
pub trait SetSensitiveHeader {
    fn set_sensitive_header<K, V>(&mut self, key: K, value: V) -> Result<(), AuthenticError>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<AuthenticError>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<AuthenticError>;
}

impl SetSensitiveHeader for Request {
    fn set_sensitive_header<K, V>(&mut self, key: K, value: V) -> Result<(), AuthenticError>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<AuthenticError>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<AuthenticError>,
    {
        let name = HeaderName::try_from(key).map_err(Into::into)?;
        let mut value = HeaderValue::try_from(value).map_err(Into::into)?;
        value.set_sensitive(true);
        self.headers_mut().insert(name, value);
        Ok(())
    }
}
