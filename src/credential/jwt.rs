use std::borrow::Cow;
use std::time::{Duration, SystemTime};

use crate::credential::{CredentialSource, FetchedToken, MemoizedCredential};
use crate::AuthenticError;

/// An implementation of [`FetchedToken`] returned from [`JsonWebTokenSource`].
#[derive(Debug)]
pub struct FetchedJsonWebToken {
    token: Vec<u8>,
    expiry: SystemTime,
}

impl FetchedJsonWebToken {
    pub fn expiry(&self) -> SystemTime {
        self.expiry
    }
}

impl FetchedToken for FetchedJsonWebToken {
    fn token(&self) -> &[u8] {
        &self.token
    }
}

/// Backing fetch that signs a new short-lived JWT (JSON Web Token) on every call.
///
/// Wrap it with [`JsonWebTokenSource::memoized`] to reuse each token for half its lifetime, so
/// that a token always has a reasonable remaining time to be used.
pub struct JsonWebTokenSource {
    header: jsonwebtoken::Header,
    key: jsonwebtoken::EncodingKey,
    expiration: Duration,
    jwt_iss: Option<Cow<'static, str>>,
}

impl JsonWebTokenSource {
    /// Create a JWT source with specific properties.
    ///
    /// The `header` and `key` parameters are set as for [`jsonwebtoken`].
    ///
    /// The `expiration` parameter controls how long each token will be valid. Endpoints may
    /// restrict tokens to a maximum lifetime.
    pub fn new(
        header: jsonwebtoken::Header,
        key: jsonwebtoken::EncodingKey,
        expiration: Duration,
    ) -> Self {
        Self {
            header,
            key,
            expiration,
            jwt_iss: None,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<Cow<'static, str>>) -> Self {
        self.jwt_iss = Some(issuer.into());
        self
    }

    /// Cache tokens from this source, renewing them after half their lifetime.
    pub fn memoized(self) -> MemoizedCredential<Self> {
        let renew_after = self.expiration / 2;
        MemoizedCredential::new(self).with_expiration(renew_after)
    }
}

#[derive(Debug, serde::Serialize)]
struct JWTClaims {
    iat: u64,
    exp: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    iss: Option<Cow<'static, str>>,
}

fn unix_seconds(time: SystemTime) -> Result<u64, AuthenticError> {
    Ok(time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(AuthenticError::fetch)?
        .as_secs())
}

impl CredentialSource for JsonWebTokenSource {
    type Credentials = FetchedJsonWebToken;

    fn fetch(&self) -> Result<Self::Credentials, AuthenticError> {
        let now = SystemTime::now();
        let expiry = now + self.expiration;
        let claims = JWTClaims {
            iat: unix_seconds(now)?,
            exp: unix_seconds(expiry)?,
            iss: self.jwt_iss.clone(),
        };
        let token = jsonwebtoken::encode(&self.header, &claims, &self.key)
            .map_err(AuthenticError::fetch)?;
        tracing::debug!(exp = claims.exp, "signed new JWT");
        Ok(FetchedJsonWebToken {
            token: token.into_bytes(),
            expiry,
        })
    }
}

impl std::fmt::Debug for JsonWebTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonWebTokenSource")
            .field("header", &self.header)
            .field("expiration", &self.expiration)
            .field("jwt_iss", &self.jwt_iss)
            .finish_non_exhaustive()
    }
}
