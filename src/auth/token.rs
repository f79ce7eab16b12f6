//! Bearer credentials and local expiry decoding
//!
//! Expiry is read straight from the JWT payload (`exp` claim). The
//! signature is not checked here; the backend does that on every request.
//! This check only decides whether a stored token is worth presenting.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::clock::Clock;

/// Bearer token plus its absolute expiry
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: i64,
}

// Token stays out of Debug output so it cannot leak into logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: i64) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Credential freshly issued at `now` with a relative lifetime
    pub fn issued(token: impl Into<String>, expires_in_secs: i64, now_millis: i64) -> Self {
        Self::new(token, now_millis + expires_in_secs * 1000)
    }

    /// Credential whose expiry comes from the token's own `exp` claim
    pub fn from_jwt(token: &str) -> Result<Self, TokenError> {
        let expires_at = decode_expiry(token)?;
        Ok(Self::new(token, expires_at))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Expiry, Unix milliseconds
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expires_at <= now_millis
    }

    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        self.is_expired_at(clock.now_millis())
    }

    /// Milliseconds left before expiry, zero once expired
    pub fn remaining_millis(&self, now_millis: i64) -> u64 {
        self.expires_at.saturating_sub(now_millis).max(0) as u64
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is not a three-part JWT")]
    NotAJwt,

    #[error("token payload is not valid base64url")]
    BadEncoding,

    #[error("token payload has no numeric exp claim")]
    MissingExpiry,
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// Decode the `exp` claim of a JWT into Unix milliseconds
pub fn decode_expiry(token: &str) -> Result<i64, TokenError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(TokenError::NotAJwt),
    };

    // Some issuers pad their segments; base64url in JWTs is unpadded
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| TokenError::BadEncoding)?;
    let claims: ExpiryClaim =
        serde_json::from_slice(&bytes).map_err(|_| TokenError::MissingExpiry)?;

    claims
        .exp
        .map(|exp| exp * 1000)
        .ok_or(TokenError::MissingExpiry)
}

/// Build an unsigned JWT carrying only `sub` and `exp`, for tests
#[cfg(test)]
pub(crate) fn unsigned_jwt(sub: &str, exp_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": sub, "exp": exp_secs })
            .to_string()
            .as_bytes(),
    );
    format!("{header}.{payload}.sig")
}
