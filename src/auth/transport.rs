//! Contract between the session manager and the authentication backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::token::Credential;
use super::types::{NewUser, User};
use crate::transport::TransportError;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Successful login payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub user: User,
}

/// What the backend needs to end a session. Either part may be absent;
/// the bearer is only included while it is still unexpired.
#[derive(Debug, Clone, Default)]
pub struct LogoutRequest {
    pub credential: Option<Credential>,
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn login(&self, request: LoginRequest) -> Result<LoginResponse, TransportError>;

    async fn get_profile(&self, credential: &Credential) -> Result<User, TransportError>;

    /// Best-effort; callers ignore the outcome
    async fn logout(&self, request: LogoutRequest) -> Result<(), TransportError>;

    async fn register(&self, user: NewUser) -> Result<User, TransportError>;
}
