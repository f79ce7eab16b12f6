//! Session error types

use thiserror::Error;

use crate::transport::TransportError;

pub const GENERIC_LOGIN_FAILURE: &str = "Login failed. Please try again.";

#[derive(Debug, Error)]
pub enum AuthError {
    /// Rejected by the backend; carries the server message
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("session has expired")]
    SessionExpired,

    /// A later login or logout overtook this operation
    #[error("operation superseded by a newer session change")]
    Superseded,

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized(message) => Self::InvalidCredentials(message),
            other => Self::Transport(other),
        }
    }
}

impl AuthError {
    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidCredentials(message) if !message.trim().is_empty() => message.clone(),
            _ => GENERIC_LOGIN_FAILURE.to_string(),
        }
    }
}
