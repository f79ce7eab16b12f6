//! Backend transport
//!
//! The managers talk to the backend only through the `AuthTransport` and
//! `TenantTransport` traits. `HttpTransport` is the reqwest implementation
//! used by the console; tests plug in scripted fakes.

mod http;

pub use http::{shared_client, HttpTransport};

use thiserror::Error;

/// Failure of a single backend call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The backend rejected the credential or the login (HTTP 401)
    #[error("{0}")]
    Unauthorized(String),

    /// Any other non-success status
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// Response body did not have the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// True only for failures the backend explicitly classified as an
    /// authentication rejection. Everything else is treated as transient.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}
