//! Authentication session
//!
//! `SessionManager` owns the credential and the user; everything else in
//! the crate reads them through its queries or its change channel.

mod error;
pub mod guard;
mod manager;
mod token;
mod transport;
mod types;

pub use error::{AuthError, GENERIC_LOGIN_FAILURE};
pub use guard::{guard_route, RouteDecision};
pub use manager::SessionManager;
pub use token::{decode_expiry, Credential, TokenError};
pub use transport::{AuthTransport, LoginRequest, LoginResponse, LogoutRequest};
pub use types::{ActiveSession, LoginSuccess, NewUser, SessionState, User, UserRole};

#[cfg(test)]
pub(crate) use token::unsigned_jwt;
