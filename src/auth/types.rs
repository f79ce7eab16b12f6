//! Session data types

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Console role of a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum UserRole {
    Administrator,
    Integrator,
    Developer,
    /// Read-only access; also the fallback for unrecognised roles
    #[default]
    Viewer,
}

impl From<String> for UserRole {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "administrator" | "admin" => Self::Administrator,
            "integrator" => Self::Integrator,
            "developer" => Self::Developer,
            _ => Self::Viewer,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Administrator => write!(f, "administrator"),
            Self::Integrator => write!(f, "integrator"),
            Self::Developer => write!(f, "developer"),
            Self::Viewer => write!(f, "viewer"),
        }
    }
}

/// Authenticated user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub last_login_at: Option<NaiveDateTime>,
    /// Permission map as sent by the backend (resource -> actions)
    #[serde(default)]
    pub permissions: HashMap<String, Vec<String>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Administrator
    }
}

/// Fields for creating a user through the registration endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub role: UserRole,
}

/// A live authenticated session
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    pub user: User,
    /// Credential expiry, Unix milliseconds
    pub expires_at: i64,
    /// Changes each time a new session is established (login or startup
    /// restore) and stays fixed across re-validation
    pub sequence: u64,
}

/// Authentication state, published to observers on every transition
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticating,
    /// Locally valid credential whose profile could not be loaded yet
    Unverified { expires_at: i64 },
    Authenticated(ActiveSession),
    /// Authenticated, inside the warning window before expiry
    ExpiringSoon(ActiveSession),
    /// Transient; always followed by `Unauthenticated`
    LoggingOut,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_) | Self::ExpiringSoon(_))
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        match self {
            Self::Authenticated(session) | Self::ExpiringSoon(session) => Some(session),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.active().map(|s| &s.user)
    }

    pub fn expires_at(&self) -> Option<i64> {
        match self {
            Self::Unverified { expires_at } => Some(*expires_at),
            Self::Authenticated(s) | Self::ExpiringSoon(s) => Some(s.expires_at),
            _ => None,
        }
    }

    /// Short name for logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Unverified { .. } => "unverified",
            Self::Authenticated(_) => "authenticated",
            Self::ExpiringSoon(_) => "expiring_soon",
            Self::LoggingOut => "logging_out",
        }
    }
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub user: User,
    pub expires_at: i64,
    /// Where the caller should navigate next
    pub redirect_to: String,
}
