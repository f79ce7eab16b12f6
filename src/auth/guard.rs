//! Protected-route entry check

use tracing::debug;

use super::manager::SessionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    /// Send the user to the login route, remembering where they were going
    RedirectToLogin { from: String },
}

/// Decide whether `path` may be entered.
///
/// With a credential held, the session is re-validated against the backend
/// first, so entering a protected route fails closed.
pub async fn guard_route(session: &SessionManager, path: &str) -> RouteDecision {
    if session.active_credential().is_some() {
        session.check_session().await;
    }

    if session.is_authenticated() && session.current_user().is_some() {
        RouteDecision::Allow
    } else {
        debug!(path, "Not authenticated, redirecting to login");
        RouteDecision::RedirectToLogin {
            from: path.to_string(),
        }
    }
}
