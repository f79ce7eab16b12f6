use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("no authenticated session")]
    NotAuthenticated,

    #[error("no active tenant")]
    NoActiveTenant,

    /// Session ended or tenant data was replaced while the request was in flight
    #[error("tenant data changed while the request was in flight")]
    Superseded,

    #[error("failed to switch tenant: {0}")]
    SwitchFailed(TransportError),

    #[error("backend reports tenant {active} active after switching to {requested}")]
    SwitchMismatch { requested: String, active: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}
