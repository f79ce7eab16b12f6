//! Tenancy state
//!
//! `TenantManager` holds the active tenant, the caller's memberships and
//! the active tenant's subscription and usage. It only has data while the
//! session is authenticated.

mod error;
mod manager;
pub mod quota;
mod transport;
mod types;

#[cfg(test)]
mod tests;

pub use error::TenantError;
pub use manager::TenantManager;
pub use quota::QuotaMetric;
pub use transport::TenantTransport;
pub use types::{
    QuotaLimit, Subscription, SubscriptionStatus, Tenant, TenantSnapshot, TenantStatus,
    UsageSnapshot,
};
