//! Contract between the tenant manager and the tenancy backend

use async_trait::async_trait;

use super::types::{Subscription, Tenant, UsageSnapshot};
use crate::auth::Credential;
use crate::transport::TransportError;

#[async_trait]
pub trait TenantTransport: Send + Sync {
    async fn current_tenant(&self, credential: &Credential) -> Result<Tenant, TransportError>;

    async fn my_tenants(&self, credential: &Credential) -> Result<Vec<Tenant>, TransportError>;

    /// Ask the backend to make `tenant_id` the caller's active tenant
    async fn switch_tenant(
        &self,
        credential: &Credential,
        tenant_id: &str,
    ) -> Result<(), TransportError>;

    async fn subscription(
        &self,
        credential: &Credential,
        tenant_id: &str,
    ) -> Result<Subscription, TransportError>;

    async fn usage(
        &self,
        credential: &Credential,
        tenant_id: &str,
    ) -> Result<UsageSnapshot, TransportError>;
}
