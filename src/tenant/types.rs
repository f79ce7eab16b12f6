//! Tenancy data types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum TenantStatus {
    #[default]
    Active,
    Trial,
    Suspended,
    Inactive,
    /// Anything the backend sends that we do not recognise
    Unknown,
}

impl From<String> for TenantStatus {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "active" => Self::Active,
            "trial" | "trialing" => Self::Trial,
            "suspended" => Self::Suspended,
            "inactive" | "cancelled" | "canceled" | "deleted" => Self::Inactive,
            _ => Self::Unknown,
        }
    }
}

/// An organisational scope the user can operate within. Replaced
/// wholesale on refresh, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub status: TenantStatus,
    #[serde(default)]
    pub plan_id: String,
    /// Caller's role within this tenant
    #[serde(default)]
    pub user_role: Option<String>,
    /// Whether this is the caller's primary tenant
    #[serde(default)]
    pub primary: bool,
}

impl Tenant {
    /// Display name, falling back to the internal name
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    PastDue,
    Canceled,
    Incomplete,
    Trialing,
    Expired,
    Unknown,
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "canceled" | "cancelled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "trialing" | "trial" => Self::Trialing,
            "expired" => Self::Expired,
            _ => Self::Unknown,
        }
    }
}

/// Numeric cap for a quota metric. The backend sends `-1` for no cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub enum QuotaLimit {
    Limited(f64),
    Unlimited,
}

impl From<f64> for QuotaLimit {
    fn from(value: f64) -> Self {
        if value < 0.0 {
            Self::Unlimited
        } else {
            Self::Limited(value)
        }
    }
}

impl From<QuotaLimit> for f64 {
    fn from(limit: QuotaLimit) -> Self {
        match limit {
            QuotaLimit::Limited(value) => value,
            QuotaLimit::Unlimited => -1.0,
        }
    }
}

/// Plan, entitlements and quotas of a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub plan_name: String,
    #[serde(default)]
    pub status: SubscriptionStatus,
    /// Granted feature keys
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub quotas: HashMap<String, QuotaLimit>,
    #[serde(default)]
    pub days_remaining: i64,
}

impl Subscription {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Point-in-time usage counters for a tenant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    #[serde(default)]
    pub executions: u64,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub api_calls: u64,
    #[serde(default)]
    pub storage_gb: f64,
    #[serde(default)]
    pub users: u64,
    #[serde(default)]
    pub flows: u64,
    #[serde(default)]
    pub quotas: HashMap<String, QuotaLimit>,
}

/// Everything the tenant manager holds, published as one value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantSnapshot {
    pub current_tenant: Option<Tenant>,
    pub user_tenants: Vec<Tenant>,
    pub subscription: Option<Subscription>,
    pub usage: Option<UsageSnapshot>,
}

impl TenantSnapshot {
    pub fn is_empty(&self) -> bool {
        self.current_tenant.is_none()
            && self.user_tenants.is_empty()
            && self.subscription.is_none()
            && self.usage.is_none()
    }
}
