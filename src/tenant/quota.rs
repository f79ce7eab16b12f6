//! Quota accounting
//!
//! Maps quota metric names to usage counters and answers the two
//! questions the console asks: is the tenant over a quota, and how much of
//! it is used. Unknown metrics, missing data, zero limits and the
//! unlimited sentinel all answer "not over, 0 %".

use super::types::{QuotaLimit, Subscription, UsageSnapshot};

/// Metrics that have a usage counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaMetric {
    ExecutionsPerMonth,
    MessagesPerMonth,
    ApiCallsPerMonth,
    StorageGb,
    Users,
    Flows,
}

impl QuotaMetric {
    pub const ALL: [QuotaMetric; 6] = [
        Self::ExecutionsPerMonth,
        Self::MessagesPerMonth,
        Self::ApiCallsPerMonth,
        Self::StorageGb,
        Self::Users,
        Self::Flows,
    ];

    /// Key used in quota maps
    pub fn key(self) -> &'static str {
        match self {
            Self::ExecutionsPerMonth => "executions_per_month",
            Self::MessagesPerMonth => "messages_per_month",
            Self::ApiCallsPerMonth => "api_calls_per_month",
            Self::StorageGb => "storage_gb",
            Self::Users => "users",
            Self::Flows => "flows",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|metric| metric.key() == key)
    }

    /// Counter this metric is measured against
    pub fn usage_value(self, usage: &UsageSnapshot) -> f64 {
        match self {
            Self::ExecutionsPerMonth => usage.executions as f64,
            Self::MessagesPerMonth => usage.messages as f64,
            Self::ApiCallsPerMonth => usage.api_calls as f64,
            Self::StorageGb => usage.storage_gb,
            Self::Users => usage.users as f64,
            Self::Flows => usage.flows as f64,
        }
    }
}

/// Limit for `metric`: usage quotas first, then the subscription's.
/// `None` when no positive cap applies.
fn effective_limit(
    metric: QuotaMetric,
    usage: &UsageSnapshot,
    subscription: Option<&Subscription>,
) -> Option<f64> {
    let limit = usage
        .quotas
        .get(metric.key())
        .or_else(|| subscription.and_then(|s| s.quotas.get(metric.key())))?;

    match *limit {
        QuotaLimit::Limited(value) if value > 0.0 => Some(value),
        _ => None,
    }
}

/// Strictly over the cap (`usage > limit`)
pub fn is_over_quota(
    usage: Option<&UsageSnapshot>,
    subscription: Option<&Subscription>,
    metric: &str,
) -> bool {
    let (Some(usage), Some(metric)) = (usage, QuotaMetric::from_key(metric)) else {
        return false;
    };
    match effective_limit(metric, usage, subscription) {
        Some(limit) => metric.usage_value(usage) > limit,
        None => false,
    }
}

/// Share of the cap in use, clamped to `[0, 100]`
pub fn quota_percentage(
    usage: Option<&UsageSnapshot>,
    subscription: Option<&Subscription>,
    metric: &str,
) -> f64 {
    let (Some(usage), Some(metric)) = (usage, QuotaMetric::from_key(metric)) else {
        return 0.0;
    };
    match effective_limit(metric, usage, subscription) {
        Some(limit) => (metric.usage_value(usage) / limit * 100.0).clamp(0.0, 100.0),
        None => 0.0,
    }
}
