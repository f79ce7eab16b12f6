//! Deployment environment of the backend and what it permits
//!
//! A missing or malformed payload is replaced by the development defaults
//! instead of surfacing a parse error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentType {
    #[default]
    Development,
    QualityAssurance,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentPermissions {
    pub can_create_flows: bool,
    pub can_create_adapters: bool,
    pub can_modify_adapter_config: bool,
    pub can_import_flows: bool,
    pub can_deploy_flows: bool,
    pub can_create_business_components: bool,
    pub can_create_data_structures: bool,
    pub is_admin: bool,
    pub can_access_admin: bool,
}

impl Default for EnvironmentPermissions {
    fn default() -> Self {
        Self {
            can_create_flows: true,
            can_create_adapters: true,
            can_modify_adapter_config: true,
            can_import_flows: true,
            can_deploy_flows: true,
            can_create_business_components: true,
            can_create_data_structures: true,
            is_admin: false,
            can_access_admin: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enforce_restrictions: bool,
    #[serde(default)]
    pub permissions: EnvironmentPermissions,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            env_type: EnvironmentType::Development,
            display_name: "Development".to_string(),
            description: "Development Environment".to_string(),
            enforce_restrictions: false,
            permissions: EnvironmentPermissions::default(),
        }
    }
}

impl EnvironmentInfo {
    /// Parse a backend payload, falling back to the defaults
    pub fn from_payload(payload: Value) -> Self {
        if payload.get("type").is_none() {
            warn!("Invalid environment config response, using defaults");
            return Self::default();
        }
        match serde_json::from_value(payload) {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Unreadable environment config, using defaults");
                Self::default()
            }
        }
    }

    pub fn is_development(&self) -> bool {
        self.env_type == EnvironmentType::Development
    }

    pub fn is_production(&self) -> bool {
        self.env_type == EnvironmentType::Production
    }
}
