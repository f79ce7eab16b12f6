//! Console configuration
//!
//! Loaded from environment variables, with a `.env` file honoured when present.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Where credential material is persisted between runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// OS credential manager (Keychain, Credential Manager, Secret Service)
    Keyring,
    /// JSON file in the console config directory
    File,
    /// Process memory only, nothing survives a restart
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "keyring" | "keychain" => Some(Self::Keyring),
            "file" => Some(Self::File),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Main console configuration
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Base URL of the console backend API (no trailing slash)
    pub api_base_url: String,
    /// Per-request timeout applied by the HTTP transport
    pub request_timeout: Duration,
    /// Session lifecycle settings
    pub session: SessionConfig,
    /// Credential storage settings
    pub storage: StorageConfig,
}

/// Session-related configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Route of the login entry point; startup checks are skipped there
    pub login_route: String,
    /// Destination handed back after a successful login
    pub default_redirect: String,
    /// Lead time before expiry at which the session reports `ExpiringSoon`
    pub expiry_warning: Duration,
    /// Consecutive passive profile failures tolerated before escalating
    /// to an explicit check
    pub max_passive_failures: u32,
}

/// Storage-related configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend
    pub dir: PathBuf,
    /// Service name used for keyring entries
    pub keyring_service: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            request_timeout: Duration::from_secs(30),
            session: SessionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_route: "/login".to_string(),
            default_redirect: "/dashboard".to_string(),
            expiry_warning: Duration::from_secs(60),
            max_passive_failures: 3,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            dir: default_storage_dir(),
            keyring_service: "com.integrixs.console".to_string(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("integration-console")
}

impl ConsoleConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        // Load .env file if present; a missing file is not an error
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Ok(url) = env::var("CONSOLE_API_BASE_URL") {
            if !url.is_empty() {
                config.api_base_url = url.trim_end_matches('/').to_string();
            }
        }
        if let Some(secs) = parse_var::<u64>("CONSOLE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        // Session config
        if let Ok(route) = env::var("CONSOLE_LOGIN_ROUTE") {
            if !route.is_empty() {
                config.session.login_route = route;
            }
        }
        if let Ok(route) = env::var("CONSOLE_DEFAULT_REDIRECT") {
            if !route.is_empty() {
                config.session.default_redirect = route;
            }
        }
        if let Some(secs) = parse_var::<u64>("CONSOLE_EXPIRY_WARNING_SECS") {
            config.session.expiry_warning = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<u32>("CONSOLE_MAX_PASSIVE_FAILURES") {
            config.session.max_passive_failures = max;
        }

        // Storage config
        if let Ok(val) = env::var("CONSOLE_STORAGE") {
            match StorageBackend::parse(&val) {
                Some(backend) => config.storage.backend = backend,
                None => tracing::warn!(value = %val, "Unknown CONSOLE_STORAGE, keeping default"),
            }
        }
        if let Ok(dir) = env::var("CONSOLE_STORAGE_DIR") {
            if !dir.is_empty() {
                config.storage.dir = PathBuf::from(dir);
            }
        }
        if let Ok(service) = env::var("CONSOLE_KEYRING_SERVICE") {
            if !service.is_empty() {
                config.storage.keyring_service = service;
            }
        }

        config
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
