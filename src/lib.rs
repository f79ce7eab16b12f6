//! Session and tenancy state core of the integration console
//!
//! Two cooperating managers: `SessionManager` owns authentication and
//! `TenantManager` owns the active tenant with its entitlements and usage.
//! `ConsoleState` wires one of each to a credential store and the HTTP
//! transport and is meant to be created once at startup.

pub mod auth;
pub mod clock;
pub mod config;
pub mod environment;
pub mod storage;
pub mod tenant;
pub mod transport;
pub(crate) mod utils;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use auth::{Credential, SessionManager};
use clock::{Clock, SystemClock};
use config::ConsoleConfig;
use environment::EnvironmentInfo;
use storage::{open_store, CredentialStore};
use tenant::TenantManager;
use transport::HttpTransport;

/// Install the fmt subscriber. `RUST_LOG` overrides the default filter;
/// repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,console_core=info")),
        )
        .try_init();
}

/// Process-wide session and tenancy state
pub struct ConsoleState {
    pub session: Arc<SessionManager>,
    pub tenants: Arc<TenantManager>,
    http: Option<Arc<HttpTransport>>,
}

impl ConsoleState {
    /// Build everything from configuration: credential store, HTTP
    /// transport, both managers
    pub fn from_config(config: &ConsoleConfig) -> Self {
        let store = open_store(&config.storage);
        let http = Arc::new(HttpTransport::from_config(config));
        info!(
            api = %http.base_url(),
            storage = ?config.storage.backend,
            "Console state configured"
        );

        let session = SessionManager::new(
            http.clone(),
            store.clone(),
            Arc::new(SystemClock),
            config.session.clone(),
        );
        let tenants = TenantManager::new(http.clone(), session.clone(), store);

        Self {
            session,
            tenants,
            http: Some(http),
        }
    }

    /// Wire injected collaborators
    pub fn new(
        auth: Arc<dyn auth::AuthTransport>,
        tenancy: Arc<dyn tenant::TenantTransport>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        config: &ConsoleConfig,
    ) -> Self {
        let session = SessionManager::new(auth, store.clone(), clock, config.session.clone());
        let tenants = TenantManager::new(tenancy, session.clone(), store);
        Self {
            session,
            tenants,
            http: None,
        }
    }

    /// Start following the session with the tenant manager, then restore
    /// the session for the route the application opened on
    pub async fn start(&self, current_route: &str) {
        self.tenants.attach();
        self.session.initialize(current_route).await;
    }

    /// Backend environment; defaults when not connected over HTTP or when
    /// the fetch fails
    pub async fn environment(&self) -> EnvironmentInfo {
        let credential: Option<Credential> = self.session.active_credential();
        match (&self.http, credential) {
            (Some(http), Some(credential)) => http.environment_config(&credential).await,
            _ => EnvironmentInfo::default(),
        }
    }

    pub fn shutdown(&self) {
        self.tenants.shutdown();
        self.session.shutdown();
        info!("Console state shut down");
    }
}
