//! Tenant manager: active tenant, membership, entitlements and usage
//!
//! Follows the session channel. Loading starts only once the session is
//! authenticated and everything is dropped the moment it is not; until the
//! observer has cleared the snapshot, queries already answer as if empty.
//! Every write to the snapshot is stamped with a generation; results
//! fetched under an older generation are discarded on arrival. Membership
//! does not depend on the active tenant and is only stamped with the
//! teardown count.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch::{self, Ref};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::TenantError;
use super::quota;
use super::transport::TenantTransport;
use super::types::{Subscription, Tenant, TenantSnapshot, UsageSnapshot};
use crate::auth::{Credential, SessionManager};
use crate::storage::{CredentialStore, CURRENT_TENANT_KEY};
use crate::utils::lock_or_recover;

pub struct TenantManager {
    transport: Arc<dyn TenantTransport>,
    session: Arc<SessionManager>,
    store: Arc<dyn CredentialStore>,
    me: Weak<TenantManager>,
    snapshot: watch::Sender<TenantSnapshot>,
    generation: AtomicU64,
    /// Bumped by `clear` only
    teardowns: AtomicU64,
    loading: AtomicBool,
    load_ticket: AtomicU64,
    watcher: Mutex<Option<JoinHandle<()>>>,
    init_task: Mutex<Option<JoinHandle<()>>>,
}

impl TenantManager {
    pub fn new(
        transport: Arc<dyn TenantTransport>,
        session: Arc<SessionManager>,
        store: Arc<dyn CredentialStore>,
    ) -> Arc<Self> {
        let (snapshot, _) = watch::channel(TenantSnapshot::default());
        Arc::new_cyclic(|me| Self {
            transport,
            session,
            store,
            me: me.clone(),
            snapshot,
            generation: AtomicU64::new(0),
            teardowns: AtomicU64::new(0),
            loading: AtomicBool::new(false),
            load_ticket: AtomicU64::new(0),
            watcher: Mutex::new(None),
            init_task: Mutex::new(None),
        })
    }

    /// Start following the session: load when a new authenticated session
    /// appears, clear when the session goes away.
    pub fn attach(&self) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime, tenant manager not attached");
                return;
            }
        };

        let mut session_rx = self.session.subscribe();
        let me = self.me.clone();

        let task = handle.spawn(async move {
            let mut loaded_for: Option<u64> = None;
            loop {
                let sequence = session_rx.borrow_and_update().active().map(|s| s.sequence);
                let Some(manager) = me.upgrade() else { break };

                match sequence {
                    Some(sequence) if loaded_for != Some(sequence) => {
                        debug!(sequence, "Session established, loading tenant data");
                        loaded_for = Some(sequence);
                        manager.spawn_initialize();
                    }
                    Some(_) => {}
                    None => {
                        if loaded_for.take().is_some() {
                            manager.clear();
                        }
                    }
                }
                drop(manager);

                if session_rx.changed().await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = lock_or_recover(&self.watcher).replace(task) {
            previous.abort();
        }
    }

    fn spawn_initialize(&self) {
        let Some(manager) = self.me.upgrade() else { return };
        let task = tokio::spawn(async move {
            match manager.initialize().await {
                Ok(()) => {}
                Err(e @ (TenantError::NotAuthenticated | TenantError::Superseded)) => {
                    debug!(error = %e, "Tenant initialization abandoned");
                }
                Err(e) => warn!(error = %e, "Tenant initialization failed"),
            }
        });
        if let Some(previous) = lock_or_recover(&self.init_task).replace(task) {
            previous.abort();
        }
    }

    /// Stop following the session
    pub fn shutdown(&self) {
        if let Some(task) = lock_or_recover(&self.watcher).take() {
            task.abort();
        }
        if let Some(task) = lock_or_recover(&self.init_task).take() {
            task.abort();
        }
    }

    // ---- queries -------------------------------------------------------

    /// Current tenant data, empty whenever the session is not authenticated
    pub fn snapshot(&self) -> TenantSnapshot {
        self.visible()
            .map(|snapshot| (*snapshot).clone())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> watch::Receiver<TenantSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn current_tenant(&self) -> Option<Tenant> {
        self.visible()?.current_tenant.clone()
    }

    pub fn user_tenants(&self) -> Vec<Tenant> {
        self.visible()
            .map(|snapshot| snapshot.user_tenants.clone())
            .unwrap_or_default()
    }

    pub fn subscription(&self) -> Option<Subscription> {
        self.visible()?.subscription.clone()
    }

    pub fn usage(&self) -> Option<UsageSnapshot> {
        self.visible()?.usage.clone()
    }

    pub fn loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// False until a subscription is loaded
    pub fn has_feature(&self, feature: &str) -> bool {
        self.visible().is_some_and(|snapshot| {
            snapshot
                .subscription
                .as_ref()
                .is_some_and(|s| s.has_feature(feature))
        })
    }

    pub fn is_over_quota(&self, metric: &str) -> bool {
        self.visible().is_some_and(|snapshot| {
            quota::is_over_quota(
                snapshot.usage.as_ref(),
                snapshot.subscription.as_ref(),
                metric,
            )
        })
    }

    pub fn quota_percentage(&self, metric: &str) -> f64 {
        self.visible().map_or(0.0, |snapshot| {
            quota::quota_percentage(
                snapshot.usage.as_ref(),
                snapshot.subscription.as_ref(),
                metric,
            )
        })
    }

    // ---- commands ------------------------------------------------------

    /// Load current tenant and membership concurrently, then the current
    /// tenant's subscription and usage.
    pub async fn initialize(&self) -> Result<(), TenantError> {
        let teardown = self.teardowns.load(Ordering::SeqCst);
        let credential = self.credential()?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let loading = self.begin_loading();

        match self.store.get(CURRENT_TENANT_KEY) {
            Ok(Some(hint)) => debug!(tenant_id = %hint, "Previously selected tenant"),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Could not read tenant hint"),
        }

        let (current, tenants) = tokio::join!(
            self.transport.current_tenant(&credential),
            self.transport.my_tenants(&credential)
        );
        let current = current
            .map_err(|e| warn!(error = %e, "Failed to load current tenant"))
            .ok();
        let tenants = tenants
            .map_err(|e| warn!(error = %e, "Failed to load user tenants"))
            .ok();

        if let Some(tenants) = tenants {
            if !self.apply_membership(teardown, tenants) {
                return Err(TenantError::Superseded);
            }
        }
        let Some(tenant) = current else {
            return Ok(());
        };
        if !self.apply(generation, |snapshot| {
            snapshot.current_tenant = Some(tenant.clone());
            true
        }) {
            return Err(TenantError::Superseded);
        }
        drop(loading);
        self.remember(&tenant.id);

        let (subscription, usage) = tokio::join!(
            self.transport.subscription(&credential, &tenant.id),
            self.transport.usage(&credential, &tenant.id)
        );
        let subscription = subscription
            .map_err(|e| warn!(tenant_id = %tenant.id, error = %e, "Failed to load subscription"))
            .ok();
        let usage = usage
            .map_err(|e| warn!(tenant_id = %tenant.id, error = %e, "Failed to load usage"))
            .ok();

        let applied = self.apply_for_tenant(generation, &tenant.id, |snapshot| {
            if subscription.is_some() {
                snapshot.subscription = subscription;
            }
            if usage.is_some() {
                snapshot.usage = usage;
            }
        });
        if !applied {
            return Err(TenantError::Superseded);
        }

        info!(tenant_id = %tenant.id, "Tenant data loaded");
        Ok(())
    }

    /// Switch the active tenant.
    ///
    /// Nothing changes locally until the backend has confirmed the switch
    /// and the new tenant has been reloaded; the new tenant, its
    /// subscription and its usage are then published together.
    pub async fn switch_tenant(&self, tenant_id: &str) -> Result<Tenant, TenantError> {
        let credential = self.credential()?;
        let generation = self.generation.load(Ordering::SeqCst);

        if let Err(e) = self.transport.switch_tenant(&credential, tenant_id).await {
            warn!(tenant_id, error = %e, "Failed to switch tenant");
            return Err(TenantError::SwitchFailed(e));
        }

        let tenant = self.transport.current_tenant(&credential).await?;
        if tenant.id != tenant_id {
            warn!(requested = tenant_id, active = %tenant.id, "Backend did not confirm tenant switch");
            return Err(TenantError::SwitchMismatch {
                requested: tenant_id.to_string(),
                active: tenant.id,
            });
        }

        // Loaded one after the other so both belong to the confirmed tenant
        let subscription = self
            .transport
            .subscription(&credential, &tenant.id)
            .await
            .map_err(|e| warn!(tenant_id, error = %e, "Failed to load subscription after switch"))
            .ok();
        let usage = self
            .transport
            .usage(&credential, &tenant.id)
            .await
            .map_err(|e| warn!(tenant_id, error = %e, "Failed to load usage after switch"))
            .ok();

        let applied = self.apply(generation, |snapshot| {
            snapshot.current_tenant = Some(tenant.clone());
            snapshot.subscription = subscription;
            snapshot.usage = usage;
            // Results fetched for the previous tenant are stale from here on
            self.generation.fetch_add(1, Ordering::SeqCst);
            true
        });
        if !applied {
            return Err(TenantError::Superseded);
        }

        self.remember(&tenant.id);
        info!(tenant_id, "Switched tenant");
        Ok(tenant)
    }

    pub async fn refresh_tenants(&self) -> Result<(), TenantError> {
        let teardown = self.teardowns.load(Ordering::SeqCst);
        let credential = self.credential()?;

        let tenants = self.transport.my_tenants(&credential).await?;
        if self.apply_membership(teardown, tenants) {
            Ok(())
        } else {
            Err(TenantError::Superseded)
        }
    }

    pub async fn refresh_subscription(&self) -> Result<(), TenantError> {
        let (credential, generation, tenant_id) = self.tenant_request()?;

        let subscription = self.transport.subscription(&credential, &tenant_id).await?;
        if self.apply_for_tenant(generation, &tenant_id, |snapshot| {
            snapshot.subscription = Some(subscription)
        }) {
            Ok(())
        } else {
            Err(TenantError::Superseded)
        }
    }

    pub async fn refresh_usage(&self) -> Result<(), TenantError> {
        let (credential, generation, tenant_id) = self.tenant_request()?;

        let usage = self.transport.usage(&credential, &tenant_id).await?;
        if self.apply_for_tenant(generation, &tenant_id, |snapshot| snapshot.usage = Some(usage)) {
            Ok(())
        } else {
            Err(TenantError::Superseded)
        }
    }

    /// Drop all tenant state. In-flight loads are abandoned.
    pub fn clear(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = lock_or_recover(&self.init_task).take() {
            task.abort();
        }
        self.loading.store(false, Ordering::SeqCst);

        let cleared = self.snapshot.send_if_modified(|snapshot| {
            if snapshot.is_empty() {
                false
            } else {
                *snapshot = TenantSnapshot::default();
                true
            }
        });
        if let Err(e) = self.store.remove(CURRENT_TENANT_KEY) {
            warn!(error = %e, "Failed to remove tenant hint");
        }
        if cleared {
            info!("Tenant state cleared");
        }
    }

    // ---- internals -----------------------------------------------------

    /// The snapshot, or `None` once the session is no longer authenticated
    fn visible(&self) -> Option<Ref<'_, TenantSnapshot>> {
        if self.session.is_authenticated() {
            Some(self.snapshot.borrow())
        } else {
            None
        }
    }

    fn begin_loading(&self) -> LoadingGuard<'_> {
        let ticket = self.load_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        self.loading.store(true, Ordering::SeqCst);
        LoadingGuard {
            manager: self,
            ticket,
        }
    }

    fn credential(&self) -> Result<Credential, TenantError> {
        if !self.session.is_authenticated() {
            return Err(TenantError::NotAuthenticated);
        }
        self.session
            .active_credential()
            .ok_or(TenantError::NotAuthenticated)
    }

    fn tenant_request(&self) -> Result<(Credential, u64, String), TenantError> {
        let credential = self.credential()?;
        let generation = self.generation.load(Ordering::SeqCst);
        let tenant_id = self
            .snapshot
            .borrow()
            .current_tenant
            .as_ref()
            .map(|t| t.id.clone())
            .ok_or(TenantError::NoActiveTenant)?;
        Ok((credential, generation, tenant_id))
    }

    /// Apply `update` if nothing replaced tenant data since `generation`
    /// and the session is still authenticated. The check and the write
    /// happen under the snapshot lock.
    fn apply(&self, generation: u64, update: impl FnOnce(&mut TenantSnapshot) -> bool) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            if self.generation.load(Ordering::SeqCst) != generation
                || !self.session.is_authenticated()
            {
                debug!("Discarding stale tenant result");
                return false;
            }
            update(snapshot)
        })
    }

    /// Replace the membership list unless tenant state was torn down since
    /// `teardown`. A tenant switch does not invalidate it.
    fn apply_membership(&self, teardown: u64, tenants: Vec<Tenant>) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            if self.teardowns.load(Ordering::SeqCst) != teardown
                || !self.session.is_authenticated()
            {
                debug!("Discarding membership for a session that has ended");
                return false;
            }
            snapshot.user_tenants = tenants;
            true
        })
    }

    /// Like `apply`, and additionally requires `tenant_id` to still be the
    /// current tenant
    fn apply_for_tenant(
        &self,
        generation: u64,
        tenant_id: &str,
        update: impl FnOnce(&mut TenantSnapshot),
    ) -> bool {
        self.apply(generation, |snapshot| {
            if snapshot.current_tenant.as_ref().map(|t| t.id.as_str()) != Some(tenant_id) {
                debug!(tenant_id, "Discarding result for a tenant that is no longer current");
                return false;
            }
            update(snapshot);
            true
        })
    }

    fn remember(&self, tenant_id: &str) {
        if let Err(e) = self.store.set(CURRENT_TENANT_KEY, tenant_id) {
            warn!(tenant_id, error = %e, "Failed to persist tenant hint");
        }
    }
}

/// Clears the loading flag when the load that set it ends, however it ends,
/// unless a newer load has taken over
struct LoadingGuard<'a> {
    manager: &'a TenantManager,
    ticket: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.manager.load_ticket.load(Ordering::SeqCst) == self.ticket {
            self.manager.loading.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for TenantManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
