//! Scripted transports and fixtures for tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::auth::{
    AuthTransport, Credential, LoginRequest, LoginResponse, LogoutRequest, NewUser, User, UserRole,
};
use crate::tenant::{
    QuotaLimit, Subscription, SubscriptionStatus, Tenant, TenantStatus, TenantTransport,
    UsageSnapshot,
};
use crate::transport::TransportError;

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn sample_user(id: &str, username: &str) -> User {
    User {
        id: id.to_string(),
        username: username.to_string(),
        email: Some(format!("{username}@example.com")),
        first_name: None,
        last_name: None,
        role: UserRole::Developer,
        status: Some("ACTIVE".to_string()),
        email_verified: true,
        created_at: None,
        updated_at: None,
        last_login_at: None,
        permissions: HashMap::new(),
    }
}

pub fn login_response(user: User, expires_in: i64) -> LoginResponse {
    LoginResponse {
        token: format!("token-{}", user.id),
        refresh_token: Some(format!("refresh-{}", user.id)),
        expires_in,
        user,
    }
}

pub fn sample_tenant(id: &str, name: &str) -> Tenant {
    Tenant {
        id: id.to_string(),
        name: name.to_string(),
        display_name: name.to_uppercase(),
        subdomain: Some(name.to_string()),
        status: TenantStatus::Active,
        plan_id: "pro".to_string(),
        user_role: Some("MEMBER".to_string()),
        primary: false,
    }
}

pub fn sample_subscription(plan: &str, features: &[&str]) -> Subscription {
    Subscription {
        id: 1,
        plan_id: plan.to_string(),
        plan_name: plan.to_uppercase(),
        status: SubscriptionStatus::Active,
        features: features.iter().map(|f| f.to_string()).collect(),
        quotas: HashMap::new(),
        days_remaining: 30,
    }
}

pub fn sample_usage(storage_gb: f64, storage_quota: QuotaLimit) -> UsageSnapshot {
    UsageSnapshot {
        executions: 10,
        messages: 200,
        api_calls: 50,
        storage_gb,
        users: 3,
        flows: 4,
        quotas: HashMap::from([("storage_gb".to_string(), storage_quota)]),
    }
}

/// Take a one-shot gate, if one is set, and wait on it
async fn pass_gate(gate: &Mutex<Option<Arc<Notify>>>) {
    let gate = gate.lock().unwrap().take();
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

pub struct FakeAuthTransport {
    login: Mutex<Result<LoginResponse, TransportError>>,
    profile: Mutex<Result<User, TransportError>>,
    logout: Mutex<Result<(), TransportError>>,
    login_gate: Mutex<Option<Arc<Notify>>>,
    login_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl FakeAuthTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            login: Mutex::new(Err(TransportError::Unauthorized(
                "Invalid credentials".to_string(),
            ))),
            profile: Mutex::new(Err(TransportError::Network("unreachable".to_string()))),
            logout: Mutex::new(Ok(())),
            login_gate: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_login(&self, result: Result<LoginResponse, TransportError>) {
        *self.login.lock().unwrap() = result;
    }

    pub fn set_profile(&self, result: Result<User, TransportError>) {
        *self.profile.lock().unwrap() = result;
    }

    pub fn set_logout(&self, result: Result<(), TransportError>) {
        *self.logout.lock().unwrap() = result;
    }

    /// Make the next login wait until the returned gate is notified
    pub fn hold_logins(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthTransport for FakeAuthTransport {
    async fn login(&self, _request: LoginRequest) -> Result<LoginResponse, TransportError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        pass_gate(&self.login_gate).await;
        self.login.lock().unwrap().clone()
    }

    async fn get_profile(&self, _credential: &Credential) -> Result<User, TransportError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.profile.lock().unwrap().clone()
    }

    async fn logout(&self, _request: LogoutRequest) -> Result<(), TransportError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout.lock().unwrap().clone()
    }

    async fn register(&self, user: NewUser) -> Result<User, TransportError> {
        let mut created = sample_user(&format!("u-{}", user.username), &user.username);
        created.email = Some(user.email);
        created.role = user.role;
        Ok(created)
    }
}

#[derive(Default)]
struct TenantBackend {
    tenants: Vec<Tenant>,
    active: Option<String>,
    subscriptions: HashMap<String, Subscription>,
    usage: HashMap<String, UsageSnapshot>,
    switch_error: Option<TransportError>,
    usage_error: Option<TransportError>,
    /// Tenant the backend claims is active after a switch, if it lies
    active_after_switch: Option<String>,
}

/// In-memory tenancy backend
pub struct FakeTenantTransport {
    backend: Mutex<TenantBackend>,
    current_gate: Mutex<Option<Arc<Notify>>>,
    current_calls: AtomicUsize,
    switch_calls: AtomicUsize,
}

impl FakeTenantTransport {
    pub fn new(tenants: Vec<Tenant>, active: &str) -> Arc<Self> {
        Arc::new(Self {
            backend: Mutex::new(TenantBackend {
                tenants,
                active: Some(active.to_string()),
                ..Default::default()
            }),
            current_gate: Mutex::new(None),
            current_calls: AtomicUsize::new(0),
            switch_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_subscription(&self, tenant_id: &str, subscription: Subscription) {
        self.backend
            .lock()
            .unwrap()
            .subscriptions
            .insert(tenant_id.to_string(), subscription);
    }

    pub fn set_usage(&self, tenant_id: &str, usage: UsageSnapshot) {
        self.backend
            .lock()
            .unwrap()
            .usage
            .insert(tenant_id.to_string(), usage);
    }

    pub fn fail_switch(&self, error: TransportError) {
        self.backend.lock().unwrap().switch_error = Some(error);
    }

    pub fn fail_usage(&self, error: TransportError) {
        self.backend.lock().unwrap().usage_error = Some(error);
    }

    pub fn misreport_switch(&self, active: &str) {
        self.backend.lock().unwrap().active_after_switch = Some(active.to_string());
    }

    /// Make the next current-tenant fetch wait until the gate is notified
    pub fn hold_current(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.current_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn current_calls(&self) -> usize {
        self.current_calls.load(Ordering::SeqCst)
    }

    pub fn switch_calls(&self) -> usize {
        self.switch_calls.load(Ordering::SeqCst)
    }
}

fn not_found(what: &str) -> TransportError {
    TransportError::Rejected {
        status: 404,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl TenantTransport for FakeTenantTransport {
    async fn current_tenant(&self, _credential: &Credential) -> Result<Tenant, TransportError> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        pass_gate(&self.current_gate).await;
        let backend = self.backend.lock().unwrap();
        let active = backend.active.clone().ok_or_else(|| not_found("tenant"))?;
        backend
            .tenants
            .iter()
            .find(|t| t.id == active)
            .cloned()
            .ok_or_else(|| not_found("tenant"))
    }

    async fn my_tenants(&self, _credential: &Credential) -> Result<Vec<Tenant>, TransportError> {
        Ok(self.backend.lock().unwrap().tenants.clone())
    }

    async fn switch_tenant(
        &self,
        _credential: &Credential,
        tenant_id: &str,
    ) -> Result<(), TransportError> {
        self.switch_calls.fetch_add(1, Ordering::SeqCst);
        let mut backend = self.backend.lock().unwrap();
        if let Some(error) = backend.switch_error.clone() {
            return Err(error);
        }
        if !backend.tenants.iter().any(|t| t.id == tenant_id) {
            return Err(TransportError::Rejected {
                status: 403,
                message: "Not a member of this tenant".to_string(),
            });
        }
        backend.active = Some(
            backend
                .active_after_switch
                .clone()
                .unwrap_or_else(|| tenant_id.to_string()),
        );
        Ok(())
    }

    async fn subscription(
        &self,
        _credential: &Credential,
        tenant_id: &str,
    ) -> Result<Subscription, TransportError> {
        self.backend
            .lock()
            .unwrap()
            .subscriptions
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| not_found("subscription"))
    }

    async fn usage(
        &self,
        _credential: &Credential,
        tenant_id: &str,
    ) -> Result<UsageSnapshot, TransportError> {
        let backend = self.backend.lock().unwrap();
        if let Some(error) = backend.usage_error.clone() {
            return Err(error);
        }
        backend
            .usage
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| not_found("usage"))
    }
}
