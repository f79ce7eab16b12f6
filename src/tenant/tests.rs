//! Session and tenant managers working together

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::auth::SessionManager;
use crate::clock::ManualClock;
use crate::config::SessionConfig;
use crate::storage::{CredentialStore, MemoryStore, CURRENT_TENANT_KEY};
use crate::testing::{
    login_response, sample_subscription, sample_tenant, sample_usage, sample_user, settle,
    FakeAuthTransport, FakeTenantTransport,
};
use crate::transport::TransportError;

const NOW: i64 = 1_700_000_000_000;

struct Console {
    auth: Arc<FakeAuthTransport>,
    backend: Arc<FakeTenantTransport>,
    store: Arc<MemoryStore>,
    session: Arc<SessionManager>,
    tenants: Arc<TenantManager>,
}

fn console() -> Console {
    let auth = FakeAuthTransport::new();
    auth.set_login(Ok(login_response(sample_user("u-1", "alice"), 3600)));

    let backend = FakeTenantTransport::new(
        vec![sample_tenant("t-1", "acme"), sample_tenant("t-2", "globex")],
        "t-1",
    );
    backend.set_subscription("t-1", sample_subscription("pro", &["sftp_adapter", "custom_scripts"]));
    backend.set_usage("t-1", sample_usage(40.0, QuotaLimit::Limited(100.0)));
    backend.set_subscription("t-2", sample_subscription("starter", &[]));
    backend.set_usage("t-2", sample_usage(150.0, QuotaLimit::Limited(100.0)));

    let store = Arc::new(MemoryStore::new());
    let session = SessionManager::new(
        auth.clone(),
        store.clone(),
        Arc::new(ManualClock::new(NOW)),
        SessionConfig::default(),
    );
    let tenants = TenantManager::new(backend.clone(), session.clone(), store.clone());

    Console {
        auth,
        backend,
        store,
        session,
        tenants,
    }
}

async fn sign_in(console: &Console) {
    console.tenants.attach();
    console.session.login("alice", "pw", None).await.unwrap();
    settle().await;
}

async fn signed_in() -> Console {
    let console = console();
    sign_in(&console).await;
    console
}

#[tokio::test]
async fn test_loads_after_login() {
    let c = signed_in().await;

    assert_eq!(c.tenants.current_tenant().unwrap().id, "t-1");
    assert_eq!(c.tenants.user_tenants().len(), 2);
    assert_eq!(c.tenants.subscription().unwrap().plan_id, "pro");
    assert_eq!(c.tenants.usage().unwrap().storage_gb, 40.0);
    assert!(c.tenants.has_feature("sftp_adapter"));
    assert!(!c.tenants.has_feature("sso"));
    assert_eq!(c.tenants.quota_percentage("storage_gb"), 40.0);
    assert!(!c.tenants.loading());
    assert_eq!(
        c.store.get(CURRENT_TENANT_KEY).unwrap().as_deref(),
        Some("t-1")
    );
}

#[tokio::test]
async fn test_nothing_loads_without_session() {
    let c = console();
    c.tenants.attach();
    settle().await;

    assert!(c.tenants.snapshot().is_empty());
    assert_eq!(c.backend.current_calls(), 0);
    assert!(matches!(
        c.tenants.initialize().await,
        Err(TenantError::NotAuthenticated)
    ));
    assert!(matches!(
        c.tenants.refresh_usage().await,
        Err(TenantError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn test_failed_login_does_not_load() {
    let c = console();
    c.auth
        .set_login(Err(TransportError::Unauthorized("Invalid credentials".into())));
    c.tenants.attach();

    assert!(c.session.login("alice", "bad", None).await.is_err());
    settle().await;

    assert!(c.tenants.snapshot().is_empty());
    assert_eq!(c.auth.login_calls(), 1);
    assert_eq!(c.backend.current_calls(), 0);
}

#[tokio::test]
async fn test_teardown_on_logout() {
    let c = signed_in().await;
    assert!(!c.tenants.snapshot().is_empty());

    c.session.logout();
    settle().await;

    assert!(c.tenants.current_tenant().is_none());
    assert!(c.tenants.user_tenants().is_empty());
    assert!(c.tenants.subscription().is_none());
    assert!(c.tenants.usage().is_none());
    assert!(c.store.get(CURRENT_TENANT_KEY).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_teardown_on_expiry() {
    let c = console();
    c.auth
        .set_login(Ok(login_response(sample_user("u-1", "alice"), 120)));
    sign_in(&c).await;
    assert!(c.tenants.current_tenant().is_some());

    tokio::time::sleep(Duration::from_secs(121)).await;
    settle().await;

    assert!(!c.session.state().is_authenticated());
    assert!(c.tenants.snapshot().is_empty());
}

#[tokio::test]
async fn test_inflight_load_discarded_after_logout() {
    let c = console();
    let gate = c.backend.hold_current();
    sign_in(&c).await;
    assert_eq!(c.backend.current_calls(), 1);
    assert!(c.tenants.current_tenant().is_none());

    c.session.logout();
    settle().await;
    gate.notify_one();
    settle().await;

    assert!(c.tenants.snapshot().is_empty());
    assert!(!c.tenants.loading());
}

#[tokio::test]
async fn test_queries_empty_as_soon_as_session_ends() {
    let c = signed_in().await;
    assert!(c.tenants.has_feature("sftp_adapter"));

    // No settle: the observer has not cleared the snapshot yet
    c.session.logout();

    assert!(c.tenants.current_tenant().is_none());
    assert!(c.tenants.user_tenants().is_empty());
    assert!(c.tenants.subscription().is_none());
    assert!(c.tenants.usage().is_none());
    assert!(c.tenants.snapshot().is_empty());
    assert!(!c.tenants.has_feature("sftp_adapter"));
    assert!(!c.tenants.is_over_quota("storage_gb"));
    assert_eq!(c.tenants.quota_percentage("storage_gb"), 0.0);
}

#[tokio::test]
async fn test_switch_during_initial_load_keeps_membership() {
    let c = console();
    let gate = c.backend.hold_current();
    sign_in(&c).await;
    assert!(c.tenants.loading());

    c.tenants.switch_tenant("t-2").await.unwrap();
    gate.notify_one();
    settle().await;

    assert!(!c.tenants.loading());
    assert_eq!(c.tenants.user_tenants().len(), 2);
    assert_eq!(c.tenants.current_tenant().unwrap().id, "t-2");
    assert_eq!(c.tenants.subscription().unwrap().plan_id, "starter");
}

#[tokio::test]
async fn test_new_session_reloads() {
    let c = signed_in().await;
    c.session.logout();
    settle().await;

    c.session.login("alice", "pw", None).await.unwrap();
    settle().await;

    assert_eq!(c.backend.current_calls(), 2);
    assert_eq!(c.tenants.current_tenant().unwrap().id, "t-1");
}

#[tokio::test]
async fn test_session_recheck_does_not_reload() {
    let c = signed_in().await;
    c.auth.set_profile(Ok(sample_user("u-1", "alice")));

    assert!(c.session.check_session().await);
    settle().await;

    assert_eq!(c.backend.current_calls(), 1);
}

#[tokio::test]
async fn test_switch_tenant_replaces_everything() {
    let c = signed_in().await;
    let mut rx = c.tenants.subscribe();
    let _ = rx.borrow_and_update();

    let tenant = c.tenants.switch_tenant("t-2").await.unwrap();

    assert_eq!(tenant.id, "t-2");
    assert!(rx.has_changed().unwrap());
    let snapshot = rx.borrow_and_update().clone();
    assert_eq!(snapshot.current_tenant.unwrap().id, "t-2");
    assert_eq!(snapshot.subscription.unwrap().plan_id, "starter");
    assert_eq!(snapshot.usage.unwrap().storage_gb, 150.0);
    assert!(!c.tenants.has_feature("sftp_adapter"));
    assert!(c.tenants.is_over_quota("storage_gb"));
    assert_eq!(c.tenants.quota_percentage("storage_gb"), 100.0);
    assert_eq!(
        c.store.get(CURRENT_TENANT_KEY).unwrap().as_deref(),
        Some("t-2")
    );
}

#[tokio::test]
async fn test_failed_switch_changes_nothing() {
    let c = signed_in().await;
    let before = c.tenants.snapshot();
    c.backend.fail_switch(TransportError::Rejected {
        status: 500,
        message: "Internal error".into(),
    });

    let err = c.tenants.switch_tenant("t-2").await.unwrap_err();

    assert!(matches!(err, TenantError::SwitchFailed(_)));
    assert_eq!(c.backend.switch_calls(), 1);
    assert_eq!(c.tenants.snapshot(), before);
    assert_eq!(
        c.store.get(CURRENT_TENANT_KEY).unwrap().as_deref(),
        Some("t-1")
    );
}

#[tokio::test]
async fn test_switch_to_foreign_tenant_is_rejected() {
    let c = signed_in().await;

    let err = c.tenants.switch_tenant("t-9").await.unwrap_err();

    assert!(matches!(
        err,
        TenantError::SwitchFailed(TransportError::Rejected { status: 403, .. })
    ));
    assert_eq!(c.tenants.current_tenant().unwrap().id, "t-1");
}

#[tokio::test]
async fn test_unconfirmed_switch_is_not_applied() {
    let c = signed_in().await;
    c.backend.misreport_switch("t-1");

    let err = c.tenants.switch_tenant("t-2").await.unwrap_err();

    match err {
        TenantError::SwitchMismatch { requested, active } => {
            assert_eq!(requested, "t-2");
            assert_eq!(active, "t-1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(c.tenants.subscription().unwrap().plan_id, "pro");
}

#[tokio::test]
async fn test_switch_without_usage_drops_old_usage() {
    let c = signed_in().await;
    c.backend.fail_usage(TransportError::Timeout);

    c.tenants.switch_tenant("t-2").await.unwrap();

    assert_eq!(c.tenants.current_tenant().unwrap().id, "t-2");
    assert_eq!(c.tenants.subscription().unwrap().plan_id, "starter");
    // Never show the previous tenant's counters
    assert!(c.tenants.usage().is_none());
    assert!(!c.tenants.is_over_quota("storage_gb"));
}

#[tokio::test]
async fn test_feature_lookup_before_load() {
    let c = console();
    assert!(!c.tenants.has_feature("sftp_adapter"));
    assert!(!c.tenants.is_over_quota("storage_gb"));
    assert_eq!(c.tenants.quota_percentage("storage_gb"), 0.0);
}

#[tokio::test]
async fn test_unlimited_quota_reports_zero() {
    let c = console();
    c.backend
        .set_usage("t-1", sample_usage(5_000.0, QuotaLimit::Unlimited));
    sign_in(&c).await;

    assert_eq!(c.tenants.quota_percentage("storage_gb"), 0.0);
    assert!(!c.tenants.is_over_quota("storage_gb"));
}

#[tokio::test]
async fn test_refreshes_are_independent() {
    let c = signed_in().await;
    let subscription = c.tenants.subscription();
    c.backend
        .set_usage("t-1", sample_usage(90.0, QuotaLimit::Limited(100.0)));

    c.tenants.refresh_usage().await.unwrap();

    assert_eq!(c.tenants.usage().unwrap().storage_gb, 90.0);
    assert_eq!(c.tenants.subscription(), subscription);

    c.backend
        .set_subscription("t-1", sample_subscription("enterprise", &["sso"]));
    c.tenants.refresh_subscription().await.unwrap();
    assert!(c.tenants.has_feature("sso"));
    assert_eq!(c.tenants.usage().unwrap().storage_gb, 90.0);

    c.tenants.refresh_tenants().await.unwrap();
    assert_eq!(c.tenants.user_tenants().len(), 2);
}

#[tokio::test]
async fn test_refresh_after_logout_is_refused() {
    let c = signed_in().await;
    c.session.logout();
    settle().await;

    assert!(matches!(
        c.tenants.refresh_subscription().await,
        Err(TenantError::NotAuthenticated)
    ));
    assert!(c.tenants.snapshot().is_empty());
}
