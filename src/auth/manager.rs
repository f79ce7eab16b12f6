//! Session manager: owns the authentication lifecycle
//!
//! State transitions happen only here. Every transition is published on a
//! `watch` channel so the tenant manager and the UI can follow along
//! without polling.
//!
//! Ordering: operations that replace the session (login, startup restore,
//! logout) bump an epoch under the state lock. A network result is applied
//! only if the epoch it started under is still current, so a logout always
//! wins over a login that is still in flight.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::token::Credential;
use super::transport::{AuthTransport, LoginRequest, LogoutRequest};
use super::types::{ActiveSession, LoginSuccess, NewUser, SessionState, User};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::storage::{CredentialStore, REFRESH_TOKEN_KEY, SESSION_KEYS, TOKEN_KEY, USER_KEY};
use crate::utils::{acquire_read_lock, acquire_write_lock, lock_or_recover};

struct Inner {
    state: SessionState,
    credential: Option<Credential>,
}

pub struct SessionManager {
    transport: Arc<dyn AuthTransport>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    me: Weak<SessionManager>,
    inner: RwLock<Inner>,
    epoch: AtomicU64,
    next_sequence: AtomicU64,
    passive_failures: AtomicU32,
    loading: AtomicBool,
    state_tx: watch::Sender<SessionState>,
    expiry_timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        Arc::new_cyclic(|me| Self {
            transport,
            store,
            clock,
            config,
            me: me.clone(),
            inner: RwLock::new(Inner {
                state: SessionState::Unauthenticated,
                credential: None,
            }),
            epoch: AtomicU64::new(0),
            next_sequence: AtomicU64::new(1),
            passive_failures: AtomicU32::new(0),
            loading: AtomicBool::new(true),
            state_tx,
            expiry_timer: Mutex::new(None),
        })
    }

    // ---- queries -------------------------------------------------------

    pub fn state(&self) -> SessionState {
        acquire_read_lock(&self.inner).state.clone()
    }

    /// Change notifications; the receiver always holds the latest state
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        let inner = acquire_read_lock(&self.inner);
        inner.state.is_authenticated() && self.unexpired(&inner).is_some()
    }

    pub fn current_user(&self) -> Option<User> {
        acquire_read_lock(&self.inner).state.user().cloned()
    }

    /// Credential expiry, Unix milliseconds
    pub fn token_expiry(&self) -> Option<i64> {
        acquire_read_lock(&self.inner)
            .credential
            .as_ref()
            .map(Credential::expires_at)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// True iff a credential exists, it has not expired and a user is
    /// loaded. No I/O.
    pub fn is_session_valid(&self) -> bool {
        let inner = acquire_read_lock(&self.inner);
        self.unexpired(&inner).is_some() && inner.state.user().is_some()
    }

    /// The credential to present to the backend, or `None` once expired
    pub fn active_credential(&self) -> Option<Credential> {
        let inner = acquire_read_lock(&self.inner);
        self.unexpired(&inner).cloned()
    }

    pub fn passive_failures(&self) -> u32 {
        self.passive_failures.load(Ordering::SeqCst)
    }

    // ---- commands ------------------------------------------------------

    /// Restore a session from storage at application start.
    ///
    /// Skipped on the login route. Expiry is decided locally; a failed
    /// profile fetch does not end the session unless the backend
    /// explicitly rejected the credential.
    pub async fn initialize(&self, current_route: &str) {
        if current_route == self.config.login_route {
            debug!("On login route, skipping session restore");
            self.loading.store(false, Ordering::SeqCst);
            return;
        }

        self.loading.store(true, Ordering::SeqCst);
        self.restore().await;
        self.loading.store(false, Ordering::SeqCst);
    }

    async fn restore(&self) {
        let token = match self.store.get(TOKEN_KEY) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                debug!("No stored credential, staying unauthenticated");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Could not read stored credential");
                return;
            }
        };

        let credential = match Credential::from_jwt(&token) {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Stored credential is unreadable, ignoring it");
                return;
            }
        };

        if credential.is_expired(self.clock.as_ref()) {
            info!("Stored credential expired, clearing session data");
            self.purge_storage();
            return;
        }

        let ticket = {
            let mut inner = acquire_write_lock(&self.inner);
            let ticket = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            inner.credential = Some(credential.clone());
            self.publish(
                &mut inner,
                SessionState::Unverified {
                    expires_at: credential.expires_at(),
                },
            );
            ticket
        };
        self.arm_expiry_timer(&credential);

        match self.transport.get_profile(&credential).await {
            Ok(user) => {
                self.apply_profile(ticket, &credential, user);
            }
            Err(err) if err.is_auth_rejection() => {
                info!("Backend rejected stored credential");
                if self.is_current(ticket) {
                    self.logout();
                }
            }
            Err(err) => {
                let failures = self.passive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(error = %err, failures, "Profile fetch failed at startup, keeping session");
                if let Some(user) = self.cached_user() {
                    self.apply_profile(ticket, &credential, user);
                }
            }
        }
    }

    /// Authenticate with username and password.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        redirect_to: Option<&str>,
    ) -> Result<LoginSuccess, AuthError> {
        let ticket = {
            let mut inner = acquire_write_lock(&self.inner);
            let ticket = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            inner.credential = None;
            self.publish(&mut inner, SessionState::Authenticating);
            ticket
        };
        self.cancel_expiry_timer();
        self.loading.store(true, Ordering::SeqCst);

        let result = self
            .transport
            .login(LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await;

        let response = match result {
            Ok(response) if response.expires_in > 0 => response,
            Ok(_) => {
                warn!("Login returned an already expired credential");
                self.fail_login(ticket);
                return Err(AuthError::SessionExpired);
            }
            Err(err) => {
                let err = AuthError::from(err);
                match &err {
                    AuthError::InvalidCredentials(_) => info!(username, "Login rejected"),
                    other => warn!(error = %other, "Login failed"),
                }
                self.fail_login(ticket);
                return Err(err);
            }
        };

        let credential =
            Credential::issued(response.token, response.expires_in, self.clock.now_millis());
        let user = response.user;
        {
            let mut inner = acquire_write_lock(&self.inner);
            if !self.is_current(ticket) {
                debug!("Discarding login result superseded by a newer session change");
                return Err(AuthError::Superseded);
            }

            self.persist(TOKEN_KEY, credential.token());
            match response.refresh_token.as_deref() {
                Some(refresh) => self.persist(REFRESH_TOKEN_KEY, refresh),
                None => self.forget(REFRESH_TOKEN_KEY),
            }
            self.persist_user(&user);

            inner.credential = Some(credential.clone());
            let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            self.publish(
                &mut inner,
                SessionState::Authenticated(ActiveSession {
                    user: user.clone(),
                    expires_at: credential.expires_at(),
                    sequence,
                }),
            );
        }

        self.passive_failures.store(0, Ordering::SeqCst);
        self.loading.store(false, Ordering::SeqCst);
        self.arm_expiry_timer(&credential);
        info!(user = %user.username, "Login successful");

        Ok(LoginSuccess {
            user,
            expires_at: credential.expires_at(),
            redirect_to: redirect_to
                .map(str::to_string)
                .unwrap_or_else(|| self.config.default_redirect.clone()),
        })
    }

    fn fail_login(&self, ticket: u64) {
        let mut inner = acquire_write_lock(&self.inner);
        if self.is_current(ticket) {
            self.purge_storage();
            self.publish(&mut inner, SessionState::Unauthenticated);
            self.loading.store(false, Ordering::SeqCst);
        }
    }

    /// End the session. Idempotent.
    ///
    /// Local state is cleared before anything else; the remote logout is
    /// fired in the background and its outcome ignored.
    pub fn logout(&self) {
        self.end_session(None);
    }

    /// Clears the session. With `only_expiring`, only if the held
    /// credential still has that expiry (a re-login replaced it otherwise).
    fn end_session(&self, only_expiring: Option<i64>) -> bool {
        let request = {
            let mut inner = acquire_write_lock(&self.inner);
            if let Some(expires_at) = only_expiring {
                let holds = inner
                    .credential
                    .as_ref()
                    .is_some_and(|c| c.expires_at() == expires_at);
                if !holds {
                    return false;
                }
            }

            self.epoch.fetch_add(1, Ordering::SeqCst);
            let credential = inner.credential.take();
            let was_active = inner.state != SessionState::Unauthenticated;
            if was_active {
                self.publish(&mut inner, SessionState::LoggingOut);
            }
            self.publish(&mut inner, SessionState::Unauthenticated);

            let refresh_token = self.store.get(REFRESH_TOKEN_KEY).ok().flatten();
            self.purge_storage();

            if credential.is_none() && refresh_token.is_none() {
                None
            } else {
                let now = self.clock.now_millis();
                Some(LogoutRequest {
                    credential: credential.filter(|c| !c.is_expired_at(now)),
                    refresh_token,
                })
            }
        };

        self.cancel_expiry_timer();
        self.loading.store(false, Ordering::SeqCst);
        self.passive_failures.store(0, Ordering::SeqCst);

        if let Some(request) = request {
            info!("Logged out");
            self.spawn_remote_logout(request);
        }
        true
    }

    fn spawn_remote_logout(&self, request: LogoutRequest) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No async runtime, skipping remote logout");
                return;
            }
        };
        let transport = Arc::clone(&self.transport);
        handle.spawn(async move {
            if let Err(e) = transport.logout(request).await {
                warn!(error = %e, "Logout API call failed");
            }
        });
    }

    /// Explicit re-validation against the backend. Fails closed: any
    /// failure ends the session.
    pub async fn check_session(&self) -> bool {
        let (ticket, credential) = {
            let inner = acquire_read_lock(&self.inner);
            match self.unexpired(&inner) {
                Some(credential) if inner.state.user().is_some() => {
                    (self.epoch.load(Ordering::SeqCst), credential.clone())
                }
                _ => {
                    drop(inner);
                    debug!("Local session invalid, logging out");
                    self.logout();
                    return false;
                }
            }
        };

        match self.transport.get_profile(&credential).await {
            Ok(user) => self.apply_profile(ticket, &credential, user),
            Err(err) => {
                warn!(error = %err, "Session check failed, logging out");
                if self.is_current(ticket) {
                    self.logout();
                }
                false
            }
        }
    }

    /// On-demand retry of the passive profile fetch.
    ///
    /// Tolerates transient failures until `max_passive_failures`
    /// consecutive ones have been seen; after that the retry escalates to
    /// `check_session`.
    pub async fn retry_profile(&self) -> bool {
        if self.passive_failures() >= self.config.max_passive_failures {
            info!(
                failures = self.passive_failures(),
                "Too many passive profile failures, escalating to session check"
            );
            return self.check_session().await;
        }

        let (ticket, credential) = {
            let inner = acquire_read_lock(&self.inner);
            match self.unexpired(&inner) {
                Some(credential) => (self.epoch.load(Ordering::SeqCst), credential.clone()),
                None => return false,
            }
        };

        match self.transport.get_profile(&credential).await {
            Ok(user) => self.apply_profile(ticket, &credential, user),
            Err(err) if err.is_auth_rejection() => {
                info!("Backend rejected credential on profile retry");
                if self.is_current(ticket) {
                    self.logout();
                }
                false
            }
            Err(err) => {
                let failures = self.passive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(error = %err, failures, "Profile retry failed, keeping session");
                false
            }
        }
    }

    /// Create a user through the registration endpoint
    pub async fn register(&self, new_user: NewUser) -> Result<User, AuthError> {
        let username = new_user.username.clone();
        match self.transport.register(new_user).await {
            Ok(user) => {
                info!(user = %user.username, "User created");
                Ok(user)
            }
            Err(err) => {
                warn!(user = %username, error = %err, "Failed to create user");
                Err(err.into())
            }
        }
    }

    /// Stop background work
    pub fn shutdown(&self) {
        self.cancel_expiry_timer();
    }

    // ---- internals -----------------------------------------------------

    /// Apply a freshly fetched profile if the session it was fetched for
    /// is still the current one
    fn apply_profile(&self, ticket: u64, fetched_with: &Credential, user: User) -> bool {
        let rearm_for = {
            let mut inner = acquire_write_lock(&self.inner);
            if !self.is_current(ticket) || inner.credential.is_none() {
                debug!("Discarding profile result for a session that has ended");
                return false;
            }

            let credential = self.refreshed_credential(fetched_with);
            let expiry_changed = inner
                .credential
                .as_ref()
                .map_or(true, |c| c.expires_at() != credential.expires_at());

            let sequence = inner
                .state
                .active()
                .map(|s| s.sequence)
                .unwrap_or_else(|| self.next_sequence.fetch_add(1, Ordering::SeqCst));
            let session = ActiveSession {
                user: user.clone(),
                expires_at: credential.expires_at(),
                sequence,
            };
            let state = match inner.state {
                SessionState::ExpiringSoon(_) if !expiry_changed => {
                    SessionState::ExpiringSoon(session)
                }
                _ => SessionState::Authenticated(session),
            };

            self.persist_user(&user);
            inner.credential = Some(credential.clone());
            self.publish(&mut inner, state);
            expiry_changed.then_some(credential)
        };

        self.passive_failures.store(0, Ordering::SeqCst);
        if let Some(credential) = rearm_for {
            self.arm_expiry_timer(&credential);
        }
        debug!(user = %user.username, "Session profile loaded");
        true
    }

    /// The stored token may have been rotated by the backend while a
    /// request was in flight; prefer it when it is readable and unexpired
    fn refreshed_credential(&self, current: &Credential) -> Credential {
        let now = self.clock.now_millis();
        match self.store.get(TOKEN_KEY) {
            Ok(Some(token)) if token != current.token() => match Credential::from_jwt(&token) {
                Ok(fresh) if !fresh.is_expired_at(now) => fresh,
                _ => current.clone(),
            },
            _ => current.clone(),
        }
    }

    fn unexpired<'a>(&self, inner: &'a Inner) -> Option<&'a Credential> {
        let now = self.clock.now_millis();
        inner
            .credential
            .as_ref()
            .filter(|credential| !credential.is_expired_at(now))
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == ticket
    }

    fn publish(&self, inner: &mut Inner, state: SessionState) {
        if inner.state != state {
            debug!(from = inner.state.label(), to = state.label(), "Session transition");
        }
        inner.state = state.clone();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn cached_user(&self) -> Option<User> {
        let raw = self.store.get(USER_KEY).ok().flatten()?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached user");
                None
            }
        }
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            warn!(key, error = %e, "Failed to persist session data");
        }
    }

    fn forget(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!(key, error = %e, "Failed to remove session data");
        }
    }

    fn persist_user(&self, user: &User) {
        match serde_json::to_string(user) {
            Ok(json) => self.persist(USER_KEY, &json),
            Err(e) => warn!(error = %e, "Failed to serialize user"),
        }
    }

    fn purge_storage(&self) {
        for key in SESSION_KEYS {
            self.forget(key);
        }
    }

    // ---- expiry timer --------------------------------------------------

    /// (Re)arm the expiry timer. The task first flips the session to
    /// `ExpiringSoon` inside the warning window, then logs out at expiry.
    fn arm_expiry_timer(&self, credential: &Credential) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime, expiry timer not armed");
                return;
            }
        };

        let expires_at = credential.expires_at();
        let remaining = credential.remaining_millis(self.clock.now_millis());
        let until_expiry = Duration::from_millis(remaining);
        let warning = self.config.expiry_warning.min(until_expiry);
        let until_warning = until_expiry - warning;
        let me = self.me.clone();

        let task = handle.spawn(async move {
            tokio::time::sleep(until_warning).await;
            match me.upgrade() {
                Some(manager) => manager.enter_expiring_soon(expires_at),
                None => return,
            }
            tokio::time::sleep(warning).await;
            if let Some(manager) = me.upgrade() {
                if manager.end_session(Some(expires_at)) {
                    info!("Credential expired, session ended");
                }
            }
        });

        if let Some(previous) = lock_or_recover(&self.expiry_timer).replace(task) {
            previous.abort();
        }
        debug!(in_ms = remaining, "Expiry timer armed");
    }

    fn cancel_expiry_timer(&self) {
        if let Some(task) = lock_or_recover(&self.expiry_timer).take() {
            task.abort();
        }
    }

    fn enter_expiring_soon(&self, expires_at: i64) {
        let mut inner = acquire_write_lock(&self.inner);
        let holds = inner
            .credential
            .as_ref()
            .is_some_and(|c| c.expires_at() == expires_at);
        if !holds {
            return;
        }
        let session = match &inner.state {
            SessionState::Authenticated(session) => session.clone(),
            _ => return,
        };
        self.publish(&mut inner, SessionState::ExpiringSoon(session));
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancel_expiry_timer();
    }
}
