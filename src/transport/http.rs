//! reqwest-backed transport for the console backend
//!
//! One lazily built client is shared process-wide so connections and TLS
//! sessions are reused across session and tenant calls. A transport with a
//! non-default timeout gets its own client.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::TransportError;
use crate::auth::{
    AuthTransport, Credential, LoginRequest, LoginResponse, LogoutRequest, NewUser, User,
};
use crate::config::ConsoleConfig;
use crate::environment::EnvironmentInfo;
use crate::tenant::{Subscription, Tenant, TenantTransport, UsageSnapshot};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

static SHARED_CLIENT: Lazy<Client> = Lazy::new(|| build_client(DEFAULT_TIMEOUT));

/// Process-wide client with the default timeout
#[inline]
pub fn shared_client() -> &'static Client {
    &SHARED_CLIENT
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(8)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build HTTP client, using defaults");
            Client::new()
        })
}

/// Error payload shapes the backend uses
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    user_id: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: shared_client().clone(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ConsoleConfig) -> Self {
        let client = if config.request_timeout == DEFAULT_TIMEOUT {
            shared_client().clone()
        } else {
            build_client(config.request_timeout)
        };
        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str, credential: &Credential) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .header(AUTHORIZATION, credential.authorization_header())
    }

    fn post(&self, path: &str, credential: Option<&Credential>) -> RequestBuilder {
        let request = self.client.post(self.url(path));
        match credential {
            Some(credential) => request.header(AUTHORIZATION, credential.authorization_header()),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }
        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Malformed(e.to_string())
            }
        })
    }

    /// Like `send`, for endpoints whose body we do not need
    async fn send_empty(&self, request: RequestBuilder) -> Result<(), TransportError> {
        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify(status, &body))
        }
    }

    /// Deployment environment of the backend. Never fails: any error
    /// yields the development defaults.
    pub async fn environment_config(&self, credential: &Credential) -> EnvironmentInfo {
        match self
            .send::<Value>(self.get("/system/config/environment", credential))
            .await
        {
            Ok(payload) => EnvironmentInfo::from_payload(payload),
            Err(e) => {
                warn!(error = %e, "Failed to fetch environment config, using defaults");
                EnvironmentInfo::default()
            }
        }
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Map a non-success response to a transport error, keeping the server's
/// message when it sent one
fn classify(status: StatusCode, body: &str) -> TransportError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    if status == StatusCode::UNAUTHORIZED {
        TransportError::Unauthorized(message)
    } else {
        TransportError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn login(&self, request: LoginRequest) -> Result<LoginResponse, TransportError> {
        self.send(self.post("/auth/login", None).json(&request)).await
    }

    async fn get_profile(&self, credential: &Credential) -> Result<User, TransportError> {
        self.send(self.get("/auth/profile", credential)).await
    }

    async fn logout(&self, request: LogoutRequest) -> Result<(), TransportError> {
        let body = json!({ "refreshToken": request.refresh_token });
        self.send_empty(self.post("/auth/logout", request.credential.as_ref()).json(&body))
            .await
    }

    async fn register(&self, user: NewUser) -> Result<User, TransportError> {
        let response: RegisterResponse = self
            .send(self.post("/auth/register", None).json(&user))
            .await?;
        if let Some(message) = &response.message {
            debug!(user_id = %response.user_id, message = %message, "Registration acknowledged");
        }

        Ok(User {
            id: response.user_id,
            username: user.username,
            email: Some(user.email),
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            status: None,
            email_verified: false,
            created_at: None,
            updated_at: None,
            last_login_at: None,
            permissions: Default::default(),
        })
    }
}

#[async_trait]
impl TenantTransport for HttpTransport {
    async fn current_tenant(&self, credential: &Credential) -> Result<Tenant, TransportError> {
        self.send(self.get("/tenants/current", credential)).await
    }

    async fn my_tenants(&self, credential: &Credential) -> Result<Vec<Tenant>, TransportError> {
        self.send(self.get("/tenants/my-tenants", credential)).await
    }

    async fn switch_tenant(
        &self,
        credential: &Credential,
        tenant_id: &str,
    ) -> Result<(), TransportError> {
        let path = format!("/tenants/switch/{tenant_id}");
        self.send_empty(self.post(&path, Some(credential))).await
    }

    async fn subscription(
        &self,
        credential: &Credential,
        tenant_id: &str,
    ) -> Result<Subscription, TransportError> {
        let path = format!("/tenants/{tenant_id}/subscription");
        self.send(self.get(&path, credential)).await
    }

    async fn usage(
        &self,
        credential: &Credential,
        tenant_id: &str,
    ) -> Result<UsageSnapshot, TransportError> {
        let path = format!("/tenants/{tenant_id}/usage");
        self.send(self.get(&path, credential)).await
    }
}
