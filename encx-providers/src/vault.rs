//! Minimal Vault HTTP client shared by the Transit and KV backends.
//!
//! Speaks the v1 API over reqwest. Authentication is a static token
//! (`VAULT_TOKEN`) or an AppRole login (`VAULT_ROLE_ID` / `VAULT_SECRET_ID`)
//! performed once at construction. `VAULT_NAMESPACE` is forwarded as the
//! `X-Vault-Namespace` header on every request.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error as ThisError;

/// Errors from the Vault HTTP layer. The Transit and KV services map these
/// onto the encx taxonomy with their own kinds.
#[derive(Debug, ThisError)]
pub enum VaultError {
    #[error("vault is not configured: {0}")]
    Config(String),

    #[error("vault transport error: {0}")]
    Transport(String),

    #[error("vault rejected credentials (HTTP {0})")]
    Auth(u16),

    #[error("vault returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("unexpected vault response shape: {0}")]
    Shape(String),
}

impl VaultError {
    pub fn is_auth(&self) -> bool {
        matches!(self, VaultError::Auth(_))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings, normally read from the environment.
#[derive(Clone, Debug)]
pub struct VaultConfig {
    pub addr: String,
    pub token: Option<String>,
    pub role_id: Option<String>,
    pub secret_id: Option<String>,
    pub namespace: Option<String>,
}

impl VaultConfig {
    /// Read `VAULT_ADDR`, `VAULT_TOKEN`, `VAULT_ROLE_ID`, `VAULT_SECRET_ID`,
    /// `VAULT_NAMESPACE`.
    pub fn from_env() -> Result<Self, VaultError> {
        let addr = std::env::var("VAULT_ADDR")
            .map_err(|_| VaultError::Config("VAULT_ADDR is not set".into()))?;
        Ok(Self {
            addr,
            token: std::env::var("VAULT_TOKEN").ok(),
            role_id: std::env::var("VAULT_ROLE_ID").ok(),
            secret_id: std::env::var("VAULT_SECRET_ID").ok(),
            namespace: std::env::var("VAULT_NAMESPACE").ok(),
        })
    }

    pub fn with_token(addr: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            token: Some(token.into()),
            role_id: None,
            secret_id: None,
            namespace: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
}

/// Authenticated Vault API client.
#[derive(Debug)]
pub struct VaultClient {
    http: reqwest::Client,
    addr: String,
    token: String,
    namespace: Option<String>,
}

impl VaultClient {
    /// Connect and authenticate per `config`. Token auth wins when both a
    /// token and AppRole credentials are present.
    pub async fn connect(config: VaultConfig) -> Result<Self, VaultError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| VaultError::Transport(e.to_string()))?;
        let addr = config.addr.trim_end_matches('/').to_string();

        let token = match (&config.token, &config.role_id, &config.secret_id) {
            (Some(token), _, _) => token.clone(),
            (None, Some(role_id), Some(secret_id)) => {
                Self::approle_login(&http, &addr, config.namespace.as_deref(), role_id, secret_id)
                    .await?
            }
            _ => {
                return Err(VaultError::Config(
                    "set VAULT_TOKEN or VAULT_ROLE_ID + VAULT_SECRET_ID".into(),
                ))
            }
        };

        Ok(Self {
            http,
            addr,
            token,
            namespace: config.namespace,
        })
    }

    /// Connect using the `VAULT_*` environment variables.
    pub async fn from_env() -> Result<Self, VaultError> {
        Self::connect(VaultConfig::from_env()?).await
    }

    async fn approle_login(
        http: &reqwest::Client,
        addr: &str,
        namespace: Option<&str>,
        role_id: &str,
        secret_id: &str,
    ) -> Result<String, VaultError> {
        let mut request = http
            .post(format!("{}/v1/auth/approle/login", addr))
            .json(&serde_json::json!({ "role_id": role_id, "secret_id": secret_id }));
        if let Some(ns) = namespace {
            request = request.header("X-Vault-Namespace", ns);
        }
        let response = request
            .send()
            .await
            .map_err(|e| VaultError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 403 || status == 401 {
            return Err(VaultError::Auth(status));
        }
        if !response.status().is_success() {
            return Err(VaultError::Status {
                status,
                detail: "approle login failed".into(),
            });
        }
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| VaultError::Shape(e.to_string()))?;
        tracing::debug!("vault approle login succeeded");
        Ok(login.auth.client_token)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .request(method, format!("{}/v1/{}", self.addr, path))
            .header("X-Vault-Token", &self.token);
        if let Some(ns) = &self.namespace {
            request = request.header("X-Vault-Namespace", ns);
        }
        request
    }

    async fn dispatch(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<Value>, VaultError> {
        let response = request
            .send()
            .await
            .map_err(|e| VaultError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            404 => Ok(None),
            401 | 403 => Err(VaultError::Auth(status)),
            _ if !response.status().is_success() => {
                // Error bodies carry an "errors" array; never echo payloads.
                let detail = response
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("errors").map(|e| e.to_string()))
                    .unwrap_or_else(|| "no detail".into());
                Err(VaultError::Status { status, detail })
            }
            204 => Ok(Some(Value::Null)),
            _ => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| VaultError::Shape(e.to_string()))?;
                Ok(Some(body))
            }
        }
    }

    /// GET an API path; `None` on 404.
    pub async fn get(&self, path: &str) -> Result<Option<Value>, VaultError> {
        self.dispatch(self.request(reqwest::Method::GET, path)).await
    }

    /// POST a JSON body to an API path; `None` on 404.
    pub async fn post(&self, path: &str, body: Value) -> Result<Option<Value>, VaultError> {
        self.dispatch(self.request(reqwest::Method::POST, path).json(&body))
            .await
    }

    /// Whether the Vault node can serve requests: initialized and unsealed
    /// (200), or a standby that forwards (429).
    pub async fn health(&self) -> Result<bool, VaultError> {
        let response = self
            .http
            .get(format!("{}/v1/sys/health", self.addr))
            .send()
            .await
            .map_err(|e| VaultError::Transport(e.to_string()))?;
        Ok(matches!(response.status().as_u16(), 200 | 429))
    }
}

/// Pull a nested string out of a Vault response body.
pub(crate) fn extract_str<'a>(body: &'a Value, keys: &[&str]) -> Result<&'a str, VaultError> {
    let mut cursor = body;
    for key in keys {
        cursor = cursor
            .get(key)
            .ok_or_else(|| VaultError::Shape(format!("missing field {}", key)))?;
    }
    cursor
        .as_str()
        .ok_or_else(|| VaultError::Shape(format!("field {} is not a string", keys.join("."))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_str_walks_nested_fields() {
        let body = serde_json::json!({ "data": { "data": { "value": "c2VjcmV0" } } });
        assert_eq!(
            extract_str(&body, &["data", "data", "value"]).unwrap(),
            "c2VjcmV0"
        );
        assert!(extract_str(&body, &["data", "missing"]).is_err());
        assert!(extract_str(&body, &["data", "data"]).is_err());
    }

    #[test]
    fn config_requires_some_credential() {
        let config = VaultConfig {
            addr: "http://127.0.0.1:8200".into(),
            token: None,
            role_id: None,
            secret_id: None,
            namespace: None,
        };
        let err = tokio_test_block_on(VaultClient::connect(config)).unwrap_err();
        assert!(matches!(err, VaultError::Config(_)));
    }

    fn tokio_test_block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }
}
