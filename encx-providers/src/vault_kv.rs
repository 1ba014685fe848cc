//! Vault KV v2 secret service.
//!
//! The pepper lives at `encx/<alias>/pepper` under a KV v2 mount (default
//! `secret`); KV v2 wraps payloads under `data.data`, and the pepper bytes
//! are base64-encoded in the `value` field.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::json;

use encx::{Error, Pepper, SecretService};

use crate::pepper_path;
use crate::vault::{extract_str, VaultClient, VaultError};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Default KV v2 mount point.
const KV_MOUNT: &str = "secret";

fn map_err(e: VaultError) -> Error {
    match e {
        VaultError::Config(_) => Error::invalid_configuration(e.to_string()),
        _ if e.is_auth() => Error::authentication_failed(e.to_string()),
        _ => Error::secret_storage_unavailable(e.to_string()),
    }
}

/// SecretService backed by the Vault KV v2 secrets engine.
pub struct VaultKvSecretService {
    client: VaultClient,
    mount: String,
}

impl VaultKvSecretService {
    pub fn new(client: VaultClient) -> Self {
        Self {
            client,
            mount: KV_MOUNT.to_string(),
        }
    }

    /// Use a non-default KV v2 mount.
    pub fn with_mount(client: VaultClient, mount: impl Into<String>) -> Self {
        Self {
            client,
            mount: mount.into(),
        }
    }

    /// Connect from the `VAULT_*` environment.
    pub async fn from_env() -> Result<Self, Error> {
        Ok(Self::new(VaultClient::from_env().await.map_err(map_err)?))
    }

    fn data_path(&self, alias: &str) -> String {
        format!("{}/data/{}", self.mount, pepper_path(alias))
    }
}

#[async_trait]
impl SecretService for VaultKvSecretService {
    async fn get_pepper(&self, alias: &str) -> Result<Pepper, Error> {
        let body = self
            .client
            .get(&self.data_path(alias))
            .await
            .map_err(map_err)?
            .ok_or_else(|| {
                Error::secret_storage_unavailable(format!("no pepper at alias {}", alias))
            })?;

        let encoded = extract_str(&body, &["data", "data", "value"]).map_err(map_err)?;
        let bytes = B64
            .decode(encoded)
            .map_err(|e| Error::secret_storage_unavailable(format!("corrupt pepper: {}", e)))?;
        Pepper::from_slice(&bytes)
    }

    async fn store_pepper(&self, alias: &str, pepper: &Pepper) -> Result<(), Error> {
        if alias.is_empty() {
            return Err(Error::invalid_arg("pepper alias must not be empty"));
        }
        self.client
            .post(
                &self.data_path(alias),
                json!({ "data": { "value": B64.encode(pepper.as_bytes()) } }),
            )
            .await
            .map_err(map_err)?;
        tracing::info!(path = %self.storage_path(alias), "stored pepper");
        Ok(())
    }

    async fn pepper_exists(&self, alias: &str) -> Result<bool, Error> {
        Ok(self
            .client
            .get(&self.data_path(alias))
            .await
            .map_err(map_err)?
            .is_some())
    }

    fn storage_path(&self, alias: &str) -> String {
        pepper_path(alias)
    }
}
