//! Vault Transit key service.
//!
//! The KEK is a transit key named by its alias; it never leaves Vault. Wrap
//! and unwrap are the transit encrypt/decrypt endpoints over the
//! base64-encoded DEK. Transit ciphertext is the string `vault:vN:...`,
//! carried here as opaque bytes — the key version inside it is Vault's own
//! and is unrelated to the engine's metadata versions.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::json;
use zeroize::Zeroizing;

use encx::{Error, KeyService};

use crate::vault::{extract_str, VaultClient, VaultError};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Default transit mount point.
const TRANSIT_MOUNT: &str = "transit";

fn map_err(e: VaultError) -> Error {
    match e {
        VaultError::Config(_) => Error::invalid_configuration(e.to_string()),
        _ if e.is_auth() => Error::authentication_failed(e.to_string()),
        _ => Error::kms_unavailable(e.to_string()),
    }
}

/// KeyService backed by the Vault Transit secrets engine.
pub struct VaultTransitKeyService {
    client: VaultClient,
    mount: String,
}

impl VaultTransitKeyService {
    pub fn new(client: VaultClient) -> Self {
        Self {
            client,
            mount: TRANSIT_MOUNT.to_string(),
        }
    }

    /// Use a non-default transit mount.
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
}

#[async_trait]
impl KeyService for VaultTransitKeyService {
    async fn get_key_id(&self, alias: &str) -> Result<String, Error> {
        if alias.is_empty() {
            return Err(Error::invalid_arg("key alias must not be empty"));
        }
        let found = self
            .client
            .get(&format!("{}/keys/{}", self.mount, alias))
            .await
            .map_err(map_err)?;
        match found {
            // Transit addresses keys by name; the alias is the id.
            Some(_) => Ok(alias.to_string()),
            None => Err(Error::kms_unavailable(format!(
                "transit key {} not found",
                alias
            ))),
        }
    }

    async fn create_key(&self, description: &str) -> Result<String, Error> {
        self.client
            .post(
                &format!("{}/keys/{}", self.mount, description),
                json!({ "type": "aes256-gcm96" }),
            )
            .await
            .map_err(map_err)?;
        tracing::info!(key = description, "created transit key");
        Ok(description.to_string())
    }

    async fn wrap_dek(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        if plaintext.len() != encx::KEY_BYTES {
            return Err(Error::invalid_arg("DEK plaintext must be 32 bytes"));
        }
        let body = self
            .client
            .post(
                &format!("{}/encrypt/{}", self.mount, key_id),
                json!({ "plaintext": B64.encode(plaintext) }),
            )
            .await
            .map_err(map_err)?
            .ok_or_else(|| Error::kms_unavailable("transit encrypt returned 404"))?;

        let ciphertext = extract_str(&body, &["data", "ciphertext"]).map_err(map_err)?;
        Ok(ciphertext.as_bytes().to_vec())
    }

    async fn unwrap_dek(
        &self,
        key_id: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        let ciphertext = std::str::from_utf8(ciphertext)
            .map_err(|_| Error::decrypt_failed("transit ciphertext is not valid UTF-8"))?;
        if !ciphertext.starts_with("vault:") {
            return Err(Error::decrypt_failed(
                "transit ciphertext missing vault: prefix",
            ));
        }

        let body = self
            .client
            .post(
                &format!("{}/decrypt/{}", self.mount, key_id),
                json!({ "ciphertext": ciphertext }),
            )
            .await
            .map_err(|e| match e {
                // Transit reports bad ciphertext as a 400.
                VaultError::Status { status: 400, .. } => {
                    Error::decrypt_failed("transit rejected the wrapped DEK")
                }
                other => map_err(other),
            })?
            .ok_or_else(|| Error::kms_unavailable("transit decrypt returned 404"))?;

        let plaintext = extract_str(&body, &["data", "plaintext"]).map_err(map_err)?;
        let bytes = B64
            .decode(plaintext)
            .map_err(|_| Error::decrypt_failed("transit plaintext is not valid base64"))?;
        Ok(Zeroizing::new(bytes))
    }
}
