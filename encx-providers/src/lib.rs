//! # encx-providers
//!
//! Cloud KeyService and SecretService implementations for the encx engine.
//!
//! Four backends are provided; any KeyService pairs with any SecretService:
//!
//! | Backend | Trait | Addressing |
//! |---|---|---|
//! | [`AwsKmsKeyService`] | KeyService | KMS aliases (`alias/<name>`) |
//! | [`AwsSecretsManagerSecretService`] | SecretService | secret name `encx/<alias>/pepper` |
//! | [`VaultTransitKeyService`] | KeyService | transit key name = alias |
//! | [`VaultKvSecretService`] | SecretService | KV v2 path `encx/<alias>/pepper` |
//!
//! AWS credentials and region come from the SDK's default chain
//! (`AWS_REGION`, `AWS_PROFILE`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
//! `AWS_SESSION_TOKEN`, instance roles). Vault configuration comes from
//! `VAULT_ADDR`, `VAULT_TOKEN` or AppRole (`VAULT_ROLE_ID` /
//! `VAULT_SECRET_ID`), and `VAULT_NAMESPACE`.
//!
//! Errors surface without automatic retry and map onto the encx taxonomy:
//! backend outages become `KMS_UNAVAILABLE` / `SECRET_STORAGE_UNAVAILABLE`,
//! rejected credentials `AUTHENTICATION_FAILED`, bad ciphertext
//! `DECRYPT_FAILED`.

pub mod aws_kms;
pub mod aws_secrets;
pub mod vault;
pub mod vault_kv;
pub mod vault_transit;

pub use aws_kms::AwsKmsKeyService;
pub use aws_secrets::AwsSecretsManagerSecretService;
pub use vault::{VaultClient, VaultConfig, VaultError};
pub use vault_kv::VaultKvSecretService;
pub use vault_transit::VaultTransitKeyService;

/// Namespace prefix shared by the secret-storage backends.
pub(crate) const SECRET_NAMESPACE: &str = "encx";

pub(crate) fn pepper_path(alias: &str) -> String {
    format!("{}/{}/pepper", SECRET_NAMESPACE, alias)
}

// ---------------------------------------------------------------------------
// Environment-driven composition
// ---------------------------------------------------------------------------

use std::sync::Arc;

use encx::{Error, KeyService, SecretService};

/// Build the KeyService selected by `ENCX_KEY_PROVIDER`:
/// `memory` (default when unset), `aws`, or `vault`.
///
/// Composition stays static: this runs once at startup and the engine never
/// switches providers afterwards.
pub async fn key_service_from_env() -> Result<Arc<dyn KeyService>, Error> {
    let provider = std::env::var("ENCX_KEY_PROVIDER").unwrap_or_else(|_| "memory".to_string());
    match provider.as_str() {
        "memory" => Ok(Arc::new(encx::InMemoryKeyService::new())),
        "aws" | "aws-kms" => Ok(Arc::new(AwsKmsKeyService::new().await)),
        "vault" | "vault-transit" => Ok(Arc::new(VaultTransitKeyService::from_env().await?)),
        other => Err(Error::invalid_configuration(format!(
            "unknown ENCX_KEY_PROVIDER \"{}\" (memory, aws, vault)",
            other
        ))),
    }
}

/// Build the SecretService selected by `ENCX_SECRET_PROVIDER`:
/// `memory` (default when unset), `aws`, or `vault`.
pub async fn secret_service_from_env() -> Result<Arc<dyn SecretService>, Error> {
    let provider =
        std::env::var("ENCX_SECRET_PROVIDER").unwrap_or_else(|_| "memory".to_string());
    match provider.as_str() {
        "memory" => Ok(Arc::new(encx::InMemorySecretService::new())),
        "aws" | "aws-secrets-manager" => {
            Ok(Arc::new(AwsSecretsManagerSecretService::new().await))
        }
        "vault" | "vault-kv" => Ok(Arc::new(VaultKvSecretService::from_env().await?)),
        other => Err(Error::invalid_configuration(format!(
            "unknown ENCX_SECRET_PROVIDER \"{}\" (memory, aws, vault)",
            other
        ))),
    }
}
