//! AWS Secrets Manager secret service.
//!
//! The pepper is stored as a base64 string under the secret name
//! `encx/<alias>/pepper`. First store creates the secret; later stores put a
//! new version.

use async_trait::async_trait;
use aws_sdk_secretsmanager::Client as SecretsClient;
use base64::Engine as _;

use encx::{Error, Pepper, SecretService};

use crate::pepper_path;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// SecretService backed by AWS Secrets Manager.
pub struct AwsSecretsManagerSecretService {
    client: SecretsClient,
}

impl AwsSecretsManagerSecretService {
    /// Build from the ambient AWS configuration.
    pub async fn new() -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: SecretsClient::new(&config),
        }
    }

    /// Build against a custom endpoint (localstack). Credentials and region
    /// still come from the default chain.
    pub async fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(endpoint.into())
            .load()
            .await;
        Self {
            client: SecretsClient::new(&config),
        }
    }

    /// Build from a preconfigured client (custom endpoint, tests).
    pub fn from_client(client: SecretsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretService for AwsSecretsManagerSecretService {
    async fn get_pepper(&self, alias: &str) -> Result<Pepper, Error> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(pepper_path(alias))
            .send()
            .await
            .map_err(|e| {
                Error::secret_storage_unavailable(format!("GetSecretValue failed: {}", e))
            })?;

        let encoded = response
            .secret_string()
            .ok_or_else(|| Error::secret_storage_unavailable("secret has no string payload"))?;
        let bytes = B64
            .decode(encoded)
            .map_err(|e| Error::secret_storage_unavailable(format!("corrupt pepper: {}", e)))?;
        Pepper::from_slice(&bytes)
    }

    async fn store_pepper(&self, alias: &str, pepper: &Pepper) -> Result<(), Error> {
        if alias.is_empty() {
            return Err(Error::invalid_arg("pepper alias must not be empty"));
        }
        let name = pepper_path(alias);
        let payload = B64.encode(pepper.as_bytes());

        let created = self
            .client
            .create_secret()
            .name(&name)
            .secret_string(&payload)
            .send()
            .await;

        match created {
            Ok(_) => {
                tracing::info!(path = %name, "stored pepper");
                Ok(())
            }
            Err(e)
                if e.as_service_error()
                    .map(|s| s.is_resource_exists_exception())
                    == Some(true) =>
            {
                // Secret exists; write a new version instead.
                self.client
                    .put_secret_value()
                    .secret_id(&name)
                    .secret_string(&payload)
                    .send()
                    .await
                    .map_err(|e| {
                        Error::secret_storage_unavailable(format!("PutSecretValue failed: {}", e))
                    })?;
                Ok(())
            }
            Err(e) => Err(Error::secret_storage_unavailable(format!(
                "CreateSecret failed: {}",
                e
            ))),
        }
    }

    async fn pepper_exists(&self, alias: &str) -> Result<bool, Error> {
        let described = self
            .client
            .describe_secret()
            .secret_id(pepper_path(alias))
            .send()
            .await;

        match described {
            Ok(_) => Ok(true),
            Err(e)
                if e.as_service_error()
                    .map(|s| s.is_resource_not_found_exception())
                    == Some(true) =>
            {
                Ok(false)
            }
            Err(e) => Err(Error::secret_storage_unavailable(format!(
                "DescribeSecret failed: {}",
                e
            ))),
        }
    }

    fn storage_path(&self, alias: &str) -> String {
        pepper_path(alias)
    }
}
