//! AWS KMS key service.
//!
//! KEKs live in KMS and are addressed by alias (`alias/<name>`); wrap and
//! unwrap are the KMS Encrypt/Decrypt operations on the raw 32-byte DEK.
//! Ciphertext blobs are self-describing, so unwrap works regardless of the
//! key id passed alongside. The SDK's default credential chain applies.

use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client as KmsClient;
use zeroize::Zeroizing;

use encx::{Error, KeyService};

/// KeyService backed by AWS KMS.
pub struct AwsKmsKeyService {
    client: KmsClient,
}

impl AwsKmsKeyService {
    /// Build from the ambient AWS configuration.
    pub async fn new() -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: KmsClient::new(&config),
        }
    }

    /// Build against a custom endpoint (localstack, KMS-compatible proxies).
    /// Credentials and region still come from the default chain.
    pub async fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(endpoint.into())
            .load()
            .await;
        Self {
            client: KmsClient::new(&config),
        }
    }

    /// Build from a preconfigured client (custom endpoint, tests).
    pub fn from_client(client: KmsClient) -> Self {
        Self { client }
    }

    fn qualified_alias(alias: &str) -> String {
        if alias.starts_with("alias/") || alias.starts_with("arn:") {
            alias.to_string()
        } else {
            format!("alias/{}", alias)
        }
    }
}

#[async_trait]
impl KeyService for AwsKmsKeyService {
    async fn get_key_id(&self, alias: &str) -> Result<String, Error> {
        if alias.is_empty() {
            return Err(Error::invalid_arg("key alias must not be empty"));
        }
        let response = self
            .client
            .describe_key()
            .key_id(Self::qualified_alias(alias))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_not_found_exception()) == Some(true) {
                    Error::kms_unavailable(format!("KMS alias {} not found", alias))
                } else {
                    Error::kms_unavailable(format!("KMS DescribeKey failed: {}", e))
                }
            })?;

        response
            .key_metadata()
            .map(|meta| meta.key_id().to_string())
            .ok_or_else(|| Error::kms_unavailable("KMS returned no key metadata"))
    }

    async fn create_key(&self, description: &str) -> Result<String, Error> {
        let created = self
            .client
            .create_key()
            .description(description)
            .send()
            .await
            .map_err(|e| Error::kms_unavailable(format!("KMS CreateKey failed: {}", e)))?;

        let key_id = created
            .key_metadata()
            .map(|meta| meta.key_id().to_string())
            .ok_or_else(|| Error::kms_unavailable("KMS returned no key metadata"))?;

        // Bind the human alias so later engines resolve it.
        self.client
            .create_alias()
            .alias_name(Self::qualified_alias(description))
            .target_key_id(&key_id)
            .send()
            .await
            .map_err(|e| Error::kms_unavailable(format!("KMS CreateAlias failed: {}", e)))?;

        tracing::info!(alias = description, "created KMS key");
        Ok(description.to_string())
    }

    async fn wrap_dek(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        if plaintext.len() != encx::KEY_BYTES {
            return Err(Error::invalid_arg("DEK plaintext must be 32 bytes"));
        }
        let response = self
            .client
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(plaintext))
            .send()
            .await
            .map_err(|e| Error::kms_unavailable(format!("KMS Encrypt failed: {}", e)))?;

        response
            .ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| Error::kms_unavailable("KMS Encrypt returned no ciphertext"))
    }

    async fn unwrap_dek(
        &self,
        key_id: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        // KMS ciphertext embeds the key; key_id is passed for strictness but
        // the blob decides.
        let response = self
            .client
            .decrypt()
            .key_id(key_id)
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await
            .map_err(|e| {
                let invalid = e
                    .as_service_error()
                    .map(|s| s.is_invalid_ciphertext_exception())
                    == Some(true);
                if invalid {
                    Error::decrypt_failed("KMS rejected the wrapped DEK")
                } else {
                    Error::kms_unavailable(format!("KMS Decrypt failed: {}", e))
                }
            })?;

        response
            .plaintext()
            .map(|blob| Zeroizing::new(blob.as_ref().to_vec()))
            .ok_or_else(|| Error::decrypt_failed("KMS Decrypt returned no plaintext"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_qualification() {
        assert_eq!(AwsKmsKeyService::qualified_alias("k1"), "alias/k1");
        assert_eq!(AwsKmsKeyService::qualified_alias("alias/k1"), "alias/k1");
        assert_eq!(
            AwsKmsKeyService::qualified_alias("arn:aws:kms:us-east-1:1:key/abc"),
            "arn:aws:kms:us-east-1:1:key/abc"
        );
    }
}
