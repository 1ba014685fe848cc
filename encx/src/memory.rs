//! In-memory providers for tests and ephemeral use.
//!
//! The key service wraps DEKs under a process-local AES-256-GCM key; the
//! secret service keeps peppers in a map, base64-encoded like a real backend
//! would store them. Both are deterministic enough for tests (optional fixed
//! seed) while honoring the wrap-nondeterminism contract.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use base64::Engine as _;
use zeroize::Zeroizing;

use crate::aead;
use crate::error::Error;
use crate::keys::{Dek, Pepper};
use crate::keyservice::{KeyService, SecretService};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

// ---------------------------------------------------------------------------
// In-memory key service
// ---------------------------------------------------------------------------

/// Process-local KeyService: one wrapping key per alias, never exported.
///
/// Aliases are created on first use via [`KeyService::create_key`] or
/// resolved via [`KeyService::get_key_id`]; wrapping is AES-256-GCM with a
/// fresh nonce, so repeat wraps of the same DEK differ.
pub struct InMemoryKeyService {
    keys: RwLock<HashMap<String, Dek>>,
    seed: Option<[u8; 32]>,
}

impl InMemoryKeyService {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            seed: None,
        }
    }

    /// Deterministic wrapping keys derived from `seed`, for tests that need
    /// two services to share key material (e.g. decrypt-after-restart).
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            seed: Some(seed),
        }
    }

    fn kek_for(&self, alias: &str) -> Result<Dek, Error> {
        if let Some(existing) = self.keys.read().unwrap().get(alias) {
            return Ok(existing.clone());
        }
        let kek = match self.seed {
            Some(seed) => {
                // Stable per-alias key: SHA-256(seed || alias).
                use sha2::{Digest, Sha256};
                let mut hasher = Sha256::new();
                hasher.update(seed);
                hasher.update(alias.as_bytes());
                let digest = hasher.finalize();
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(&digest);
                Dek::from_bytes(bytes)
            }
            None => Dek::generate()?,
        };
        // First writer wins; racers adopt the stored key.
        let mut keys = self.keys.write().unwrap();
        let stored = keys.entry(alias.to_string()).or_insert(kek);
        Ok(stored.clone())
    }
}

impl Default for InMemoryKeyService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyService for InMemoryKeyService {
    async fn get_key_id(&self, alias: &str) -> Result<String, Error> {
        if alias.is_empty() {
            return Err(Error::invalid_arg("key alias must not be empty"));
        }
        self.kek_for(alias)?;
        Ok(format!("mem/{}", alias))
    }

    async fn create_key(&self, description: &str) -> Result<String, Error> {
        let alias = if description.is_empty() {
            "default".to_string()
        } else {
            description.to_string()
        };
        self.kek_for(&alias)?;
        Ok(alias)
    }

    async fn wrap_dek(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        if plaintext.len() != crate::keys::KEY_BYTES {
            return Err(Error::invalid_arg("DEK plaintext must be 32 bytes"));
        }
        let alias = key_id.strip_prefix("mem/").unwrap_or(key_id);
        let kek = self.kek_for(alias)?;
        aead::seal(&kek, plaintext, b"")
    }

    async fn unwrap_dek(
        &self,
        key_id: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        let alias = key_id.strip_prefix("mem/").unwrap_or(key_id);
        let kek = self.kek_for(alias)?;
        aead::open(&kek, ciphertext, b"").map(Zeroizing::new)
    }
}

// ---------------------------------------------------------------------------
// In-memory secret service
// ---------------------------------------------------------------------------

/// Map-backed SecretService holding base64-encoded peppers.
pub struct InMemorySecretService {
    secrets: RwLock<HashMap<String, String>>,
    namespace: String,
}

impl InMemorySecretService {
    pub fn new() -> Self {
        Self::with_namespace("encx")
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            secrets: RwLock::new(HashMap::new()),
            namespace: namespace.into(),
        }
    }
}

impl Default for InMemorySecretService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretService for InMemorySecretService {
    async fn get_pepper(&self, alias: &str) -> Result<Pepper, Error> {
        let secrets = self.secrets.read().unwrap();
        let encoded = secrets
            .get(&self.storage_path(alias))
            .ok_or_else(|| Error::secret_storage_unavailable(format!("no pepper at alias {}", alias)))?;
        let bytes = B64
            .decode(encoded)
            .map_err(|e| Error::secret_storage_unavailable(format!("corrupt pepper: {}", e)))?;
        Pepper::from_slice(&bytes)
    }

    async fn store_pepper(&self, alias: &str, pepper: &Pepper) -> Result<(), Error> {
        if alias.is_empty() {
            return Err(Error::invalid_arg("pepper alias must not be empty"));
        }
        let mut secrets = self.secrets.write().unwrap();
        secrets.insert(self.storage_path(alias), B64.encode(pepper.as_bytes()));
        Ok(())
    }

    async fn pepper_exists(&self, alias: &str) -> Result<bool, Error> {
        Ok(self
            .secrets
            .read()
            .unwrap()
            .contains_key(&self.storage_path(alias)))
    }

    fn storage_path(&self, alias: &str) -> String {
        format!("{}/{}/pepper", self.namespace, alias)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
