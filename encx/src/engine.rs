//! The envelope engine: orchestrates KEK/DEK/pepper lifecycle over a
//! KeyService, a SecretService, and a MetadataStore.
//!
//! Construction resolves (or bootstraps) the pepper, the KEK id, and the
//! current key version, then caches all three; afterwards the engine holds
//! no mutable state and is safe for concurrent use. Operations are
//! fail-fast: a failed primitive propagates, and nothing half-written is
//! ever returned. Provider-touching operations are async; dropping the
//! future cancels the in-flight provider call.

use std::sync::Arc;

use crate::aead::{self, AES_256_GCM};
use crate::codec::CanonicalValue;
use crate::error::Error;
use crate::hash::{self, Argon2Params};
use crate::keys::{Dek, Pepper};
use crate::keyservice::{KeyService, SecretService};
use crate::metadata::MetadataStore;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine configuration: which KEK and pepper aliases to bind, and the
/// Argon2id tuning for HashSecure.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub kek_alias: String,
    pub pepper_alias: String,
    pub argon2: Argon2Params,
}

impl EngineConfig {
    pub fn new(kek_alias: impl Into<String>, pepper_alias: impl Into<String>) -> Self {
        Self {
            kek_alias: kek_alias.into(),
            pepper_alias: pepper_alias.into(),
            argon2: Argon2Params::default(),
        }
    }

    pub fn with_argon2(mut self, params: Argon2Params) -> Self {
        self.argon2 = params;
        self
    }

    /// Read `ENCX_KEK_ALIAS` / `ENCX_PEPPER_ALIAS` from the environment.
    pub fn from_env() -> Result<Self, Error> {
        let kek_alias = std::env::var("ENCX_KEK_ALIAS")
            .map_err(|_| Error::invalid_configuration("ENCX_KEK_ALIAS is not set"))?;
        let pepper_alias = std::env::var("ENCX_PEPPER_ALIAS")
            .map_err(|_| Error::invalid_configuration("ENCX_PEPPER_ALIAS is not set"))?;
        Ok(Self::new(kek_alias, pepper_alias))
    }

    fn validate(&self) -> Result<(), Error> {
        if self.kek_alias.is_empty() {
            return Err(Error::invalid_configuration("kek_alias must not be empty"));
        }
        if self.pepper_alias.is_empty() {
            return Err(Error::invalid_configuration(
                "pepper_alias must not be empty",
            ));
        }
        self.argon2.validate()
    }
}

// ---------------------------------------------------------------------------
// Wrapped DEK
// ---------------------------------------------------------------------------

/// A wrapped DEK plus the key version that names its metadata row.
///
/// The version is NOT embedded in the ciphertext; persist both fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedDek {
    pub ciphertext: Vec<u8>,
    pub version: u32,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The crypto envelope engine.
///
/// A process may host multiple engines with different KEK/pepper bindings;
/// there is no global state.
pub struct CryptoEngine {
    keys: Arc<dyn KeyService>,
    secrets: Arc<dyn SecretService>,
    metadata: Arc<dyn MetadataStore>,
    config: EngineConfig,
    // Cached at construction, read-only afterwards.
    pepper: Pepper,
    key_id: String,
    current_version: u32,
}

impl CryptoEngine {
    /// Construct an engine, performing the startup sequence:
    ///
    /// 1. Fetch the pepper; if absent, generate a 32-byte random pepper and
    ///    store it. Reject all-zero or wrong-length peppers.
    /// 2. Resolve the KEK alias to a key id; if absent, create the key.
    /// 3. Ensure a current key version exists; if none, register version 1.
    pub async fn new(
        keys: Arc<dyn KeyService>,
        secrets: Arc<dyn SecretService>,
        metadata: Arc<dyn MetadataStore>,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        let pepper = if secrets.pepper_exists(&config.pepper_alias).await? {
            secrets.get_pepper(&config.pepper_alias).await?
        } else {
            tracing::info!(alias = %config.pepper_alias, "no pepper found, generating");
            let pepper = Pepper::generate()?;
            secrets.store_pepper(&config.pepper_alias, &pepper).await?;
            pepper
        };

        let key_id = match keys.get_key_id(&config.kek_alias).await {
            Ok(id) => id,
            Err(_) => {
                tracing::info!(alias = %config.kek_alias, "KEK alias unresolved, creating key");
                let created = keys.create_key(&config.kek_alias).await?;
                keys.get_key_id(&created).await?
            }
        };

        let current_version = match metadata.latest_version(&config.kek_alias)? {
            0 => metadata.register(&config.kek_alias, AES_256_GCM)?,
            version => version,
        };

        tracing::debug!(
            kek_alias = %config.kek_alias,
            version = current_version,
            "engine initialized"
        );

        Ok(Self {
            keys,
            secrets,
            metadata,
            config,
            pepper,
            key_id,
            current_version,
        })
    }

    /// The KEK alias this engine wraps under.
    pub fn kek_alias(&self) -> &str {
        &self.config.kek_alias
    }

    /// The key version new wraps will carry.
    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Backend storage path of the pepper (diagnostic only).
    pub fn pepper_path(&self) -> String {
        self.secrets.storage_path(&self.config.pepper_alias)
    }

    // -----------------------------------------------------------------------
    // DEK lifecycle
    // -----------------------------------------------------------------------

    /// Draw a fresh 32-byte DEK from the CSPRNG. Never persisted.
    pub fn generate_dek(&self) -> Result<Dek, Error> {
        Dek::generate()
    }

    /// Wrap a DEK under the current KEK, tagging it with the current version.
    pub async fn wrap_dek(&self, dek: &Dek) -> Result<WrappedDek, Error> {
        let ciphertext = self.keys.wrap_dek(&self.key_id, dek.as_bytes()).await?;
        Ok(WrappedDek {
            ciphertext,
            version: self.current_version,
        })
    }

    /// Unwrap a DEK wrapped at `version`.
    ///
    /// The version resolves to its KEK alias through the metadata store, so
    /// records wrapped before a KEK rotation keep decrypting.
    pub async fn unwrap_dek(&self, ciphertext: &[u8], version: u32) -> Result<Dek, Error> {
        if ciphertext.is_empty() {
            return Err(Error::invalid_arg("wrapped DEK must not be empty"));
        }
        let row = self.metadata.resolve_version(version)?;
        let key_id = if row.kek_alias == self.config.kek_alias {
            self.key_id.clone()
        } else {
            self.keys.get_key_id(&row.kek_alias).await?
        };
        let plaintext = self.keys.unwrap_dek(&key_id, ciphertext).await?;
        Dek::from_slice(&plaintext)
    }

    // -----------------------------------------------------------------------
    // Data path
    // -----------------------------------------------------------------------

    /// AES-256-GCM with a fresh nonce; returns `nonce || ciphertext || tag`.
    pub fn encrypt_data(&self, plaintext: &[u8], dek: &Dek) -> Result<Vec<u8>, Error> {
        aead::seal(dek, plaintext, b"")
    }

    /// MAC-verifying decrypt; never returns partial plaintext on failure.
    pub fn decrypt_data(&self, ciphertext: &[u8], dek: &Dek) -> Result<Vec<u8>, Error> {
        aead::open(dek, ciphertext, b"")
    }

    // -----------------------------------------------------------------------
    // Hash path
    // -----------------------------------------------------------------------

    /// Deterministic HMAC-SHA-256(pepper, bytes), hex-encoded. Equality
    /// lookups only; callers pass canonical serialized bytes.
    pub fn hash_basic(&self, value: &[u8]) -> String {
        hash::hash_basic(&self.pepper, value)
    }

    /// Argon2id with a random salt and the pepper folded into the secret.
    pub fn hash_secure(&self, value: &[u8]) -> Result<String, Error> {
        hash::hash_secure(&self.pepper, value, self.config.argon2)
    }

    /// Verify against a PHC-encoded HashSecure output.
    pub fn verify_hash_secure(&self, value: &[u8], encoded: &str) -> Result<bool, Error> {
        hash::verify_hash_secure(&self.pepper, value, encoded)
    }

    // -----------------------------------------------------------------------
    // Typed convenience (canonical encoding applied)
    // -----------------------------------------------------------------------

    /// Encrypt a typed value through its canonical encoding.
    pub fn encrypt_value<T: CanonicalValue>(&self, value: &T, dek: &Dek) -> Result<Vec<u8>, Error> {
        self.encrypt_data(&value.to_canonical(), dek)
    }

    /// Decrypt and decode a value produced by [`CryptoEngine::encrypt_value`].
    pub fn decrypt_value<T: CanonicalValue>(&self, ciphertext: &[u8], dek: &Dek) -> Result<T, Error> {
        let bytes = self.decrypt_data(ciphertext, dek)?;
        T::from_canonical(&bytes)
    }

    /// HashBasic over a typed value's canonical bytes, so `5i64` and `"5"`
    /// hash differently.
    pub fn hash_basic_value<T: CanonicalValue>(&self, value: &T) -> String {
        self.hash_basic(&value.to_canonical())
    }

    /// HashSecure over a typed value's canonical bytes.
    pub fn hash_secure_value<T: CanonicalValue>(&self, value: &T) -> Result<String, Error> {
        self.hash_secure(&value.to_canonical())
    }

    /// Verify a typed value against a HashSecure output.
    pub fn verify_hash_secure_value<T: CanonicalValue>(
        &self,
        value: &T,
        encoded: &str,
    ) -> Result<bool, Error> {
        self.verify_hash_secure(&value.to_canonical(), encoded)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryKeyService, InMemorySecretService};
    use crate::metadata::InMemoryMetadataStore;
    use crate::ErrorKind;

    fn fast_config() -> EngineConfig {
        EngineConfig::new("k1", "p1").with_argon2(Argon2Params {
            memory_kib: 8_192,
            iterations: 2,
            parallelism: 1,
            ..Argon2Params::default()
        })
    }

    async fn engine() -> CryptoEngine {
        CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            Arc::new(InMemorySecretService::new()),
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn startup_bootstraps_pepper_and_version() {
        let secrets = Arc::new(InMemorySecretService::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        assert!(!secrets.pepper_exists("p1").await.unwrap());

        let engine = CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            secrets.clone(),
            metadata.clone(),
            fast_config(),
        )
        .await
        .unwrap();

        assert!(secrets.pepper_exists("p1").await.unwrap());
        assert_eq!(engine.current_version(), 1);
        assert_eq!(metadata.resolve_version(1).unwrap().kek_alias, "k1");
        assert_eq!(metadata.resolve_version(1).unwrap().algorithm, AES_256_GCM);
    }

    #[tokio::test]
    async fn startup_reuses_existing_pepper() {
        let secrets = Arc::new(InMemorySecretService::new());
        let pepper = Pepper::generate().unwrap();
        secrets.store_pepper("p1", &pepper).await.unwrap();

        let engine = CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            secrets,
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await
        .unwrap();

        // Same pepper means identical basic hashes.
        let expected = hash::hash_basic(&pepper, b"probe");
        assert_eq!(engine.hash_basic(b"probe"), expected);
    }

    #[tokio::test]
    async fn startup_reuses_existing_version() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        metadata.register("k1", AES_256_GCM).unwrap();
        metadata.register("k1", AES_256_GCM).unwrap();

        let engine = CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            Arc::new(InMemorySecretService::new()),
            metadata,
            fast_config(),
        )
        .await
        .unwrap();
        assert_eq!(engine.current_version(), 2);
    }

    #[tokio::test]
    async fn rejects_empty_aliases() {
        let result = CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            Arc::new(InMemorySecretService::new()),
            Arc::new(InMemoryMetadataStore::new()),
            EngineConfig::new("", "p1"),
        )
        .await;
        assert_eq!(
            result.err().unwrap().kind(),
            ErrorKind::InvalidConfiguration
        );
    }

    #[tokio::test]
    async fn dek_wrap_unwrap_roundtrip() {
        let engine = engine().await;
        let dek = engine.generate_dek().unwrap();
        let wrapped = engine.wrap_dek(&dek).await.unwrap();
        assert_eq!(wrapped.version, 1);
        assert!(!wrapped.ciphertext.is_empty());

        let unwrapped = engine
            .unwrap_dek(&wrapped.ciphertext, wrapped.version)
            .await
            .unwrap();
        assert_eq!(unwrapped.as_bytes(), dek.as_bytes());
    }

    #[tokio::test]
    async fn unwrap_unknown_version_fails() {
        let engine = engine().await;
        let dek = engine.generate_dek().unwrap();
        let wrapped = engine.wrap_dek(&dek).await.unwrap();
        let err = engine.unwrap_dek(&wrapped.ciphertext, 99).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionUnknown);
    }

    #[tokio::test]
    async fn unwrap_empty_ciphertext_fails() {
        let engine = engine().await;
        let err = engine.unwrap_dek(&[], 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
    }

    #[tokio::test]
    async fn data_roundtrip_and_tamper() {
        let engine = engine().await;
        let dek = engine.generate_dek().unwrap();

        let ciphertext = engine.encrypt_data(b"a@b.co", &dek).unwrap();
        assert!(ciphertext.len() >= 12 + 16);
        assert_eq!(engine.decrypt_data(&ciphertext, &dek).unwrap(), b"a@b.co");

        let mut tampered = ciphertext;
        tampered[14] ^= 0x01;
        let err = engine.decrypt_data(&tampered, &dek).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecryptFailed);
    }

    #[tokio::test]
    async fn decrypt_after_kek_rotation_resolves_old_alias() {
        // Shared backends, as if one deployment rotated its KEK alias.
        let keys = Arc::new(InMemoryKeyService::new());
        let secrets = Arc::new(InMemorySecretService::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());

        let engine_v1 = CryptoEngine::new(
            keys.clone(),
            secrets.clone(),
            metadata.clone(),
            fast_config(),
        )
        .await
        .unwrap();
        let dek = engine_v1.generate_dek().unwrap();
        let wrapped = engine_v1.wrap_dek(&dek).await.unwrap();
        assert_eq!(wrapped.version, 1);

        // Rotate: new engine bound to k2; version 2 now current for k2.
        metadata.register("k2", AES_256_GCM).unwrap();
        let engine_v2 = CryptoEngine::new(
            keys,
            secrets,
            metadata,
            EngineConfig::new("k2", "p1").with_argon2(fast_config().argon2),
        )
        .await
        .unwrap();
        assert_eq!(engine_v2.current_version(), 2);

        // A record produced before rotation still unwraps through version 1.
        let unwrapped = engine_v2
            .unwrap_dek(&wrapped.ciphertext, wrapped.version)
            .await
            .unwrap();
        assert_eq!(unwrapped.as_bytes(), dek.as_bytes());
    }

    #[tokio::test]
    async fn hash_basic_is_deterministic_across_engines_sharing_pepper() {
        let secrets = Arc::new(InMemorySecretService::new());
        let pepper = Pepper::generate().unwrap();
        secrets.store_pepper("p1", &pepper).await.unwrap();

        let a = CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            secrets.clone(),
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await
        .unwrap();
        let b = CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            secrets,
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await
        .unwrap();

        assert_eq!(a.hash_basic(b"a@b.co"), b.hash_basic(b"a@b.co"));

        // Pepper flipped in bit 0 diverges.
        let mut flipped = *pepper.as_bytes();
        flipped[0] ^= 0x01;
        let other_secrets = Arc::new(InMemorySecretService::new());
        other_secrets
            .store_pepper("p1", &Pepper::from_slice(&flipped).unwrap())
            .await
            .unwrap();
        let c = CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            other_secrets,
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await
        .unwrap();
        assert_ne!(a.hash_basic(b"a@b.co"), c.hash_basic(b"a@b.co"));
    }

    #[tokio::test]
    async fn hash_secure_roundtrip() {
        let engine = engine().await;
        let encoded = engine.hash_secure(b"hunter2").unwrap();
        assert!(encoded.starts_with("$argon2id$"));
        assert!(engine.verify_hash_secure(b"hunter2", &encoded).unwrap());
        assert!(!engine.verify_hash_secure(b"Hunter2", &encoded).unwrap());
    }

    // === First-boot KEK provisioning ===

    #[tokio::test]
    async fn bootstrap_creates_missing_kek() {
        use crate::testing::{CountingKeyService, EmptyKmsKeyService};

        // An empty backend: no KEK exists until create_key provisions it.
        let counting = Arc::new(CountingKeyService::new(Arc::new(EmptyKmsKeyService::new())));
        let engine = CryptoEngine::new(
            counting.clone(),
            Arc::new(InMemorySecretService::new()),
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await
        .unwrap();

        let counts = counting.counts();
        assert_eq!(counts.create_key, 1, "first boot must provision the KEK");
        // Failed probe, then the re-resolve after creation.
        assert!(counts.get_key_id >= 2);

        // The provisioned key id is usable end to end.
        let dek = engine.generate_dek().unwrap();
        let wrapped = engine.wrap_dek(&dek).await.unwrap();
        let unwrapped = engine
            .unwrap_dek(&wrapped.ciphertext, wrapped.version)
            .await
            .unwrap();
        assert_eq!(unwrapped.as_bytes(), dek.as_bytes());
    }

    #[tokio::test]
    async fn bootstrap_skips_create_for_existing_kek() {
        use crate::testing::{CountingKeyService, EmptyKmsKeyService};

        let backend = Arc::new(EmptyKmsKeyService::new());
        backend.create_key("k1").await.unwrap();

        let counting = Arc::new(CountingKeyService::new(backend));
        CryptoEngine::new(
            counting.clone(),
            Arc::new(InMemorySecretService::new()),
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await
        .unwrap();

        assert_eq!(counting.counts().create_key, 0);
        assert_eq!(counting.counts().get_key_id, 1);
    }

    #[tokio::test]
    async fn bootstrap_propagates_when_create_key_also_fails() {
        use crate::testing::FaultInjectingKeyService;

        let keys = Arc::new(FaultInjectingKeyService::new());
        keys.fail_get_key_id(true);
        keys.fail_create_key(true);

        let result = CryptoEngine::new(
            keys,
            Arc::new(InMemorySecretService::new()),
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await;
        assert_eq!(result.err().unwrap().kind(), ErrorKind::KmsUnavailable);
    }

    #[tokio::test]
    async fn secret_backend_outage_fails_construction() {
        use crate::testing::FaultInjectingSecretService;

        let secrets = Arc::new(FaultInjectingSecretService::new());
        secrets.fail_pepper_exists(true);

        let result = CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            secrets,
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await;
        assert_eq!(
            result.err().unwrap().kind(),
            ErrorKind::SecretStorageUnavailable
        );
    }

    #[tokio::test]
    async fn first_boot_pepper_store_failure_fails_construction() {
        use crate::testing::FaultInjectingSecretService;

        let secrets = Arc::new(FaultInjectingSecretService::new());
        secrets.fail_store_pepper(true);

        let result = CryptoEngine::new(
            Arc::new(InMemoryKeyService::new()),
            secrets,
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await;
        assert_eq!(
            result.err().unwrap().kind(),
            ErrorKind::SecretStorageUnavailable
        );
    }

    #[tokio::test]
    async fn wrap_outage_after_construction_propagates() {
        use crate::testing::FaultInjectingKeyService;

        let keys = Arc::new(FaultInjectingKeyService::new());
        let engine = CryptoEngine::new(
            keys.clone(),
            Arc::new(InMemorySecretService::new()),
            Arc::new(InMemoryMetadataStore::new()),
            fast_config(),
        )
        .await
        .unwrap();

        let dek = engine.generate_dek().unwrap();
        let wrapped = engine.wrap_dek(&dek).await.unwrap();

        keys.fail_wrap_dek(true);
        let err = engine.wrap_dek(&dek).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KmsUnavailable);

        keys.fail_unwrap_dek(true);
        let err = engine
            .unwrap_dek(&wrapped.ciphertext, wrapped.version)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KmsUnavailable);

        // Clearing the fault restores service without reconstruction.
        keys.fail_unwrap_dek(false);
        let unwrapped = engine
            .unwrap_dek(&wrapped.ciphertext, wrapped.version)
            .await
            .unwrap();
        assert_eq!(unwrapped.as_bytes(), dek.as_bytes());
    }

    // === Typed convenience ===

    #[tokio::test]
    async fn typed_value_roundtrip() {
        let engine = engine().await;
        let dek = engine.generate_dek().unwrap();

        let ciphertext = engine.encrypt_value(&"a@b.co".to_string(), &dek).unwrap();
        let value: String = engine.decrypt_value(&ciphertext, &dek).unwrap();
        assert_eq!(value, "a@b.co");

        let ciphertext = engine.encrypt_value(&Some(42i64), &dek).unwrap();
        let value: Option<i64> = engine.decrypt_value(&ciphertext, &dek).unwrap();
        assert_eq!(value, Some(42));
    }

    #[tokio::test]
    async fn typed_hashes_separate_types() {
        let engine = engine().await;
        assert_ne!(
            engine.hash_basic_value(&5i64),
            engine.hash_basic_value(&"5".to_string())
        );

        let encoded = engine.hash_secure_value(&"hunter2".to_string()).unwrap();
        assert!(engine
            .verify_hash_secure_value(&"hunter2".to_string(), &encoded)
            .unwrap());
        assert!(!engine
            .verify_hash_secure_value(&"Hunter2".to_string(), &encoded)
            .unwrap());
    }

    #[tokio::test]
    async fn engine_is_shareable_across_tasks() {
        let engine = Arc::new(engine().await);
        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let dek = engine.generate_dek().unwrap();
                let data = format!("record-{}", i);
                let ct = engine.encrypt_data(data.as_bytes(), &dek).unwrap();
                let wrapped = engine.wrap_dek(&dek).await.unwrap();
                let dek2 = engine
                    .unwrap_dek(&wrapped.ciphertext, wrapped.version)
                    .await
                    .unwrap();
                assert_eq!(engine.decrypt_data(&ct, &dek2).unwrap(), data.as_bytes());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
