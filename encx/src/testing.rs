//! Test doubles and contract checks for the provider traits.
//!
//! These ship in the library rather than behind `cfg(test)` so that
//! downstream provider implementations can drive the same contracts the
//! built-in providers are held to. Three doubles cover the interesting
//! failure shapes:
//!
//! - [`EmptyKmsKeyService`] models a backend with no keys provisioned yet:
//!   `get_key_id` fails until `create_key` has been called for the alias.
//!   This is the first-boot shape of AWS KMS and Vault Transit.
//! - [`FaultInjectingKeyService`] / [`FaultInjectingSecretService`] fail
//!   individual operations on demand, for exercising mid-flight outages.
//! - [`CountingKeyService`] wraps any KeyService and counts calls, for
//!   asserting which provider operations a flow actually performed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::{Error, ErrorKind};
use crate::keys::{Dek, Pepper};
use crate::keyservice::{KeyService, SecretService};
use crate::memory::{InMemoryKeyService, InMemorySecretService};

// ---------------------------------------------------------------------------
// Empty-KMS double
// ---------------------------------------------------------------------------

/// A key service with no keys provisioned: aliases resolve only after an
/// explicit `create_key`, matching a freshly configured KMS or transit
/// mount. Wrapping mechanics delegate to [`InMemoryKeyService`].
pub struct EmptyKmsKeyService {
    inner: InMemoryKeyService,
    known: RwLock<HashSet<String>>,
}

impl EmptyKmsKeyService {
    pub fn new() -> Self {
        Self {
            inner: InMemoryKeyService::new(),
            known: RwLock::new(HashSet::new()),
        }
    }
}

impl Default for EmptyKmsKeyService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyService for EmptyKmsKeyService {
    async fn get_key_id(&self, alias: &str) -> Result<String, Error> {
        if alias.is_empty() {
            return Err(Error::invalid_arg("key alias must not be empty"));
        }
        if !self.known.read().unwrap().contains(alias) {
            return Err(Error::kms_unavailable(format!(
                "no KEK under alias {}",
                alias
            )));
        }
        self.inner.get_key_id(alias).await
    }

    async fn create_key(&self, description: &str) -> Result<String, Error> {
        let alias = self.inner.create_key(description).await?;
        self.known.write().unwrap().insert(alias.clone());
        Ok(alias)
    }

    async fn wrap_dek(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.inner.wrap_dek(key_id, plaintext).await
    }

    async fn unwrap_dek(
        &self,
        key_id: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        self.inner.unwrap_dek(key_id, ciphertext).await
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// A key service whose individual operations can be switched to fail.
///
/// Healthy operations delegate to an [`InMemoryKeyService`], so an engine
/// constructed over this double behaves normally until a fault is injected.
pub struct FaultInjectingKeyService {
    inner: InMemoryKeyService,
    fail_get_key_id: AtomicBool,
    fail_create_key: AtomicBool,
    fail_wrap_dek: AtomicBool,
    fail_unwrap_dek: AtomicBool,
}

impl FaultInjectingKeyService {
    pub fn new() -> Self {
        Self {
            inner: InMemoryKeyService::new(),
            fail_get_key_id: AtomicBool::new(false),
            fail_create_key: AtomicBool::new(false),
            fail_wrap_dek: AtomicBool::new(false),
            fail_unwrap_dek: AtomicBool::new(false),
        }
    }

    pub fn fail_get_key_id(&self, on: bool) {
        self.fail_get_key_id.store(on, Ordering::SeqCst);
    }

    pub fn fail_create_key(&self, on: bool) {
        self.fail_create_key.store(on, Ordering::SeqCst);
    }

    pub fn fail_wrap_dek(&self, on: bool) {
        self.fail_wrap_dek.store(on, Ordering::SeqCst);
    }

    pub fn fail_unwrap_dek(&self, on: bool) {
        self.fail_unwrap_dek.store(on, Ordering::SeqCst);
    }

    fn injected(&self, flag: &AtomicBool) -> Result<(), Error> {
        if flag.load(Ordering::SeqCst) {
            return Err(Error::kms_unavailable("injected fault"));
        }
        Ok(())
    }
}

impl Default for FaultInjectingKeyService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyService for FaultInjectingKeyService {
    async fn get_key_id(&self, alias: &str) -> Result<String, Error> {
        self.injected(&self.fail_get_key_id)?;
        self.inner.get_key_id(alias).await
    }

    async fn create_key(&self, description: &str) -> Result<String, Error> {
        self.injected(&self.fail_create_key)?;
        self.inner.create_key(description).await
    }

    async fn wrap_dek(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.injected(&self.fail_wrap_dek)?;
        self.inner.wrap_dek(key_id, plaintext).await
    }

    async fn unwrap_dek(
        &self,
        key_id: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        self.injected(&self.fail_unwrap_dek)?;
        self.inner.unwrap_dek(key_id, ciphertext).await
    }
}

/// A secret service whose individual operations can be switched to fail.
pub struct FaultInjectingSecretService {
    inner: InMemorySecretService,
    fail_get_pepper: AtomicBool,
    fail_store_pepper: AtomicBool,
    fail_pepper_exists: AtomicBool,
}

impl FaultInjectingSecretService {
    pub fn new() -> Self {
        Self {
            inner: InMemorySecretService::new(),
            fail_get_pepper: AtomicBool::new(false),
            fail_store_pepper: AtomicBool::new(false),
            fail_pepper_exists: AtomicBool::new(false),
        }
    }

    pub fn fail_get_pepper(&self, on: bool) {
        self.fail_get_pepper.store(on, Ordering::SeqCst);
    }

    pub fn fail_store_pepper(&self, on: bool) {
        self.fail_store_pepper.store(on, Ordering::SeqCst);
    }

    pub fn fail_pepper_exists(&self, on: bool) {
        self.fail_pepper_exists.store(on, Ordering::SeqCst);
    }

    fn injected(&self, flag: &AtomicBool) -> Result<(), Error> {
        if flag.load(Ordering::SeqCst) {
            return Err(Error::secret_storage_unavailable("injected fault"));
        }
        Ok(())
    }
}

impl Default for FaultInjectingSecretService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretService for FaultInjectingSecretService {
    async fn get_pepper(&self, alias: &str) -> Result<Pepper, Error> {
        self.injected(&self.fail_get_pepper)?;
        self.inner.get_pepper(alias).await
    }

    async fn store_pepper(&self, alias: &str, pepper: &Pepper) -> Result<(), Error> {
        self.injected(&self.fail_store_pepper)?;
        self.inner.store_pepper(alias, pepper).await
    }

    async fn pepper_exists(&self, alias: &str) -> Result<bool, Error> {
        self.injected(&self.fail_pepper_exists)?;
        self.inner.pepper_exists(alias).await
    }

    fn storage_path(&self, alias: &str) -> String {
        self.inner.storage_path(alias)
    }
}

// ---------------------------------------------------------------------------
// Counting decorator
// ---------------------------------------------------------------------------

/// Per-operation call counts observed by a [`CountingKeyService`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyServiceCounts {
    pub get_key_id: usize,
    pub create_key: usize,
    pub wrap_dek: usize,
    pub unwrap_dek: usize,
}

/// Decorator counting every call before delegating to the wrapped service.
pub struct CountingKeyService {
    inner: Arc<dyn KeyService>,
    get_key_id: AtomicUsize,
    create_key: AtomicUsize,
    wrap_dek: AtomicUsize,
    unwrap_dek: AtomicUsize,
}

impl CountingKeyService {
    pub fn new(inner: Arc<dyn KeyService>) -> Self {
        Self {
            inner,
            get_key_id: AtomicUsize::new(0),
            create_key: AtomicUsize::new(0),
            wrap_dek: AtomicUsize::new(0),
            unwrap_dek: AtomicUsize::new(0),
        }
    }

    pub fn counts(&self) -> KeyServiceCounts {
        KeyServiceCounts {
            get_key_id: self.get_key_id.load(Ordering::SeqCst),
            create_key: self.create_key.load(Ordering::SeqCst),
            wrap_dek: self.wrap_dek.load(Ordering::SeqCst),
            unwrap_dek: self.unwrap_dek.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl KeyService for CountingKeyService {
    async fn get_key_id(&self, alias: &str) -> Result<String, Error> {
        self.get_key_id.fetch_add(1, Ordering::SeqCst);
        self.inner.get_key_id(alias).await
    }

    async fn create_key(&self, description: &str) -> Result<String, Error> {
        self.create_key.fetch_add(1, Ordering::SeqCst);
        self.inner.create_key(description).await
    }

    async fn wrap_dek(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.wrap_dek.fetch_add(1, Ordering::SeqCst);
        self.inner.wrap_dek(key_id, plaintext).await
    }

    async fn unwrap_dek(
        &self,
        key_id: &str,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        self.unwrap_dek.fetch_add(1, Ordering::SeqCst);
        self.inner.unwrap_dek(key_id, ciphertext).await
    }
}

// ---------------------------------------------------------------------------
// Contract checks
// ---------------------------------------------------------------------------

/// Assert the KeyService contract against any implementation:
/// create-then-resolve, empty-alias rejection, wrap/unwrap roundtrip,
/// wrap nondeterminism, 32-byte enforcement, and tamper rejection.
///
/// Panics with a description on the first violated clause.
pub async fn assert_key_service_contract(service: &dyn KeyService) {
    let alias = service
        .create_key("contract-kek")
        .await
        .expect("create_key must succeed on a healthy backend");
    let key_id = service
        .get_key_id(&alias)
        .await
        .expect("a created alias must resolve");

    let err = service
        .get_key_id("")
        .await
        .expect_err("empty alias must be rejected");
    assert_eq!(err.kind(), ErrorKind::InvalidArg, "empty alias kind");

    let dek = Dek::generate().expect("rng");
    let wrapped_a = service
        .wrap_dek(&key_id, dek.as_bytes())
        .await
        .expect("wrap must succeed");
    let wrapped_b = service
        .wrap_dek(&key_id, dek.as_bytes())
        .await
        .expect("wrap must succeed");
    assert_ne!(
        wrapped_a, wrapped_b,
        "repeat wraps of one DEK must not be byte-identical"
    );

    let unwrapped = service
        .unwrap_dek(&key_id, &wrapped_a)
        .await
        .expect("unwrap(wrap(x)) must succeed");
    assert_eq!(&unwrapped[..], dek.as_bytes(), "unwrap(wrap(x)) == x");

    service
        .wrap_dek(&key_id, &[0u8; 16])
        .await
        .expect_err("non-32-byte DEK must be rejected");

    let mut tampered = wrapped_a;
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    service
        .unwrap_dek(&key_id, &tampered)
        .await
        .expect_err("tampered wrapped DEK must not unwrap");
}

/// Assert the SecretService contract: absent-then-present lifecycle, stored
/// bytes surviving a roundtrip, and the storage path naming the alias.
pub async fn assert_secret_service_contract(service: &dyn SecretService) {
    let alias = "contract-pepper";
    assert!(
        !service
            .pepper_exists(alias)
            .await
            .expect("exists must succeed"),
        "fresh alias must not exist"
    );

    let pepper = Pepper::generate().expect("rng");
    service
        .store_pepper(alias, &pepper)
        .await
        .expect("store must succeed");
    assert!(
        service
            .pepper_exists(alias)
            .await
            .expect("exists must succeed"),
        "stored alias must exist"
    );

    let fetched = service.get_pepper(alias).await.expect("get must succeed");
    assert_eq!(fetched.as_bytes(), pepper.as_bytes(), "pepper roundtrip");

    service
        .store_pepper("", &pepper)
        .await
        .expect_err("empty alias must be rejected");

    assert!(
        service.storage_path(alias).contains(alias),
        "storage path must name the alias"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
