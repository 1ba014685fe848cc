//! Provider-facing contracts: key management and secret storage.
//!
//! Any KeyService may be paired with any SecretService; the engine never
//! assumes provider identity. Implementations may perform network or disk
//! I/O and may block; every method is async so a dropped future cancels the
//! in-flight call.

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::Error;
use crate::keys::Pepper;

// ---------------------------------------------------------------------------
// KeyService
// ---------------------------------------------------------------------------

/// A key-management backend holding KEKs addressed by human alias.
///
/// KEKs never leave the backend; the only operations are wrap and unwrap.
/// A given `(key_id, plaintext)` may produce different ciphertexts on repeat
/// calls (provider-side versioning or fresh nonces); the contract is
/// `unwrap(wrap(x)) == x`.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Resolve an alias to an opaque key id.
    ///
    /// Fails `INVALID_ARG` on an empty alias, `KMS_UNAVAILABLE` when the
    /// backend cannot be reached, and `KMS_UNAVAILABLE` when the alias does
    /// not resolve.
    async fn get_key_id(&self, alias: &str) -> Result<String, Error>;

    /// Create a new KEK, returning its alias or id.
    async fn create_key(&self, description: &str) -> Result<String, Error>;

    /// Wrap a 32-byte plaintext DEK under the named KEK.
    async fn wrap_dek(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, Error>;

    /// Unwrap a previously wrapped DEK.
    ///
    /// `key_id` may be ignored by backends whose ciphertext is
    /// self-describing. Fails `DECRYPT_FAILED` on bad ciphertext.
    async fn unwrap_dek(&self, key_id: &str, ciphertext: &[u8])
        -> Result<Zeroizing<Vec<u8>>, Error>;
}

// ---------------------------------------------------------------------------
// SecretService
// ---------------------------------------------------------------------------

/// A secret-storage backend holding the pepper under a named alias.
///
/// Storage path convention: `<namespace>/<alias>/pepper`, bytes
/// base64-encoded at rest.
#[async_trait]
pub trait SecretService: Send + Sync {
    /// Fetch the 32-byte pepper stored under `alias`.
    async fn get_pepper(&self, alias: &str) -> Result<Pepper, Error>;

    /// Store a pepper under `alias`.
    async fn store_pepper(&self, alias: &str, pepper: &Pepper) -> Result<(), Error>;

    /// Whether a pepper exists under `alias`.
    async fn pepper_exists(&self, alias: &str) -> Result<bool, Error>;

    /// The backend-specific storage path for `alias`.
    fn storage_path(&self, alias: &str) -> String;
}
