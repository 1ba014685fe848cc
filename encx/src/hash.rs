//! Keyed hashing: deterministic HMAC-SHA-256 ("basic") and Argon2id ("secure").
//!
//! HashBasic exists for equality lookups on encrypted fields only; it is NOT
//! a password hash. HashSecure is the password-grade path: Argon2id with a
//! random salt and the pepper folded in as the keyed secret, PHC-encoded.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::Error;
use crate::keys::{fill_random, Pepper};

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Argon2id parameters
// ---------------------------------------------------------------------------

/// Argon2id tuning parameters, enforced within fixed bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Argon2Params {
    /// Memory cost in KiB. Bounds: 8192..=1_048_576.
    pub memory_kib: u32,
    /// Time cost (passes). Bounds: 2..=100.
    pub iterations: u32,
    /// Lanes. Bounds: 1..=255.
    pub parallelism: u32,
    /// Random salt length in bytes. Bounds: 16..=64.
    pub salt_length: usize,
    /// Output tag length in bytes. Bounds: 32..=128.
    pub key_length: usize,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
            salt_length: 16,
            key_length: 32,
        }
    }
}

impl Argon2Params {
    /// Check every field against its bound. Fails `INVALID_CONFIGURATION`.
    pub fn validate(&self) -> Result<(), Error> {
        fn check<T: PartialOrd + std::fmt::Display>(
            name: &str,
            value: T,
            lo: T,
            hi: T,
        ) -> Result<(), Error> {
            if value < lo || value > hi {
                return Err(Error::invalid_configuration(format!(
                    "argon2 {} = {} outside [{}, {}]",
                    name, value, lo, hi
                )));
            }
            Ok(())
        }
        check("memory (KiB)", self.memory_kib, 8_192, 1_048_576)?;
        check("iterations", self.iterations, 2, 100)?;
        check("parallelism", self.parallelism, 1, 255)?;
        check("salt length", self.salt_length, 16, 64)?;
        check("key length", self.key_length, 32, 128)?;
        Ok(())
    }

    fn to_params(self) -> Result<Params, Error> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(self.key_length),
        )
        .map_err(|e| Error::invalid_configuration(format!("argon2 params: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// HashBasic: HMAC-SHA-256
// ---------------------------------------------------------------------------

/// HMAC-SHA-256 over `value` keyed by the pepper, hex-encoded lowercase.
///
/// Deterministic for a fixed pepper; callers hash the canonical serialized
/// bytes of a field, never its display form.
pub fn hash_basic(pepper: &Pepper, value: &[u8]) -> String {
    // HMAC accepts any key length; 32 bytes can never fail.
    let mut mac = HmacSha256::new_from_slice(pepper.as_bytes())
        .expect("hmac accepts 32-byte keys");
    mac.update(value);
    hex::encode(mac.finalize().into_bytes())
}

// ---------------------------------------------------------------------------
// HashSecure: Argon2id
// ---------------------------------------------------------------------------

fn argon2_with_pepper<'a>(pepper: &'a Pepper, params: Params) -> Result<Argon2<'a>, Error> {
    Argon2::new_with_secret(
        pepper.as_bytes(),
        Algorithm::Argon2id,
        Version::V0x13,
        params,
    )
    .map_err(|e| Error::invalid_configuration(format!("argon2 secret: {}", e)))
}

/// Argon2id hash of `value` with a fresh random salt and the pepper folded
/// into the keyed secret. Output is the standard PHC-encoded string.
pub fn hash_secure(pepper: &Pepper, value: &[u8], params: Argon2Params) -> Result<String, Error> {
    params.validate()?;

    let mut salt = vec![0u8; params.salt_length];
    fill_random(&mut salt)?;
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| Error::invalid_configuration(format!("salt encoding: {}", e)))?;

    let argon2 = argon2_with_pepper(pepper, params.to_params()?)?;
    let hash = argon2
        .hash_password(value, &salt)
        .map_err(|e| Error::encrypt_failed(format!("argon2 hashing: {}", e)))?;
    Ok(hash.to_string())
}

/// Re-derive with the params and salt embedded in `encoded` and compare the
/// tags in constant time. `Ok(false)` is a clean mismatch; `Err` means the
/// encoded string could not be interpreted.
pub fn verify_hash_secure(pepper: &Pepper, value: &[u8], encoded: &str) -> Result<bool, Error> {
    let parsed = PasswordHash::new(encoded)
        .map_err(|e| Error::invalid_arg(format!("malformed PHC string: {}", e)))?;

    // Params come from the encoded hash; the instance only supplies the secret.
    let argon2 = argon2_with_pepper(pepper, Params::default())?;
    match argon2.verify_password(value, &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Error::invalid_arg(format!("verification failed: {}", e))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
