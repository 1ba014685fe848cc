//! Key material newtypes: DEK and pepper.
//!
//! Both wrap fixed 32-byte arrays, zeroize on drop, and redact their bytes
//! from Debug output.

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Error;

/// DEK and pepper length in bytes.
pub const KEY_BYTES: usize = 32;

/// Fill `buf` from the OS CSPRNG. Failure surfaces as `RNG_FAILURE`.
pub fn fill_random(buf: &mut [u8]) -> Result<(), Error> {
    getrandom::getrandom(buf).map_err(|e| Error::rng_failure(format!("os rng: {}", e)))
}

// ---------------------------------------------------------------------------
// DEK
// ---------------------------------------------------------------------------

/// A 32-byte data encryption key, generated per logical record.
///
/// The plaintext DEK lives only in memory for the duration of the operation
/// set that uses it; the backing bytes are overwritten on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Dek([u8; KEY_BYTES]);

impl PartialEq for Dek {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Dek {}

impl Dek {
    /// Draw a fresh DEK from the CSPRNG.
    pub fn generate() -> Result<Self, Error> {
        let mut bytes = [0u8; KEY_BYTES];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }

    /// Parse a DEK from a slice, e.g. an unwrap result.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; KEY_BYTES] = bytes
            .try_into()
            .map_err(|_| Error::decrypt_failed("unwrapped DEK is not 32 bytes"))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for Dek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dek").field("bytes", &"[REDACTED]").finish()
    }
}

// ---------------------------------------------------------------------------
// Pepper
// ---------------------------------------------------------------------------

/// The process-wide 32-byte secret folded into HashBasic and HashSecure.
///
/// Fetched once from a SecretService at engine construction and read-only
/// afterwards. Must not be all-zero.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Pepper([u8; KEY_BYTES]);

impl PartialEq for Pepper {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Pepper {}

impl Pepper {
    /// Generate a fresh random pepper for first boot.
    pub fn generate() -> Result<Self, Error> {
        let mut bytes = [0u8; KEY_BYTES];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Build a pepper from raw bytes, enforcing length and the non-zero rule.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; KEY_BYTES] = bytes.try_into().map_err(|_| {
            Error::invalid_arg(format!("pepper must be {} bytes", KEY_BYTES))
        })?;
        if bytes.iter().all(|&b| b == 0) {
            return Err(Error::invalid_configuration("pepper must not be all-zero"));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for Pepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pepper")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
