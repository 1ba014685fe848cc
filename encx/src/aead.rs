//! AEAD: AES-256-GCM with the `nonce || ciphertext || tag` frame.
//!
//! Frame layout:
//!   bytes 0..12    nonce     (96-bit, random per encryption)
//!   bytes 12..n-16 ciphertext (same length as plaintext)
//!   bytes n-16..n  auth tag  (128-bit GCM tag)
//!
//! AAD is empty in v1, reserved for future binding.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};

use crate::error::Error;
use crate::keys::{fill_random, Dek};

/// AES-256-GCM nonce length.
pub const NONCE_BYTES: usize = 12;

/// AES-256-GCM auth tag length.
pub const TAG_BYTES: usize = 16;

/// Minimum valid frame: nonce + tag around an empty plaintext.
pub const MIN_FRAME_BYTES: usize = NONCE_BYTES + TAG_BYTES;

/// Algorithm label recorded in key-version metadata.
pub const AES_256_GCM: &str = "AES-256-GCM";

/// Generate a random 12-byte nonce. Used during encryption only.
pub fn nonce() -> Result<[u8; NONCE_BYTES], Error> {
    let mut n = [0u8; NONCE_BYTES];
    fill_random(&mut n)?;
    Ok(n)
}

/// AEAD seal: encrypt `plaintext` under `dek` with a fresh nonce.
///
/// Returns the full frame `nonce || ciphertext || tag`.
pub fn seal(dek: &Dek, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = Aes256Gcm::new_from_slice(dek.as_bytes())
        .map_err(|_| Error::encrypt_failed("bad key length"))?;
    let n = nonce()?;
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&n), payload)
        .map_err(|_| Error::encrypt_failed("aead seal failed"))?;

    let mut frame = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    frame.extend_from_slice(&n);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// AEAD open: decrypt a frame produced by [`seal`].
///
/// MAC-verifying; never returns partial plaintext on failure.
pub fn open(dek: &Dek, frame: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
    if frame.len() < MIN_FRAME_BYTES {
        return Err(Error::decrypt_failed("ciphertext shorter than nonce + tag"));
    }
    let cipher = Aes256Gcm::new_from_slice(dek.as_bytes())
        .map_err(|_| Error::decrypt_failed("bad key length"))?;
    let (n, ciphertext) = frame.split_at(NONCE_BYTES);
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    cipher
        .decrypt(Nonce::from_slice(n), payload)
        .map_err(|_| Error::decrypt_failed("auth tag verification failed"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
