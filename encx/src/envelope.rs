//! One-shot sealed records for callers without generated pipelines.
//!
//! `seal_record` applies the whole envelope at blob granularity: a fresh DEK
//! encrypts the payload, the DEK is wrapped under the current KEK, and the
//! result carries the key version naming its metadata row. Byte fields are
//! hex-encoded so the record serializes safely as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::CryptoEngine;
use crate::error::Error;

/// A ciphertext with the envelope state needed to open it later.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedRecord {
    /// The AEAD frame, hex-encoded.
    pub ciphertext_hex: String,
    /// The wrapped DEK, hex-encoded.
    pub dek_encrypted_hex: String,
    /// Which key version wrapped the DEK.
    pub key_version: u32,
    /// When this record was sealed.
    pub sealed_at: DateTime<Utc>,
}

/// Seal `plaintext` under a fresh DEK wrapped at the engine's current
/// version.
pub async fn seal_record(engine: &CryptoEngine, plaintext: &[u8]) -> Result<SealedRecord, Error> {
    let dek = engine.generate_dek()?;
    let ciphertext = engine.encrypt_data(plaintext, &dek)?;
    let wrapped = engine.wrap_dek(&dek).await?;
    Ok(SealedRecord {
        ciphertext_hex: hex::encode(ciphertext),
        dek_encrypted_hex: hex::encode(&wrapped.ciphertext),
        key_version: wrapped.version,
        sealed_at: Utc::now(),
    })
}

/// Open a record produced by [`seal_record`], resolving its key version
/// through the metadata store.
pub async fn open_record(engine: &CryptoEngine, record: &SealedRecord) -> Result<Vec<u8>, Error> {
    let wrapped = hex::decode(&record.dek_encrypted_hex)
        .map_err(|_| Error::decrypt_failed("wrapped DEK is not valid hex"))?;
    let dek = engine.unwrap_dek(&wrapped, record.key_version).await?;
    let ciphertext = hex::decode(&record.ciphertext_hex)
        .map_err(|_| Error::decrypt_failed("ciphertext is not valid hex"))?;
    engine.decrypt_data(&ciphertext, &dek)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
