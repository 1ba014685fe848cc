//! # encx
//!
//! Application-level envelope encryption for structured records.
//!
//! Each record gets a fresh 32-byte data encryption key (DEK); field values
//! are sealed with AES-256-GCM under that DEK, and the DEK itself is wrapped
//! by an externally managed key encryption key (KEK) living in a
//! [`KeyService`]. A versioned [`MetadataStore`] remembers which KEK alias
//! wrapped each version, so old records keep decrypting after a rotation.
//! A process-wide pepper from a [`SecretService`] keys the deterministic
//! equality hash (`HashBasic`) and the Argon2id credential hash
//! (`HashSecure`).
//!
//! Annotated record types are processed by code generated with `encx-gen`;
//! this crate supplies the engine and the runtime the generated code calls.
//!
//! ## Quick start
//!
//! ```ignore
//! use encx::{CryptoEngine, EngineConfig, InMemoryKeyService, InMemorySecretService,
//!            InMemoryMetadataStore};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = CryptoEngine::new(
//!     Arc::new(InMemoryKeyService::new()),
//!     Arc::new(InMemorySecretService::new()),
//!     Arc::new(InMemoryMetadataStore::new()),
//!     EngineConfig::new("payments-kek", "payments-pepper"),
//! ).await.unwrap();
//!
//! let dek = engine.generate_dek().unwrap();
//! let ciphertext = engine.encrypt_data(b"a@b.co", &dek).unwrap();
//! let wrapped = engine.wrap_dek(&dek).await.unwrap();
//!
//! // ... persist ciphertext, wrapped.ciphertext, wrapped.version ...
//!
//! let dek = engine.unwrap_dek(&wrapped.ciphertext, wrapped.version).await.unwrap();
//! assert_eq!(engine.decrypt_data(&ciphertext, &dek).unwrap(), b"a@b.co");
//! # });
//! ```
//!
//! Cancellation is future-drop: every provider-touching operation is async
//! and aborts cleanly when its future is dropped. CPU-bound primitives do
//! not poll cancellation mid-computation.

pub mod aead;
pub mod codec;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod keys;
pub mod keyservice;
pub mod memory;
pub mod metadata;
pub mod record;
pub mod testing;

// Re-export main types for convenience
pub use aead::{AES_256_GCM, MIN_FRAME_BYTES, NONCE_BYTES, TAG_BYTES};
pub use engine::{CryptoEngine, EngineConfig, WrappedDek};
pub use envelope::{open_record, seal_record, SealedRecord};
pub use error::{Error, ErrorKind};
pub use hash::Argon2Params;
pub use keys::{Dek, Pepper, KEY_BYTES};
pub use keyservice::{KeyService, SecretService};
pub use memory::{InMemoryKeyService, InMemorySecretService};
pub use metadata::{
    FileMetadataStore, InMemoryMetadataStore, KeyVersionRecord, MetadataStore,
    DEFAULT_DB_FILENAME, DEFAULT_DB_PATH,
};
pub use record::FieldErrors;

// The derive registers the `#[encx(...)]` / `#[encx_options(...)]` helper
// attributes scanned by encx-gen.
pub use encx_derive::Encx;
