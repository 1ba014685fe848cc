//! # encx-gen
//!
//! Code generator for encx-annotated record types.
//!
//! The scanner parses a package's sources, finds structs whose fields carry
//! `#[encx(...)]` annotations, and validates the tag combinations. The
//! generator then emits, per source file, a sibling `<name>_encx.rs` with a
//! companion record type and statically-typed `process_*` / `decrypt_*`
//! pipelines — no runtime reflection. A hash-keyed cache skips unchanged
//! sources.
//!
//! The `encx-gen` binary wires this into `generate`, `validate`, `init`,
//! and `version` commands.

pub mod cache;
pub mod codegen;
pub mod config;
pub mod ddl;
pub mod error;
pub mod report;
pub mod scanner;
pub mod schema;

pub use cache::{GenerationCache, CACHE_FILE};
pub use codegen::{companion_columns, generate_package, GeneratedFile};
pub use config::{Config, GenerationConfig, PackageConfig, DEFAULT_CONFIG_FILE};
pub use error::GenError;
pub use report::GenerationReport;
pub use scanner::{scan_package, FieldInfo, RecordInfo};
pub use schema::{validate_annotations, Annotation, CompanionColumn, DbDialect};

/// Version tag stamped into generated headers and the cache. Includes the
/// canonical-encoding revision: bumping either invalidates cached output.
pub const GENERATOR_VERSION: &str = concat!("encx-gen ", env!("CARGO_PKG_VERSION"), " encoding-v1");
