//! Runtime support for generated record pipelines.
//!
//! Generated `process_*` / `decrypt_*` functions run every field operation,
//! collect failures here, and commit nothing to the output record unless all
//! fields succeeded.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{Error, ErrorKind};

/// Per-operation error aggregation keyed `"<field> <phase>"`.
///
/// BTreeMap keeps the aggregate message deterministic regardless of the
/// order fields were processed in.
#[derive(Debug, Default)]
pub struct FieldErrors {
    errors: BTreeMap<String, Error>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for one field phase, e.g. `record("email", "encryption", err)`.
    pub fn record(&mut self, field: &str, phase: &str, error: Error) {
        self.errors.insert(format!("{} {}", field, phase), error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Ok when no field failed, otherwise a single aggregated error.
    ///
    /// The aggregate carries the kind of the first (lexicographically first
    /// keyed) failure so callers can still pattern-match, and a message
    /// listing every failed `"<field> <phase>"`.
    pub fn into_result(self) -> Result<(), Error> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let kind = self
            .errors
            .values()
            .next()
            .map(Error::kind)
            .unwrap_or(ErrorKind::ValidationFailed);
        let mut message = String::new();
        for (i, (key, err)) in self.errors.iter().enumerate() {
            if i > 0 {
                message.push_str("; ");
            }
            let _ = write!(message, "{}: {}", key, err);
        }
        Err(Error::new(kind, message))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
