//! Unified error type for the envelope engine and its providers.
//!
//! Every failure in the crate is classifiable into one [`ErrorKind`], so
//! callers can pattern-match by kind without parsing messages. Messages never
//! contain plaintext, pepper, DEK material, or wrapped-DEK bytes.

use std::fmt;

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

/// Classification of every failure the crate can surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller-supplied parameters violate a precondition.
    InvalidArg,
    /// Static configuration failed validation.
    InvalidConfiguration,
    /// Key-management backend unavailable (transient or backend-side).
    KmsUnavailable,
    /// Secret-storage backend unavailable (transient or backend-side).
    SecretStorageUnavailable,
    /// Primitive or provider encryption failure.
    EncryptFailed,
    /// Primitive or provider decryption failure, including MAC mismatch and
    /// malformed ciphertext.
    DecryptFailed,
    /// A DEK ciphertext's key version has no metadata entry.
    VersionUnknown,
    /// Provider rejected credentials.
    AuthenticationFailed,
    /// CSPRNG failure.
    RngFailure,
    /// Annotation or tag combination invalid (scanner/codegen).
    ValidationFailed,
    /// File-system error.
    IoFailure,
}

impl ErrorKind {
    /// Stable label, used in Display output and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArg => "INVALID_ARG",
            ErrorKind::InvalidConfiguration => "INVALID_CONFIGURATION",
            ErrorKind::KmsUnavailable => "KMS_UNAVAILABLE",
            ErrorKind::SecretStorageUnavailable => "SECRET_STORAGE_UNAVAILABLE",
            ErrorKind::EncryptFailed => "ENCRYPT_FAILED",
            ErrorKind::DecryptFailed => "DECRYPT_FAILED",
            ErrorKind::VersionUnknown => "VERSION_UNKNOWN",
            ErrorKind::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorKind::RngFailure => "RNG_FAILURE",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::IoFailure => "IO_FAILURE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// An error with a [`ErrorKind`] classification and a short message.
///
/// Errors propagate to the caller without automatic retry; the engine never
/// silently falls back between providers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    // Constructors for the common kinds, so call sites stay terse.

    pub fn invalid_arg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArg, message)
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfiguration, message)
    }

    pub fn kms_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KmsUnavailable, message)
    }

    pub fn secret_storage_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecretStorageUnavailable, message)
    }

    pub fn encrypt_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EncryptFailed, message)
    }

    pub fn decrypt_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DecryptFailed, message)
    }

    pub fn version_unknown(version: u32) -> Self {
        Self::new(
            ErrorKind::VersionUnknown,
            format!("no metadata entry for key version {}", version),
        )
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationFailed, message)
    }

    pub fn rng_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RngFailure, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    pub fn io_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoFailure, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io_failure(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
