//! Annotation vocabulary, combination rules, and the companion-column DB
//! type mapping.

use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// A field-level annotation token.
///
/// `encrypt`, `hash_basic`, and `hash_secure` select crypto operations;
/// `flatten` is structural — it hoists the fields of an embedded annotated
/// record into the containing type's processing plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Annotation {
    Encrypt,
    HashBasic,
    HashSecure,
    Flatten,
}

impl Annotation {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "encrypt" => Some(Annotation::Encrypt),
            "hash_basic" => Some(Annotation::HashBasic),
            "hash_secure" => Some(Annotation::HashSecure),
            "flatten" => Some(Annotation::Flatten),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Annotation::Encrypt => "encrypt",
            Annotation::HashBasic => "hash_basic",
            Annotation::HashSecure => "hash_secure",
            Annotation::Flatten => "flatten",
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate one field's annotation token list.
///
/// Rules:
/// - unknown tokens are forbidden
/// - duplicate tokens are forbidden
/// - `hash_basic` and `hash_secure` on the same field are forbidden
/// - `flatten` combines with nothing
///
/// `encrypt` may combine with either hash annotation (equality search on
/// encrypted data).
pub fn validate_annotations(tokens: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = Vec::new();

    for token in tokens {
        match Annotation::parse(token) {
            None => errors.push(format!("unknown annotation \"{}\"", token)),
            Some(parsed) => {
                if seen.contains(&parsed) {
                    errors.push(format!("duplicate annotation \"{}\"", token));
                } else {
                    seen.push(parsed);
                }
            }
        }
    }

    if seen.contains(&Annotation::HashBasic) && seen.contains(&Annotation::HashSecure) {
        errors.push("\"hash_basic\" and \"hash_secure\" cannot combine on one field".to_string());
    }
    if seen.contains(&Annotation::Flatten) && seen.len() > 1 {
        errors.push("\"flatten\" cannot combine with other annotations".to_string());
    }

    errors
}

/// Validate struct-level options. Unknown keys are ignored for
/// forward-compat; `serializer` is a legacy key and is rejected — the
/// serializer is configured per package, not per type.
pub fn validate_options(options: &BTreeMap<String, String>) -> Vec<String> {
    let mut errors = Vec::new();
    if options.contains_key("serializer") {
        errors.push(
            "option \"serializer\" is no longer supported; configure the serializer per package"
                .to_string(),
        );
    }
    errors
}

// ---------------------------------------------------------------------------
// Companion column mapping (informative, for consumers)
// ---------------------------------------------------------------------------

/// Target database dialect for companion column types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbDialect {
    Postgres,
    Mysql,
    Sqlite,
}

/// The kinds of columns a companion record produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompanionColumn {
    /// `<field>_encrypted`: the AEAD frame.
    EncryptedBytes,
    /// `<field>_hash`: 64 lowercase hex chars.
    BasicHash,
    /// `<field>_hash_secure`: PHC-encoded Argon2id string.
    SecureHash,
    /// `dek_encrypted`: opaque wrapped-DEK bytes.
    WrappedDek,
    /// `key_version`: metadata row reference.
    KeyVersion,
    /// `metadata`: free-form string mapping.
    Metadata,
}

/// Column type for a companion column in the given dialect.
pub fn column_type(dialect: DbDialect, column: CompanionColumn) -> &'static str {
    use CompanionColumn::*;
    use DbDialect::*;
    match (dialect, column) {
        (Postgres, EncryptedBytes) | (Postgres, WrappedDek) => "BYTEA",
        (Postgres, BasicHash) => "CHAR(64)",
        (Postgres, SecureHash) => "TEXT",
        (Postgres, KeyVersion) => "BIGINT",
        (Postgres, Metadata) => "JSONB",

        (Mysql, EncryptedBytes) | (Mysql, WrappedDek) => "BLOB",
        (Mysql, BasicHash) => "CHAR(64)",
        (Mysql, SecureHash) => "TEXT",
        (Mysql, KeyVersion) => "BIGINT",
        (Mysql, Metadata) => "JSON",

        (Sqlite, EncryptedBytes) | (Sqlite, WrappedDek) => "BLOB",
        (Sqlite, BasicHash) => "TEXT",
        (Sqlite, SecureHash) => "TEXT",
        (Sqlite, KeyVersion) => "INTEGER",
        (Sqlite, Metadata) => "TEXT",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
