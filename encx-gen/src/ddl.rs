//! Informative DDL helpers for companion columns.
//!
//! Consumers persisting companion records in a relational table can emit
//! the crypto-bearing columns, equality-hash indexes, and metadata JSON
//! accessors from here. Plain (unannotated) columns stay with the consumer:
//! their SQL types depend on application schema decisions this tool does
//! not make.

use crate::codegen::companion_crypto_columns;
use crate::scanner::RecordInfo;
use crate::schema::{column_type, CompanionColumn, DbDialect};

fn quote_ident(dialect: DbDialect, name: &str) -> String {
    match dialect {
        DbDialect::Mysql => format!("`{}`", name),
        DbDialect::Postgres | DbDialect::Sqlite => format!("\"{}\"", name),
    }
}

/// The table name for a record: the `table` struct option when present,
/// otherwise the lowercased type name.
pub fn table_name(record: &RecordInfo) -> String {
    record
        .options
        .get("table")
        .cloned()
        .unwrap_or_else(|| record.type_name.to_lowercase())
}

/// `ALTER TABLE ... ADD COLUMN ...` statements adding every crypto column
/// of `type_name`'s companion record, one statement per column.
pub fn add_columns_ddl(
    dialect: DbDialect,
    records: &[RecordInfo],
    type_name: &str,
    table: &str,
) -> Vec<String> {
    companion_crypto_columns(records, type_name)
        .into_iter()
        .map(|(name, kind)| {
            format!(
                "ALTER TABLE {} ADD COLUMN {} {};",
                quote_ident(dialect, table),
                quote_ident(dialect, &name),
                column_type(dialect, kind),
            )
        })
        .collect()
}

/// An index over one equality-hash column, for `WHERE <field>_hash = ?`
/// lookups.
pub fn hash_index_ddl(dialect: DbDialect, table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX {} ON {} ({});",
        quote_ident(dialect, &format!("idx_{}_{}", table, column)),
        quote_ident(dialect, table),
        quote_ident(dialect, column),
    )
}

/// An index over the metadata document, where the dialect supports one:
/// a GIN index on Postgres JSONB. MySQL and SQLite index JSON through
/// generated columns, which stay with the consumer.
pub fn metadata_index_ddl(dialect: DbDialect, table: &str) -> Option<String> {
    match dialect {
        DbDialect::Postgres => Some(format!(
            "CREATE INDEX {} ON {} USING GIN ({});",
            quote_ident(dialect, &format!("idx_{}_metadata", table)),
            quote_ident(dialect, table),
            quote_ident(dialect, "metadata"),
        )),
        DbDialect::Mysql | DbDialect::Sqlite => None,
    }
}

/// A SQL expression extracting one key from the metadata document as text.
pub fn metadata_extract_expr(dialect: DbDialect, key: &str) -> String {
    match dialect {
        DbDialect::Postgres => format!("metadata ->> '{}'", key),
        DbDialect::Mysql => format!(
            "JSON_UNQUOTE(JSON_EXTRACT(metadata, '$.{}'))",
            key
        ),
        DbDialect::Sqlite => format!("json_extract(metadata, '$.{}')", key),
    }
}

/// Convenience: the complete informative DDL for one record — column adds,
/// one index per `_hash` column, and the metadata index when supported.
pub fn companion_ddl(
    dialect: DbDialect,
    records: &[RecordInfo],
    type_name: &str,
    table: &str,
) -> Vec<String> {
    let mut statements = add_columns_ddl(dialect, records, type_name, table);
    for (name, kind) in companion_crypto_columns(records, type_name) {
        if kind == CompanionColumn::BasicHash {
            statements.push(hash_index_ddl(dialect, table, &name));
        }
    }
    if let Some(index) = metadata_index_ddl(dialect, table) {
        statements.push(index);
    }
    statements
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
