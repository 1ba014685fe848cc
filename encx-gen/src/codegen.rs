//! Emission: per-record companion types and process/decrypt pipelines.
//!
//! For each source file contributing annotated records, one sibling file is
//! generated containing, per record `T`:
//!
//! - `TEncrypted` — the companion record (plain fields verbatim, one column
//!   per crypto operation, the wrapped DEK and its key version, free-form
//!   metadata),
//! - `async fn <prefix>_t(engine, &T) -> Result<TEncrypted, _>`,
//! - `async fn decrypt_t(engine, &TEncrypted) -> Result<T, _>`.
//!
//! Output is `quote`-built, `prettyplease`-formatted, and byte-identical
//! across runs on unchanged input.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::config::Config;
use crate::error::GenError;
use crate::scanner::{FieldInfo, RecordInfo};
use crate::schema::Annotation;
use crate::GENERATOR_VERSION;

// ---------------------------------------------------------------------------
// Processing plan
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Encrypt,
    HashBasic,
    HashSecure,
}

/// One annotated leaf in the (possibly flattened) record tree.
struct ProcessedField {
    /// Field path from the source record root, e.g. `[contact, email]`.
    access: Vec<syn::Ident>,
    /// Leaf name; names the companion columns and pipeline locals.
    column: String,
    ops: Vec<Op>,
    ty: syn::Type,
    /// Container types go through the JSON serializer.
    json: bool,
}

/// One unannotated leaf, carried verbatim.
struct PlainField {
    access: Vec<syn::Ident>,
    column: String,
    ty: syn::Type,
}

/// How to rebuild one source field during decrypt.
enum Rebuild {
    Plain { column: syn::Ident },
    Decrypted { column: syn::Ident },
    HashOnly,
    Nested { ty: syn::Type, fields: Vec<(syn::Ident, Rebuild)> },
}

struct Plan {
    processed: Vec<ProcessedField>,
    plain: Vec<PlainField>,
    rebuild: Vec<(syn::Ident, Rebuild)>,
    has_encrypt: bool,
    /// Leaves in declaration order, for companion field layout.
    layout: Vec<LayoutSlot>,
}

enum LayoutSlot {
    Plain(usize),
    Processed(usize),
}

fn field_ops(field: &FieldInfo) -> Vec<Op> {
    let mut ops = Vec::new();
    for annotation in field.parsed_annotations() {
        match annotation {
            Annotation::Encrypt => ops.push(Op::Encrypt),
            Annotation::HashBasic => ops.push(Op::HashBasic),
            Annotation::HashSecure => ops.push(Op::HashSecure),
            Annotation::Flatten => {}
        }
    }
    ops
}

/// Types with a `CanonicalValue` impl; everything else serializes as JSON.
fn is_primitive_type(text: &str) -> bool {
    const BASE: &[&str] = &[
        "String", "bool", "i8", "i16", "i32", "i64", "isize", "u8", "u16", "u32", "u64", "usize",
        "f32", "f64", "Vec<u8>", "DateTime<Utc>", "chrono::DateTime<Utc>",
        "chrono::DateTime<chrono::Utc>", "Uuid", "uuid::Uuid",
    ];
    if BASE.contains(&text) {
        return true;
    }
    // Fixed-length byte arrays, e.g. `[u8;16]` after normalization.
    if text.starts_with("[u8;") && text.ends_with(']') {
        return true;
    }
    if let Some(inner) = text.strip_prefix("Option<").and_then(|t| t.strip_suffix('>')) {
        return is_primitive_type(inner);
    }
    false
}

fn build_plan(record: &RecordInfo, by_name: &BTreeMap<String, &RecordInfo>) -> Plan {
    let mut plan = Plan {
        processed: Vec::new(),
        plain: Vec::new(),
        rebuild: Vec::new(),
        has_encrypt: false,
        layout: Vec::new(),
    };
    let mut rebuild = Vec::new();
    collect(record, Vec::new(), by_name, &mut plan, &mut rebuild);
    plan.rebuild = rebuild;
    plan.has_encrypt = plan
        .processed
        .iter()
        .any(|field| field.ops.contains(&Op::Encrypt));
    plan
}

fn collect(
    record: &RecordInfo,
    prefix: Vec<syn::Ident>,
    by_name: &BTreeMap<String, &RecordInfo>,
    plan: &mut Plan,
    rebuild: &mut Vec<(syn::Ident, Rebuild)>,
) {
    for field in &record.fields {
        let ident = format_ident!("{}", field.name);
        let mut access = prefix.clone();
        access.push(ident.clone());
        let annotations = field.parsed_annotations();

        if annotations.contains(&Annotation::Flatten) {
            // Validation guarantees the target exists and is acyclic.
            if let Some(target) = by_name.get(field.type_text.as_str()) {
                let mut nested = Vec::new();
                collect(target, access, by_name, plan, &mut nested);
                rebuild.push((
                    ident,
                    Rebuild::Nested {
                        ty: field.ty.clone(),
                        fields: nested,
                    },
                ));
            }
            continue;
        }

        let ops = field_ops(field);
        if ops.is_empty() {
            plan.layout.push(LayoutSlot::Plain(plan.plain.len()));
            plan.plain.push(PlainField {
                access,
                column: field.name.clone(),
                ty: field.ty.clone(),
            });
            rebuild.push((
                ident.clone(),
                Rebuild::Plain {
                    column: ident,
                },
            ));
        } else {
            let rebuilt = if ops.contains(&Op::Encrypt) {
                Rebuild::Decrypted {
                    column: ident.clone(),
                }
            } else {
                Rebuild::HashOnly
            };
            plan.layout.push(LayoutSlot::Processed(plan.processed.len()));
            plan.processed.push(ProcessedField {
                access,
                column: field.name.clone(),
                ops,
                ty: field.ty.clone(),
                json: !is_primitive_type(&field.type_text),
            });
            rebuild.push((ident, rebuilt));
        }
    }
}

// ---------------------------------------------------------------------------
// Companion column introspection
// ---------------------------------------------------------------------------

/// Every companion field name a record's encrypted form carries, in layout
/// order: hoisted plain leaves, crypto columns, DEK columns, metadata.
pub fn companion_columns(records: &[RecordInfo], type_name: &str) -> Vec<String> {
    let (plan, _) = match plan_for(records, type_name) {
        Some(plan) => plan,
        None => return Vec::new(),
    };

    let mut columns = Vec::new();
    for slot in &plan.layout {
        match slot {
            LayoutSlot::Plain(i) => columns.push(plan.plain[*i].column.clone()),
            LayoutSlot::Processed(i) => {
                let field = &plan.processed[*i];
                for op in &field.ops {
                    columns.push(column_name(&field.column, *op));
                }
            }
        }
    }
    if plan.has_encrypt {
        columns.push("dek_encrypted".to_string());
        columns.push("key_version".to_string());
    }
    columns.push("metadata".to_string());
    columns
}

/// The crypto-bearing companion columns only, typed for DDL emission: one
/// entry per crypto operation plus the DEK columns and the metadata map.
pub fn companion_crypto_columns(
    records: &[RecordInfo],
    type_name: &str,
) -> Vec<(String, crate::schema::CompanionColumn)> {
    use crate::schema::CompanionColumn;

    let (plan, _) = match plan_for(records, type_name) {
        Some(plan) => plan,
        None => return Vec::new(),
    };

    let mut columns = Vec::new();
    for field in &plan.processed {
        for op in &field.ops {
            let kind = match op {
                Op::Encrypt => CompanionColumn::EncryptedBytes,
                Op::HashBasic => CompanionColumn::BasicHash,
                Op::HashSecure => CompanionColumn::SecureHash,
            };
            columns.push((column_name(&field.column, *op), kind));
        }
    }
    if plan.has_encrypt {
        columns.push(("dek_encrypted".to_string(), CompanionColumn::WrappedDek));
        columns.push(("key_version".to_string(), CompanionColumn::KeyVersion));
    }
    columns.push(("metadata".to_string(), CompanionColumn::Metadata));
    columns
}

fn column_name(column: &str, op: Op) -> String {
    match op {
        Op::Encrypt => format!("{}_encrypted", column),
        Op::HashBasic => format!("{}_hash", column),
        Op::HashSecure => format!("{}_hash_secure", column),
    }
}

fn plan_for<'a>(
    records: &'a [RecordInfo],
    type_name: &str,
) -> Option<(Plan, &'a RecordInfo)> {
    let by_name: BTreeMap<String, &RecordInfo> = records
        .iter()
        .map(|record| (record.type_name.clone(), record))
        .collect();
    let record = records.iter().find(|r| r.type_name == type_name)?;
    Some((build_plan(record, &by_name), record))
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_lower = i > 0 && chars[i - 1].is_ascii_lowercase();
            let next_lower = i + 1 < chars.len() && chars[i + 1].is_ascii_lowercase();
            if i > 0 && (prev_lower || (next_lower && chars[i - 1] != '_')) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn companion_struct(record: &RecordInfo, plan: &Plan) -> TokenStream {
    let companion = format_ident!("{}Encrypted", record.type_name);
    let mut fields = Vec::new();

    for slot in &plan.layout {
        match slot {
            LayoutSlot::Plain(i) => {
                let field = &plan.plain[*i];
                let column = format_ident!("{}", field.column);
                let ty = &field.ty;
                fields.push(quote! { pub #column: #ty });
            }
            LayoutSlot::Processed(i) => {
                let field = &plan.processed[*i];
                for op in &field.ops {
                    match op {
                        Op::Encrypt => {
                            let column = format_ident!("{}_encrypted", field.column);
                            fields.push(quote! { pub #column: Vec<u8> });
                        }
                        Op::HashBasic => {
                            let column = format_ident!("{}_hash", field.column);
                            fields.push(quote! { pub #column: String });
                        }
                        Op::HashSecure => {
                            let column = format_ident!("{}_hash_secure", field.column);
                            fields.push(quote! { pub #column: String });
                        }
                    }
                }
            }
        }
    }

    if plan.has_encrypt {
        fields.push(quote! { pub dek_encrypted: Vec<u8> });
        fields.push(quote! { pub key_version: u32 });
    }
    fields.push(quote! {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub metadata: Option<std::collections::BTreeMap<String, String>>
    });

    let doc = format!(
        " Companion record for [`{}`] with crypto columns applied.",
        record.type_name
    );
    quote! {
        #[doc = #doc]
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        pub struct #companion {
            #(#fields,)*
        }
    }
}

fn encode_stmt(field: &ProcessedField) -> TokenStream {
    let bytes = format_ident!("{}_bytes", field.column);
    let access = &field.access;
    let column = &field.column;
    if field.json {
        // JSON encoding can fail; a json field always implies `field_errors`
        // is in scope (see the fallibility computation in `process_fn`).
        quote! {
            let #bytes = match encx::codec::to_canonical_json(&source #(.#access)*) {
                Ok(value) => value,
                Err(err) => {
                    field_errors.record(#column, "encoding", err);
                    Vec::new()
                }
            };
        }
    } else {
        quote! {
            let #bytes = encx::codec::CanonicalValue::to_canonical(&source #(.#access)*);
        }
    }
}

fn process_fn(record: &RecordInfo, plan: &Plan, prefix: &str) -> TokenStream {
    let type_ident = format_ident!("{}", record.type_name);
    let companion = format_ident!("{}Encrypted", record.type_name);
    let fn_name = format_ident!("{}_{}", prefix, to_snake_case(&record.type_name));

    // Anything that can fail per-field: JSON encoding, encryption, secure
    // hashing. HashBasic is infallible.
    let fallible = plan.processed.iter().any(|f| {
        f.json || f.ops.contains(&Op::Encrypt) || f.ops.contains(&Op::HashSecure)
    });

    let mut body = Vec::new();
    if plan.has_encrypt {
        body.push(quote! { let dek = engine.generate_dek()?; });
    }
    if fallible {
        body.push(quote! { let mut field_errors = encx::FieldErrors::new(); });
    }

    for field in &plan.processed {
        body.push(encode_stmt(field));
        let bytes = format_ident!("{}_bytes", field.column);
        let column = &field.column;
        for op in &field.ops {
            match op {
                Op::Encrypt => {
                    let out = format_ident!("{}_encrypted", field.column);
                    body.push(quote! {
                        let #out = match engine.encrypt_data(&#bytes, &dek) {
                            Ok(value) => value,
                            Err(err) => {
                                field_errors.record(#column, "encryption", err);
                                Vec::new()
                            }
                        };
                    });
                }
                Op::HashBasic => {
                    let out = format_ident!("{}_hash", field.column);
                    body.push(quote! {
                        let #out = engine.hash_basic(&#bytes);
                    });
                }
                Op::HashSecure => {
                    let out = format_ident!("{}_hash_secure", field.column);
                    body.push(quote! {
                        let #out = match engine.hash_secure(&#bytes) {
                            Ok(value) => value,
                            Err(err) => {
                                field_errors.record(#column, "secure hashing", err);
                                String::new()
                            }
                        };
                    });
                }
            }
        }
    }

    if fallible {
        body.push(quote! { field_errors.into_result()?; });
    }
    if plan.has_encrypt {
        body.push(quote! { let wrapped = engine.wrap_dek(&dek).await?; });
    }
    body.push(quote! {
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("kek_alias".to_string(), engine.kek_alias().to_string());
        metadata.insert("algorithm".to_string(), encx::AES_256_GCM.to_string());
        metadata.insert("generator_version".to_string(), #GENERATOR_VERSION.to_string());
    });

    let mut literal = Vec::new();
    for slot in &plan.layout {
        match slot {
            LayoutSlot::Plain(i) => {
                let field = &plan.plain[*i];
                let column = format_ident!("{}", field.column);
                let access = &field.access;
                literal.push(quote! { #column: source #(.#access)*.clone() });
            }
            LayoutSlot::Processed(i) => {
                let field = &plan.processed[*i];
                for op in &field.ops {
                    match op {
                        Op::Encrypt => {
                            let out = format_ident!("{}_encrypted", field.column);
                            literal.push(quote! { #out });
                        }
                        Op::HashBasic => {
                            let out = format_ident!("{}_hash", field.column);
                            literal.push(quote! { #out });
                        }
                        Op::HashSecure => {
                            let out = format_ident!("{}_hash_secure", field.column);
                            literal.push(quote! { #out });
                        }
                    }
                }
            }
        }
    }
    if plan.has_encrypt {
        literal.push(quote! { dek_encrypted: wrapped.ciphertext });
        literal.push(quote! { key_version: wrapped.version });
    }
    literal.push(quote! { metadata: Some(metadata) });

    let doc = format!(
        " Encrypt and hash the annotated fields of a [`{}`].",
        record.type_name
    );
    quote! {
        #[doc = #doc]
        pub async fn #fn_name(
            engine: &encx::CryptoEngine,
            source: &#type_ident,
        ) -> Result<#companion, encx::Error> {
            #(#body)*
            Ok(#companion {
                #(#literal,)*
            })
        }
    }
}

fn decrypt_fn(record: &RecordInfo, plan: &Plan) -> TokenStream {
    let type_ident = format_ident!("{}", record.type_name);
    let companion = format_ident!("{}Encrypted", record.type_name);
    let fn_name = format_ident!("decrypt_{}", to_snake_case(&record.type_name));
    // Without encrypted fields there is nothing to unwrap; keep the engine
    // parameter for a uniform call shape but mark it unused.
    let engine_param = if plan.has_encrypt {
        format_ident!("engine")
    } else {
        format_ident!("_engine")
    };

    let mut body = Vec::new();
    if plan.has_encrypt {
        body.push(quote! {
            let dek = engine.unwrap_dek(&source.dek_encrypted, source.key_version).await?;
            let mut field_errors = encx::FieldErrors::new();
        });
    }

    for field in plan.processed.iter().filter(|f| f.ops.contains(&Op::Encrypt)) {
        let local = format_ident!("{}", field.column);
        let column = &field.column;
        let encrypted = format_ident!("{}_encrypted", field.column);
        let ty = &field.ty;
        let decode = if field.json {
            quote! { encx::codec::from_canonical_json::<#ty>(&bytes) }
        } else {
            quote! { <#ty as encx::codec::CanonicalValue>::from_canonical(&bytes) }
        };
        body.push(quote! {
            let #local = match engine.decrypt_data(&source.#encrypted, &dek) {
                Ok(bytes) => match #decode {
                    Ok(value) => value,
                    Err(err) => {
                        field_errors.record(#column, "decoding", err);
                        Default::default()
                    }
                },
                Err(err) => {
                    field_errors.record(#column, "decryption", err);
                    Default::default()
                }
            };
        });
    }

    if plan.has_encrypt {
        body.push(quote! { field_errors.into_result()?; });
    }

    let literal: Vec<TokenStream> = plan
        .rebuild
        .iter()
        .map(|(name, rebuild)| rebuild_expr(name, rebuild))
        .collect();

    let doc = format!(
        " Restore a [`{}`] from its companion record. Hash-only fields are\n left at their defaults.",
        record.type_name
    );
    quote! {
        #[doc = #doc]
        pub async fn #fn_name(
            #engine_param: &encx::CryptoEngine,
            source: &#companion,
        ) -> Result<#type_ident, encx::Error> {
            #(#body)*
            Ok(#type_ident {
                #(#literal,)*
            })
        }
    }
}

fn rebuild_expr(name: &syn::Ident, rebuild: &Rebuild) -> TokenStream {
    match rebuild {
        Rebuild::Plain { column } => quote! { #name: source.#column.clone() },
        Rebuild::Decrypted { column } => quote! { #name: #column },
        Rebuild::HashOnly => quote! { #name: Default::default() },
        Rebuild::Nested { ty, fields } => {
            let inner: Vec<TokenStream> = fields
                .iter()
                .map(|(child, rebuild)| rebuild_expr(child, rebuild))
                .collect();
            quote! { #name: #ty { #(#inner,)* } }
        }
    }
}

// ---------------------------------------------------------------------------
// File assembly
// ---------------------------------------------------------------------------

/// One generated output file and the source it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedFile {
    pub source: PathBuf,
    pub path: PathBuf,
    pub content: String,
}

/// Generate output files for a scanned package.
///
/// One file per source file that contributes annotated records. Fails
/// `VALIDATION_FAILED` if any annotated record is invalid — nothing is
/// emitted for a package with validation errors.
pub fn generate_package(
    package_dir: &Path,
    records: &[RecordInfo],
    config: &Config,
    output_dir: Option<&Path>,
) -> Result<Vec<GeneratedFile>, GenError> {
    let invalid: Vec<String> = records
        .iter()
        .flat_map(|record| record.validation_lines())
        .collect();
    if !invalid.is_empty() {
        return Err(GenError::Validation(invalid));
    }

    let by_name: BTreeMap<String, &RecordInfo> = records
        .iter()
        .map(|record| (record.type_name.clone(), record))
        .collect();

    // Group by source file, deterministically.
    let mut by_file: BTreeMap<PathBuf, Vec<&RecordInfo>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.has_annotations) {
        by_file
            .entry(record.source_file.clone())
            .or_default()
            .push(record);
    }

    let out_dir = output_dir.unwrap_or(package_dir);
    let mut files = Vec::new();
    for (source_file, file_records) in by_file {
        let content = generate_file_content(&source_file, &file_records, &by_name, config)?;
        let stem = source_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("generated");
        let path = out_dir.join(format!(
            "{}{}.rs",
            stem, config.generation.output_suffix
        ));
        files.push(GeneratedFile {
            source: source_file,
            path,
            content,
        });
    }
    Ok(files)
}

fn generate_file_content(
    source_file: &Path,
    records: &[&RecordInfo],
    by_name: &BTreeMap<String, &RecordInfo>,
    config: &Config,
) -> Result<String, GenError> {
    let mut items = TokenStream::new();
    // "auto" keeps the generated file a sibling module of its source; a
    // configured package name pins the import to that module path, for
    // output directories outside the source tree.
    if config.generation.package_name == "auto" {
        items.extend(quote! {
            #[allow(unused_imports)]
            use super::*;
        });
    } else {
        let package = format_ident!("{}", config.generation.package_name);
        items.extend(quote! {
            #[allow(unused_imports)]
            use crate::#package::*;
        });
    }

    for record in records {
        let plan = build_plan(record, by_name);
        items.extend(companion_struct(record, &plan));
        items.extend(process_fn(record, &plan, &config.generation.function_prefix));
        items.extend(decrypt_fn(record, &plan));
    }

    let file: syn::File = syn::parse2(items).map_err(|e| GenError::Parse {
        path: source_file.to_path_buf(),
        message: format!("generated code does not parse: {}", e),
    })?;

    let source_name = source_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(format!(
        "// Code generated by {}. DO NOT EDIT.\n// Source: {}\n\n{}",
        GENERATOR_VERSION,
        source_name,
        prettyplease::unparse(&file)
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
