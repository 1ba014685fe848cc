//! Source scanner: locate annotated record types and validate their tags.
//!
//! Walks every `.rs` file in a package directory (one level, the package's
//! own sources), collects named-field structs, reads `#[encx(...)]` field
//! annotations and `#[encx_options(...)]` struct options, and validates the
//! combination rules. Validation problems land on the field that caused
//! them; the generator refuses to emit for invalid records.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use quote::ToTokens;

use crate::error::GenError;
use crate::schema::{self, Annotation};

/// Local names the generated pipelines bind; fields may not shadow them.
const RESERVED_FIELD_NAMES: &[&str] = &["engine", "source", "dek", "wrapped", "field_errors"];

// ---------------------------------------------------------------------------
// Scan results
// ---------------------------------------------------------------------------

/// One struct field, with its annotations and validation state.
#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub name: String,
    /// Type expression as rendered text, whitespace-normalized.
    pub type_text: String,
    /// Raw annotation tokens, in source order.
    pub annotations: Vec<String>,
    pub is_valid: bool,
    pub validation_errors: Vec<String>,
    pub(crate) ty: syn::Type,
}

impl FieldInfo {
    pub fn parsed_annotations(&self) -> Vec<Annotation> {
        self.annotations
            .iter()
            .filter_map(|t| Annotation::parse(t))
            .collect()
    }

    fn push_error(&mut self, message: impl Into<String>) {
        self.validation_errors.push(message.into());
        self.is_valid = false;
    }
}

/// One scanned record type.
#[derive(Clone, Debug)]
pub struct RecordInfo {
    pub package: String,
    pub type_name: String,
    pub source_file: PathBuf,
    pub fields: Vec<FieldInfo>,
    /// True iff any field carries a non-empty annotation list.
    pub has_annotations: bool,
    pub options: BTreeMap<String, String>,
}

impl RecordInfo {
    pub fn is_valid(&self) -> bool {
        self.fields.iter().all(|f| f.is_valid)
    }

    /// Formatted `<Type>.<Field>: <msg>` lines for every invalid field.
    pub fn validation_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for field in &self.fields {
            for error in &field.validation_errors {
                lines.push(format!("{}.{}: {}", self.type_name, field.name, error));
            }
        }
        lines
    }

    fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ---------------------------------------------------------------------------
// Package scanning
// ---------------------------------------------------------------------------

/// Scan every source file in `dir` (non-recursive; a package is one
/// directory), skipping test sources.
pub fn scan_package(dir: impl AsRef<Path>) -> Result<Vec<RecordInfo>, GenError> {
    let dir = dir.as_ref();
    let package = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| GenError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_scannable_source(path))
        .collect();
    // Deterministic scan order regardless of directory iteration order.
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        let source = std::fs::read_to_string(&path).map_err(|e| GenError::io(&path, e))?;
        records.extend(scan_source(&path, &package, &source)?);
    }

    cross_validate(&mut records);
    Ok(records)
}

fn is_scannable_source(path: &Path) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some("rs") {
        return false;
    }
    let stem = match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => stem,
        None => return false,
    };
    // Test sources are not part of the processing surface.
    if stem == "tests" || stem.ends_with("_test") || stem.ends_with("_tests") {
        return false;
    }
    // Never rescan generated output.
    !stem.ends_with("_encx")
}

/// Parse one source file and collect its record types.
pub fn scan_source(
    path: &Path,
    package: &str,
    source: &str,
) -> Result<Vec<RecordInfo>, GenError> {
    let file = syn::parse_file(source).map_err(|e| GenError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut records = Vec::new();
    collect_items(&file.items, path, package, &mut records);
    Ok(records)
}

fn collect_items(
    items: &[syn::Item],
    path: &Path,
    package: &str,
    records: &mut Vec<RecordInfo>,
) {
    for item in items {
        match item {
            syn::Item::Struct(item_struct) => {
                if let Some(record) = scan_struct(item_struct, path, package) {
                    records.push(record);
                }
            }
            syn::Item::Mod(item_mod) => {
                if is_test_module(item_mod) {
                    continue;
                }
                if let Some((_, items)) = &item_mod.content {
                    collect_items(items, path, package, records);
                }
            }
            _ => {}
        }
    }
}

fn is_test_module(item_mod: &syn::ItemMod) -> bool {
    item_mod.attrs.iter().any(|attr| {
        attr.path().is_ident("cfg")
            && attr
                .meta
                .to_token_stream()
                .to_string()
                .contains("test")
    })
}

fn scan_struct(item: &syn::ItemStruct, path: &Path, package: &str) -> Option<RecordInfo> {
    // Only records with named fields participate.
    let named = match &item.fields {
        syn::Fields::Named(named) => named,
        _ => return None,
    };

    let (options, option_errors) = parse_options(&item.attrs);

    let mut fields = Vec::new();
    for field in &named.named {
        let name = field.ident.as_ref()?.to_string();
        let (annotations, mut errors) = parse_annotations(&field.attrs);
        errors.extend(schema::validate_annotations(&annotations));
        if !annotations.is_empty() && RESERVED_FIELD_NAMES.contains(&name.as_str()) {
            errors.push(format!(
                "field name \"{}\" is reserved by the generated pipeline",
                name
            ));
        }
        fields.push(FieldInfo {
            name,
            type_text: type_text(&field.ty),
            annotations,
            is_valid: errors.is_empty(),
            validation_errors: errors,
            ty: field.ty.clone(),
        });
    }

    // Option errors have no natural field; pin them to the first one.
    if !option_errors.is_empty() {
        if let Some(first) = fields.first_mut() {
            for error in option_errors {
                first.push_error(error);
            }
        }
    }

    let has_annotations = fields.iter().any(|f| !f.annotations.is_empty());
    Some(RecordInfo {
        package: package.to_string(),
        type_name: item.ident.to_string(),
        source_file: path.to_path_buf(),
        fields,
        has_annotations,
        options,
    })
}

// ---------------------------------------------------------------------------
// Attribute parsing
// ---------------------------------------------------------------------------

fn parse_annotations(attrs: &[syn::Attribute]) -> (Vec<String>, Vec<String>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for attr in attrs {
        if !attr.path().is_ident("encx") {
            continue;
        }

        // String form first: `#[encx("encrypt, hash_basic")]` is accepted
        // alongside the token list, matching the tag-string shape these
        // annotations commonly ship in.
        if let Ok(lit) = attr.parse_args::<syn::LitStr>() {
            for token in lit.value().split(',') {
                let token = token.trim();
                if !token.is_empty() {
                    tokens.push(token.to_string());
                }
            }
            continue;
        }

        let parsed = attr.parse_args_with(
            syn::punctuated::Punctuated::<syn::Meta, syn::Token![,]>::parse_terminated,
        );
        match parsed {
            Ok(list) => {
                for meta in list {
                    match meta {
                        syn::Meta::Path(path) if path.get_ident().is_some() => {
                            tokens.push(path.get_ident().unwrap().to_string());
                        }
                        other => {
                            // Not a bare token; surfaces as an unknown annotation.
                            tokens.push(other.to_token_stream().to_string());
                        }
                    }
                }
            }
            Err(e) => errors.push(format!("malformed encx annotation: {}", e)),
        }
    }
    (tokens, errors)
}

fn parse_options(attrs: &[syn::Attribute]) -> (BTreeMap<String, String>, Vec<String>) {
    let mut options = BTreeMap::new();
    let mut errors = Vec::new();

    for attr in attrs {
        if !attr.path().is_ident("encx_options") {
            continue;
        }
        let parsed = attr.parse_args_with(
            syn::punctuated::Punctuated::<syn::Meta, syn::Token![,]>::parse_terminated,
        );
        match parsed {
            Ok(list) => {
                for meta in list {
                    match meta {
                        syn::Meta::NameValue(nv) => {
                            let key = nv
                                .path
                                .get_ident()
                                .map(|i| i.to_string())
                                .unwrap_or_else(|| nv.path.to_token_stream().to_string());
                            options.insert(key, literal_text(&nv.value));
                        }
                        syn::Meta::Path(path) => {
                            // Bare key with no value: treated as a boolean flag.
                            let key = path
                                .get_ident()
                                .map(|i| i.to_string())
                                .unwrap_or_else(|| path.to_token_stream().to_string());
                            options.insert(key, "true".to_string());
                        }
                        other => errors.push(format!(
                            "malformed encx_options entry: {}",
                            other.to_token_stream()
                        )),
                    }
                }
            }
            Err(e) => errors.push(format!("malformed encx_options: {}", e)),
        }
    }

    errors.extend(schema::validate_options(&options));
    (options, errors)
}

fn literal_text(expr: &syn::Expr) -> String {
    if let syn::Expr::Lit(lit) = expr {
        match &lit.lit {
            syn::Lit::Str(s) => return s.value(),
            syn::Lit::Int(i) => return i.base10_digits().to_string(),
            syn::Lit::Bool(b) => return b.value.to_string(),
            _ => {}
        }
    }
    expr.to_token_stream().to_string()
}

/// Whitespace-normalized rendering of a type expression.
pub(crate) fn type_text(ty: &syn::Type) -> String {
    ty.to_token_stream()
        .to_string()
        .replace(' ', "")
}

// ---------------------------------------------------------------------------
// Cross-record validation: flatten targets, duplicates, cycles
// ---------------------------------------------------------------------------

fn cross_validate(records: &mut Vec<RecordInfo>) {
    let names: BTreeSet<String> = records.iter().map(|r| r.type_name.clone()).collect();
    let snapshot: BTreeMap<String, RecordInfo> = records
        .iter()
        .map(|r| (r.type_name.clone(), r.clone()))
        .collect();

    for record in records.iter_mut() {
        let record_name = record.type_name.clone();
        for i in 0..record.fields.len() {
            let annotations = record.fields[i].parsed_annotations();

            // Companion columns the record itself would shadow.
            if record.has_annotations
                && ["dek_encrypted", "key_version", "metadata"]
                    .contains(&record.fields[i].name.as_str())
            {
                let name = record.fields[i].name.clone();
                record.fields[i].push_error(format!(
                    "field name \"{}\" collides with a companion record column",
                    name
                ));
            }

            if annotations.contains(&Annotation::Flatten) {
                let target = record.fields[i].type_text.clone();
                if !names.contains(&target) {
                    record.fields[i].push_error(format!(
                        "flatten target \"{}\" is not a record in this package",
                        target
                    ));
                    continue;
                }
                if reaches(&snapshot, &target, &record_name) || target == record_name {
                    record.fields[i].push_error(format!(
                        "flatten of \"{}\" forms a cycle back to \"{}\"",
                        target, record_name
                    ));
                    continue;
                }
                if let Some(duplicate) =
                    promoted_duplicate(&snapshot, &record_name, &record.fields[i].name, &target)
                {
                    record.fields[i].push_error(format!(
                        "flattened field \"{}\" duplicates a field name in \"{}\"",
                        duplicate, record_name
                    ));
                }
            }

            if annotations.contains(&Annotation::Encrypt) {
                // Self-referential encrypt fields, directly or via a chain of
                // records, cannot be serialized.
                for mentioned in mentioned_records(&record.fields[i].type_text, &names) {
                    if mentioned == record_name || reaches(&snapshot, &mentioned, &record_name) {
                        record.fields[i].push_error(format!(
                            "encrypted field type references the enclosing record \"{}\"",
                            record_name
                        ));
                        break;
                    }
                }
            }
        }
    }
}

/// Record names mentioned as identifiers inside a type expression.
fn mentioned_records(type_text: &str, names: &BTreeSet<String>) -> Vec<String> {
    type_text
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| names.contains(*segment))
        .map(|s| s.to_string())
        .collect()
}

/// Whether `from` reaches `to` through flatten fields or encrypt-field type
/// references.
fn reaches(records: &BTreeMap<String, RecordInfo>, from: &str, to: &str) -> bool {
    let names: BTreeSet<String> = records.keys().cloned().collect();
    let mut stack = vec![from.to_string()];
    let mut visited = BTreeSet::new();

    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(record) = records.get(&current) {
            for field in &record.fields {
                let annotations = field.parsed_annotations();
                if annotations.contains(&Annotation::Flatten) {
                    stack.push(field.type_text.clone());
                } else if annotations.contains(&Annotation::Encrypt) {
                    stack.extend(mentioned_records(&field.type_text, &names));
                }
            }
        }
    }
    false
}

/// First duplicate leaf name introduced by flattening `target` into `host`,
/// if any.
fn promoted_duplicate(
    records: &BTreeMap<String, RecordInfo>,
    host: &str,
    flatten_field: &str,
    target: &str,
) -> Option<String> {
    let mut seen = BTreeSet::new();
    let mut duplicate = None;
    if let Some(host_record) = records.get(host) {
        for field in &host_record.fields {
            if field.name == flatten_field {
                continue;
            }
            if field.parsed_annotations().contains(&Annotation::Flatten) {
                // Sibling flatten targets also contribute leaves.
                collect_leaves(records, &field.type_text, &mut seen, &mut duplicate);
            } else {
                seen.insert(field.name.clone());
            }
        }
    }
    collect_leaves(records, target, &mut seen, &mut duplicate);
    duplicate
}

fn collect_leaves(
    records: &BTreeMap<String, RecordInfo>,
    name: &str,
    seen: &mut BTreeSet<String>,
    duplicate: &mut Option<String>,
) {
    if duplicate.is_some() {
        return;
    }
    if let Some(record) = records.get(name) {
        for field in &record.fields {
            if field.parsed_annotations().contains(&Annotation::Flatten) {
                collect_leaves(records, &field.type_text, seen, duplicate);
            } else if !seen.insert(field.name.clone()) {
                *duplicate = Some(field.name.clone());
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(source: &str) -> Vec<RecordInfo> {
        let mut records =
            scan_source(Path::new("lib.rs"), "testpkg", source).expect("source parses");
        cross_validate(&mut records);
        records
    }

    #[test]
    fn finds_annotated_struct() {
        let records = scan(
            r#"
            pub struct User {
                pub id: i64,
                #[encx(encrypt, hash_basic)]
                pub email: String,
                #[encx(hash_secure)]
                pub password: String,
            }
            "#,
        );
        assert_eq!(records.len(), 1);
        let user = &records[0];
        assert_eq!(user.type_name, "User");
        assert!(user.has_annotations);
        assert!(user.is_valid());
        assert_eq!(user.field("email").unwrap().annotations, ["encrypt", "hash_basic"]);
        assert_eq!(user.field("id").unwrap().annotations, Vec::<String>::new());
        assert_eq!(user.field("email").unwrap().type_text, "String");
    }

    #[test]
    fn unannotated_struct_is_recorded_without_annotations() {
        let records = scan("struct Plain { a: u32, b: String }");
        assert_eq!(records.len(), 1);
        assert!(!records[0].has_annotations);
    }

    #[test]
    fn tuple_structs_are_skipped() {
        let records = scan("struct Pair(u32, u32);");
        assert!(records.is_empty());
    }

    #[test]
    fn conflicting_hashes_produce_one_error_naming_both() {
        let records = scan(
            r#"
            struct Account {
                #[encx(hash_basic, hash_secure)]
                pin: String,
            }
            "#,
        );
        let field = records[0].field("pin").unwrap();
        assert!(!field.is_valid);
        assert_eq!(field.validation_errors.len(), 1);
        assert!(field.validation_errors[0].contains("hash_basic"));
        assert!(field.validation_errors[0].contains("hash_secure"));
        let lines = records[0].validation_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Account.pin:"));
    }

    #[test]
    fn unknown_and_duplicate_tokens_rejected() {
        let records = scan(
            r#"
            struct Account {
                #[encx(encrytp)]
                a: String,
                #[encx(encrypt, encrypt)]
                b: String,
            }
            "#,
        );
        assert!(records[0].field("a").unwrap().validation_errors[0].contains("encrytp"));
        assert!(records[0].field("b").unwrap().validation_errors[0].contains("duplicate"));
    }

    #[test]
    fn options_are_collected_and_serializer_rejected() {
        let records = scan(
            r#"
            #[encx_options(table = "users", version = 2)]
            struct User {
                #[encx(encrypt)]
                email: String,
            }
            "#,
        );
        assert_eq!(records[0].options["table"], "users");
        assert_eq!(records[0].options["version"], "2");
        assert!(records[0].is_valid());

        let rejected = scan(
            r#"
            #[encx_options(serializer = "json")]
            struct User {
                #[encx(encrypt)]
                email: String,
            }
            "#,
        );
        assert!(!rejected[0].is_valid());
    }

    #[test]
    fn unknown_options_are_ignored() {
        let records = scan(
            r#"
            #[encx_options(shiny_future_knob = "on")]
            struct User {
                #[encx(encrypt)]
                email: String,
            }
            "#,
        );
        assert!(records[0].is_valid());
        assert_eq!(records[0].options["shiny_future_knob"], "on");
    }

    #[test]
    fn test_modules_are_skipped() {
        let records = scan(
            r#"
            struct Real { #[encx(encrypt)] a: String }

            #[cfg(test)]
            mod tests {
                struct Fixture { #[encx(encrypt)] b: String }
            }
            "#,
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].type_name, "Real");
    }

    #[test]
    fn inline_modules_are_scanned() {
        let records = scan(
            r#"
            mod inner {
                pub struct Nested { #[encx(hash_basic)] pub a: String }
            }
            "#,
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].type_name, "Nested");
    }

    #[test]
    fn flatten_contributes_embedded_fields() {
        let records = scan(
            r#"
            struct Contact {
                #[encx(encrypt)]
                email: String,
                city: String,
            }
            struct User {
                id: i64,
                #[encx(flatten)]
                contact: Contact,
            }
            "#,
        );
        assert_eq!(records.len(), 2);
        let user = records.iter().find(|r| r.type_name == "User").unwrap();
        assert!(user.is_valid());
    }

    #[test]
    fn flatten_unknown_target_rejected() {
        let records = scan(
            r#"
            struct User {
                #[encx(flatten)]
                contact: Contact,
            }
            "#,
        );
        assert!(!records[0].is_valid());
        assert!(records[0].fields[0].validation_errors[0].contains("Contact"));
    }

    #[test]
    fn flatten_duplicate_names_rejected() {
        let records = scan(
            r#"
            struct Contact {
                #[encx(encrypt)]
                email: String,
            }
            struct User {
                email: String,
                #[encx(flatten)]
                contact: Contact,
            }
            "#,
        );
        let user = records.iter().find(|r| r.type_name == "User").unwrap();
        assert!(!user.is_valid());
        assert!(user.field("contact").unwrap().validation_errors[0].contains("email"));
    }

    #[test]
    fn self_referential_encrypt_rejected() {
        let records = scan(
            r#"
            struct Node {
                #[encx(encrypt)]
                next: Option<Box<Node>>,
            }
            "#,
        );
        assert!(!records[0].is_valid());
        assert!(records[0].fields[0].validation_errors[0].contains("Node"));
    }

    #[test]
    fn cyclic_encrypt_chain_rejected() {
        let records = scan(
            r#"
            struct A {
                #[encx(encrypt)]
                b: Box<B>,
            }
            struct B {
                #[encx(encrypt)]
                a: Box<A>,
            }
            "#,
        );
        for record in &records {
            assert!(!record.is_valid(), "{} should be cyclic", record.type_name);
        }
    }

    #[test]
    fn reserved_field_names_rejected_when_annotated() {
        let records = scan(
            r#"
            struct Bad {
                #[encx(encrypt)]
                dek: String,
            }
            struct Fine {
                dek: String,
                #[encx(encrypt)]
                email: String,
            }
            "#,
        );
        let bad = records.iter().find(|r| r.type_name == "Bad").unwrap();
        assert!(!bad.is_valid());
        let fine = records.iter().find(|r| r.type_name == "Fine").unwrap();
        // Unannotated fields keep their names; only the pipeline locals are
        // reserved for processed fields.
        assert!(fine.is_valid());
    }

    #[test]
    fn scan_package_skips_test_files_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.rs"),
            "struct B { #[encx(encrypt)] x: String }",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.rs"),
            "struct A { #[encx(encrypt)] y: String }",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a_test.rs"),
            "struct T { #[encx(encrypt)] z: String }",
        )
        .unwrap();
        std::fs::write(dir.path().join("a_encx.rs"), "// generated").unwrap();

        let records = scan_package(dir.path()).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.type_name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn string_form_annotations_are_equivalent() {
        let records = scan(
            r#"
            struct User {
                #[encx("encrypt, hash_basic")]
                email: String,
                #[encx("hash_secure")]
                password: String,
                #[encx("")]
                untouched: String,
            }
            "#,
        );
        let user = &records[0];
        assert!(user.is_valid());
        assert_eq!(user.field("email").unwrap().annotations, ["encrypt", "hash_basic"]);
        assert_eq!(user.field("password").unwrap().annotations, ["hash_secure"]);
        // An empty tag string means no annotations at all.
        assert!(user.field("untouched").unwrap().annotations.is_empty());
    }

    #[test]
    fn string_form_rejects_unknown_tokens_too() {
        let records = scan(
            r#"
            struct User {
                #[encx("encrypt, hash_both")]
                email: String,
            }
            "#,
        );
        assert!(!records[0].is_valid());
        assert!(records[0].fields[0].validation_errors[0].contains("hash_both"));
    }

    #[test]
    fn realistic_source_with_non_struct_items() {
        let records = scan(
            r#"
            use encx::Encx;
            use std::collections::BTreeMap;

            pub enum Role { Admin, Member }

            #[derive(Debug, Clone, Encx)]
            #[encx_options(table = "accounts")]
            pub struct Account {
                pub id: u64,
                pub role: String,
                #[encx(encrypt, hash_basic)]
                pub email: String,
                #[encx(encrypt)]
                pub preferences: BTreeMap<String, String>,
            }

            impl Account {
                pub fn display_name(&self) -> &str {
                    &self.role
                }
            }

            pub fn helper() -> u32 { 7 }
            "#,
        );
        assert_eq!(records.len(), 1);
        let account = &records[0];
        assert_eq!(account.type_name, "Account");
        assert!(account.is_valid());
        assert_eq!(account.options["table"], "accounts");
        assert_eq!(
            account.field("preferences").unwrap().type_text,
            "BTreeMap<String,String>"
        );
    }

    #[test]
    fn type_text_is_normalized() {
        let records = scan(
            r#"
            struct User {
                #[encx(encrypt)]
                tags: Option<Vec<String>>,
            }
            "#,
        );
        assert_eq!(records[0].fields[0].type_text, "Option<Vec<String>>");
    }
}
