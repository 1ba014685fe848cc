//! End-to-end generator runs over a temporary package directory.

use std::path::Path;

use encx_gen::cache::{sha256_hex, GenerationCache};
use encx_gen::{generate_package, scan_package, Config, GenError};

const PACKAGE_SOURCE: &str = r#"
pub struct Contact {
    #[encx(encrypt)]
    pub email: String,
    pub city: String,
}

pub struct User {
    pub id: i64,
    #[encx(flatten)]
    pub contact: Contact,
    #[encx(encrypt, hash_basic)]
    pub ssn: String,
    #[encx(hash_secure)]
    pub password: String,
}
"#;

fn write_package(dir: &Path) {
    std::fs::write(dir.join("user.rs"), PACKAGE_SOURCE).unwrap();
    std::fs::write(
        dir.join("plain.rs"),
        "pub struct Untouched { pub a: u32 }\n",
    )
    .unwrap();
}

#[test]
fn generates_one_file_per_contributing_source() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());

    let records = scan_package(dir.path()).unwrap();
    let files = generate_package(dir.path(), &records, &Config::default(), None).unwrap();

    // plain.rs contributes nothing; user.rs yields user_encx.rs.
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, dir.path().join("user_encx.rs"));
    assert_eq!(files[0].source, dir.path().join("user.rs"));

    let content = &files[0].content;
    assert!(content.contains("pub struct ContactEncrypted"));
    assert!(content.contains("pub struct UserEncrypted"));
    assert!(content.contains("pub async fn process_user"));
    assert!(content.contains("pub async fn decrypt_contact"));
    // Flattened leaves are hoisted into the User companion.
    assert!(content.contains("source.contact.email"));
    assert!(content.contains("source.contact.city"));
}

#[test]
fn generated_files_reparse_and_mention_no_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());

    let records = scan_package(dir.path()).unwrap();
    let files = generate_package(dir.path(), &records, &Config::default(), None).unwrap();
    for file in &files {
        let body: String = file
            .content
            .lines()
            .filter(|line| !line.starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        syn::parse_file(&body).expect("generated output parses");
    }
}

#[test]
fn generation_is_byte_identical_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());

    let config = Config::default();
    let first = {
        let records = scan_package(dir.path()).unwrap();
        generate_package(dir.path(), &records, &config, None).unwrap()
    };
    let second = {
        let records = scan_package(dir.path()).unwrap();
        generate_package(dir.path(), &records, &config, None).unwrap()
    };
    assert_eq!(first, second);
}

#[test]
fn cache_skips_unchanged_and_reacts_to_one_byte_edits() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());
    let source = dir.path().join("user.rs");

    let records = scan_package(dir.path()).unwrap();
    let files =
        generate_package(dir.path(), &records, &Config::default(), None).unwrap();
    let file = &files[0];
    std::fs::write(&file.path, &file.content).unwrap();

    let source_hash = sha256_hex(&std::fs::read(&source).unwrap());
    let mut cache = GenerationCache::load(dir.path());
    assert!(cache.needs_regenerate(&source, &source_hash));
    cache.record(
        &source,
        source_hash.clone(),
        &file.path,
        sha256_hex(file.content.as_bytes()),
    );
    cache.save().unwrap();

    // Unchanged: skipped.
    let reloaded = GenerationCache::load(dir.path());
    assert!(!reloaded.needs_regenerate(&source, &source_hash));

    // Modify one byte of the scanned source: must regenerate.
    let mut bytes = std::fs::read(&source).unwrap();
    let last = bytes.len() - 1;
    bytes[last] = b' ';
    std::fs::write(&source, &bytes).unwrap();
    let new_hash = sha256_hex(&bytes);
    assert_ne!(new_hash, source_hash);
    assert!(reloaded.needs_regenerate(&source, &new_hash));

    // Deleting the generated output also forces regeneration.
    std::fs::remove_file(&file.path).unwrap();
    assert!(reloaded.needs_regenerate(&source, &source_hash));
}

#[test]
fn conflicting_annotations_fail_validation_with_one_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("bad.rs"),
        r#"
        pub struct Account {
            #[encx(hash_basic, hash_secure)]
            pub field: String,
        }
        "#,
    )
    .unwrap();

    let records = scan_package(dir.path()).unwrap();
    let lines: Vec<String> = records.iter().flat_map(|r| r.validation_lines()).collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("Account.field:"));
    assert!(lines[0].contains("hash_basic"));
    assert!(lines[0].contains("hash_secure"));

    let err =
        generate_package(dir.path(), &records, &Config::default(), None).unwrap_err();
    assert!(matches!(err, GenError::Validation(_)));
}

#[test]
fn output_dir_override_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_package(dir.path());

    let records = scan_package(dir.path()).unwrap();
    let files = generate_package(
        dir.path(),
        &records,
        &Config::default(),
        Some(out.path()),
    )
    .unwrap();
    assert_eq!(files[0].path, out.path().join("user_encx.rs"));
}

#[test]
fn custom_suffix_names_the_output() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());

    let mut config = Config::default();
    config.generation.output_suffix = "_sealed".to_string();
    config.validate().unwrap();

    let records = scan_package(dir.path()).unwrap();
    let files = generate_package(dir.path(), &records, &config, None).unwrap();
    assert_eq!(files[0].path, dir.path().join("user_sealed.rs"));
}
