//! Structured run reports for the CLI.
//!
//! `validate -json` and `generate -json` print one of these instead of the
//! plain-text summary, so editor integrations and CI steps can consume the
//! result without parsing log lines.

use std::fmt;

use serde::Serialize;

use crate::codegen::companion_columns;
use crate::scanner::RecordInfo;
use crate::GENERATOR_VERSION;

/// One scanned record in a report.
#[derive(Clone, Debug, Serialize)]
pub struct RecordReport {
    pub type_name: String,
    pub source_file: String,
    pub annotated: bool,
    pub valid: bool,
    /// Companion field names the generated record will carry. Empty for
    /// unannotated or invalid records.
    pub columns: Vec<String>,
    /// Formatted `<Type>.<Field>: <msg>` problems.
    pub problems: Vec<String>,
}

/// One package's scan results.
#[derive(Clone, Debug, Serialize)]
pub struct PackageReport {
    pub package: String,
    pub records: Vec<RecordReport>,
}

/// A full run: scanned packages plus what the generator wrote or skipped.
#[derive(Clone, Debug, Serialize)]
pub struct GenerationReport {
    pub generator_version: String,
    pub packages: Vec<PackageReport>,
    pub written: Vec<String>,
    pub skipped: Vec<String>,
}

impl GenerationReport {
    pub fn new() -> Self {
        Self {
            generator_version: GENERATOR_VERSION.to_string(),
            packages: Vec::new(),
            written: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Add a scanned package's records.
    pub fn add_package(&mut self, package: &str, records: &[RecordInfo]) {
        let reports = records
            .iter()
            .map(|record| {
                let valid = record.is_valid();
                let columns = if record.has_annotations && valid {
                    companion_columns(records, &record.type_name)
                } else {
                    Vec::new()
                };
                RecordReport {
                    type_name: record.type_name.clone(),
                    source_file: record.source_file.display().to_string(),
                    annotated: record.has_annotations,
                    valid,
                    columns,
                    problems: record.validation_lines(),
                }
            })
            .collect();
        self.packages.push(PackageReport {
            package: package.to_string(),
            records: reports,
        });
    }

    pub fn record_written(&mut self, path: impl Into<String>) {
        self.written.push(path.into());
    }

    pub fn record_skipped(&mut self, path: impl Into<String>) {
        self.skipped.push(path.into());
    }

    /// Every problem across all packages.
    pub fn problems(&self) -> Vec<String> {
        self.packages
            .iter()
            .flat_map(|p| p.records.iter())
            .flat_map(|r| r.problems.iter().cloned())
            .collect()
    }

    /// Count of annotated records across all packages.
    pub fn annotated_count(&self) -> usize {
        self.packages
            .iter()
            .flat_map(|p| p.records.iter())
            .filter(|r| r.annotated)
            .count()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for GenerationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for package in &self.packages {
            writeln!(f, "package {}", package.package)?;
            for record in &package.records {
                if !record.annotated {
                    continue;
                }
                let status = if record.valid { "ok" } else { "INVALID" };
                writeln!(
                    f,
                    "  {} [{}] -> {} column(s)",
                    record.type_name,
                    status,
                    record.columns.len()
                )?;
                for problem in &record.problems {
                    writeln!(f, "    {}", problem)?;
                }
            }
        }
        writeln!(
            f,
            "generated {} file(s), {} unchanged",
            self.written.len(),
            self.skipped.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner;

    fn scan(source: &str) -> Vec<RecordInfo> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), source).unwrap();
        scanner::scan_package(dir.path()).unwrap()
    }

    #[test]
    fn report_carries_columns_for_valid_records() {
        let records = scan(
            r#"
            pub struct User {
                pub id: i64,
                #[encx(encrypt, hash_basic)]
                pub email: String,
            }
            "#,
        );
        let mut report = GenerationReport::new();
        report.add_package("./src", &records);
        report.record_written("src/lib_encx.rs");

        assert_eq!(report.annotated_count(), 1);
        assert!(report.problems().is_empty());
        let record = &report.packages[0].records[0];
        assert!(record.columns.contains(&"email_encrypted".to_string()));
        assert!(record.columns.contains(&"email_hash".to_string()));
        assert!(record.columns.contains(&"key_version".to_string()));
        assert_eq!(report.written, ["src/lib_encx.rs"]);
    }

    #[test]
    fn report_surfaces_problems_and_drops_columns() {
        let records = scan(
            r#"
            pub struct Bad {
                #[encx(hash_basic, hash_secure)]
                pub pin: String,
            }
            "#,
        );
        let mut report = GenerationReport::new();
        report.add_package("./src", &records);

        let problems = report.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("Bad.pin:"));
        assert!(report.packages[0].records[0].columns.is_empty());
    }

    #[test]
    fn json_output_is_well_formed() {
        let records = scan(
            r#"
            pub struct User {
                #[encx(encrypt)]
                pub email: String,
            }
            "#,
        );
        let mut report = GenerationReport::new();
        report.add_package("./src", &records);

        let parsed: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(parsed["packages"][0]["package"], "./src");
        assert_eq!(parsed["packages"][0]["records"][0]["type_name"], "User");
        assert!(parsed["generator_version"]
            .as_str()
            .unwrap()
            .contains("encx-gen"));
    }

    #[test]
    fn display_summarizes_annotated_records() {
        let records = scan(
            r#"
            pub struct Plain { pub a: u32 }
            pub struct User {
                #[encx(encrypt)]
                pub email: String,
            }
            "#,
        );
        let mut report = GenerationReport::new();
        report.add_package("./src", &records);
        report.record_written("a");
        report.record_skipped("b");

        let text = report.to_string();
        assert!(text.contains("User [ok]"));
        // Unannotated records stay out of the summary.
        assert!(!text.contains("Plain"));
        assert!(text.contains("generated 1 file(s), 1 unchanged"));
    }
}
