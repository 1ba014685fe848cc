//! Generator configuration: the `encx.yaml` file.
//!
//! ```yaml
//! version: "1"
//! generation:
//!   output_suffix: "_encx"
//!   function_prefix: "process"
//!   package_name: "auto"
//!   default_serializer: "json"
//! packages:
//!   ./src:
//!     serializer: "json"
//!     output_dir: "./src"
//!     skip: false
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GenError;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "encx.yaml";

const SUPPORTED_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub packages: BTreeMap<String, PackageConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Appended to the source basename of every generated file.
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
    /// Prefix of the generated encrypt-side function, e.g. `process_user`.
    #[serde(default = "default_function_prefix")]
    pub function_prefix: String,
    /// Module name override, or "auto" to reuse the source layout.
    #[serde(default = "default_package_name")]
    pub package_name: String,
    /// Container serializer: only "json" is supported in v1.
    #[serde(default = "default_serializer")]
    pub default_serializer: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serializer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub skip: bool,
}

fn default_version() -> String {
    SUPPORTED_VERSION.to_string()
}
fn default_output_suffix() -> String {
    "_encx".to_string()
}
fn default_function_prefix() -> String {
    "process".to_string()
}
fn default_package_name() -> String {
    "auto".to_string()
}
fn default_serializer() -> String {
    "json".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            output_suffix: default_output_suffix(),
            function_prefix: default_function_prefix(),
            package_name: default_package_name(),
            default_serializer: default_serializer(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            generation: GenerationConfig::default(),
            packages: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_suffix(s: &str) -> bool {
    // Must itself extend an identifier: letter or '_' first, then ident chars.
    is_identifier(s)
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GenError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| GenError::io(path, e))?;
        let config: Config = serde_yaml::from_str(&data)
            .map_err(|e| GenError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, GenError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), GenError> {
        if self.version != SUPPORTED_VERSION {
            return Err(GenError::Config(format!(
                "unsupported config version \"{}\" (supported: \"{}\")",
                self.version, SUPPORTED_VERSION
            )));
        }
        let generation = &self.generation;
        if !is_suffix(&generation.output_suffix) {
            return Err(GenError::Config(format!(
                "output_suffix \"{}\" must start with a letter or '_'",
                generation.output_suffix
            )));
        }
        if !is_identifier(&generation.function_prefix) {
            return Err(GenError::Config(format!(
                "function_prefix \"{}\" is not a valid identifier",
                generation.function_prefix
            )));
        }
        if generation.package_name != "auto" && !is_identifier(&generation.package_name) {
            return Err(GenError::Config(format!(
                "package_name \"{}\" must be a valid identifier or \"auto\"",
                generation.package_name
            )));
        }
        validate_serializer(&generation.default_serializer)?;
        for (path, package) in &self.packages {
            if let Some(serializer) = &package.serializer {
                validate_serializer(serializer)
                    .map_err(|e| GenError::Config(format!("package {}: {}", path, e)))?;
            }
        }
        Ok(())
    }

    /// Effective serializer for a package path.
    pub fn serializer_for(&self, package: &str) -> &str {
        self.packages
            .get(package)
            .and_then(|p| p.serializer.as_deref())
            .unwrap_or(&self.generation.default_serializer)
    }

    /// The default config file contents written by `encx-gen init`.
    pub fn default_yaml() -> String {
        let mut packages = BTreeMap::new();
        packages.insert("./src".to_string(), PackageConfig::default());
        let config = Config {
            packages,
            ..Config::default()
        };
        serde_yaml::to_string(&config).unwrap_or_default()
    }
}

fn validate_serializer(serializer: &str) -> Result<(), GenError> {
    match serializer {
        "json" => Ok(()),
        // Recognized but not implemented; fail fast rather than silently
        // falling back.
        "protobuf" => Err(GenError::Config(
            "serializer \"protobuf\" is not supported in v1; use \"json\"".to_string(),
        )),
        other => Err(GenError::Config(format!(
            "unknown serializer \"{}\" (supported: \"json\")",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
