//! Application configuration (`--config`) reader.
//!
//! The file is YAML and must carry an `application` section with a `title`
//! and a `resources` section. `resources` is kept verbatim for `pkg.json`.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Application configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{0}")]
    Invalid(String),
}

/// Parsed application configuration.
#[derive(Debug, Clone)]
pub struct ApplicationConfiguration {
    path: PathBuf,
    title: String,
    version: Option<String>,
    pip_packages: Option<Vec<String>>,
    input_formats: Option<Vec<String>>,
    output_formats: Option<Vec<String>>,
    resources: serde_json::Value,
}

impl ApplicationConfiguration {
    /// Reads and validates `path`.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        if !is_yaml {
            return Err(ConfigError::Invalid(format!(
                "Application configuration must be a YAML file (.yaml or .yml): {}",
                path.display()
            )));
        }

        debug!("Reading application configuration from {}", path.display());
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Invalid(format!("Error reading {}: {e}", path.display()))
        })?;
        Self::parse(path, &raw)
    }

    fn parse(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        let doc: Value = serde_yaml::from_str(raw).map_err(|e| {
            ConfigError::Invalid(format!("Error parsing {}: {e}", path.display()))
        })?;
        if doc.is_null() {
            return Err(ConfigError::Invalid(format!(
                "Application configuration is empty: {}",
                path.display()
            )));
        }

        let application = doc.get("application").filter(|v| v.is_mapping()).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "Application ('application') configuration cannot be found in {}",
                path.display()
            ))
        })?;
        let resources = doc.get("resources").filter(|v| !v.is_null()).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "Resources ('resources') configuration cannot be found in {}",
                path.display()
            ))
        })?;
        let title = application
            .get("title")
            .and_then(scalar)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing_key("application>title", path))?;

        let resources = serde_json::to_value(resources).map_err(|e| {
            ConfigError::Invalid(format!(
                "Resources ('resources') configuration in {} is not valid: {e}",
                path.display()
            ))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            title,
            version: application.get("version").and_then(scalar).filter(|v| !v.is_empty()),
            pip_packages: string_list(application.get("pip-packages")),
            input_formats: string_list(application.get("input-formats")),
            output_formats: string_list(application.get("output-formats")),
            resources,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn pip_packages(&self) -> Option<&[String]> {
        self.pip_packages.as_deref()
    }

    pub fn input_formats(&self) -> Option<&[String]> {
        self.input_formats.as_deref()
    }

    pub fn output_formats(&self) -> Option<&[String]> {
        self.output_formats.as_deref()
    }

    pub fn resources(&self) -> &serde_json::Value {
        &self.resources
    }

    /// The `--version` override, else `application.version`.
    pub fn resolve_version(&self, version: Option<&str>) -> Result<String, ConfigError> {
        version
            .map(str::to_string)
            .or_else(|| self.version.clone())
            .ok_or_else(|| missing_key("application>version", &self.path))
    }
}

fn missing_key(key: &str, path: &Path) -> ConfigError {
    ConfigError::Invalid(format!(
        "Application configuration key/value ('{key}') cannot be found or is empty in {}",
        path.display()
    ))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::Sequence(items) => Some(items.iter().filter_map(scalar).collect()),
        other => scalar(other).map(|s| vec![s]),
    }
}
