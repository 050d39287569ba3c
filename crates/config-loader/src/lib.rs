//! Configuration document loading.
//!
//! A document is read from YAML or JSON, `secret://<scope>/<key>` strings
//! are replaced by their resolved values, the result is optionally checked
//! against a JSON Schema, and finally deserialized into the caller's type.

use jsonschema::{Draft, JSONSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

pub mod secrets;
pub use secrets::{EnvFileSecretProvider, SecretError, SecretProvider};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    ConfigFileNotFound { path: String },

    #[error("Schema not found: {path}")]
    SchemaNotFound { path: String },

    #[error("Schema compilation failed: {message}")]
    SchemaCompilationFailed { message: String },

    #[error("Config validation failed: {}", summarize(.errors))]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("{format} parsing failed: {message}")]
    ParseFailed {
        format: DocumentFormat,
        message: String,
    },

    #[error("Config does not match the expected structure: {message}")]
    DeserializeFailed { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("Secret resolution failed: {error}")]
    SecretResolutionFailed { error: SecretError },
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub json_pointer: String,
    pub message: String,
    pub schema_path: String,
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| {
            if e.json_pointer.is_empty() {
                e.message.clone()
            } else {
                format!("{}: {}", e.json_pointer, e.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Syntax of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Pick the format from a file extension. Anything that is not `.json`
    /// is read as YAML, which also accepts plain JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Yaml => write!(f, "YAML"),
            DocumentFormat::Json => write!(f, "JSON"),
        }
    }
}

/// Parse a document into a JSON value tree.
pub fn parse_document(content: &str, format: DocumentFormat) -> Result<Value, ConfigError> {
    match format {
        DocumentFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseFailed {
                format,
                message: e.to_string(),
            })
        }
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::ParseFailed {
                format,
                message: e.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigManager {
    schema_path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self { schema_path: None }
    }

    /// Validate every loaded document against the JSON Schema at `schema_path`.
    pub fn with_schema<P: Into<PathBuf>>(schema_path: P) -> Self {
        Self {
            schema_path: Some(schema_path.into()),
        }
    }

    pub fn schema_path(&self) -> Option<&Path> {
        self.schema_path.as_deref()
    }

    #[instrument(skip(self))]
    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<T, ConfigError> {
        self.load_with_secrets(path, &EnvFileSecretProvider::new())
    }

    #[instrument(skip(self, provider))]
    pub fn load_with_secrets<T: DeserializeOwned, P: SecretProvider + ?Sized>(
        &self,
        path: &Path,
        provider: &P,
    ) -> Result<T, ConfigError> {
        let mut value = Self::read_document(path)?;

        secrets::resolve_secrets_in_config(&mut value, provider)
            .map_err(|e| ConfigError::SecretResolutionFailed { error: e })?;

        self.validate_config_value(&value)?;

        serde_json::from_value(value).map_err(|e| ConfigError::DeserializeFailed {
            message: e.to_string(),
        })
    }

    /// Check a document against the schema without deserializing it.
    /// Secret references are left unresolved.
    #[instrument(skip(self))]
    pub fn validate_config_file(&self, path: &Path) -> Result<(), ConfigError> {
        let value = Self::read_document(path)?;
        self.validate_config_value(&value)
    }

    pub fn validate_config_value(&self, value: &Value) -> Result<(), ConfigError> {
        let Some(schema_path) = self.schema_path.as_deref() else {
            debug!("No schema configured, skipping validation");
            return Ok(());
        };

        let schema = Self::compile_schema(schema_path)?;
        if let Err(errors) = schema.validate(value) {
            let errors: Vec<ValidationError> = errors
                .map(|error| ValidationError {
                    json_pointer: error.instance_path.to_string(),
                    message: error.to_string(),
                    schema_path: error.schema_path.to_string(),
                })
                .collect();
            return Err(ConfigError::ValidationFailed { errors });
        }

        Ok(())
    }

    fn read_document(path: &Path) -> Result<Value, ConfigError> {
        debug!("Loading config from: {:?}", path);

        if !path.exists() {
            return Err(ConfigError::ConfigFileNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file: {}", e),
        })?;

        parse_document(&content, DocumentFormat::from_path(path))
    }

    fn compile_schema(schema_path: &Path) -> Result<JSONSchema, ConfigError> {
        if !schema_path.exists() {
            return Err(ConfigError::SchemaNotFound {
                path: schema_path.to_string_lossy().to_string(),
            });
        }

        let content = fs::read_to_string(schema_path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read schema file: {}", e),
        })?;

        let schema_value: Value =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseFailed {
                format: DocumentFormat::Json,
                message: e.to_string(),
            })?;

        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .map_err(|e| ConfigError::SchemaCompilationFailed {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Sample {
        interval: String,
        api_key: Option<String>,
        #[serde(default)]
        managers: HashMap<String, u32>,
    }

    struct StaticSecrets(HashMap<(String, String), String>);

    impl SecretProvider for StaticSecrets {
        fn resolve(&self, scope: &str, key: &str) -> Result<String, SecretError> {
            self.0
                .get(&(scope.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| SecretError::SecretNotFound {
                    scope: scope.to_string(),
                    key: key.to_string(),
                })
        }
    }

    fn no_secrets() -> StaticSecrets {
        StaticSecrets(HashMap::new())
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    const SCHEMA: &str = r#"{
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "interval": { "type": "string" },
            "api_key": { "type": "string" },
            "managers": { "type": "object", "additionalProperties": { "type": "integer" } }
        },
        "required": ["interval"]
    }"#;

    #[test]
    fn test_load_yaml_document() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "autoscaler.yaml", "interval: 2m\nmanagers:\n  web: 3\n");

        let sample: Sample = ConfigManager::new()
            .load_with_secrets(&path, &no_secrets())
            .unwrap();
        assert_eq!(sample.interval, "2m");
        assert_eq!(sample.managers.get("web"), Some(&3));
        assert_eq!(sample.api_key, None);
    }

    #[test]
    fn test_load_json_document() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "autoscaler.json", r#"{"interval": "30s"}"#);

        let sample: Sample = ConfigManager::new()
            .load_with_secrets(&path, &no_secrets())
            .unwrap();
        assert_eq!(sample.interval, "30s");
    }

    #[test]
    fn test_secret_references_are_resolved() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "autoscaler.yaml",
            "interval: 1m\napi_key: secret://datadog/api_key\n",
        );
        let provider = StaticSecrets(HashMap::from([(
            ("datadog".to_string(), "api_key".to_string()),
            "abc123".to_string(),
        )]));

        let sample: Sample = ConfigManager::new()
            .load_with_secrets(&path, &provider)
            .unwrap();
        assert_eq!(sample.api_key.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_unresolvable_secret_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "autoscaler.yaml",
            "interval: 1m\napi_key: secret://datadog/api_key\n",
        );

        let result: Result<Sample, _> = ConfigManager::new().load_with_secrets(&path, &no_secrets());
        assert!(matches!(
            result,
            Err(ConfigError::SecretResolutionFailed { .. })
        ));
    }

    #[test]
    fn test_schema_violation_is_reported() {
        let dir = TempDir::new().unwrap();
        let schema = write(&dir, "schema.json", SCHEMA);
        let path = write(&dir, "autoscaler.yaml", "managers:\n  web: three\n");

        let result: Result<Sample, _> =
            ConfigManager::with_schema(schema).load_with_secrets(&path, &no_secrets());
        match result {
            Err(ConfigError::ValidationFailed { errors }) => {
                assert!(errors.len() >= 2, "missing interval and bad type: {errors:?}");
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_config_file_against_schema() {
        let dir = TempDir::new().unwrap();
        let schema = write(&dir, "schema.json", SCHEMA);
        let good = write(&dir, "good.yaml", "interval: 5m\n");
        let bad = write(&dir, "bad.yaml", "interval: 5\n");

        let manager = ConfigManager::with_schema(schema);
        assert!(manager.validate_config_file(&good).is_ok());
        assert!(manager.validate_config_file(&bad).is_err());
    }

    #[test]
    fn test_missing_files_are_distinguished() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.yaml");
        let result: Result<Sample, _> = ConfigManager::new().load_with_secrets(&path, &no_secrets());
        assert!(matches!(result, Err(ConfigError::ConfigFileNotFound { .. })));

        let doc = write(&dir, "doc.yaml", "interval: 1m\n");
        let manager = ConfigManager::with_schema(dir.path().join("absent-schema.json"));
        assert!(matches!(
            manager.validate_config_file(&doc),
            Err(ConfigError::SchemaNotFound { .. })
        ));
    }

    #[test]
    fn test_malformed_yaml_is_a_parse_error() {
        let result = parse_document("interval: [unterminated", DocumentFormat::Yaml);
        assert!(matches!(
            result,
            Err(ConfigError::ParseFailed {
                format: DocumentFormat::Yaml,
                ..
            })
        ));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a.JSON")),
            DocumentFormat::Json
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("a.yml")),
            DocumentFormat::Yaml
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("config")),
            DocumentFormat::Yaml
        );
    }
}
