//! Resolution of `secret://<scope>/<key>` references.
//!
//! Backend credentials (metrics API keys, cloud access keys) are kept out of
//! the config document and written as secret references instead.

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

static SECRET_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^secret://([^/]+)/(.+)$").expect("secret URI pattern is valid"));

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret not found: {scope}/{key}")]
    SecretNotFound { scope: String, key: String },

    #[error("Failed to read secrets file: {path} - {message}")]
    SecretsFileError { path: String, message: String },

    #[error("Failed to parse secrets file: {message}")]
    SecretsParseError { message: String },
}

pub trait SecretProvider: Send + Sync {
    fn resolve(&self, scope: &str, key: &str) -> Result<String, SecretError>;
}

type ScopedSecrets = HashMap<String, HashMap<String, String>>;

/// Looks secrets up in `SECRET_<SCOPE>_<KEY>` environment variables first,
/// then in a JSON file shaped `{"<scope>": {"<key>": "<value>"}}`.
pub struct EnvFileSecretProvider {
    secrets_file_path: Option<PathBuf>,
    file_secrets: OnceCell<ScopedSecrets>,
}

impl EnvFileSecretProvider {
    /// Uses `CONFIG_SECRETS_FILE`, or `.autoscaler/secrets.json` when it exists.
    pub fn new() -> Self {
        let secrets_file_path = env::var("CONFIG_SECRETS_FILE")
            .map(PathBuf::from)
            .ok()
            .or_else(|| {
                let default_path = PathBuf::from(".autoscaler/secrets.json");
                default_path.exists().then_some(default_path)
            });

        Self {
            secrets_file_path,
            file_secrets: OnceCell::new(),
        }
    }

    pub fn with_secrets_file<P: Into<PathBuf>>(secrets_file_path: P) -> Self {
        Self {
            secrets_file_path: Some(secrets_file_path.into()),
            file_secrets: OnceCell::new(),
        }
    }

    fn env_var_name(scope: &str, key: &str) -> String {
        let normalize = |s: &str| {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        };
        format!("SECRET_{}_{}", normalize(scope), normalize(key))
    }

    fn file_secrets(&self) -> Result<&ScopedSecrets, SecretError> {
        self.file_secrets.get_or_try_init(|| {
            let Some(path) = self.secrets_file_path.as_ref() else {
                return Ok(HashMap::new());
            };
            debug!("Loading secrets from file: {:?}", path);

            let content = fs::read_to_string(path).map_err(|e| SecretError::SecretsFileError {
                path: path.to_string_lossy().to_string(),
                message: e.to_string(),
            })?;

            serde_json::from_str(&content).map_err(|e| SecretError::SecretsParseError {
                message: e.to_string(),
            })
        })
    }
}

impl Default for EnvFileSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretProvider for EnvFileSecretProvider {
    fn resolve(&self, scope: &str, key: &str) -> Result<String, SecretError> {
        let env_var_name = Self::env_var_name(scope, key);
        if let Ok(value) = env::var(&env_var_name) {
            debug!(
                "Resolved secret {}/{} from environment variable {}",
                scope, key, env_var_name
            );
            return Ok(value);
        }

        self.file_secrets()?
            .get(scope)
            .and_then(|scoped| scoped.get(key))
            .cloned()
            .ok_or_else(|| SecretError::SecretNotFound {
                scope: scope.to_string(),
                key: key.to_string(),
            })
    }
}

/// Replace every string value of the form `secret://scope/key` in place.
pub fn resolve_secrets_in_config<P: SecretProvider + ?Sized>(
    config: &mut Value,
    provider: &P,
) -> Result<(), SecretError> {
    match config {
        Value::String(s) => {
            if let Some(captures) = SECRET_URI.captures(s) {
                let resolved = provider.resolve(&captures[1], &captures[2])?;
                *s = resolved;
            }
        }
        Value::Object(obj) => {
            for value in obj.values_mut() {
                resolve_secrets_in_config(value, provider)?;
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                resolve_secrets_in_config(item, provider)?;
            }
        }
        _ => {}
    }
    Ok(())
}
