//! Per-provider secret lookup.
//!
//! Secrets are resolved by provider key, environment first then the
//! credentials file, so a missing file never blocks env-configured
//! deployments:
//! 1. `DAYLINE_<KEY>_API_KEY` environment variable
//! 2. `credentials.yaml` in the data directory (`key: secret` mapping)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ProviderError;

/// Opaque secret lookup by provider key.
#[derive(Debug, Clone)]
pub struct SecretStore {
    credentials_path: PathBuf,
}

impl SecretStore {
    /// Create a store rooted at the data directory.
    pub fn new(home: &Path) -> Self {
        Self {
            credentials_path: home.join("credentials.yaml"),
        }
    }

    /// Look up the secret for a provider key.
    ///
    /// A missing secret is a configuration error: the caller must not
    /// consume a retry attempt for it.
    pub fn lookup(&self, key: &str) -> Result<String, ProviderError> {
        let env_name = format!(
            "DAYLINE_{}_API_KEY",
            key.to_uppercase().replace(['-', '.'], "_")
        );
        if let Ok(secret) = std::env::var(&env_name) {
            if !secret.trim().is_empty() {
                return Ok(secret);
            }
        }

        let content = std::fs::read_to_string(&self.credentials_path).map_err(|_| {
            ProviderError::Configuration(format!(
                "no secret for provider '{}': set {} or add it to {}",
                key,
                env_name,
                self.credentials_path.display()
            ))
        })?;

        let map: HashMap<String, String> = serde_yaml::from_str(&content).map_err(|e| {
            ProviderError::Configuration(format!(
                "invalid credentials file {}: {}",
                self.credentials_path.display(),
                e
            ))
        })?;

        map.get(key).cloned().ok_or_else(|| {
            ProviderError::Configuration(format!(
                "no secret for provider '{}' in {}",
                key,
                self.credentials_path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lookup_from_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("credentials.yaml"),
            "cloud: sk-test-123\nother: abc\n",
        )
        .unwrap();

        let store = SecretStore::new(temp.path());
        assert_eq!(store.lookup("cloud").unwrap(), "sk-test-123");
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("credentials.yaml"), "cloud: sk\n").unwrap();

        let store = SecretStore::new(temp.path());
        let err = store.lookup("nonexistent-xyz").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let store = SecretStore::new(temp.path());
        let err = store.lookup("missing-file-key").unwrap_err();
        assert!(err.is_configuration());
    }
}
