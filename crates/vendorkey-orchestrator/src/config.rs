//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::retry::RetryPolicy;
use vendorkey_core::{SettingsUrls, AUTHORIZATION_TTL_SECS};

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Base URL of the identity server hosting the admin resources
    pub admin_base_url: String,

    /// Realm the vendor key provider lives in
    pub realm: String,

    /// Admin bearer token sent with every backend call
    pub bearer_token: Option<String>,

    /// Page the administrator operates from, signed into the settings draft
    pub origin_url: String,

    /// Path of the file-backed vendor config record
    pub record_path: PathBuf,

    /// Activation polling when resuming from the payer redirect
    pub redirect_retry: RetryPolicy,

    /// Activation polling for interactive checks
    pub interactive_retry: RetryPolicy,

    /// Lifetime of authorization requests (seconds)
    pub authorization_ttl_secs: u64,

    /// Timeout for backend HTTP calls (seconds)
    pub request_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            admin_base_url: "http://localhost:8080".to_string(),
            realm: "master".to_string(),
            bearer_token: None,
            origin_url: "http://localhost:8080".to_string(),
            record_path: Self::default_record_path(),
            redirect_retry: RetryPolicy::REDIRECT,
            interactive_retry: RetryPolicy::INTERACTIVE,
            authorization_ttl_secs: AUTHORIZATION_TTL_SECS,
            request_timeout_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    fn default_record_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("vendorkey")
            .join("record.json")
    }

    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("vendorkey")
            .join("config.json")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the coordinators cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.admin_base_url.trim().is_empty() {
            return Err(crate::OrchestratorError::Config(
                "admin_base_url is empty".to_string(),
            ));
        }
        if self.realm.trim().is_empty() {
            return Err(crate::OrchestratorError::Config("realm is empty".to_string()));
        }
        if self.redirect_retry.attempts == 0 || self.interactive_retry.attempts == 0 {
            return Err(crate::OrchestratorError::Config(
                "retry policies need at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    /// Endpoints signed into the settings draft
    pub fn settings_urls(&self) -> SettingsUrls {
        SettingsUrls::for_realm(&self.admin_base_url, &self.realm, &self.origin_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.redirect_retry, RetryPolicy::REDIRECT);
        assert_eq!(config.interactive_retry.attempts, 3);
        assert_eq!(config.authorization_ttl_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.json");

        let config = OrchestratorConfig {
            realm: "acme".to_string(),
            bearer_token: Some("token".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();

        assert_eq!(OrchestratorConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"realm": "acme"}"#).unwrap();

        let config = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(config.realm, "acme");
        assert_eq!(config.admin_base_url, "http://localhost:8080");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = OrchestratorConfig {
            interactive_retry: RetryPolicy::new(0, 1000),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_urls() {
        let config = OrchestratorConfig {
            admin_base_url: "https://id.example.com".to_string(),
            realm: "acme".to_string(),
            origin_url: "https://id.example.com/admin".to_string(),
            ..Default::default()
        };
        let urls = config.settings_urls();
        assert_eq!(urls.origin, "https://id.example.com/admin");
        assert!(urls.login_endpoint.ends_with("/realms/acme/broker/tide/endpoint"));
    }
}
