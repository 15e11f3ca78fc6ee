//! Identity provider configuration receiving settings signatures

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::settings::SettingsSignatures;

/// Alias of the vendor's identity provider
pub const PROVIDER_ALIAS: &str = "tide";

/// Provider config keys written after a re-sign
pub mod sig_keys {
    pub const LOGIN_URL_SIG: &str = "loginURLSig";
    pub const LINK_TIDE_URL_SIG: &str = "linkTideURLSig";
    pub const SETTINGS_SIG: &str = "settingsSig";
    pub const GVRK_SIG: &str = "gVRKSig";
}

const IMAGE_URL: &str = "ImageURL";
const LOGO_URL: &str = "LogoURL";

/// Identity provider representation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProvider {
    pub alias: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl IdentityProvider {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            config: BTreeMap::new(),
        }
    }

    pub fn image_url(&self) -> Option<String> {
        self.config.get(IMAGE_URL).filter(|v| !v.is_empty()).cloned()
    }

    pub fn logo_url(&self) -> Option<String> {
        self.config.get(LOGO_URL).filter(|v| !v.is_empty()).cloned()
    }

    /// Write a complete signature set into the config
    pub fn apply_signatures(&mut self, sigs: &SettingsSignatures) {
        let entries = [
            (sig_keys::LOGIN_URL_SIG, sigs.login_endpoint()),
            (sig_keys::LINK_TIDE_URL_SIG, sigs.link_account_endpoint()),
            (sig_keys::SETTINGS_SIG, sigs.settings_bundle()),
            (sig_keys::GVRK_SIG, sigs.rotating_key()),
        ];
        for (key, sig) in entries {
            self.config.insert(key.to_string(), sig.to_base64());
        }
    }
}

/// Identity provider persistence
#[async_trait]
pub trait IdentityProviderStore: Send + Sync {
    async fn find(&self, alias: &str) -> Result<Option<IdentityProvider>>;
    async fn update(&self, provider: &IdentityProvider) -> Result<()>;
}

/// Providers held in memory
#[derive(Debug, Default)]
pub struct MemoryIdentityProviderStore {
    providers: RwLock<HashMap<String, IdentityProvider>>,
}

impl MemoryIdentityProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(provider: IdentityProvider) -> Self {
        let mut providers = HashMap::new();
        providers.insert(provider.alias.clone(), provider);
        Self {
            providers: RwLock::new(providers),
        }
    }
}

#[async_trait]
impl IdentityProviderStore for MemoryIdentityProviderStore {
    async fn find(&self, alias: &str) -> Result<Option<IdentityProvider>> {
        Ok(self.providers.read().await.get(alias).cloned())
    }

    async fn update(&self, provider: &IdentityProvider) -> Result<()> {
        self.providers
            .write()
            .await
            .insert(provider.alias.clone(), provider.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vendorkey_core::Signature;

    #[test]
    fn test_apply_signatures_uses_positional_contract() {
        let sigs: Vec<Signature> = (0u8..5).map(|i| Signature::new(vec![i])).collect();
        let sigs = SettingsSignatures::new(sigs).unwrap();

        let mut provider = IdentityProvider::new(PROVIDER_ALIAS);
        provider.apply_signatures(&sigs);

        let get = |key: &str| provider.config.get(key).cloned().unwrap();
        assert_eq!(get(sig_keys::LOGIN_URL_SIG), Signature::new(vec![1]).to_base64());
        assert_eq!(get(sig_keys::LINK_TIDE_URL_SIG), Signature::new(vec![2]).to_base64());
        assert_eq!(get(sig_keys::SETTINGS_SIG), Signature::new(vec![3]).to_base64());
        assert_eq!(get(sig_keys::GVRK_SIG), Signature::new(vec![4]).to_base64());
    }

    #[test]
    fn test_empty_image_url_is_absent() {
        let mut provider = IdentityProvider::new(PROVIDER_ALIAS);
        provider.config.insert(IMAGE_URL.to_string(), String::new());
        provider.config.insert(LOGO_URL.to_string(), "logo.png".to_string());
        assert_eq!(provider.image_url(), None);
        assert_eq!(provider.logo_url(), Some("logo.png".to_string()));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryIdentityProviderStore::new();
        assert!(store.find(PROVIDER_ALIAS).await.unwrap().is_none());

        store.update(&IdentityProvider::new(PROVIDER_ALIAS)).await.unwrap();
        assert!(store.find(PROVIDER_ALIAS).await.unwrap().is_some());
    }
}
