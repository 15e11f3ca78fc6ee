//! Canonical vendor settings draft
//!
//! The draft is the exact byte sequence the key nodes sign when vendor
//! settings change:
//!
//! ```text
//! ["<origin>","<login endpoint>","<link account endpoint>"]|<settings json>|<base64 rotating point>
//! ```
//!
//! Field order and delimiter are part of the signed format. Relying parties
//! rebuild the same bytes to verify, so any change here breaks every
//! previously issued settings signature.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::crypto::PublicPoint;

/// Separator between draft sections
pub const DRAFT_DELIMITER: char = '|';

/// Vendor-controlled settings covered by the settings signature
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorSettings {
    pub registration_allowed: bool,
    pub image_url: Option<String>,
    pub logo_url: Option<String>,
}

impl VendorSettings {
    pub fn new(registration_allowed: bool, image_url: Option<String>, logo_url: Option<String>) -> Self {
        Self {
            registration_allowed,
            image_url,
            logo_url,
        }
    }

    /// Serialized form embedded in the draft
    pub fn canonical(&self) -> String {
        json!({
            "registrationAllowed": self.registration_allowed,
            "imageUrl": self.image_url.as_deref().unwrap_or(""),
            "logoUrl": self.logo_url.as_deref().unwrap_or(""),
        })
        .to_string()
    }
}

/// URLs signed alongside the settings
///
/// The origin is the page the administrator operates from and must be hosted
/// in the vendor's domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUrls {
    pub origin: String,
    pub login_endpoint: String,
    pub link_account_endpoint: String,
}

impl SettingsUrls {
    pub fn new(
        origin: impl Into<String>,
        login_endpoint: impl Into<String>,
        link_account_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            login_endpoint: login_endpoint.into(),
            link_account_endpoint: link_account_endpoint.into(),
        }
    }

    /// Broker and required-action endpoints of a realm
    pub fn for_realm(base_url: &str, realm: &str, origin: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self::new(
            origin.trim_end_matches('/'),
            format!("{}/realms/{}/broker/tide/endpoint", base, realm),
            format!("{}/realms/{}/login-actions/required-action", base, realm),
        )
    }

    /// URLs in signing order
    pub fn as_list(&self) -> [&str; 3] {
        [
            self.origin.as_str(),
            self.login_endpoint.as_str(),
            self.link_account_endpoint.as_str(),
        ]
    }
}

/// The exact byte sequence submitted for a settings signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDraft(String);

impl SettingsDraft {
    pub fn build(settings: &VendorSettings, urls: &SettingsUrls, rotating_point: &PublicPoint) -> Self {
        let urls = json!(urls.as_list()).to_string();
        Self(format!(
            "{urls}{d}{settings}{d}{point}",
            d = DRAFT_DELIMITER,
            settings = settings.canonical(),
            point = rotating_point.to_base64(),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> SettingsUrls {
        SettingsUrls::for_realm("https://id.example.com/", "acme", "https://admin.example.com")
    }

    #[test]
    fn test_for_realm_endpoints() {
        let urls = urls();
        assert_eq!(
            urls.login_endpoint,
            "https://id.example.com/realms/acme/broker/tide/endpoint"
        );
        assert_eq!(
            urls.link_account_endpoint,
            "https://id.example.com/realms/acme/login-actions/required-action"
        );
        assert_eq!(urls.as_list()[0], "https://admin.example.com");
    }

    #[test]
    fn test_draft_layout() {
        let point = PublicPoint::new([2u8; 33]);
        let settings = VendorSettings::new(true, Some("img".into()), None);
        let draft = SettingsDraft::build(&settings, &urls(), &point);

        let parts: Vec<&str> = draft.as_str().split(DRAFT_DELIMITER).collect();
        assert_eq!(parts.len(), 3);

        let list: Vec<String> = serde_json::from_str(parts[0]).unwrap();
        assert_eq!(list.len(), 3);
        assert!(list[1].ends_with("/broker/tide/endpoint"));

        let settings_json: serde_json::Value = serde_json::from_str(parts[1]).unwrap();
        assert_eq!(settings_json["registrationAllowed"], true);
        assert_eq!(settings_json["imageUrl"], "img");
        assert_eq!(settings_json["logoUrl"], "");

        assert_eq!(parts[2], point.to_base64());
    }

    #[test]
    fn test_url_order_changes_draft() {
        let point = PublicPoint::new([3u8; 33]);
        let settings = VendorSettings::default();
        let a = urls();
        let mut b = a.clone();
        std::mem::swap(&mut b.login_endpoint, &mut b.link_account_endpoint);
        assert_ne!(
            SettingsDraft::build(&settings, &a, &point),
            SettingsDraft::build(&settings, &b, &point)
        );
    }
}
