//! Payer service interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use vendorkey_core::{AuthorizationProof, RotatingKey, VendorId};

/// Licensing tiers offered at checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LicensingTier {
    #[default]
    #[serde(rename = "FreeTier")]
    Free,
}

impl LicensingTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "FreeTier",
        }
    }
}

/// Key material a license is issued against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorData {
    #[serde(rename = "GVRK")]
    pub gvrk: RotatingKey,
    #[serde(rename = "VendorId")]
    pub vendor_id: VendorId,
}

/// Outcome of creating a checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutResponse {
    /// Send the administrator to the payer; `activation_package` is the raw
    /// JSON document describing the license being bought
    Redirect {
        redirect_url: String,
        activation_package: String,
    },
    /// The payer accepted the request without a redirect
    Accepted,
}

/// Backend proof authorizing one payer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayerAuthorization {
    /// Milliseconds since the epoch, as signed
    pub timestamp: String,
    pub proof: AuthorizationProof,
}

/// License details as reported by the payer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseDetails {
    /// Unix seconds
    pub expiry_date: i64,
    pub current_user_acc: u64,
}

impl LicenseDetails {
    /// Expiry formatted `dd/mm/yy` in UTC
    pub fn expiry_display(&self) -> String {
        DateTime::<Utc>::from_timestamp(self.expiry_date, 0)
            .map(|expiry| expiry.format("%d/%m/%y").to_string())
            .unwrap_or_else(|| self.expiry_date.to_string())
    }
}

/// Next-cycle key material sent after an activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscriptionUpdate {
    pub initial_session_id: String,
    pub vendor_data: VendorData,
}

/// Path of the payer's customer portal endpoint, relative to its base URL
pub const PORTAL_SESSION_PATH: &str = "/payer/license/CreateCustomerPortalSession";

/// Form the administrator's browser posts to open the payer's
/// subscription management portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSessionRequest {
    pub action_url: String,
    pub vendor_id: VendorId,
    pub auth: PayerAuthorization,
    pub redirect_url: String,
}

impl PortalSessionRequest {
    /// Form fields in submission order
    pub fn form_fields(&self) -> [(&'static str, &str); 4] {
        [
            ("vendorId", self.vendor_id.as_str()),
            ("timestamp", self.auth.timestamp.as_str()),
            ("timestampSig", self.auth.proof.as_str()),
            ("redirectUrl", self.redirect_url.as_str()),
        ]
    }
}

/// External checkout and subscription service
#[async_trait]
pub trait PayerService: Send + Sync {
    async fn create_checkout_session(
        &self,
        vendor: &VendorData,
        redirect_url: &str,
        tier: LicensingTier,
    ) -> Result<CheckoutResponse>;

    /// Whether a paid license exists for `vendor_id`
    async fn is_license_active(&self, vendor_id: &VendorId) -> Result<bool>;

    async fn subscription_status(
        &self,
        vendor_id: &VendorId,
        initial_session_id: &str,
        auth: &PayerAuthorization,
    ) -> Result<String>;

    async fn license_details(
        &self,
        vendor_id: &VendorId,
        auth: &PayerAuthorization,
    ) -> Result<LicenseDetails>;

    async fn update_subscription(
        &self,
        vendor_id: &VendorId,
        update: &SubscriptionUpdate,
        auth: &PayerAuthorization,
    ) -> Result<()>;
}
