//! Key-node network lookups

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use vendorkey_core::{PublicPoint, VvkId};

/// One key node taking part in a protocol round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyNode {
    pub id: String,
    pub url: String,
    /// Hex-encoded node public key
    pub public_key: String,
}

/// Key-node assignment of an existing verifying key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub vvk_id: VvkId,
    pub public_share: PublicPoint,
    pub nodes: Vec<KeyNode>,
}

/// Directory service reached through the vendor's home key node
#[async_trait]
pub trait KeyNetwork: Send + Sync {
    /// Assignment and public share of `vvk_id`; fails if the key is unknown
    async fn key_info(&self, home_url: &str, vvk_id: &VvkId) -> Result<KeyInfo>;

    /// Nodes used for a fresh key generation
    async fn default_key_nodes(&self, home_url: &str) -> Result<Vec<KeyNode>>;

    /// Base URL of the payer that issued `payer_public`
    async fn payer_url(&self, home_url: &str, payer_public: &str) -> Result<String>;
}
