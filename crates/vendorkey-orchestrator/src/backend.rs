//! Trusted authorization backend interface

use async_trait::async_trait;

use crate::error::Result;
use vendorkey_core::{AuthorizationProof, PublicPoint, VendorId};

/// Operations the trusted backend exposes to the orchestrator
#[async_trait]
pub trait AuthorizationBackend: Send + Sync {
    /// Sign `data` on behalf of the vendor
    async fn sign_message(&self, data: &str) -> Result<AuthorizationProof>;

    /// Allocate a vendor id for a hashed rotating point
    async fn generate_vendor_id(&self, hashed_point: &PublicPoint) -> Result<VendorId>;

    /// Exchange a key-node voucher request for a voucher bundle
    async fn new_vouchers(&self, voucher_request: &str) -> Result<serde_json::Value>;

    /// Authorize a payer service request over `data`
    async fn authorize_payer_request(&self, data: &str) -> Result<AuthorizationProof>;

    /// Tell the server the promoted rotating key is now the one in force
    async fn confirm_rotating_key(&self) -> Result<()>;

    /// Drop the server's copy of the outstanding candidate key
    async fn clear_candidate_key(&self) -> Result<()>;

    /// The vendor's public signing key as a JSON Web Key
    async fn export_jwk(&self) -> Result<serde_json::Value>;
}
