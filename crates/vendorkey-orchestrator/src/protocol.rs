//! Threshold protocol capability
//!
//! Distributed key generation and threshold signing run elsewhere. The
//! coordinators drive them through these traits and hand each flow a
//! [`VoucherSource`] that it calls back into whenever a round needs a
//! voucher.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::network::KeyNode;
use vendorkey_core::{AuthorizationProof, PublicPoint, SessionKeypair, SignRequest, Signature, VvkId};

/// Fetches the voucher for one protocol round
///
/// Receives the flow's own voucher request and returns the backend response
/// still serialized, for the flow to parse.
#[async_trait]
pub trait VoucherSource: Send + Sync {
    async fn retrieve(&self, voucher_request: &str) -> Result<String>;
}

/// Parameters of a distributed key generation
#[derive(Debug, Clone)]
pub struct KeyGenParams {
    pub vvk_id: VvkId,
    pub rotating_point: PublicPoint,
    pub nodes: Vec<KeyNode>,
    pub session: SessionKeypair,
    pub action: String,
}

/// Parameters binding a signing round to an existing verifying key
#[derive(Debug, Clone)]
pub struct SigningParams {
    pub vvk_id: VvkId,
    pub public_share: PublicPoint,
    pub nodes: Vec<KeyNode>,
    pub session: SessionKeypair,
}

/// A running key generation; steps must be called in order
#[async_trait]
pub trait KeyGenerationFlow: Send {
    /// Generate the shares and return the verifying public share
    async fn generate_shard(
        &mut self,
        auth_payload: &str,
        proof: &AuthorizationProof,
        capabilities: &[String],
    ) -> Result<PublicPoint>;

    /// Bind the generated shares to the rotating key
    async fn set_shard(&mut self, rotating_point: &PublicPoint) -> Result<()>;

    /// Make the generated key permanent on every node
    async fn commit(&mut self) -> Result<()>;
}

/// Entry point to the key-node protocols
#[async_trait]
pub trait ThresholdProtocol: Send + Sync {
    fn key_generation(
        &self,
        params: KeyGenParams,
        vouchers: Arc<dyn VoucherSource>,
    ) -> Box<dyn KeyGenerationFlow>;

    /// Sign an authorized request; fails if no proof is attached
    async fn sign(
        &self,
        params: &SigningParams,
        request: &SignRequest,
        vouchers: Arc<dyn VoucherSource>,
    ) -> Result<Vec<Signature>>;
}
