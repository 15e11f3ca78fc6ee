//! Authorization client
//!
//! Wraps the trusted backend: authorization proofs for payloads and sign
//! requests, vendor id allocation, payer request authorization, and the
//! voucher source handed to protocol flows.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::backend::AuthorizationBackend;
use crate::error::{OrchestratorError, Result};
use crate::payer::PayerAuthorization;
use crate::protocol::VoucherSource;
use vendorkey_core::{AuthorizationProof, PublicPoint, SignRequest, VendorId};

#[derive(Clone)]
pub struct AuthorizationClient {
    backend: Arc<dyn AuthorizationBackend>,
}

impl AuthorizationClient {
    pub fn new(backend: Arc<dyn AuthorizationBackend>) -> Self {
        Self { backend }
    }

    /// Proof over an arbitrary payload
    pub async fn authorize(&self, payload: &str) -> Result<AuthorizationProof> {
        debug!(len = payload.len(), "Requesting authorization proof");
        self.backend
            .sign_message(payload)
            .await
            .map_err(|e| e.classify(OrchestratorError::Authorization))
    }

    /// Attach a proof over the request's authorization data
    pub async fn authorize_request(&self, request: &mut SignRequest) -> Result<()> {
        let proof = self.authorize(&request.data_to_authorize()).await?;
        request.add_authorization(proof);
        Ok(())
    }

    pub async fn request_vendor_id(&self, hashed_point: &PublicPoint) -> Result<VendorId> {
        self.backend
            .generate_vendor_id(hashed_point)
            .await
            .map_err(|e| e.classify(OrchestratorError::KeyGeneration))
    }

    /// Proof over the current millisecond timestamp, for payer requests
    pub async fn authorize_payer(&self) -> Result<PayerAuthorization> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let proof = self
            .backend
            .authorize_payer_request(&timestamp)
            .await
            .map_err(|e| e.classify(OrchestratorError::Authorization))?;
        Ok(PayerAuthorization { timestamp, proof })
    }

    /// Voucher source forwarding flow requests to the backend
    pub fn voucher_source(&self) -> Arc<dyn VoucherSource> {
        Arc::new(BackendVoucherSource {
            backend: self.backend.clone(),
        })
    }
}

/// Forwards a flow's voucher request to the backend
pub struct BackendVoucherSource {
    backend: Arc<dyn AuthorizationBackend>,
}

#[async_trait]
impl VoucherSource for BackendVoucherSource {
    async fn retrieve(&self, voucher_request: &str) -> Result<String> {
        debug!("Requesting vouchers");
        let vouchers = self
            .backend
            .new_vouchers(voucher_request)
            .await
            .map_err(|e| e.classify(OrchestratorError::Voucher))?;
        Ok(serde_json::to_string(&vouchers)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use vendorkey_core::request::ACTION_UPDATE_SETTINGS;

    #[tokio::test]
    async fn test_authorize_request_attaches_proof() {
        let backend = Arc::new(MockBackend::new());
        let client = AuthorizationClient::new(backend.clone());

        let mut request = SignRequest::new(ACTION_UPDATE_SETTINGS, "1", "SinglePublicKey:1", b"d".to_vec());
        client.authorize_request(&mut request).await.unwrap();

        assert!(request.is_authorized());
        assert_eq!(backend.signed_messages(), vec![request.data_to_authorize()]);
    }

    #[tokio::test]
    async fn test_rejected_proof_is_authorization_error() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next_sign_message(OrchestratorError::Store("policy".into()));
        let client = AuthorizationClient::new(backend);

        assert!(matches!(
            client.authorize("payload").await,
            Err(OrchestratorError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_voucher_source_returns_serialized_response() {
        let backend = Arc::new(MockBackend::new());
        let client = AuthorizationClient::new(backend.clone());

        let raw = client.voucher_source().retrieve(r#"{"round":1}"#).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["request"], r#"{"round":1}"#);
        assert_eq!(backend.voucher_requests(), 1);
    }

    #[tokio::test]
    async fn test_voucher_failure_is_voucher_error() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next_vouchers(OrchestratorError::Config("quota".into()));
        let client = AuthorizationClient::new(backend);

        assert!(matches!(
            client.voucher_source().retrieve("{}").await,
            Err(OrchestratorError::Voucher(_))
        ));
    }

    #[tokio::test]
    async fn test_payer_authorization_signs_timestamp() {
        let backend = Arc::new(MockBackend::new());
        let client = AuthorizationClient::new(backend);

        let auth = client.authorize_payer().await.unwrap();
        assert!(auth.timestamp.parse::<i64>().is_ok());
        assert_eq!(auth.proof.as_str(), format!("payer:{}", auth.timestamp));
    }
}
