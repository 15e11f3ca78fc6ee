//! Settings signing coordinator

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditEventKind, AuditTrail};
use crate::authorization::AuthorizationClient;
use crate::error::{OrchestratorError, Result};
use crate::network::KeyNetwork;
use crate::protocol::{SigningParams, ThresholdProtocol};
use crate::store::ConfigStore;
use crate::Collaborators;
use vendorkey_core::request::{ACTION_UPDATE_SETTINGS, ACTION_VERSION, SUBJECT_SINGLE_PUBLIC_KEY};
use vendorkey_core::{
    RotatingKey, SettingsDraft, SettingsUrls, SignRequest, Signature, SigningPrimitives,
    VendorSettings,
};

/// Ordered signatures over a settings draft
///
/// The sequence holds one signature per signed URL followed by the settings
/// bundle and rotating key signatures. Positions are fixed: index 1 is the
/// login endpoint, index 2 the link-account endpoint, the second-to-last
/// the settings bundle and the last the rotating key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSignatures(Vec<Signature>);

impl SettingsSignatures {
    /// Shortest sequence that satisfies the positional layout
    pub const MIN_LEN: usize = 4;

    pub fn new(signatures: Vec<Signature>) -> Result<Self> {
        if signatures.len() < Self::MIN_LEN {
            return Err(OrchestratorError::Signing(format!(
                "expected at least {} settings signatures, got {}",
                Self::MIN_LEN,
                signatures.len()
            )));
        }
        Ok(Self(signatures))
    }

    pub fn login_endpoint(&self) -> &Signature {
        &self.0[1]
    }

    pub fn link_account_endpoint(&self) -> &Signature {
        &self.0[2]
    }

    pub fn settings_bundle(&self) -> &Signature {
        &self.0[self.0.len() - 2]
    }

    pub fn rotating_key(&self) -> &Signature {
        &self.0[self.0.len() - 1]
    }

    pub fn as_slice(&self) -> &[Signature] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct SettingsSigner {
    primitives: Arc<dyn SigningPrimitives>,
    auth: AuthorizationClient,
    network: Arc<dyn KeyNetwork>,
    protocol: Arc<dyn ThresholdProtocol>,
    store: Arc<dyn ConfigStore>,
    audit: AuditTrail,
}

impl SettingsSigner {
    pub fn new(collaborators: &Collaborators) -> Self {
        Self {
            primitives: collaborators.primitives.clone(),
            auth: AuthorizationClient::new(collaborators.backend.clone()),
            network: collaborators.network.clone(),
            protocol: collaborators.protocol.clone(),
            store: collaborators.store.clone(),
            audit: AuditTrail::new(collaborators.audit.clone()),
        }
    }

    /// Sign the settings bundle with the vendor's verifying key
    ///
    /// Emits one authorize audit event with the outcome. Never writes to the
    /// vendor record.
    #[instrument(skip_all, fields(rotating_key = %rotating_key.short()))]
    pub async fn resign_settings(
        &self,
        settings: &VendorSettings,
        urls: &SettingsUrls,
        rotating_key: &RotatingKey,
    ) -> Result<SettingsSignatures> {
        let config = self.store.load().await?;
        let vvk_id = config
            .vvk_id
            .clone()
            .ok_or_else(|| OrchestratorError::NotProvisioned("no verifying key".to_string()))?;
        let home_url = config
            .home_ork_url()
            .ok_or_else(|| OrchestratorError::NotProvisioned("systemHomeOrk".to_string()))?;

        let rotating_point = self.primitives.decompress_point(&rotating_key.to_bytes()?)?;
        let draft = SettingsDraft::build(settings, urls, &rotating_point);
        debug!(len = draft.as_bytes().len(), "Built settings draft");

        let mut request = SignRequest::new(
            ACTION_UPDATE_SETTINGS,
            ACTION_VERSION,
            SUBJECT_SINGLE_PUBLIC_KEY,
            draft.into_bytes(),
        );

        let result = async {
            self.auth.authorize_request(&mut request).await?;

            let info = self.network.key_info(home_url, &vvk_id).await?;
            let params = SigningParams {
                vvk_id: vvk_id.clone(),
                public_share: info.public_share,
                nodes: info.nodes,
                session: self.primitives.generate_session_keypair()?,
            };

            let signatures = self
                .protocol
                .sign(&params, &request, self.auth.voucher_source())
                .await
                .map_err(|e| e.classify(OrchestratorError::Signing))?;
            SettingsSignatures::new(signatures)
        }
        .await;

        match &result {
            Ok(sigs) => info!(count = sigs.len(), "Settings re-signed under {}", vvk_id),
            Err(e) => warn!("Settings re-sign failed: {}", e),
        }
        self.audit.outcome(AuditEventKind::Authorize, &result).await;
        result
    }
}
