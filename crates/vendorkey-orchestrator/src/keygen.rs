//! Vendor key generation coordinator
//!
//! Generates candidate rotating keys and creates the vendor's verifying key
//! through distributed key generation across the key nodes. A verifying key
//! is created once; later cycles bind new rotating keys to the same one.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::{AuditEventKind, AuditTrail};
use crate::authorization::AuthorizationClient;
use crate::context::{ActivationContext, GuardScope};
use crate::error::{OrchestratorError, Result};
use crate::network::KeyNetwork;
use crate::protocol::{KeyGenParams, SigningParams, ThresholdProtocol, VoucherSource};
use crate::store::ConfigStore;
use crate::Collaborators;
use vendorkey_core::config::keys;
use vendorkey_core::request::{capability_tags, ACTION_NEW, INIT_CAPABILITIES};
use vendorkey_core::{
    validate_activation_package, ActivationPackage, AuthRequest, KeyState, PublicPoint,
    RecordValue, RotatingKey, SignRequest, Signature, SigningPrimitives, ValidatedActivation,
    VendorId, VendorKey, VendorKeyConfig, VvkId,
};

/// Result of a verifying-key commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new verifying key was generated and committed
    Created { vvk_id: VvkId, client_id: String },
    /// The vendor already has a verifying key; nothing was generated
    Existing {
        vvk_id: VvkId,
        public_share: PublicPoint,
    },
    /// Another commit for the same rotating key is still running
    AlreadyInFlight,
}

pub struct VendorKeyCoordinator {
    primitives: Arc<dyn SigningPrimitives>,
    auth: AuthorizationClient,
    network: Arc<dyn KeyNetwork>,
    protocol: Arc<dyn ThresholdProtocol>,
    store: Arc<dyn ConfigStore>,
    audit: AuditTrail,
    authorization_ttl_secs: u64,
}

impl VendorKeyCoordinator {
    pub fn new(collaborators: &Collaborators, authorization_ttl_secs: u64) -> Self {
        Self {
            primitives: collaborators.primitives.clone(),
            auth: AuthorizationClient::new(collaborators.backend.clone()),
            network: collaborators.network.clone(),
            protocol: collaborators.protocol.clone(),
            store: collaborators.store.clone(),
            audit: AuditTrail::new(collaborators.audit.clone()),
            authorization_ttl_secs,
        }
    }

    /// Populate a fresh vendor record
    ///
    /// Fields already set are kept; every other default is written the way
    /// the storage collaborator writes it, with an empty value meaning
    /// absent. The hashed generator goes in as `obfGVVK`. Returns false when
    /// the record already holds key material.
    #[instrument(skip_all)]
    pub async fn create_vendor_record(&self, defaults: &[(&str, &str)]) -> Result<bool> {
        let config = self.store.load().await?;
        if config.key_state != KeyState::None
            || config.vvk_id.is_some()
            || config.extra.contains_key(keys::OBF_GVVK)
        {
            debug!("Vendor record already provisioned");
            return Ok(false);
        }

        let mut record = config.to_record();
        for (name, value) in defaults {
            let unset = record.get(*name).and_then(RecordValue::single).is_none();
            if unset {
                let value = if value.is_empty() {
                    RecordValue::empty()
                } else {
                    RecordValue::wrap(*value)
                };
                record.insert(name.to_string(), value);
            }
        }

        let obfuscated = self.primitives.obfuscated_generator()?;
        record.insert(keys::OBF_GVVK.to_string(), RecordValue::wrap(obfuscated.to_hex()));

        let created = VendorKeyConfig::from_record(&record)?;
        self.store.save(&created).await?;
        info!("Created vendor record");
        Ok(true)
    }

    /// Generate a rotating key, allocate its vendor id and persist both as
    /// the outstanding candidate
    #[instrument(skip_all)]
    pub async fn generate_candidate_key(&self) -> Result<VendorKey> {
        let keypair = self.primitives.generate_session_keypair()?;
        let hashed = self.primitives.hash_to_point(keypair.public.as_bytes())?;

        let vendor_id = self
            .auth
            .request_vendor_id(&hashed)
            .await
            .map_err(|e| e.classify(OrchestratorError::KeyGeneration))?;

        let candidate = VendorKey::new(RotatingKey::from_point(&keypair.public), vendor_id);

        let mut config = self.store.load().await?;
        config.key_state = config.key_state.with_candidate(candidate.clone());
        self.store.save(&config).await?;

        info!(
            "Generated candidate key {} for vendor {}",
            candidate.rotating_key.short(),
            candidate.vendor_id
        );
        Ok(candidate)
    }

    /// Check a server-issued activation package before trusting it
    pub fn validate_activation_package(
        &self,
        pkg: &ActivationPackage,
        pending_key: Option<&RotatingKey>,
        pending_vendor_id: Option<&VendorId>,
    ) -> Result<ValidatedActivation> {
        validate_activation_package(pkg, pending_key, pending_vendor_id).map_err(|e| {
            warn!("Rejected activation package: {}", e);
            e.into()
        })
    }

    /// Create the verifying key on initial setup, or look up the existing one
    ///
    /// Binds to the candidate key when one is outstanding, else to the active
    /// key. Re-entry for a rotating key whose commit is still running returns
    /// [`CommitOutcome::AlreadyInFlight`] without touching the network.
    #[instrument(skip_all, fields(vvk_id = ?config.vvk_id))]
    pub async fn commit_verifying_key(
        &self,
        ctx: &ActivationContext,
        config: &VendorKeyConfig,
    ) -> Result<CommitOutcome> {
        let key = config
            .key_state
            .binding_key()
            .cloned()
            .ok_or_else(|| OrchestratorError::NotProvisioned("no rotating key to bind".to_string()))?;

        let Some(_ticket) = ctx
            .guard()
            .try_acquire(GuardScope::Commit, key.rotating_key.as_hex())
        else {
            info!("Commit for {} already in flight", key.rotating_key.short());
            return Ok(CommitOutcome::AlreadyInFlight);
        };

        let result = self.run_commit(config, &key).await;
        match &result {
            Ok(CommitOutcome::Created { vvk_id, .. }) => {
                info!("Created verifying key {}", vvk_id);
                self.audit.record(AuditEventKind::VendorKeyCreated, false).await;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Verifying key commit failed: {}", e);
                self.audit.record(AuditEventKind::VendorKeyCreated, true).await;
            }
        }
        result
    }

    async fn run_commit(&self, config: &VendorKeyConfig, key: &VendorKey) -> Result<CommitOutcome> {
        let home_url = config
            .home_ork_url()
            .ok_or_else(|| OrchestratorError::NotProvisioned("systemHomeOrk".to_string()))?;
        let initial_setup = config.is_initial_setup();
        let vvk_id = config.vvk_id.clone().unwrap_or_else(VvkId::random);

        let rotating_point = self.primitives.decompress_point(&key.rotating_key.to_bytes()?)?;
        let session = self.primitives.generate_session_keypair()?;

        let auth_request = AuthRequest::new(vvk_id.clone(), ACTION_NEW, &session.public, self.expiry());
        let auth_payload = auth_request.payload();
        let auth_proof = self.auth.authorize(&auth_payload).await?;

        if !initial_setup {
            // The proof above is the re-key authorization; its outcome is the
            // lookup's
            let lookup = self.network.key_info(home_url, &vvk_id).await;
            self.audit.outcome(AuditEventKind::Authorize, &lookup).await;
            let info = lookup?;
            info!("Verifying key {} already exists, nothing to commit", vvk_id);
            return Ok(CommitOutcome::Existing {
                vvk_id,
                public_share: info.public_share,
            });
        }

        let nodes = self.network.default_key_nodes(home_url).await?;
        debug!(nodes = nodes.len(), "Starting key generation");

        let vouchers = self.auth.voucher_source();
        let mut flow = self.protocol.key_generation(
            KeyGenParams {
                vvk_id: vvk_id.clone(),
                rotating_point,
                nodes: nodes.clone(),
                session: session.clone(),
                action: ACTION_NEW.to_string(),
            },
            vouchers.clone(),
        );

        let public_share = flow
            .generate_shard(&auth_payload, &auth_proof, &capability_tags())
            .await
            .map_err(|e| e.classify(OrchestratorError::KeyGeneration))?;
        flow.set_shard(&rotating_point)
            .await
            .map_err(|e| e.classify(OrchestratorError::KeyGeneration))?;

        let params = SigningParams {
            vvk_id: vvk_id.clone(),
            public_share,
            nodes,
            session,
        };
        self.sign_capabilities(&params, vouchers).await?;

        flow.commit()
            .await
            .map_err(|e| e.classify(OrchestratorError::KeyGeneration))?;

        let client_id = public_share.to_hex();
        let mut latest = self.store.load().await?;
        latest.vvk_id = Some(vvk_id.clone());
        latest.client_id = Some(client_id.clone());
        self.store.save(&latest).await?;

        Ok(CommitOutcome::Created { vvk_id, client_id })
    }

    /// Authorize and sign one sub-request per protected capability
    ///
    /// Every signing runs to completion so each reports its own audit event;
    /// the first failure is returned afterwards.
    async fn sign_capabilities(
        &self,
        params: &SigningParams,
        vouchers: Arc<dyn VoucherSource>,
    ) -> Result<()> {
        let mut requests: Vec<SignRequest> =
            INIT_CAPABILITIES.iter().map(|name| SignRequest::capability(name)).collect();

        let authorized = join_all(
            requests
                .iter_mut()
                .map(|request| self.auth.authorize_request(request)),
        )
        .await;
        authorized.into_iter().collect::<Result<Vec<()>>>()?;

        let signed = join_all(
            requests
                .iter()
                .map(|request| self.sign_capability(params, request, vouchers.clone())),
        )
        .await;
        signed.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    async fn sign_capability(
        &self,
        params: &SigningParams,
        request: &SignRequest,
        vouchers: Arc<dyn VoucherSource>,
    ) -> Result<Vec<Signature>> {
        let result = match request.authorization() {
            Ok(_) => self
                .protocol
                .sign(params, request, vouchers)
                .await
                .map_err(|e| e.classify(OrchestratorError::Signing)),
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(_) => debug!("Signed {}", request.tag()),
            Err(e) => warn!("Signing {} failed: {}", request.tag(), e),
        }
        self.audit.outcome(AuditEventKind::AuthorizerUpdated, &result).await;
        self.audit.outcome(AuditEventKind::Authorize, &result).await;
        result
    }

    fn expiry(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        now + self.authorization_ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockHarness, MockThresholdProtocol, MOCK_HOME_ORK};
    use vendorkey_core::{KeyState, Secp256k1Primitives};

    fn coordinator(harness: &MockHarness) -> VendorKeyCoordinator {
        VendorKeyCoordinator::new(&harness.collaborators(), 30)
    }

    #[tokio::test]
    async fn test_generate_candidate_persists_pending_pair() {
        let harness = MockHarness::new();
        let keygen = coordinator(&harness);

        let candidate = keygen.generate_candidate_key().await.unwrap();
        assert_eq!(candidate.rotating_key.as_hex().len(), 66);
        assert!(candidate.vendor_id.as_str().starts_with("vendor-"));

        let config = harness.config().await.unwrap();
        assert_eq!(config.key_state, KeyState::Pending(candidate));
    }

    #[tokio::test]
    async fn test_vendor_id_failure_is_key_generation_error() {
        let harness = MockHarness::new();
        harness
            .backend
            .fail_next_vendor_id(OrchestratorError::Config("no quota".into()));
        let keygen = coordinator(&harness);

        assert!(matches!(
            keygen.generate_candidate_key().await,
            Err(OrchestratorError::KeyGeneration(_))
        ));
        assert_eq!(harness.config().await.unwrap().key_state, KeyState::None);
    }

    #[tokio::test]
    async fn test_initial_setup_creates_verifying_key() {
        let harness = MockHarness::new();
        let keygen = coordinator(&harness);
        keygen.generate_candidate_key().await.unwrap();
        let config = harness.config().await.unwrap();

        let outcome = keygen
            .commit_verifying_key(&ActivationContext::new(), &config)
            .await
            .unwrap();

        let CommitOutcome::Created { vvk_id, client_id } = outcome else {
            panic!("expected a new verifying key, got {:?}", outcome);
        };
        let saved = harness.config().await.unwrap();
        assert_eq!(saved.vvk_id, Some(vvk_id.clone()));
        assert_eq!(saved.client_id, Some(client_id));

        let log = harness.protocol.log();
        assert_eq!(log.generations, 1);
        assert_eq!(log.shards_set, 1);
        assert_eq!(log.commits, 1);
        assert_eq!(log.vvk_ids, vec![vvk_id]);
        assert_eq!(log.signed.len(), INIT_CAPABILITIES.len());

        assert_eq!(harness.audit.count(AuditEventKind::VendorKeyCreated, false), 1);
        assert_eq!(harness.audit.count(AuditEventKind::Authorize, false), 2);
        assert_eq!(harness.audit.count(AuditEventKind::AuthorizerUpdated, false), 2);

        // One proof for the auth request plus one per capability
        assert_eq!(harness.backend.signed_messages().len(), 1 + INIT_CAPABILITIES.len());
        // One voucher round for generation plus one per capability signing
        assert_eq!(harness.backend.voucher_requests(), 1 + INIT_CAPABILITIES.len());
    }

    #[tokio::test]
    async fn test_existing_key_is_not_regenerated() {
        let harness = MockHarness::new();
        let keygen = coordinator(&harness);
        keygen.generate_candidate_key().await.unwrap();

        let share = Secp256k1Primitives::new().generate_session_keypair().unwrap().public;
        harness.network.register_key(VvkId::new("42"), share);
        let mut config = harness.config().await.unwrap();
        config.vvk_id = Some(VvkId::new("42"));
        harness.store.save(&config).await.unwrap();

        let outcome = keygen
            .commit_verifying_key(&ActivationContext::new(), &config)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Existing {
                vvk_id: VvkId::new("42"),
                public_share: share,
            }
        );
        assert_eq!(harness.protocol.log().generations, 0);
        assert_eq!(harness.audit.count(AuditEventKind::VendorKeyCreated, false), 0);
        assert_eq!(harness.audit.count(AuditEventKind::Authorize, false), 1);
        assert_eq!(harness.config().await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_failed_capability_signing_blocks_commit() {
        let protocol = MockThresholdProtocol::new();
        protocol.fail_signing(INIT_CAPABILITIES[0]);
        let harness = MockHarness::with_protocol(protocol);
        let keygen = coordinator(&harness);
        keygen.generate_candidate_key().await.unwrap();
        let config = harness.config().await.unwrap();

        let err = keygen
            .commit_verifying_key(&ActivationContext::new(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Signing(_)));

        assert_eq!(harness.protocol.log().commits, 0);
        assert!(harness.config().await.unwrap().vvk_id.is_none());

        // Both sub-requests report, one of them as failed
        assert_eq!(harness.audit.count(AuditEventKind::Authorize, true), 1);
        assert_eq!(harness.audit.count(AuditEventKind::Authorize, false), 1);
        assert_eq!(harness.audit.count(AuditEventKind::VendorKeyCreated, true), 1);
    }

    #[tokio::test]
    async fn test_reentry_is_a_no_op() {
        let harness = MockHarness::new();
        let keygen = coordinator(&harness);
        let candidate = keygen.generate_candidate_key().await.unwrap();
        let config = harness.config().await.unwrap();

        let ctx = ActivationContext::new();
        let _ticket = ctx
            .guard()
            .try_acquire(GuardScope::Commit, candidate.rotating_key.as_hex())
            .unwrap();

        let outcome = keygen.commit_verifying_key(&ctx, &config).await.unwrap();
        assert_eq!(outcome, CommitOutcome::AlreadyInFlight);
        assert!(harness.backend.signed_messages().is_empty());
        assert_eq!(harness.network.lookups(), 0);
        assert!(harness.audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_home_node_fails() {
        let harness = MockHarness::new();
        let keygen = coordinator(&harness);
        keygen.generate_candidate_key().await.unwrap();
        let mut config = harness.config().await.unwrap();
        config.system_home_ork = None;

        assert!(matches!(
            keygen.commit_verifying_key(&ActivationContext::new(), &config).await,
            Err(OrchestratorError::NotProvisioned(_))
        ));
        assert_eq!(harness.audit.count(AuditEventKind::VendorKeyCreated, true), 1);
    }

    #[tokio::test]
    async fn test_create_vendor_record_once() {
        let harness = MockHarness::new();
        let keygen = coordinator(&harness);

        let created = keygen
            .create_vendor_record(&[
                (keys::SYSTEM_HOME_ORK, "https://elsewhere.example"),
                (keys::PAYER_PUBLIC, ""),
                ("realmName", "acme"),
            ])
            .await
            .unwrap();
        assert!(created);

        let record = harness.store.record().await;
        let primitives = Secp256k1Primitives::new();
        let expected = primitives
            .hash_to_point(primitives.generator().unwrap().as_bytes())
            .unwrap()
            .to_hex();
        assert_eq!(record.get(keys::OBF_GVVK), Some(&RecordValue::wrap(expected)));
        assert_eq!(record.get("realmName"), Some(&RecordValue::wrap("acme")));
        assert_eq!(record.get(keys::PAYER_PUBLIC), Some(&RecordValue::empty()));

        // Existing values win over defaults
        let config = harness.config().await.unwrap();
        assert_eq!(config.system_home_ork.as_deref(), Some(MOCK_HOME_ORK));

        assert!(!keygen.create_vendor_record(&[]).await.unwrap());
        assert_eq!(harness.store.record().await, record);
    }

    #[test]
    fn test_validate_maps_to_validation_error() {
        let harness = MockHarness::new();
        let keygen = coordinator(&harness);
        let pkg = ActivationPackage {
            gvrk: Some("02aa".into()),
            ..Default::default()
        };
        assert!(matches!(
            keygen.validate_activation_package(&pkg, None, None),
            Err(OrchestratorError::Validation(_))
        ));
    }
}
