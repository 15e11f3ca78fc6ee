//! In-memory collaborators for tests and offline runs
//!
//! These stand in for the backend, key network, protocol flows and payer
//! service. Signatures and public shares are deterministic placeholders, not
//! cryptographically meaningful.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::backend::AuthorizationBackend;
use crate::error::{OrchestratorError, Result};
use crate::identity::{IdentityProvider, MemoryIdentityProviderStore, PROVIDER_ALIAS};
use crate::network::{KeyInfo, KeyNetwork, KeyNode};
use crate::payer::{
    CheckoutResponse, LicenseDetails, LicensingTier, PayerAuthorization, PayerService,
    SubscriptionUpdate, VendorData,
};
use crate::protocol::{KeyGenParams, KeyGenerationFlow, SigningParams, ThresholdProtocol, VoucherSource};
use crate::store::{ConfigStore, MemoryConfigStore};
use crate::Collaborators;
use vendorkey_core::request::ACTION_UPDATE_SETTINGS;
use vendorkey_core::settings::DRAFT_DELIMITER;
use vendorkey_core::{
    AuthorizationProof, PublicPoint, Secp256k1Primitives, SignRequest, Signature, VendorId,
    VendorKeyConfig, VvkId,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================
// Authorization backend
// ============================================

/// Backend that signs everything it is asked to
#[derive(Debug, Default)]
pub struct MockBackend {
    signed: Mutex<Vec<String>>,
    vendor_ids: AtomicUsize,
    voucher_requests: AtomicUsize,
    confirmations: AtomicUsize,
    candidate_clears: AtomicUsize,
    fail_sign_message: Mutex<Option<OrchestratorError>>,
    fail_vendor_id: Mutex<Option<OrchestratorError>>,
    fail_vouchers: Mutex<Option<OrchestratorError>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_sign_message(&self, err: OrchestratorError) {
        *lock(&self.fail_sign_message) = Some(err);
    }

    pub fn fail_next_vendor_id(&self, err: OrchestratorError) {
        *lock(&self.fail_vendor_id) = Some(err);
    }

    pub fn fail_next_vouchers(&self, err: OrchestratorError) {
        *lock(&self.fail_vouchers) = Some(err);
    }

    /// Payloads passed to `sign_message`, in order
    pub fn signed_messages(&self) -> Vec<String> {
        lock(&self.signed).clone()
    }

    pub fn vendor_id_requests(&self) -> usize {
        self.vendor_ids.load(Ordering::SeqCst)
    }

    pub fn voucher_requests(&self) -> usize {
        self.voucher_requests.load(Ordering::SeqCst)
    }

    /// Calls to `confirm_rotating_key`
    pub fn confirmations(&self) -> usize {
        self.confirmations.load(Ordering::SeqCst)
    }

    pub fn candidate_clears(&self) -> usize {
        self.candidate_clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationBackend for MockBackend {
    async fn sign_message(&self, data: &str) -> Result<AuthorizationProof> {
        if let Some(err) = lock(&self.fail_sign_message).take() {
            return Err(err);
        }
        let mut signed = lock(&self.signed);
        signed.push(data.to_string());
        Ok(AuthorizationProof::new(format!("proof:{}", signed.len())))
    }

    async fn generate_vendor_id(&self, hashed_point: &PublicPoint) -> Result<VendorId> {
        if let Some(err) = lock(&self.fail_vendor_id).take() {
            return Err(err);
        }
        self.vendor_ids.fetch_add(1, Ordering::SeqCst);
        Ok(VendorId::new(format!("vendor-{}", &hashed_point.to_hex()[2..18])))
    }

    async fn new_vouchers(&self, voucher_request: &str) -> Result<serde_json::Value> {
        if let Some(err) = lock(&self.fail_vouchers).take() {
            return Err(err);
        }
        let n = self.voucher_requests.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({
            "request": voucher_request,
            "vouchers": [format!("voucher-{}", n)],
        }))
    }

    async fn authorize_payer_request(&self, data: &str) -> Result<AuthorizationProof> {
        Ok(AuthorizationProof::new(format!("payer:{}", data)))
    }

    async fn confirm_rotating_key(&self) -> Result<()> {
        self.confirmations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear_candidate_key(&self) -> Result<()> {
        self.candidate_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn export_jwk(&self) -> Result<serde_json::Value> {
        Ok(json!({
            "keys": [{ "kty": "OKP", "crv": "Ed25519", "alg": "EdDSA", "use": "sig", "x": "mock" }]
        }))
    }
}

// ============================================
// Audit sink
// ============================================

/// Sink recording every event it receives
#[derive(Debug, Default)]
pub struct MockAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    attempts: AtomicUsize,
    failing: bool,
}

impl MockAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every emission fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, kind: AuditEventKind, error: bool) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| event.kind == kind && event.error == error)
            .count()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditSink for MockAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(OrchestratorError::Transport("audit endpoint unreachable".to_string()));
        }
        lock(&self.events).push(event);
        Ok(())
    }
}

// ============================================
// Key network
// ============================================

/// Key directory holding registered verifying keys
#[derive(Debug)]
pub struct MockKeyNetwork {
    nodes: Vec<KeyNode>,
    keys: Mutex<HashMap<VvkId, PublicPoint>>,
    unreachable: AtomicBool,
    lookups: AtomicUsize,
}

impl Default for MockKeyNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockKeyNetwork {
    pub fn new() -> Self {
        let nodes = (1..=3)
            .map(|i| KeyNode {
                id: format!("ork-{}", i),
                url: format!("https://ork{}.example", i),
                public_key: format!("02{:064x}", i),
            })
            .collect();
        Self {
            nodes,
            keys: Mutex::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn register_key(&self, vvk_id: VvkId, public_share: PublicPoint) {
        lock(&self.keys).insert(vvk_id, public_share);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of calls that reached the directory
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn reach(&self, home_url: &str) -> Result<()> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Transport(format!("{} is unreachable", home_url)));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyNetwork for MockKeyNetwork {
    async fn key_info(&self, home_url: &str, vvk_id: &VvkId) -> Result<KeyInfo> {
        self.reach(home_url)?;
        let public_share = lock(&self.keys)
            .get(vvk_id)
            .copied()
            .ok_or_else(|| OrchestratorError::NotProvisioned(format!("unknown verifying key {}", vvk_id)))?;
        Ok(KeyInfo {
            vvk_id: vvk_id.clone(),
            public_share,
            nodes: self.nodes.clone(),
        })
    }

    async fn default_key_nodes(&self, home_url: &str) -> Result<Vec<KeyNode>> {
        self.reach(home_url)?;
        Ok(self.nodes.clone())
    }

    async fn payer_url(&self, home_url: &str, _payer_public: &str) -> Result<String> {
        self.reach(home_url)?;
        Ok(MOCK_PAYER_URL.to_string())
    }
}

// ============================================
// Threshold protocol
// ============================================

/// What the mock protocol has been asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolLog {
    pub generations: usize,
    pub shards_set: usize,
    pub commits: usize,
    /// `action:version` of every signed request
    pub signed: Vec<String>,
    /// Verifying-key ids generation flows were started for
    pub vvk_ids: Vec<VvkId>,
}

/// Protocol that completes every round locally
#[derive(Debug, Default)]
pub struct MockThresholdProtocol {
    log: Arc<Mutex<ProtocolLog>>,
    gate: Option<Arc<Notify>>,
    failing_action: Mutex<Option<String>>,
    directory: Option<Arc<MockKeyNetwork>>,
}

impl MockThresholdProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every key generation at `generate_shard` until `gate` is notified
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Register committed keys with `network` so later lookups find them
    pub fn publish_to(mut self, network: Arc<MockKeyNetwork>) -> Self {
        self.directory = Some(network);
        self
    }

    /// Fail every signing of requests with this action
    pub fn fail_signing(&self, action: &str) {
        *lock(&self.failing_action) = Some(action.to_string());
    }

    pub fn clear_signing_failure(&self) {
        *lock(&self.failing_action) = None;
    }

    pub fn log(&self) -> ProtocolLog {
        lock(&self.log).clone()
    }
}

#[async_trait]
impl ThresholdProtocol for MockThresholdProtocol {
    fn key_generation(
        &self,
        params: KeyGenParams,
        vouchers: Arc<dyn VoucherSource>,
    ) -> Box<dyn KeyGenerationFlow> {
        lock(&self.log).vvk_ids.push(params.vvk_id.clone());
        Box::new(MockKeyGenerationFlow {
            params,
            vouchers,
            log: self.log.clone(),
            gate: self.gate.clone(),
            directory: self.directory.clone(),
            public_share: None,
            shard_set: false,
        })
    }

    async fn sign(
        &self,
        params: &SigningParams,
        request: &SignRequest,
        vouchers: Arc<dyn VoucherSource>,
    ) -> Result<Vec<Signature>> {
        request.authorization()?;
        vouchers
            .retrieve(&json!({ "vvkId": params.vvk_id.as_str(), "round": "sign" }).to_string())
            .await?;

        if lock(&self.failing_action).as_deref() == Some(request.action.as_str()) {
            return Err(OrchestratorError::Signing(format!(
                "key nodes refused {}",
                request.tag()
            )));
        }

        let count = if request.action == ACTION_UPDATE_SETTINGS {
            signed_url_count(&request.payload)? + 2
        } else {
            1
        };
        lock(&self.log).signed.push(request.tag());

        Ok((0..count)
            .map(|i| Signature::new(format!("{}:{}:{}", params.vvk_id, request.tag(), i).into_bytes()))
            .collect())
    }
}

/// Number of URLs in the leading list of a settings draft
fn signed_url_count(payload: &[u8]) -> Result<usize> {
    let draft = String::from_utf8_lossy(payload);
    let urls = draft.split(DRAFT_DELIMITER).next().unwrap_or_default();
    let urls: Vec<String> = serde_json::from_str(urls)?;
    Ok(urls.len())
}

struct MockKeyGenerationFlow {
    params: KeyGenParams,
    vouchers: Arc<dyn VoucherSource>,
    log: Arc<Mutex<ProtocolLog>>,
    gate: Option<Arc<Notify>>,
    directory: Option<Arc<MockKeyNetwork>>,
    public_share: Option<PublicPoint>,
    shard_set: bool,
}

#[async_trait]
impl KeyGenerationFlow for MockKeyGenerationFlow {
    async fn generate_shard(
        &mut self,
        _auth_payload: &str,
        _proof: &AuthorizationProof,
        capabilities: &[String],
    ) -> Result<PublicPoint> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.vouchers
            .retrieve(
                &json!({
                    "vvkId": self.params.vvk_id.as_str(),
                    "round": "generate",
                    "capabilities": capabilities,
                })
                .to_string(),
            )
            .await?;

        lock(&self.log).generations += 1;
        let share = self.params.session.public;
        self.public_share = Some(share);
        Ok(share)
    }

    async fn set_shard(&mut self, _rotating_point: &PublicPoint) -> Result<()> {
        if self.public_share.is_none() {
            return Err(OrchestratorError::KeyGeneration("shard not generated".to_string()));
        }
        self.shard_set = true;
        lock(&self.log).shards_set += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let share = match (self.public_share, self.shard_set) {
            (Some(share), true) => share,
            _ => return Err(OrchestratorError::KeyGeneration("shard not set".to_string())),
        };
        if let Some(directory) = &self.directory {
            directory.register_key(self.params.vvk_id.clone(), share);
        }
        lock(&self.log).commits += 1;
        Ok(())
    }
}

// ============================================
// Payer service
// ============================================

/// Payer that issues packages for whatever key it is shown
#[derive(Debug, Default)]
pub struct MockPayerService {
    checks: Mutex<VecDeque<bool>>,
    fail_check: Mutex<Option<OrchestratorError>>,
    active_by_default: AtomicBool,
    activation_checks: AtomicUsize,
    no_redirect: AtomicBool,
    package_override: Mutex<Option<serde_json::Value>>,
    updates: Mutex<Vec<(VendorId, SubscriptionUpdate)>>,
}

impl MockPayerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer for activation checks once any queued answers are used up
    pub fn set_active(&self, active: bool) {
        self.active_by_default.store(active, Ordering::SeqCst);
    }

    /// Answers returned by the next activation checks, in order
    pub fn queue_checks(&self, answers: impl IntoIterator<Item = bool>) {
        lock(&self.checks).extend(answers);
    }

    /// Fail the next activation check with `err`
    pub fn fail_next_check(&self, err: OrchestratorError) {
        *lock(&self.fail_check) = Some(err);
    }

    /// Accept checkouts without a redirect
    pub fn accept_without_redirect(&self) {
        self.no_redirect.store(true, Ordering::SeqCst);
    }

    /// Replace the issued activation package
    pub fn override_package(&self, package: serde_json::Value) {
        *lock(&self.package_override) = Some(package);
    }

    pub fn activation_checks(&self) -> usize {
        self.activation_checks.load(Ordering::SeqCst)
    }

    pub fn subscription_updates(&self) -> Vec<(VendorId, SubscriptionUpdate)> {
        lock(&self.updates).clone()
    }
}

#[async_trait]
impl PayerService for MockPayerService {
    async fn create_checkout_session(
        &self,
        vendor: &VendorData,
        redirect_url: &str,
        _tier: LicensingTier,
    ) -> Result<CheckoutResponse> {
        if self.no_redirect.load(Ordering::SeqCst) {
            return Ok(CheckoutResponse::Accepted);
        }
        let package = lock(&self.package_override).clone().unwrap_or_else(|| {
            json!({
                "sessionId": "cs_test_1",
                "customerId": "cus_test",
                "payerPublic": "payer-public",
                "maxUserAcc": 25,
                "gVRK": vendor.gvrk.as_hex(),
                "licenseId": vendor.vendor_id.as_str(),
            })
        });
        Ok(CheckoutResponse::Redirect {
            redirect_url: format!("https://payer.example/checkout?return={}", redirect_url),
            activation_package: package.to_string(),
        })
    }

    async fn is_license_active(&self, _vendor_id: &VendorId) -> Result<bool> {
        self.activation_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.fail_check).take() {
            return Err(err);
        }
        let queued = lock(&self.checks).pop_front();
        Ok(queued.unwrap_or_else(|| self.active_by_default.load(Ordering::SeqCst)))
    }

    async fn subscription_status(
        &self,
        _vendor_id: &VendorId,
        _initial_session_id: &str,
        _auth: &PayerAuthorization,
    ) -> Result<String> {
        Ok("active".to_string())
    }

    async fn license_details(
        &self,
        _vendor_id: &VendorId,
        _auth: &PayerAuthorization,
    ) -> Result<LicenseDetails> {
        Ok(LicenseDetails {
            expiry_date: 1_767_139_200,
            current_user_acc: 3,
        })
    }

    async fn update_subscription(
        &self,
        vendor_id: &VendorId,
        update: &SubscriptionUpdate,
        _auth: &PayerAuthorization,
    ) -> Result<()> {
        lock(&self.updates).push((vendor_id.clone(), update.clone()));
        Ok(())
    }
}

// ============================================
// Harness
// ============================================

/// Home key-node URL preloaded into harness records
pub const MOCK_HOME_ORK: &str = "https://ork1.example/";

/// Payer base URL the mock key network hands out
pub const MOCK_PAYER_URL: &str = "https://payer.example/";

/// One set of mock collaborators sharing a memory store
pub struct MockHarness {
    pub backend: Arc<MockBackend>,
    pub audit: Arc<MockAuditSink>,
    pub network: Arc<MockKeyNetwork>,
    pub protocol: Arc<MockThresholdProtocol>,
    pub payer: Arc<MockPayerService>,
    pub store: Arc<MemoryConfigStore>,
    pub providers: Arc<MemoryIdentityProviderStore>,
}

impl Default for MockHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHarness {
    /// Fresh vendor: empty record apart from the home key node, and a
    /// registered identity provider
    pub fn new() -> Self {
        Self::with_protocol(MockThresholdProtocol::new())
    }

    pub fn with_protocol(protocol: MockThresholdProtocol) -> Self {
        let record = VendorKeyConfig {
            system_home_ork: Some(MOCK_HOME_ORK.to_string()),
            ..Default::default()
        };
        let network = Arc::new(MockKeyNetwork::new());
        Self {
            backend: Arc::new(MockBackend::new()),
            audit: Arc::new(MockAuditSink::new()),
            protocol: Arc::new(protocol.publish_to(network.clone())),
            network,
            payer: Arc::new(MockPayerService::new()),
            store: Arc::new(MemoryConfigStore::with_config(&record)),
            providers: Arc::new(MemoryIdentityProviderStore::with_provider(
                IdentityProvider::new(PROVIDER_ALIAS),
            )),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            primitives: Arc::new(Secp256k1Primitives::new()),
            backend: self.backend.clone(),
            audit: self.audit.clone(),
            network: self.network.clone(),
            protocol: self.protocol.clone(),
            payer: self.payer.clone(),
            store: self.store.clone(),
            providers: self.providers.clone(),
        }
    }

    /// Current typed record
    pub async fn config(&self) -> Result<VendorKeyConfig> {
        self.store.load().await
    }
}
