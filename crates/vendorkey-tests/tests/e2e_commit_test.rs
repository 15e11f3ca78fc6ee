//! End-to-end tests for verifying-key creation and settings signing
//!
//! These run the coordinator and signer against the in-memory
//! collaborators, from a fresh vendor record to a committed verifying key.

use std::sync::Arc;
use tokio::sync::Notify;

use vendorkey_core::{
    ActivationPackage, KeyState, RotatingKey, Secp256k1Primitives, SettingsUrls,
    SigningPrimitives, VendorId, VendorKey, VendorSettings, VvkId,
};
use vendorkey_orchestrator::{
    identity::{sig_keys, PROVIDER_ALIAS},
    mock::{MockAuditSink, MockHarness, MockThresholdProtocol},
    ActivationContext, AuditEventKind, ConfigStore, CommitOutcome, IdentityProviderStore,
    LicenseController, LicensingTier, OrchestratorConfig, OrchestratorError, SettingsSigner,
    VendorKeyCoordinator,
};

const TTL: u64 = 30;

fn urls() -> SettingsUrls {
    SettingsUrls::for_realm("https://id.example.com", "acme", "https://admin.example.com")
}

/// Fresh vendor through to a committed verifying key
#[tokio::test]
async fn test_initial_setup_creates_verifying_key() {
    // ==========================================
    // STEP 1: Fresh vendor generates a candidate
    // ==========================================
    let harness = MockHarness::new();
    let coordinator = VendorKeyCoordinator::new(&harness.collaborators(), TTL);

    let candidate = coordinator.generate_candidate_key().await.unwrap();
    let config = harness.config().await.unwrap();
    assert_eq!(config.key_state, KeyState::Pending(candidate.clone()));
    assert!(config.is_initial_setup());

    // ==========================================
    // STEP 2: Commit the verifying key
    // ==========================================
    let ctx = ActivationContext::new();
    let outcome = coordinator.commit_verifying_key(&ctx, &config).await.unwrap();

    let CommitOutcome::Created { vvk_id, client_id } = outcome else {
        panic!("expected a new verifying key, got {:?}", outcome);
    };

    // ==========================================
    // STEP 3: Record and audit trail
    // ==========================================
    let config = harness.config().await.unwrap();
    assert_eq!(config.vvk_id.as_ref(), Some(&vvk_id));
    assert_eq!(config.client_id.as_deref(), Some(client_id.as_str()));
    assert_eq!(config.key_state.candidate(), Some(&candidate));

    assert_eq!(harness.audit.count(AuditEventKind::VendorKeyCreated, false), 1);
    assert_eq!(harness.audit.count(AuditEventKind::VendorKeyCreated, true), 0);
    assert_eq!(harness.audit.count(AuditEventKind::AuthorizerUpdated, false), 2);
    assert_eq!(harness.audit.count(AuditEventKind::Authorize, false), 2);

    let log = harness.protocol.log();
    assert_eq!(log.generations, 1);
    assert_eq!(log.commits, 1);
    let mut signed = log.signed;
    signed.sort();
    assert_eq!(signed, vec!["AccessTokenInit:1", "TidecloakInit:1"]);
}

/// The verifying key created at setup is the one later signings use
#[tokio::test]
async fn test_committed_key_signs_settings() {
    let harness = MockHarness::new();
    let collaborators = harness.collaborators();
    let coordinator = VendorKeyCoordinator::new(&collaborators, TTL);

    let candidate = coordinator.generate_candidate_key().await.unwrap();
    let mut config = harness.config().await.unwrap();
    config.key_state = config.key_state.promote().unwrap();
    harness.store.save(&config).await.unwrap();

    let ctx = ActivationContext::new();
    coordinator.commit_verifying_key(&ctx, &config).await.unwrap();

    let signer = SettingsSigner::new(&collaborators);
    let signatures = signer
        .resign_settings(&VendorSettings::default(), &urls(), &candidate.rotating_key)
        .await
        .unwrap();

    assert_eq!(signatures.len(), 5);
    let vvk_id = harness.config().await.unwrap().vvk_id.unwrap();
    assert!(String::from_utf8_lossy(signatures.settings_bundle().as_bytes())
        .starts_with(vvk_id.as_str()));
}

/// Settings signing with an unreachable key network changes nothing
#[tokio::test]
async fn test_settings_signing_with_unreachable_network() {
    let harness = MockHarness::new();
    let primitives = Secp256k1Primitives::new();
    let rotating = RotatingKey::from_point(&primitives.generate_session_keypair().unwrap().public);

    let mut config = harness.config().await.unwrap();
    config.key_state = KeyState::Active(VendorKey::new(rotating.clone(), VendorId::new("v1")));
    config.vvk_id = Some(VvkId::new("42"));
    harness.store.save(&config).await.unwrap();
    let before = harness.store.record().await;

    harness.network.set_unreachable(true);
    let signer = SettingsSigner::new(&harness.collaborators());
    let err = signer
        .resign_settings(&VendorSettings::new(true, None, None), &urls(), &rotating)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Transport(_)));
    assert_eq!(harness.store.record().await, before);
    assert_eq!(harness.audit.count(AuditEventKind::Authorize, true), 1);
    assert!(harness.protocol.log().signed.is_empty());
}

/// Validation against the pending candidate touches no collaborator
#[tokio::test]
async fn test_stale_package_fails_validation_offline() {
    let harness = MockHarness::new();
    let mut config = harness.config().await.unwrap();
    config.key_state = KeyState::Pending(VendorKey::new(
        RotatingKey::from_hex("02aa"),
        VendorId::new("vendor-aa"),
    ));
    harness.store.save(&config).await.unwrap();

    let pkg = ActivationPackage::parse(
        r#"{"sessionId":"cs","customerId":"cus","payerPublic":"p",
            "maxUserAcc":"5","gVRK":"02bb","licenseId":"vendor-aa"}"#,
    )
    .unwrap();

    let coordinator = VendorKeyCoordinator::new(&harness.collaborators(), TTL);
    let candidate = harness.config().await.unwrap().key_state.candidate().cloned().unwrap();
    let err = coordinator
        .validate_activation_package(&pkg, Some(&candidate.rotating_key), Some(&candidate.vendor_id))
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(harness.backend.vendor_id_requests(), 0);
    assert!(harness.backend.signed_messages().is_empty());
    assert_eq!(harness.network.lookups(), 0);
    assert_eq!(harness.payer.activation_checks(), 0);
}

/// A package naming another key is refused before anything is signed
#[tokio::test]
async fn test_mismatched_package_rejected_before_network() {
    let harness = MockHarness::new();
    harness.payer.override_package(serde_json::json!({
        "sessionId": "cs_test_1",
        "customerId": "cus_test",
        "payerPublic": "payer-public",
        "maxUserAcc": 25,
        "gVRK": "02deadbeef",
        "licenseId": "vendor-other"
    }));
    let controller = LicenseController::new(&harness.collaborators(), &OrchestratorConfig::default());

    let err = controller
        .begin_checkout(LicensingTier::Free, "https://id.example.com")
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert!(harness.backend.signed_messages().is_empty());
    assert_eq!(harness.network.lookups(), 0);
    assert_eq!(harness.protocol.log().generations, 0);

    let config = harness.config().await.unwrap();
    assert!(config.vvk_id.is_none());
    assert!(config.customer_id.is_none());
}

/// Two commits racing on the same rotating key generate one verifying key
#[tokio::test]
async fn test_concurrent_commit_generates_once() {
    let gate = Arc::new(Notify::new());
    let harness = MockHarness::with_protocol(MockThresholdProtocol::gated(gate.clone()));
    let coordinator = VendorKeyCoordinator::new(&harness.collaborators(), TTL);

    coordinator.generate_candidate_key().await.unwrap();
    let config = harness.config().await.unwrap();
    let ctx = ActivationContext::new();

    // The first commit parks at the gate holding the ticket; the second
    // finds it in flight; then the gate opens.
    let (first, second, ()) = tokio::join!(
        coordinator.commit_verifying_key(&ctx, &config),
        coordinator.commit_verifying_key(&ctx, &config),
        async {
            tokio::task::yield_now().await;
            gate.notify_one();
        },
    );

    assert!(matches!(first.unwrap(), CommitOutcome::Created { .. }));
    assert_eq!(second.unwrap(), CommitOutcome::AlreadyInFlight);

    let log = harness.protocol.log();
    assert_eq!(log.generations, 1);
    assert_eq!(log.vvk_ids.len(), 1);
    assert_eq!(harness.config().await.unwrap().vvk_id.as_ref(), log.vvk_ids.first());
    assert_eq!(harness.audit.count(AuditEventKind::VendorKeyCreated, false), 1);

    // Ticket released once the first commit finished
    let rerun = coordinator
        .commit_verifying_key(&ctx, &harness.config().await.unwrap())
        .await
        .unwrap();
    assert!(matches!(rerun, CommitOutcome::Existing { .. }));
}

/// An unreachable audit endpoint changes no outcome
#[tokio::test]
async fn test_commit_and_resign_with_failing_audit_sink() {
    let harness = MockHarness {
        audit: Arc::new(MockAuditSink::failing()),
        ..MockHarness::new()
    };
    let collaborators = harness.collaborators();
    let coordinator = VendorKeyCoordinator::new(&collaborators, TTL);

    coordinator.generate_candidate_key().await.unwrap();
    let mut config = harness.config().await.unwrap();
    config.key_state = config.key_state.promote().unwrap();
    harness.store.save(&config).await.unwrap();

    let outcome = coordinator
        .commit_verifying_key(&ActivationContext::new(), &config)
        .await
        .unwrap();
    let CommitOutcome::Created { vvk_id, .. } = outcome else {
        panic!("expected a new verifying key, got {:?}", outcome);
    };
    assert_eq!(harness.config().await.unwrap().vvk_id, Some(vvk_id));

    let controller = LicenseController::new(&collaborators, &OrchestratorConfig::default());
    assert!(controller
        .resign_provider_settings(&ActivationContext::new())
        .await
        .unwrap());
    let provider = harness.providers.find(PROVIDER_ALIAS).await.unwrap().unwrap();
    assert!(provider.config.contains_key(sig_keys::SETTINGS_SIG));

    // Every emission was attempted and none recorded
    assert_eq!(harness.audit.attempts(), 6);
    assert!(harness.audit.events().is_empty());
}
