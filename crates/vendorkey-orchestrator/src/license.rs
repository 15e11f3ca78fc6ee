//! License state controller
//!
//! Derives the license state from the vendor record and drives the
//! transitions between states:
//!
//! ```text
//! NoLicense -> CheckoutPending -> ActivationPending -> Active
//!                    |                   |
//!                    +------> Error <----+
//! ```
//!
//! Activation runs in a fixed order: wait for the payer to confirm, promote
//! the candidate key, commit the verifying key, confirm the rotating key with
//! the server, re-sign the identity provider settings, register the next
//! cycle's candidate with the payer. The promotion is saved together with the
//! record's `activation_incomplete` marker and the marker is cleared only
//! after the last step, so a failure anywhere in between leaves a record the
//! next `resume` finishes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, instrument, warn};

use crate::audit::{AuditEventKind, AuditTrail};
use crate::authorization::AuthorizationClient;
use crate::config::OrchestratorConfig;
use crate::backend::AuthorizationBackend;
use crate::context::ActivationContext;
use crate::error::{OrchestratorError, Result};
use crate::identity::{IdentityProviderStore, PROVIDER_ALIAS};
use crate::keygen::{CommitOutcome, VendorKeyCoordinator};
use crate::network::KeyNetwork;
use crate::payer::{
    CheckoutResponse, LicensingTier, PayerService, PortalSessionRequest, SubscriptionUpdate,
    VendorData, PORTAL_SESSION_PATH,
};
use crate::retry::{poll_until, RetryPolicy};
use crate::settings::SettingsSigner;
use crate::store::ConfigStore;
use crate::Collaborators;
use vendorkey_core::{
    ActivationPackage, KeyState, LicenseSummary, RotatingKey, SettingsUrls, VendorKey,
    VendorKeyConfig, VendorSettings,
};

/// License lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseState {
    NoLicense,
    CheckoutPending,
    ActivationPending,
    Active,
    /// A transition failed; `prior` is the stable state to return to
    Error {
        prior: Box<LicenseState>,
        reason: String,
    },
}

impl LicenseState {
    /// State implied by a persisted record
    pub fn derive(config: &VendorKeyConfig) -> Self {
        match (&config.key_state, config.vvk_id.is_some()) {
            (KeyState::None, _) => Self::NoLicense,
            (KeyState::Pending(_), _) => Self::CheckoutPending,
            (_, false) => Self::ActivationPending,
            (_, true) if config.activation_incomplete => Self::ActivationPending,
            (_, true) => Self::Active,
        }
    }

    fn failed(prior: LicenseState, reason: impl fmt::Display) -> Self {
        Self::Error {
            prior: Box::new(prior.stable().clone()),
            reason: reason.to_string(),
        }
    }

    /// This state, or the one an error returns to
    pub fn stable(&self) -> &LicenseState {
        match self {
            Self::Error { prior, .. } => prior.stable(),
            other => other,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for LicenseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLicense => write!(f, "no license"),
            Self::CheckoutPending => write!(f, "checkout pending"),
            Self::ActivationPending => write!(f, "activation pending"),
            Self::Active => write!(f, "active"),
            Self::Error { prior, reason } => write!(f, "error ({}): {}", prior, reason),
        }
    }
}

/// What a call to [`LicenseController::resume`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The activation sequence completed
    Activated,
    /// Nothing to do for the current record
    Idle,
    /// The next cycle's license has not been paid yet
    NotRenewed,
    /// An activation for the same key is already running
    AlreadyInFlight,
}

/// License details for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseOverview {
    pub summary: LicenseSummary,
    /// Expiry as `dd/mm/yy`
    pub expiry: String,
    pub current_user_acc: u64,
    pub max_user_acc: Option<String>,
}

pub struct LicenseController {
    keygen: VendorKeyCoordinator,
    signer: SettingsSigner,
    auth: AuthorizationClient,
    backend: Arc<dyn AuthorizationBackend>,
    network: Arc<dyn KeyNetwork>,
    payer: Arc<dyn PayerService>,
    store: Arc<dyn ConfigStore>,
    providers: Arc<dyn IdentityProviderStore>,
    audit: AuditTrail,
    urls: SettingsUrls,
    redirect_retry: RetryPolicy,
    interactive_retry: RetryPolicy,
    registration_allowed: AtomicBool,
    state: Mutex<LicenseState>,
}

impl LicenseController {
    pub fn new(collaborators: &Collaborators, config: &OrchestratorConfig) -> Self {
        Self {
            keygen: VendorKeyCoordinator::new(collaborators, config.authorization_ttl_secs),
            signer: SettingsSigner::new(collaborators),
            auth: AuthorizationClient::new(collaborators.backend.clone()),
            backend: collaborators.backend.clone(),
            network: collaborators.network.clone(),
            payer: collaborators.payer.clone(),
            store: collaborators.store.clone(),
            providers: collaborators.providers.clone(),
            audit: AuditTrail::new(collaborators.audit.clone()),
            urls: config.settings_urls(),
            redirect_retry: config.redirect_retry,
            interactive_retry: config.interactive_retry,
            registration_allowed: AtomicBool::new(false),
            state: Mutex::new(LicenseState::NoLicense),
        }
    }

    pub fn keygen(&self) -> &VendorKeyCoordinator {
        &self.keygen
    }

    pub fn signer(&self) -> &SettingsSigner {
        &self.signer
    }

    /// Realm registration policy signed into the settings bundle
    pub fn set_registration_allowed(&self, allowed: bool) {
        self.registration_allowed.store(allowed, Ordering::SeqCst);
    }

    pub fn state(&self) -> LicenseState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, next: LicenseState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            info!("License state: {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Re-derive the state from the persisted record
    pub async fn refresh(&self) -> Result<LicenseState> {
        let config = self.store.load().await?;
        let state = LicenseState::derive(&config);
        self.set_state(state.clone());
        Ok(state)
    }

    /// Record a failed activation-side transition and hand the error back
    async fn fail_transition(&self, prior: LicenseState, e: OrchestratorError) -> OrchestratorError {
        error!("License activation failed: {}", e);
        self.audit.record(AuditEventKind::LicenseRenewed, true).await;
        self.set_state(LicenseState::failed(prior, &e));
        e
    }

    /// Leave the error state for the prior stable state
    pub fn acknowledge_error(&self) {
        let stable = self.state().stable().clone();
        self.set_state(stable);
    }

    /// Summary of the key in force
    pub async fn summary(&self) -> Result<LicenseSummary> {
        Ok(self.store.load().await?.active_summary())
    }

    // ========================================================================
    // Checkout
    // ========================================================================

    /// Start a checkout for a new license
    ///
    /// Generates and persists a candidate key, opens a payer checkout
    /// session and, when the payer answers with a redirect, validates the
    /// activation package against the candidate and persists its licensing
    /// fields. Returns the URL to send the administrator to, if any.
    #[instrument(skip_all, fields(tier = tier.as_str()))]
    pub async fn begin_checkout(&self, tier: LicensingTier, redirect_url: &str) -> Result<Option<String>> {
        let config = self.store.load().await?;
        if config.key_state.active().is_some() {
            return Err(vendorkey_core::Error::InvalidState(
                "a license is already active".to_string(),
            )
            .into());
        }

        let prior = LicenseState::derive(&config);
        match self.run_checkout(tier, redirect_url).await {
            Ok(redirect) => {
                self.set_state(LicenseState::CheckoutPending);
                Ok(redirect)
            }
            Err(e) => {
                error!("Checkout failed: {}", e);
                self.set_state(LicenseState::failed(prior, &e));
                Err(e)
            }
        }
    }

    async fn run_checkout(&self, tier: LicensingTier, redirect_url: &str) -> Result<Option<String>> {
        let candidate = self.keygen.generate_candidate_key().await?;
        let vendor = VendorData {
            gvrk: candidate.rotating_key.clone(),
            vendor_id: candidate.vendor_id.clone(),
        };

        let response = self
            .payer
            .create_checkout_session(&vendor, redirect_url.trim_end_matches('/'), tier)
            .await?;

        match response {
            CheckoutResponse::Redirect {
                redirect_url,
                activation_package,
            } => {
                let pkg = ActivationPackage::parse(&activation_package)?;
                let validated = self.keygen.validate_activation_package(
                    &pkg,
                    Some(&candidate.rotating_key),
                    Some(&candidate.vendor_id),
                )?;

                let mut config = self.store.load().await?;
                config.apply_activation(&validated);
                self.store.save(&config).await?;

                info!("Checkout session created for vendor {}", candidate.vendor_id);
                Ok(Some(redirect_url))
            }
            CheckoutResponse::Accepted => {
                info!("Checkout accepted without redirect");
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Activation
    // ========================================================================

    /// Advance the license from whatever the record holds
    ///
    /// A pending candidate is polled for payment (with the redirect policy
    /// when `ctx` came back from the payer, otherwise the interactive one)
    /// and activated. A promoted key without a verifying key, or a record
    /// still marked as mid-activation, resumes at the commit. An active
    /// license with an outstanding renewal candidate gets a single payment
    /// check.
    #[instrument(skip_all, fields(vvk_id = tracing::field::Empty))]
    pub async fn resume(&self, ctx: &mut ActivationContext) -> Result<ActivationOutcome> {
        let redirected = ctx.take_license_pending();
        let config = match self.store.load().await {
            Ok(config) => config,
            Err(e) => return Err(self.fail_transition(self.state(), e).await),
        };
        if let Some(vvk_id) = &config.vvk_id {
            tracing::Span::current().record("vvk_id", vvk_id.as_str());
        }

        let committed = config.vvk_id.is_some();
        let unfinished = config.activation_incomplete;
        match &config.key_state {
            KeyState::None => {
                self.set_state(LicenseState::NoLicense);
                Ok(ActivationOutcome::Idle)
            }
            KeyState::Pending(_) | KeyState::Renewing { .. } if !committed => {
                let policy = if redirected {
                    self.redirect_retry
                } else {
                    self.interactive_retry
                };
                self.activate(ctx, config, Some(policy), true).await
            }
            KeyState::Pending(_) => {
                // A verifying key exists but nothing is active: treat as an
                // unpaid candidate
                self.activate(ctx, config, Some(self.interactive_retry), true).await
            }
            KeyState::Active(_) if !committed || unfinished => {
                self.activate(ctx, config, None, false).await
            }
            KeyState::Renewing { .. } if unfinished => self.activate(ctx, config, None, false).await,
            KeyState::Active(_) => {
                self.set_state(LicenseState::Active);
                Ok(ActivationOutcome::Idle)
            }
            KeyState::Renewing { candidate, .. } => {
                let vendor_id = candidate.vendor_id.clone();
                match self.payer.is_license_active(&vendor_id).await {
                    Ok(true) => {
                        info!("Renewal paid for vendor {}", vendor_id);
                        self.activate(ctx, config, None, true).await
                    }
                    Ok(false) => {
                        debug!("Renewal for vendor {} not paid yet", vendor_id);
                        self.set_state(LicenseState::Active);
                        Ok(ActivationOutcome::NotRenewed)
                    }
                    Err(e) => Err(self.fail_transition(LicenseState::Active, e).await),
                }
            }
        }
    }

    async fn activate(
        &self,
        ctx: &ActivationContext,
        config: VendorKeyConfig,
        poll: Option<RetryPolicy>,
        promote: bool,
    ) -> Result<ActivationOutcome> {
        let key = config
            .key_state
            .binding_key()
            .cloned()
            .ok_or_else(|| OrchestratorError::NotProvisioned("no rotating key".to_string()))?;

        let Some(_ticket) = ctx.try_claim_record() else {
            info!("Activation for {} already in flight", key.rotating_key.short());
            return Ok(ActivationOutcome::AlreadyInFlight);
        };

        let prior = LicenseState::derive(&config);
        self.set_state(LicenseState::ActivationPending);

        match self.run_activation(ctx, config, &key, poll, promote).await {
            Ok(()) => {
                self.audit.record(AuditEventKind::LicenseRenewed, false).await;
                self.set_state(LicenseState::Active);
                Ok(ActivationOutcome::Activated)
            }
            Err(e) => Err(self.fail_transition(prior, e).await),
        }
    }

    async fn run_activation(
        &self,
        ctx: &ActivationContext,
        mut config: VendorKeyConfig,
        key: &VendorKey,
        poll: Option<RetryPolicy>,
        promote: bool,
    ) -> Result<()> {
        if let Some(policy) = poll {
            info!(
                attempts = policy.attempts,
                delay_ms = policy.delay_ms,
                "Waiting for license activation of vendor {}",
                key.vendor_id
            );
            poll_until(policy, || self.payer.is_license_active(&key.vendor_id)).await?;
        }

        if promote {
            config.key_state = std::mem::take(&mut config.key_state).promote()?;
            info!("Promoting key {} to active", key.rotating_key.short());
        }
        if promote || !config.activation_incomplete {
            config.activation_incomplete = true;
            self.store.save(&config).await?;
        }

        match self.keygen.commit_verifying_key(ctx, &config).await? {
            CommitOutcome::AlreadyInFlight => {
                return Err(OrchestratorError::KeyGeneration(
                    "verifying key commit already in flight".to_string(),
                ))
            }
            outcome => debug!(?outcome, "Verifying key ready"),
        }
        self.backend
            .confirm_rotating_key()
            .await
            .map_err(|e| e.classify(OrchestratorError::KeyGeneration))?;

        let config = self.store.load().await?;
        let active = config
            .key_state
            .active()
            .cloned()
            .ok_or_else(|| OrchestratorError::NotProvisioned("no active key".to_string()))?;

        self.resign_provider(&active.rotating_key).await?;
        self.register_next_cycle(&config, &active).await?;

        let mut config = self.store.load().await?;
        config.activation_incomplete = false;
        self.store.save(&config).await?;
        Ok(())
    }

    /// Hand the next cycle's candidate to the payer, generating one unless
    /// an earlier attempt already did
    async fn register_next_cycle(&self, config: &VendorKeyConfig, active: &VendorKey) -> Result<()> {
        let Some(initial_session_id) = config.initial_session_id.clone() else {
            warn!("No checkout session on record, skipping subscription update");
            return Ok(());
        };

        let next = match config.key_state.candidate() {
            Some(candidate) => candidate.clone(),
            None => self.keygen.generate_candidate_key().await?,
        };
        let auth = self.auth.authorize_payer().await?;
        let update = SubscriptionUpdate {
            initial_session_id,
            vendor_data: VendorData {
                gvrk: next.rotating_key,
                vendor_id: next.vendor_id,
            },
        };
        self.payer
            .update_subscription(&active.vendor_id, &update, &auth)
            .await?;
        info!("Registered next cycle key for vendor {}", active.vendor_id);
        Ok(())
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Re-sign the identity provider settings after they changed
    ///
    /// Returns false when no provider is registered or an activation is
    /// running against the record.
    #[instrument(skip_all)]
    pub async fn resign_provider_settings(&self, ctx: &ActivationContext) -> Result<bool> {
        let Some(_ticket) = ctx.try_claim_record() else {
            info!("Activation in flight, not re-signing");
            return Ok(false);
        };

        let config = self.store.load().await?;
        let active = config
            .key_state
            .active()
            .cloned()
            .ok_or_else(|| OrchestratorError::NotProvisioned("no active key".to_string()))?;

        self.resign_provider(&active.rotating_key).await
    }

    /// Apply a full signature set to the registered provider in one update
    async fn resign_provider(&self, rotating_key: &RotatingKey) -> Result<bool> {
        let Some(mut provider) = self.providers.find(PROVIDER_ALIAS).await? else {
            info!("No identity provider registered, skipping settings signature");
            return Ok(false);
        };

        let settings = VendorSettings::new(
            self.registration_allowed.load(Ordering::SeqCst),
            provider.image_url(),
            provider.logo_url(),
        );
        let signatures = self
            .signer
            .resign_settings(&settings, &self.urls, rotating_key)
            .await?;

        provider.apply_signatures(&signatures);
        self.providers.update(&provider).await?;
        info!("Applied settings signatures to provider {}", provider.alias);
        Ok(true)
    }

    // ========================================================================
    // Maintenance and queries
    // ========================================================================

    /// Drop an outstanding candidate key, leaving the active key untouched
    ///
    /// Returns false when there is no candidate.
    pub async fn abandon_candidate(&self, ctx: &ActivationContext) -> Result<bool> {
        let Some(_ticket) = ctx.try_claim_record() else {
            return Err(vendorkey_core::Error::InvalidState(
                "activation in flight for this record".to_string(),
            )
            .into());
        };

        let mut config = self.store.load().await?;
        let Some(candidate) = config.key_state.candidate().cloned() else {
            return Ok(false);
        };

        self.backend.clear_candidate_key().await?;
        config.key_state = std::mem::take(&mut config.key_state).without_candidate();
        self.store.save(&config).await?;
        info!("Abandoned candidate key {}", candidate.rotating_key.short());

        self.set_state(LicenseState::derive(&config));
        Ok(true)
    }

    /// Payer-side subscription status of the licensed vendor
    pub async fn subscription_status(&self) -> Result<String> {
        let config = self.store.load().await?;
        let vendor = config
            .key_state
            .active()
            .or_else(|| config.key_state.candidate())
            .ok_or_else(|| OrchestratorError::NotProvisioned("no vendor id".to_string()))?;
        let session_id = config
            .initial_session_id
            .as_deref()
            .ok_or_else(|| OrchestratorError::NotProvisioned("initialSessionId".to_string()))?;

        let auth = self.auth.authorize_payer().await?;
        self.payer
            .subscription_status(&vendor.vendor_id, session_id, &auth)
            .await
    }

    /// Base URL of the payer that issued the license, without a trailing
    /// slash
    pub async fn payer_url(&self) -> Result<String> {
        let config = self.store.load().await?;
        self.payer_url_for(&config).await
    }

    async fn payer_url_for(&self, config: &VendorKeyConfig) -> Result<String> {
        let home_url = config
            .home_ork_url()
            .ok_or_else(|| OrchestratorError::NotProvisioned("systemHomeOrk".to_string()))?;
        let payer_public = config
            .payer_public
            .as_deref()
            .ok_or_else(|| OrchestratorError::NotProvisioned("payerPublic".to_string()))?;

        let url = self.network.payer_url(home_url, payer_public).await?;
        Ok(url.trim_end_matches('/').to_string())
    }

    /// Authorized form for the payer's subscription management portal
    pub async fn manage_subscription(&self, redirect_url: &str) -> Result<PortalSessionRequest> {
        let config = self.store.load().await?;
        let vendor_id = config
            .key_state
            .active()
            .map(|key| key.vendor_id.clone())
            .ok_or_else(|| OrchestratorError::NotProvisioned("no active key".to_string()))?;

        let payer_url = self.payer_url_for(&config).await?;
        let auth = self.auth.authorize_payer().await?;
        debug!("Opening subscription portal for vendor {}", vendor_id);

        Ok(PortalSessionRequest {
            action_url: format!("{}{}", payer_url, PORTAL_SESSION_PATH),
            vendor_id,
            auth,
            redirect_url: redirect_url.trim_end_matches('/').to_string(),
        })
    }

    /// The vendor's public signing key as a JSON Web Key
    pub async fn export_jwk(&self) -> Result<serde_json::Value> {
        if self.store.load().await?.vvk_id.is_none() {
            return Err(OrchestratorError::NotProvisioned("no verifying key".to_string()));
        }
        self.backend.export_jwk().await
    }

    /// Expiry and account usage of the active license
    pub async fn license_details(&self) -> Result<LicenseOverview> {
        let config = self.store.load().await?;
        if config.vvk_id.is_none() {
            return Err(OrchestratorError::NotProvisioned("no verifying key".to_string()));
        }
        let active = config
            .key_state
            .active()
            .ok_or_else(|| OrchestratorError::NotProvisioned("no active key".to_string()))?;

        let auth = self.auth.authorize_payer().await?;
        let details = self.payer.license_details(&active.vendor_id, &auth).await?;

        Ok(LicenseOverview {
            summary: config.active_summary(),
            expiry: details.expiry_display(),
            current_user_acc: details.current_user_acc,
            max_user_acc: config.max_user_acc.clone(),
        })
    }
}
