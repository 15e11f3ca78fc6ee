//! Vendorkey Orchestrator - Vendor key lifecycle and settings signing
//!
//! This crate provides:
//! - License state tracking with checkout, activation and renewal
//! - One-time verifying key generation across the key nodes
//! - Settings re-signing with the vendor's verifying key
//! - Authorization and voucher plumbing against the trusted backend
//! - File and memory backed vendor record stores
//! - An HTTP client for the identity server's admin resources

use std::sync::Arc;

pub mod audit;
pub mod authorization;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod identity;
pub mod keygen;
pub mod license;
pub mod mock;
pub mod network;
pub mod payer;
pub mod protocol;
pub mod retry;
pub mod settings;
pub mod store;

pub use audit::{AuditEvent, AuditEventKind, AuditSink, AuditTrail};
pub use authorization::AuthorizationClient;
pub use backend::AuthorizationBackend;
pub use config::OrchestratorConfig;
pub use context::{ActivationContext, GuardScope, InFlightGuard};
pub use error::{OrchestratorError, Result};
pub use http::AdminClient;
pub use identity::{IdentityProvider, IdentityProviderStore};
pub use keygen::{CommitOutcome, VendorKeyCoordinator};
pub use license::{ActivationOutcome, LicenseController, LicenseOverview, LicenseState};
pub use network::{KeyInfo, KeyNetwork, KeyNode};
pub use payer::{LicensingTier, PayerService};
pub use protocol::{KeyGenerationFlow, ThresholdProtocol, VoucherSource};
pub use retry::RetryPolicy;
pub use settings::{SettingsSignatures, SettingsSigner};
pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore};

use vendorkey_core::SigningPrimitives;

/// External capabilities the coordinators are built from
#[derive(Clone)]
pub struct Collaborators {
    pub primitives: Arc<dyn SigningPrimitives>,
    pub backend: Arc<dyn AuthorizationBackend>,
    pub audit: Arc<dyn AuditSink>,
    pub network: Arc<dyn KeyNetwork>,
    pub protocol: Arc<dyn ThresholdProtocol>,
    pub payer: Arc<dyn PayerService>,
    pub store: Arc<dyn ConfigStore>,
    pub providers: Arc<dyn IdentityProviderStore>,
}
