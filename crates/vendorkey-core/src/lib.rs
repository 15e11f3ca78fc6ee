//! Vendorkey Core - Shared types, record format and validation
//!
//! This crate holds the data model used by the vendor key orchestrator:
//! the persisted vendor key record, the activation package issued after
//! checkout, sign and authorization requests, the canonical settings draft
//! and the signing primitive facade. Nothing here performs I/O.

pub mod activation;
pub mod config;
pub mod crypto;
pub mod error;
pub mod request;
pub mod settings;
pub mod types;

pub use activation::{validate_activation_package, ActivationPackage, ValidatedActivation};
pub use config::{ConfigRecord, KeyState, LicenseSummary, RecordValue, VendorKey, VendorKeyConfig};
pub use crypto::{PublicPoint, Secp256k1Primitives, SessionKeypair, SessionSecret, SigningPrimitives};
pub use error::{Error, Result};
pub use request::{AuthRequest, SignRequest};
pub use settings::{SettingsDraft, SettingsUrls, VendorSettings};
pub use types::{AuthorizationProof, RotatingKey, Signature, VendorId, VvkId};

/// Lifetime of an authorization request, in seconds from issue
pub const AUTHORIZATION_TTL_SECS: u64 = 30;
