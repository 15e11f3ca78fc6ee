//! Lifecycle audit events
//!
//! Emission is best-effort: a failing sink is logged and never changes the
//! outcome of the operation being audited.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;

/// Lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEventKind {
    LicenseRenewed,
    VendorKeyCreated,
    AuthorizerUpdated,
    Authorize,
}

impl AuditEventKind {
    /// Path segment of the admin resource that records this event
    pub fn trigger_path(&self) -> &'static str {
        match self {
            Self::LicenseRenewed => "triggerLicenseRenewedEvent",
            Self::VendorKeyCreated => "triggerVendorKeyCreationEvent",
            Self::AuthorizerUpdated => "triggerAuthorizerUpdateEvent",
            Self::Authorize => "triggerAuthorizeEvent",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LicenseRenewed => "license-renewed",
            Self::VendorKeyCreated => "vendor-key-created",
            Self::AuthorizerUpdated => "authorizer-updated",
            Self::Authorize => "authorize",
        };
        f.write_str(name)
    }
}

/// One audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub error: bool,
}

impl AuditEvent {
    pub fn success(kind: AuditEventKind) -> Self {
        Self { kind, error: false }
    }

    pub fn failure(kind: AuditEventKind) -> Self {
        Self { kind, error: true }
    }
}

/// Destination for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> Result<()>;
}

/// Best-effort emitter shared by the coordinators
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, kind: AuditEventKind, error: bool) {
        let event = AuditEvent { kind, error };
        match self.sink.emit(event).await {
            Ok(()) => debug!(%kind, error, "Audit event emitted"),
            Err(e) => warn!(%kind, error, "Failed to emit audit event: {}", e),
        }
    }

    /// Record the outcome of `result` under `kind`
    pub async fn outcome<T>(&self, kind: AuditEventKind, result: &Result<T>) {
        self.record(kind, result.is_err()).await;
    }
}
