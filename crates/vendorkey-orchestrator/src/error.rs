//! Error types for the orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the coordinators and their collaborators
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Authorization proof request rejected or failed
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Voucher request failed
    #[error("Voucher request failed: {0}")]
    Voucher(String),

    /// Distributed key generation or commit failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Untrusted server package failed structural or consistency checks
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Retry budget exhausted while polling activation
    #[error("License activation not confirmed after {attempts} attempts")]
    ActivationTimeout { attempts: u32 },

    /// Network failure talking to a collaborator
    #[error("Transport error: {0}")]
    Transport(String),

    /// Threshold signing flow failed or broke the signature layout contract
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The record lacks a field the operation needs
    #[error("Not provisioned: {0}")]
    NotProvisioned(String),

    /// Vendor config store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Core library error
    #[error("Core error: {0}")]
    Core(vendorkey_core::Error),
}

impl OrchestratorError {
    /// Re-label a collaborator failure as `kind`, keeping transport failures
    /// and errors already of that kind as they are
    pub(crate) fn classify(self, kind: fn(String) -> Self) -> Self {
        if matches!(self, Self::Transport(_)) {
            return self;
        }
        let probe = kind(String::new());
        if std::mem::discriminant(&probe) == std::mem::discriminant(&self) {
            self
        } else {
            kind(self.to_string())
        }
    }
}

impl From<vendorkey_core::Error> for OrchestratorError {
    fn from(e: vendorkey_core::Error) -> Self {
        match e {
            vendorkey_core::Error::Validation(msg) => OrchestratorError::Validation(msg),
            vendorkey_core::Error::Json(e) => OrchestratorError::Serialization(e.to_string()),
            other => OrchestratorError::Core(other),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(e: reqwest::Error) -> Self {
        OrchestratorError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_validation_maps_to_validation() {
        let err: OrchestratorError = vendorkey_core::Error::Validation("bad".into()).into();
        assert!(matches!(err, OrchestratorError::Validation(msg) if msg == "bad"));
    }

    #[test]
    fn test_classify_keeps_transport() {
        let err = OrchestratorError::Transport("down".into()).classify(OrchestratorError::Voucher);
        assert!(matches!(err, OrchestratorError::Transport(_)));
    }

    #[test]
    fn test_classify_keeps_same_kind() {
        let err = OrchestratorError::Voucher("empty".into()).classify(OrchestratorError::Voucher);
        assert!(matches!(err, OrchestratorError::Voucher(msg) if msg == "empty"));
    }

    #[test]
    fn test_classify_relabels_other_kinds() {
        let err = OrchestratorError::Store("locked".into()).classify(OrchestratorError::KeyGeneration);
        assert!(matches!(err, OrchestratorError::KeyGeneration(msg) if msg.contains("locked")));
    }
}
