//! Error types for vendorkey-core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// An untrusted package failed structural or consistency checks
    #[error("Validation error: {0}")]
    Validation(String),

    /// A sign request was submitted without an authorization proof
    #[error("Sign request {0} has no authorization proof attached")]
    MissingAuthorization(String),

    /// A key state transition was requested from a state that does not allow it
    #[error("Invalid key state: {0}")]
    InvalidState(String),

    /// The persisted record holds a half-written key pair
    #[error("Inconsistent vendor key record: {0}")]
    InconsistentRecord(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
