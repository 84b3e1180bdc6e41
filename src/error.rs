//! Error types for keychain operations
//!
//! Every failure is returned to the immediate caller. Not-found and validation
//! errors are deterministic; oracle and storage errors are transient by nature
//! and safe to retry, since a failed window extension only ever leaves a
//! shorter but consistent window behind.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::path::{Chain, DerivationPath};

/// Core error type for keychain operations
#[derive(Error, Debug)]
pub enum KeychainError {
    #[error("keychain not found: {0}")]
    KeychainNotFound(Uuid),

    #[error("address not found: {0}")]
    AddressNotFound(String),

    #[error("derivation path not found: {0}")]
    DerivationPathNotFound(DerivationPath),

    #[error("unrecognized scheme: {0}")]
    UnrecognizedScheme(String),

    #[error("unrecognized network: {0}")]
    UnrecognizedNetwork(String),

    #[error("unrecognized change index: {0}")]
    UnrecognizedChange(u32),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    #[error("address index {index} out of range on {chain} chain ({derived} derived)")]
    IndexOutOfRange {
        chain: Chain,
        index: u32,
        derived: u32,
    },

    #[error("invalid range: from {from} to {to}")]
    InvalidRange { from: u32, to: u32 },

    #[error("derivation oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Coarse classification used by transports to pick a response code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Oracle,
    Storage,
}

impl KeychainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeychainNotFound(_)
            | Self::AddressNotFound(_)
            | Self::DerivationPathNotFound(_) => ErrorKind::NotFound,
            Self::UnrecognizedScheme(_)
            | Self::UnrecognizedNetwork(_)
            | Self::UnrecognizedChange(_)
            | Self::InvalidDescriptor(_)
            | Self::InvalidDerivationPath(_)
            | Self::IndexOutOfRange { .. }
            | Self::InvalidRange { .. } => ErrorKind::Validation,
            Self::Oracle(_) => ErrorKind::Oracle,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Oracle and storage failures may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Oracle | ErrorKind::Storage)
    }
}

/// Failures talking to the derivation oracle
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(String),

    #[error("oracle rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Failures reading or writing keychain documents
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}
