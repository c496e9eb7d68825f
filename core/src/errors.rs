use thiserror::Error;

use crate::types::Status;

/// Errors that can arise while decoding, signing, or processing tacks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TackError {
    #[error("tack is the wrong size: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("{field} must be {expected} bytes, got {actual}")]
    FieldLength { field: &'static str, expected: usize, actual: usize },
    #[error("public key is not a valid P-256 point")]
    MalformedKey,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("malformed tack extension: {0}")]
    MalformedExtension(String),
    #[error("armor: {0}")]
    Armor(String),
    #[error("tack for key {fingerprint} has generation {generation} below minimum {min_generation}")]
    Revoked { fingerprint: String, generation: u8, min_generation: u8 },
    #[error("pin pair for {hostname} would exceed 2 pins")]
    PinPairOverflow { hostname: String },
    #[error("corrupt pin store: {0}")]
    Corrupt(String),
}

impl TackError {
    /// Status implied by a failed validation call. A revoked tack leaves the
    /// connection unpinned; every other error carries no verdict.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Revoked { .. } => Some(Status::Unpinned),
            _ => None,
        }
    }
}
