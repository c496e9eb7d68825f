//! TACK core library: tack records, signing, and pin validation.
//!
//! Implements the 166-byte tack wire format:
//! - Fixed-offset encoding with big-endian multi-byte fields
//! - ECDSA P-256 signatures over SHA-256 of a `tack_sig`-tagged prefix
//! - Base32 key fingerprints used as pin store keys
//! - Text armor and the TLS extension payload carrying one or two tacks
//!
//! The [`Validator`] consumes a [`PinStore`] and a [`TackSet`], checks
//! generation floors, returns an ACCEPTED/REJECTED/UNPINNED verdict, and
//! evolves the stored pin pair.

pub mod armor;
pub mod errors;
pub mod extension;
pub mod store;
pub mod traits;
pub mod types;
pub mod verifier;

pub use errors::TackError;
pub use extension::{ConnectionTacks, TackExtension};
pub use store::InMemoryPinStore;
pub use traits::{PinStore, TackSet};
pub use types::{key_fingerprint, minutes_to_string, now_minutes, Pin, Status, TackRecord, TACK_LENGTH};
pub use verifier::{extended_end_time, Validator, MAX_PIN_EXTENSION};

/// Library version string.
pub fn version() -> &'static str { "tack-core 0.1.0" }
