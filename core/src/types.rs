use std::fmt;

use chrono::{DateTime, Utc};
use data_encoding::BASE32;
use p256::ecdsa::signature::hazmat::{PrehashVerifier, RandomizedPrehashSigner};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::TackError;

/// Serialized length of a tack on the wire.
pub const TACK_LENGTH: usize = 166;
pub const PUBKEY_LENGTH: usize = 64;
pub const HASH_LENGTH: usize = 32;
pub const SIG_LENGTH: usize = 64;

/// Domain tag prepended to the pre-signature bytes before hashing.
const SIG_DOMAIN: &[u8] = b"tack_sig";

const GENERATION_OFFSET: usize = PUBKEY_LENGTH;
const EXPIRATION_OFFSET: usize = PUBKEY_LENGTH + 2;
const TARGET_HASH_OFFSET: usize = EXPIRATION_OFFSET + 4;
const SIGNATURE_OFFSET: usize = TARGET_HASH_OFFSET + HASH_LENGTH;

/// A signed assertion binding a P-256 key to the hash of a TLS public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TackRecord {
    /// Raw X‖Y coordinates, 32 bytes each, no SEC1 tag byte.
    pub public_key: [u8; PUBKEY_LENGTH],
    pub min_generation: u8,
    pub generation: u8,
    /// Minutes since the Unix epoch.
    pub expiration: u32,
    pub target_hash: [u8; HASH_LENGTH],
    /// r‖s, 32 bytes each, big-endian.
    pub signature: [u8; SIG_LENGTH],
}

impl TackRecord {
    /// Build a record from raw field buffers. Every buffer must be exactly its field width.
    pub fn new(
        public_key: &[u8],
        min_generation: u8,
        generation: u8,
        expiration: u32,
        target_hash: &[u8],
        signature: &[u8],
    ) -> Result<Self, TackError> {
        Ok(Self {
            public_key: fixed("public_key", public_key)?,
            min_generation,
            generation,
            expiration,
            target_hash: fixed("target_hash", target_hash)?,
            signature: fixed("signature", signature)?,
        })
    }

    /// Build a record with a zeroed key and signature, ready for [`TackRecord::sign`].
    pub fn unsigned(min_generation: u8, generation: u8, expiration: u32, target_hash: [u8; HASH_LENGTH]) -> Self {
        Self {
            public_key: [0u8; PUBKEY_LENGTH],
            min_generation,
            generation,
            expiration,
            target_hash,
            signature: [0u8; SIG_LENGTH],
        }
    }

    /// Decode the fixed 166-byte wire form. No signature or generation checks happen here.
    pub fn from_bytes(b: &[u8]) -> Result<Self, TackError> {
        if b.len() != TACK_LENGTH {
            return Err(TackError::SizeMismatch { expected: TACK_LENGTH, actual: b.len() });
        }
        let mut expiration = [0u8; 4];
        expiration.copy_from_slice(&b[EXPIRATION_OFFSET..TARGET_HASH_OFFSET]);
        Self::new(
            &b[..PUBKEY_LENGTH],
            b[GENERATION_OFFSET],
            b[GENERATION_OFFSET + 1],
            u32::from_be_bytes(expiration),
            &b[TARGET_HASH_OFFSET..SIGNATURE_OFFSET],
            &b[SIGNATURE_OFFSET..],
        )
    }

    fn pre_sig_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TACK_LENGTH);
        buf.extend_from_slice(&self.public_key);
        buf.push(self.min_generation);
        buf.push(self.generation);
        buf.extend_from_slice(&self.expiration.to_be_bytes());
        buf.extend_from_slice(&self.target_hash);
        buf
    }

    /// Encode to the fixed 166-byte wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.pre_sig_bytes();
        buf.extend_from_slice(&self.signature);
        buf
    }

    /// Store lookup key for the asserting public key.
    pub fn key_fingerprint(&self) -> String {
        key_fingerprint(&self.public_key)
    }

    /// SHA-256 over the domain tag and every field preceding the signature.
    pub fn signature_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(SIG_DOMAIN);
        hasher.update(self.pre_sig_bytes());
        hasher.finalize().into()
    }

    /// Return a copy of this record carrying `key`'s public point and a fresh signature.
    pub fn sign(&self, key: &SigningKey) -> Result<Self, TackError> {
        let point = key.verifying_key().to_encoded_point(false);
        let (x, y) = match (point.x(), point.y()) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(TackError::Signing("signing key has no affine coordinates".into())),
        };
        let mut signed = self.clone();
        signed.public_key[..PUBKEY_LENGTH / 2].copy_from_slice(x);
        signed.public_key[PUBKEY_LENGTH / 2..].copy_from_slice(y);

        let sig: Signature = key
            .sign_prehash_with_rng(&mut OsRng, &signed.signature_digest())
            .map_err(|e| TackError::Signing(e.to_string()))?;
        signed.signature.copy_from_slice(&sig.to_bytes());
        Ok(signed)
    }

    /// Check the signature against the embedded public key.
    ///
    /// A key that is not a point on P-256 is an error; any other failure,
    /// including out-of-range r or s, is `Ok(false)`.
    pub fn verify(&self) -> Result<bool, TackError> {
        let mut sec1 = [0u8; PUBKEY_LENGTH + 1];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(&self.public_key);
        let key = VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| TackError::MalformedKey)?;
        let Ok(sig) = Signature::from_slice(&self.signature) else {
            return Ok(false);
        };
        Ok(key.verify_prehash(&self.signature_digest(), &sig).is_ok())
    }
}

impl fmt::Display for TackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "key fingerprint = {}", self.key_fingerprint())?;
        writeln!(f, "min_generation  = {}", self.min_generation)?;
        writeln!(f, "generation      = {}", self.generation)?;
        writeln!(f, "expiration      = {}", minutes_to_string(self.expiration))?;
        writeln!(f, "target_hash     = {}", hex::encode(self.target_hash))
    }
}

fn fixed<const N: usize>(field: &'static str, b: &[u8]) -> Result<[u8; N], TackError> {
    b.try_into()
        .map_err(|_| TackError::FieldLength { field, expected: N, actual: b.len() })
}

/// Fingerprint of a raw public key: base32 of its SHA-256, first 25 characters
/// in five dot-separated groups.
pub fn key_fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    let encoded = BASE32.encode(&digest).to_ascii_lowercase();
    encoded.as_bytes()[..25]
        .chunks(5)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Current time in minutes since the Unix epoch.
pub fn now_minutes() -> u32 {
    u32::try_from(Utc::now().timestamp() / 60).unwrap_or(u32::MAX)
}

/// Render minutes since the Unix epoch as `YYYY-MM-DDTHH:MMZ`.
pub fn minutes_to_string(minutes: u32) -> String {
    DateTime::from_timestamp(i64::from(minutes) * 60, 0)
        .map(|t| t.format("%Y-%m-%dT%H:%MZ").to_string())
        .unwrap_or_else(|| minutes.to_string())
}

/// Per-hostname trust record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pin {
    pub initial_time: u32,
    /// End of the active trust window; `0` marks a pending pin.
    pub end_time: u32,
    pub fingerprint: String,
}

impl Pin {
    /// A fresh pin that has not yet earned an active window.
    pub fn pending(initial_time: u32, fingerprint: impl Into<String>) -> Self {
        Self { initial_time, end_time: 0, fingerprint: fingerprint.into() }
    }

    pub fn is_pending(&self) -> bool {
        self.end_time == 0
    }

    pub fn is_active(&self, current_time: u32) -> bool {
        self.end_time > current_time
    }
}

/// Verdict of a single validation call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Unpinned,
    Accepted,
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unpinned => "unpinned",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        })
    }
}
