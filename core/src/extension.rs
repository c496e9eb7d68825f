use sha2::{Digest, Sha256};

use crate::errors::TackError;
use crate::traits::TackSet;
use crate::types::{TackRecord, HASH_LENGTH, TACK_LENGTH};

/// Maximum number of tacks a connection may present.
pub const MAX_TACKS: usize = 2;

/// TLS extension payload: a 2-byte big-endian length followed by one or two tacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TackExtension {
    tacks: Vec<TackRecord>,
}

impl TackExtension {
    pub fn new(tacks: Vec<TackRecord>) -> Result<Self, TackError> {
        if tacks.is_empty() || tacks.len() > MAX_TACKS {
            return Err(TackError::MalformedExtension(format!("expected 1 or 2 tacks, got {}", tacks.len())));
        }
        Ok(Self { tacks })
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, TackError> {
        if b.len() < 2 {
            return Err(TackError::MalformedExtension("missing length prefix".into()));
        }
        let len = usize::from(u16::from_be_bytes([b[0], b[1]]));
        if len != TACK_LENGTH && len != TACK_LENGTH * MAX_TACKS {
            return Err(TackError::MalformedExtension(format!("bad tacks length {len}")));
        }
        let body = &b[2..];
        if body.len() != len {
            return Err(TackError::MalformedExtension(format!(
                "length prefix says {len} bytes, {} present",
                body.len()
            )));
        }
        let tacks = body
            .chunks(TACK_LENGTH)
            .map(TackRecord::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(tacks)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // At most two tacks, so the length always fits in a u16.
        let len = (self.tacks.len() * TACK_LENGTH) as u16;
        let mut buf = Vec::with_capacity(2 + usize::from(len));
        buf.extend_from_slice(&len.to_be_bytes());
        for tack in &self.tacks {
            buf.extend_from_slice(&tack.to_bytes());
        }
        buf
    }

    pub fn tacks(&self) -> &[TackRecord] {
        &self.tacks
    }
}

/// An extension bound to one connection: the hash of the certificate's
/// public key that was actually presented, and the time of the handshake.
pub struct ConnectionTacks<'a> {
    extension: &'a TackExtension,
    key_hash: [u8; HASH_LENGTH],
    current_time: u32,
}

impl<'a> ConnectionTacks<'a> {
    pub fn new(extension: &'a TackExtension, key_hash: [u8; HASH_LENGTH], current_time: u32) -> Self {
        Self { extension, key_hash, current_time }
    }

    /// Bind to a connection using the DER-encoded SubjectPublicKeyInfo of its certificate.
    pub fn from_spki(extension: &'a TackExtension, spki_der: &[u8], current_time: u32) -> Self {
        Self::new(extension, Sha256::digest(spki_der).into(), current_time)
    }
}

impl TackSet for ConnectionTacks<'_> {
    fn tacks(&self) -> &[TackRecord] {
        self.extension.tacks()
    }

    fn is_active(&self, index: usize) -> bool {
        self.extension.tacks.get(index).is_some_and(|tack| {
            tack.target_hash == self.key_hash
                && tack.expiration > self.current_time
                && tack.verify().unwrap_or(false)
        })
    }
}
