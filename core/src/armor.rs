//! Text armor for tacks: base64 between `-----BEGIN TACK-----` and
//! `-----END TACK-----` lines.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use crate::errors::TackError;
use crate::types::TackRecord;

const LABEL: &str = "TACK";
const LINE_WIDTH: usize = 64;

/// Wrap `data` in an armored block with the given label.
pub fn armor(data: &[u8], label: &str) -> String {
    let encoded = B64.encode(data);
    let mut out = format!("-----BEGIN {label}-----\n");
    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

/// Extract and decode the first block with the given label. Text outside the block is ignored.
pub fn dearmor(s: &str, label: &str) -> Result<Vec<u8>, TackError> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = s
        .find(&begin)
        .ok_or_else(|| TackError::Armor(format!("missing {begin}")))?
        + begin.len();
    let len = s[start..]
        .find(&end)
        .ok_or_else(|| TackError::Armor(format!("missing {end}")))?;
    let body: String = s[start..start + len].split_whitespace().collect();
    B64.decode(body.as_bytes()).map_err(|e| TackError::Armor(e.to_string()))
}

impl TackRecord {
    /// Decode the first `TACK` block found in `s`.
    pub fn from_pem(s: &str) -> Result<Self, TackError> {
        Self::from_bytes(&dearmor(s, LABEL)?)
    }

    pub fn to_pem(&self) -> String {
        armor(&self.to_bytes(), LABEL)
    }
}
