/// Abstraction over persistent pin state. Implementers decide where pins and
/// generation floors live; each method must behave as an atomic read or write.
use crate::types::{Pin, TackRecord};

pub trait PinStore: Send + Sync {
    /// Highest `min_generation` recorded for a key fingerprint, if any.
    fn min_generation(&self, fingerprint: &str) -> Option<u8>;
    /// Record a generation floor for a key fingerprint.
    fn set_min_generation(&self, fingerprint: &str, min_generation: u8);
    /// Stored pins for `hostname`, in order (at most 2).
    fn pin_pair(&self, hostname: &str) -> Vec<Pin>;
    /// Replace the stored pins for `hostname`.
    fn set_pin_pair(&self, hostname: &str, pins: Vec<Pin>);
    /// Whether validation calls may create, extend, and drop pins.
    fn pin_activation(&self) -> bool;
}

/// The tacks presented on one connection.
pub trait TackSet {
    /// Presented records, in wire order.
    fn tacks(&self) -> &[TackRecord];
    /// Key fingerprints in the same order as [`TackSet::tacks`].
    fn fingerprints(&self) -> Vec<String> {
        self.tacks().iter().map(TackRecord::key_fingerprint).collect()
    }
    /// Whether the record at `index` currently vouches for the presented certificate.
    fn is_active(&self, index: usize) -> bool;
}
