use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::errors::TackError;
use crate::traits::{PinStore, TackSet};
use crate::types::{Pin, Status};

/// Ceiling on how far past the current time a pin's window may reach: 30 days, in minutes.
pub const MAX_PIN_EXTENSION: u32 = 30 * 24 * 60;

const MAX_PINS: usize = 2;

/// Validator applies presented tacks to a pin store and decides whether a connection is trusted.
pub struct Validator {
    store: Arc<dyn PinStore>,
    // Held for a whole call so floor updates and pin rewrites are never interleaved.
    lock: Mutex<()>,
}

impl Validator {
    /// Create a new `Validator` over the given pin store.
    pub fn new(store: Arc<dyn PinStore>) -> Self {
        Self { store, lock: Mutex::new(()) }
    }

    /// Check generations, determine the connection's status for `hostname`, and,
    /// if the store allows it, activate pins.
    ///
    /// A revoked tack aborts the call with [`TackError::Revoked`]; the connection
    /// is then unpinned.
    pub fn process(&self, tacks: &dyn TackSet, hostname: &str, current_time: u32) -> Result<Status, TackError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let records = tacks.tacks();
        let fingerprints = tacks.fingerprints();

        // 1) Generations
        for (tack, fingerprint) in records.iter().zip(&fingerprints) {
            let Some(min_generation) = self.store.min_generation(fingerprint) else { continue };
            if tack.generation < min_generation {
                warn!(%hostname, %fingerprint, generation = tack.generation, min_generation, "revoked tack");
                return Err(TackError::Revoked {
                    fingerprint: fingerprint.clone(),
                    generation: tack.generation,
                    min_generation,
                });
            } else if tack.min_generation > min_generation {
                debug!(%fingerprint, from = min_generation, to = tack.min_generation, "raising min_generation");
                self.store.set_min_generation(fingerprint, tack.min_generation);
            }
        }

        // 2) Status
        let pins = self.store.pin_pair(hostname);
        let mut tack_matches_pin = vec![false; records.len()];
        let mut pin_matches_tack = vec![false; pins.len()];
        let mut pin_matches_active_tack = vec![false; pins.len()];
        for (p, pin) in pins.iter().enumerate() {
            for (t, fingerprint) in fingerprints.iter().enumerate() {
                if pin.fingerprint == *fingerprint {
                    pin_matches_tack[p] = true;
                    pin_matches_active_tack[p] |= tacks.is_active(t);
                    tack_matches_pin[t] = true;
                }
            }
        }
        let mut status = Status::Unpinned;
        for (p, pin) in pins.iter().enumerate() {
            if pin.is_active(current_time) {
                if !pin_matches_tack[p] {
                    // The store is left untouched on rejection.
                    warn!(%hostname, fingerprint = %pin.fingerprint, "active pin not presented, rejecting");
                    return Ok(Status::Rejected);
                }
                status = Status::Accepted;
            }
        }
        info!(%hostname, %status, "pin status");

        // 3) Activation
        if !self.store.pin_activation() {
            return Ok(status);
        }
        let mut new_pins = Vec::with_capacity(MAX_PINS);
        let mut dirty = false;
        for (p, pin) in pins.iter().enumerate() {
            if !pin_matches_tack[p] {
                debug!(%hostname, fingerprint = %pin.fingerprint, "dropping unmatched pin");
                dirty = true;
                continue;
            }
            let mut end_time = pin.end_time;
            if pin_matches_active_tack[p] && current_time > pin.initial_time {
                end_time = extended_end_time(pin.initial_time, current_time);
                if end_time != pin.end_time {
                    debug!(%hostname, fingerprint = %pin.fingerprint, end_time, "extending pin");
                    dirty = true;
                }
            }
            push_pin(&mut new_pins, hostname, Pin { end_time, ..pin.clone() })?;
        }
        for (t, tack) in records.iter().enumerate() {
            if tack_matches_pin[t] || !tacks.is_active(t) {
                continue;
            }
            // Same key presented twice on one connection.
            if new_pins.iter().any(|pin| pin.fingerprint == fingerprints[t]) {
                continue;
            }
            push_pin(&mut new_pins, hostname, Pin::pending(current_time, fingerprints[t].clone()))?;
            // Another hostname may already hold a higher floor for this key.
            let floor = match self.store.min_generation(&fingerprints[t]) {
                Some(m) => m.max(tack.min_generation),
                None => tack.min_generation,
            };
            self.store.set_min_generation(&fingerprints[t], floor);
            debug!(%hostname, fingerprint = %fingerprints[t], "adding pending pin");
            dirty = true;
        }
        if dirty {
            self.store.set_pin_pair(hostname, new_pins);
        }
        Ok(status)
    }
}

/// New end of a re-observed pin's window: the time it has been held, minus a
/// minute, added to `current_time`, capped at [`MAX_PIN_EXTENSION`].
pub fn extended_end_time(initial_time: u32, current_time: u32) -> u32 {
    let held = current_time.saturating_sub(initial_time).saturating_sub(1);
    current_time.saturating_add(held.min(MAX_PIN_EXTENSION))
}

fn push_pin(pins: &mut Vec<Pin>, hostname: &str, pin: Pin) -> Result<(), TackError> {
    if pins.len() >= MAX_PINS {
        error!(%hostname, "pin pair overflow");
        return Err(TackError::PinPairOverflow { hostname: hostname.to_string() });
    }
    pins.push(pin);
    Ok(())
}
