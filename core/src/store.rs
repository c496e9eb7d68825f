use std::collections::HashMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::errors::TackError;
use crate::traits::PinStore;
use crate::types::Pin;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
struct Snapshot {
    pin_activation: bool,
    #[serde(default)]
    min_generations: HashMap<String, u8>,
    #[serde(default)]
    pins: HashMap<String, Vec<Pin>>,
}

/// In-memory pin store with optional JSON persistence.
#[derive(Default)]
pub struct InMemoryPinStore {
    inner: Mutex<Snapshot>,
}

impl InMemoryPinStore {
    /// Create a new, empty store.
    pub fn new(pin_activation: bool) -> Self {
        Self { inner: Mutex::new(Snapshot { pin_activation, ..Snapshot::default() }) }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hostnames that currently hold at least one pin.
    pub fn hostnames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().pins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Load a snapshot written by [`InMemoryPinStore::save_to_path`]. A missing
    /// file yields an empty store with the given activation flag.
    pub fn load_from_path<P: AsRef<Path>>(path: P, pin_activation: bool) -> Result<Self, TackError> {
        let bytes = match fs::read(path.as_ref()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new(pin_activation)),
            Err(e) => return Err(TackError::Corrupt(e.to_string())),
        };
        let mut snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| TackError::Corrupt(e.to_string()))?;
        if let Some((hostname, pins)) = snapshot.pins.iter().find(|(_, pins)| pins.len() > 2) {
            return Err(TackError::Corrupt(format!("{hostname} has {} pins", pins.len())));
        }
        snapshot.pin_activation = pin_activation;
        Ok(Self { inner: Mutex::new(snapshot) })
    }

    /// Write the store atomically: a temporary file is written, then renamed over `path`.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_vec_pretty(&*self.lock()).map_err(io::Error::other)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, path)
    }
}

impl PinStore for InMemoryPinStore {
    fn min_generation(&self, fingerprint: &str) -> Option<u8> {
        self.lock().min_generations.get(fingerprint).copied()
    }
    fn set_min_generation(&self, fingerprint: &str, min_generation: u8) {
        self.lock().min_generations.insert(fingerprint.to_string(), min_generation);
    }
    fn pin_pair(&self, hostname: &str) -> Vec<Pin> {
        self.lock().pins.get(hostname).cloned().unwrap_or_default()
    }
    fn set_pin_pair(&self, hostname: &str, pins: Vec<Pin>) {
        let mut inner = self.lock();
        if pins.is_empty() {
            inner.pins.remove(hostname);
        } else {
            inner.pins.insert(hostname.to_string(), pins);
        }
    }
    fn pin_activation(&self) -> bool {
        self.lock().pin_activation
    }
}
