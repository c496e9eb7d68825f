use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr as _};
use serde::Deserialize;

/// Server settings, read from a JSON file. Every field is optional.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Let validation calls create, extend, and drop pins.
    pub pin_activation: bool,
    /// Where the pin store is persisted. In-memory only when unset.
    pub store_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            pin_activation: true,
            store_path: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else { return Ok(Self::default()) };
        let s = fs::read_to_string(path).wrap_err_with(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&s).wrap_err_with(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = ServerConfig::load(None).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.listen.port(), 8080);
        assert!(cfg.pin_activation);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"pin_activation": false, "store_path": "/var/lib/tack/pins.json"}"#).unwrap();
        assert!(!cfg.pin_activation);
        assert_eq!(cfg.store_path, Some(PathBuf::from("/var/lib/tack/pins.json")));
        assert_eq!(cfg.listen, ServerConfig::default().listen);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(serde_json::from_str::<ServerConfig>(r#"{"listen_addr": "127.0.0.1:1"}"#).is_err());
    }
}
