use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tack_core::{
    now_minutes, ConnectionTacks, InMemoryPinStore, Pin, PinStore, Status, TackError, TackExtension, TackRecord,
    Validator,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::ServerConfig;

#[derive(Parser)]
#[command(name = "tack-server", about = "TACK pin validation service")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, env = "TACK_SERVER_CONFIG")]
    config: Option<PathBuf>,
}

struct AppState {
    validator: Validator,
    store: Arc<InMemoryPinStore>,
    store_path: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl AppState {
    fn new(store: Arc<InMemoryPinStore>, store_path: Option<PathBuf>) -> Self {
        Self { validator: Validator::new(store.clone()), store, store_path, save_lock: Mutex::new(()) }
    }

    fn persist(&self) {
        let Some(path) = &self.store_path else { return };
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.store.save_to_path(path) {
            warn!(error = %e, path = %path.display(), "failed to save pin store");
        }
    }
}

/// One connection's tacks: either the raw extension (base64) or PEM tacks.
#[derive(Debug, Deserialize)]
struct ValidateRequest {
    hostname: String,
    #[serde(default)]
    extension: Option<String>,
    #[serde(default)]
    tacks: Vec<String>,
    /// Hex SHA-256 of the presented certificate's SubjectPublicKeyInfo.
    key_hash: String,
    #[serde(default)]
    current_time: Option<u32>,
}

#[derive(Debug, Serialize, PartialEq)]
struct ValidateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn decode(req: &ValidateRequest) -> Result<(TackExtension, [u8; 32]), String> {
    let extension = match (&req.extension, req.tacks.is_empty()) {
        (Some(encoded), true) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| format!("extension: {e}"))?;
            TackExtension::from_bytes(&bytes).map_err(|e| e.to_string())?
        }
        (None, false) => {
            let tacks = req
                .tacks
                .iter()
                .map(|pem| TackRecord::from_pem(pem))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            TackExtension::new(tacks).map_err(|e| e.to_string())?
        }
        _ => return Err("exactly one of extension or tacks is required".into()),
    };
    let key_hash: [u8; 32] = hex::decode(&req.key_hash)
        .map_err(|e| format!("key_hash: {e}"))?
        .try_into()
        .map_err(|_| "key_hash must be 32 bytes".to_string())?;
    Ok((extension, key_hash))
}

async fn validate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> (StatusCode, Json<ValidateResponse>) {
    let (extension, key_hash) = match decode(&req) {
        Ok(decoded) => decoded,
        Err(e) => {
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(ValidateResponse { status: None, error: Some(e) }));
        }
    };
    let now = req.current_time.unwrap_or_else(now_minutes);
    let result = state.validator.process(&ConnectionTacks::new(&extension, key_hash, now), &req.hostname, now);
    if state.store_path.is_some() {
        let saver = state.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || saver.persist()).await {
            warn!(error = %e, "pin store save task failed");
        }
    }
    match result {
        Ok(status) => (StatusCode::OK, Json(ValidateResponse { status: Some(status), error: None })),
        Err(e @ TackError::Revoked { .. }) => {
            (StatusCode::CONFLICT, Json(ValidateResponse { status: e.status(), error: Some(e.to_string()) }))
        }
        Err(e) => {
            error!(hostname = %req.hostname, error = %e, "validation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ValidateResponse { status: None, error: Some(e.to_string()) }))
        }
    }
}

async fn pins(State(state): State<Arc<AppState>>, Path(hostname): Path<String>) -> Json<Vec<Pin>> {
    Json(state.store.pin_pair(&hostname))
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .route("/pins/{hostname}", get(pins))
        .with_state(state)
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = ServerConfig::load(cli.config.as_deref())?;
    let store = match &cfg.store_path {
        Some(path) => InMemoryPinStore::load_from_path(path, cfg.pin_activation)?,
        None => InMemoryPinStore::new(cfg.pin_activation),
    };
    let state = Arc::new(AppState::new(Arc::new(store), cfg.store_path.clone()));

    let listener = tokio::net::TcpListener::bind(cfg.listen).await?;
    info!(addr = %cfg.listen, pin_activation = cfg.pin_activation, "tack-server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as B64;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use sha2::{Digest, Sha256};

    use super::*;

    const SPKI: &[u8] = b"server spki";

    fn signed_tack() -> TackRecord {
        let sk = SigningKey::random(&mut OsRng);
        TackRecord::unsigned(0, 0, u32::MAX, Sha256::digest(SPKI).into()).sign(&sk).unwrap()
    }

    fn request(tacks: Vec<String>, extension: Option<String>, current_time: u32) -> ValidateRequest {
        ValidateRequest {
            hostname: "example.com".into(),
            extension,
            tacks,
            key_hash: hex::encode(Sha256::digest(SPKI)),
            current_time: Some(current_time),
        }
    }

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Arc::new(InMemoryPinStore::new(true)), None))
    }

    #[test]
    fn decode_requires_exactly_one_source() {
        let t = signed_tack();
        let ext = B64.encode(TackExtension::new(vec![t.clone()]).unwrap().to_bytes());
        assert!(decode(&request(vec![], None, 0)).is_err());
        assert!(decode(&request(vec![t.to_pem()], Some(ext.clone()), 0)).is_err());
        assert_eq!(decode(&request(vec![t.to_pem()], None, 0)).unwrap().0.tacks(), &[t.clone()]);
        assert_eq!(decode(&request(vec![], Some(ext), 0)).unwrap().0.tacks(), &[t]);
    }

    #[test]
    fn decode_rejects_short_key_hash() {
        let mut req = request(vec![signed_tack().to_pem()], None, 0);
        req.key_hash = "abcd".into();
        assert_eq!(decode(&req).unwrap_err(), "key_hash must be 32 bytes");
    }

    #[tokio::test]
    async fn validate_pins_then_accepts() {
        let state = state();
        let pem = signed_tack().to_pem();

        let (code, Json(body)) = validate(State(state.clone()), Json(request(vec![pem.clone()], None, 100))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, Some(Status::Unpinned));

        validate(State(state.clone()), Json(request(vec![pem.clone()], None, 200))).await;
        let (_, Json(body)) = validate(State(state.clone()), Json(request(vec![pem], None, 250))).await;
        assert_eq!(body.status, Some(Status::Accepted));

        let Json(stored) = pins(State(state), Path("example.com".into())).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].end_time, 399);
    }

    #[tokio::test]
    async fn validate_reports_revocation() {
        let state = state();
        let t = signed_tack();
        state.store.set_min_generation(&t.key_fingerprint(), 3);
        let (code, Json(body)) = validate(State(state), Json(request(vec![t.to_pem()], None, 100))).await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(body.status, Some(Status::Unpinned));
        assert!(body.error.is_some());
    }

    #[tokio::test]
    async fn validate_persists_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pins.json");
        let state = Arc::new(AppState::new(Arc::new(InMemoryPinStore::new(true)), Some(path.clone())));
        validate(State(state), Json(request(vec![signed_tack().to_pem()], None, 100))).await;
        let reloaded = InMemoryPinStore::load_from_path(&path, true).unwrap();
        assert_eq!(reloaded.pin_pair("example.com").len(), 1);
    }

    // The save runs on the blocking pool, so a current-thread runtime must not stall on it.
    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_saves_finish_on_single_worker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pins.json");
        let state = Arc::new(AppState::new(Arc::new(InMemoryPinStore::new(true)), Some(path.clone())));
        let pem = signed_tack().to_pem();
        let mut calls = tokio::task::JoinSet::new();
        for i in 0..8u32 {
            calls.spawn(validate(State(state.clone()), Json(request(vec![pem.clone()], None, 100 + i))));
        }
        while let Some(joined) = calls.join_next().await {
            assert_eq!(joined.unwrap().0, StatusCode::OK);
        }
        let reloaded = InMemoryPinStore::load_from_path(&path, true).unwrap();
        assert_eq!(reloaded.pin_pair("example.com"), state.store.pin_pair("example.com"));
    }
}
