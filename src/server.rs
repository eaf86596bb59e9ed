//! Native asset route serving the hero model to the viewer.

use std::env;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const MODEL_ROUTE: &str = "/api/model";
pub const MODEL_CONTENT_TYPE: &str = "model/gltf-binary";
pub const MODEL_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MODEL_PATH: &str = "public/models/hero.glb";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("server error: {0}")]
    Serve(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub model_path: PathBuf,
    pub log_json: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads `HERO_VIEWER_*` settings through `lookup`. Unparseable
    /// booleans fall back to the default; an unparseable address does not.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let raw_addr = lookup("HERO_VIEWER_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = raw_addr
            .parse::<SocketAddr>()
            .map_err(|e| ServerError::Config(format!("HERO_VIEWER_ADDR={raw_addr}: {e}")))?;
        let model_path = lookup("HERO_VIEWER_MODEL_PATH")
            .filter(|p| !p.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH), PathBuf::from);
        let log_json = lookup("HERO_VIEWER_LOG_JSON").and_then(|v| parse_bool(&v)).unwrap_or(false);
        Ok(Self { addr, model_path, log_json })
    }
}

#[derive(Clone, Debug)]
pub struct AppState {
    model_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self { model_path: Arc::new(model_path.into()) }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(MODEL_ROUTE, get(model_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

async fn model_handler(State(state): State<AppState>) -> Response {
    match tokio::fs::read(state.model_path.as_path()).await {
        Ok(bytes) => {
            tracing::debug!(bytes = bytes.len(), "serving model");
            (
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static(MODEL_CONTENT_TYPE)),
                    (header::CACHE_CONTROL, HeaderValue::from_static(MODEL_CACHE_CONTROL)),
                ],
                bytes,
            )
                .into_response()
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(path = %state.model_path.display(), "model file missing");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err) => {
            tracing::error!(path = %state.model_path.display(), error = %err, "model read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `RUST_LOG` filter, default `info`. Also captures `log` records.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
    }
}

pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|source| ServerError::Bind { addr: config.addr, source })?;
    let local = listener.local_addr()?;
    if !config.model_path.exists() {
        tracing::warn!(path = %config.model_path.display(), "model file not present yet, the model route will answer 404");
    }
    tracing::info!(addr = %local, model = %config.model_path.display(), "asset server listening");

    axum::serve(listener, build_router(AppState::new(config.model_path)))
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;
    tracing::info!("asset server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.model_path, PathBuf::from("public/models/hero.glb"));
        assert!(!config.log_json);
    }

    #[test]
    fn overrides_and_lenient_booleans() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HERO_VIEWER_ADDR", "0.0.0.0:9000"),
            ("HERO_VIEWER_MODEL_PATH", "/srv/hero.glb"),
            ("HERO_VIEWER_LOG_JSON", "yes"),
        ]))
        .unwrap();
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.model_path, PathBuf::from("/srv/hero.glb"));
        assert!(config.log_json);

        let config = ServerConfig::from_lookup(lookup(&[("HERO_VIEWER_LOG_JSON", "maybe")])).unwrap();
        assert!(!config.log_json);
    }

    #[test]
    fn bad_address_is_a_config_error() {
        let err = ServerConfig::from_lookup(lookup(&[("HERO_VIEWER_ADDR", "localhost")])).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)), "{err}");
    }
}
