//! Admission webhook HTTP server.

pub mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::admission::{Admission, AdmissionReview, WebhookMode};
use crate::config::LuagateToml;
use crate::errors::AdmissionError;
use crate::pipeline::observer::ShapeRegistry;

/// Configuration for the webhook server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mutating_path: String,
    pub validating_path: String,
    pub request_timeout: Duration,
    pub expose_stubs: bool,
    /// Certificate and key; plain HTTP when absent
    pub tls: Option<(PathBuf, PathBuf)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            mutating_path: "/mutate".to_string(),
            validating_path: "/validate".to_string(),
            request_timeout: Duration::from_secs(10),
            expose_stubs: false,
            tls: None,
        }
    }
}

impl From<&LuagateToml> for ServerConfig {
    fn from(toml: &LuagateToml) -> Self {
        Self {
            host: toml.server.host.clone(),
            port: toml.server.port,
            mutating_path: toml.server.mutating_path.clone(),
            validating_path: toml.server.validating_path.clone(),
            request_timeout: Duration::from_secs(toml.server.request_timeout_secs),
            expose_stubs: toml.server.expose_stubs,
            tls: toml
                .tls
                .paths()
                .map(|(cert, key)| (cert.to_path_buf(), key.to_path_buf())),
        }
    }
}

pub struct AppState {
    pub admission: Admission,
    /// Shapes observed so far; only present when stubs are exposed
    pub shapes: Option<Arc<ShapeRegistry>>,
}

pub type SharedState = Arc<AppState>;

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<AdmissionError> for ApiError {
    fn from(e: AdmissionError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

/// Build the router with both admission endpoints and health probes.
///
/// Fails when the admission paths are not absolute or collide.
pub fn build_router(state: SharedState, config: &ServerConfig) -> Result<Router> {
    for path in [&config.mutating_path, &config.validating_path] {
        if !path.starts_with('/') {
            anyhow::bail!("Admission path '{}' must start with '/'", path);
        }
        if matches!(path.as_str(), "/healthz" | "/readyz" | "/stubs") {
            anyhow::bail!("Admission path '{}' is reserved", path);
        }
    }
    if config.mutating_path == config.validating_path {
        anyhow::bail!(
            "Mutating and validating paths must differ (both are '{}')",
            config.mutating_path
        );
    }

    let mut router = Router::new()
        .route(&config.mutating_path, post(mutate))
        .route(&config.validating_path, post(validate))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));
    if config.expose_stubs {
        router = router.route("/stubs", get(stubs));
    }

    Ok(router
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        ))
}

async fn mutate(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<AdmissionReview>, ApiError> {
    review(&state, WebhookMode::Mutating, &body).await
}

async fn validate(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<AdmissionReview>, ApiError> {
    review(&state, WebhookMode::Validating, &body).await
}

async fn review(
    state: &AppState,
    mode: WebhookMode,
    body: &[u8],
) -> Result<Json<AdmissionReview>, ApiError> {
    match state.admission.review_bytes(mode, body).await {
        Ok(review) => Ok(Json(review)),
        Err(e) => {
            tracing::warn!(%mode, error = %e, "Rejecting admission request");
            Err(e.into())
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ready"
}

async fn stubs(State(state): State<SharedState>) -> Result<String, ApiError> {
    state
        .shapes
        .as_ref()
        .map(|shapes| shapes.render_stubs())
        .ok_or_else(|| ApiError::NotFound("Stub generation is disabled".into()))
}

/// Bind and serve until SIGINT or SIGTERM.
pub async fn start_server(config: ServerConfig, state: SharedState) -> Result<()> {
    let app = build_router(state, &config)?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr: SocketAddr = listener.local_addr()?;

    match &config.tls {
        Some((cert, key)) => {
            let tls_config = tls::load_server_config(cert, key)?;
            tracing::info!(
                address = %local_addr,
                mutating = %config.mutating_path,
                validating = %config.validating_path,
                "Webhook listening (https)"
            );
            tls::serve(listener, app, tls_config, shutdown_signal()).await?;
        }
        None => {
            tracing::warn!("No TLS certificate configured; serving plain HTTP");
            tracing::info!(
                address = %local_addr,
                mutating = %config.mutating_path,
                validating = %config.validating_path,
                "Webhook listening (http)"
            );
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")?;
        }
    }

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
