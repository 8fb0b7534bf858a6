//! sqlrpc Server - HTTP host for declarative RPC services
//!
//! A standalone axum server exposing the v1 routing protocol of
//! `sqlrpc-core`:
//! - `/{base}/v1/{category}/{version}/{interface}/{method}` via any verb
//! - `/health` for liveness probes
//!
//! This crate can be used standalone or embedded in other applications.

pub mod api;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use sqlrpc_core::config::Settings;
use sqlrpc_core::registry::ServiceRegistryBuilder;
use sqlrpc_core::state::{AppState, AppStateInner};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Configuration for the sqlrpc server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix the protocol is mounted under, e.g. `/api`. Empty mounts at `/`.
    pub base_path: String,
    /// YAML settings file; falls back to `SQLRPC_CONFIG`, then defaults.
    pub settings_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3210,
            base_path: "/api".to_string(),
            settings_path: None,
        }
    }
}

/// Load settings from `path` (or `SQLRPC_CONFIG`) and apply environment
/// overrides.
pub fn load_settings(path: Option<&std::path::Path>) -> Result<Settings, String> {
    match path {
        Some(path) => Settings::from_yaml_file(path).and_then(Settings::with_env_overrides),
        None => Settings::from_env(),
    }
    .map_err(|e| format!("Failed to load settings: {}", e))
}

/// Create a shared `AppState` from settings, loading their manifests.
///
/// Services registered in code go in `builder`; pass
/// `ServiceRegistry::builder()` when everything comes from manifests.
pub fn create_app_state(
    settings: Settings,
    builder: ServiceRegistryBuilder,
) -> Result<AppState, String> {
    let state = AppStateInner::load_with(settings, builder)
        .map_err(|e| format!("Failed to build service registry: {}", e))?;
    Ok(Arc::new(state))
}

/// Build the complete application router.
pub fn build_app(base_path: &str, state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::api_router(base_path))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the sqlrpc server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    // Initialize tracing; an embedding binary may already have done so.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sqlrpc_server=info,sqlrpc_core=info,tower_http=info".into()),
        )
        .try_init();

    tracing::info!(
        "Starting sqlrpc server on {}:{}",
        config.host,
        config.port
    );

    let settings = load_settings(config.settings_path.as_deref())?;
    let state = create_app_state(settings, sqlrpc_core::ServiceRegistry::builder())?;

    start_server_with_state(config, state).await
}

/// Start the HTTP server with a pre-built `AppState`.
///
/// This variant is useful when services are registered in code, or when the
/// state is shared with another consumer such as the CLI.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let app = build_app(&config.base_path, state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!(
        "sqlrpc server listening on {} (protocol under '{}/v1')",
        local_addr,
        api::normalize_base_path(&config.base_path)
    );

    // Spawn the server in a background task
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "sqlrpc-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
