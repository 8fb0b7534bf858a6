//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses the
//! sqlrpc-core runtime through `AppState`.

pub mod call;
pub mod list;
pub mod preprocess;
pub mod server;

use std::path::Path;

use sqlrpc_core::registry::ServiceRegistry;
use sqlrpc_core::state::AppState;

/// Build a shared `AppState` from the settings file (or `SQLRPC_CONFIG`).
pub fn init_state(config: Option<&Path>) -> Result<AppState, String> {
    let settings = sqlrpc_server::load_settings(config)?;
    sqlrpc_server::create_app_state(settings, ServiceRegistry::builder())
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
