pub mod rpc;

use axum::Router;
use sqlrpc_core::state::AppState;

/// Build the protocol router mounted under `base_path`.
pub fn api_router(base_path: &str) -> Router<AppState> {
    match normalize_base_path(base_path).as_str() {
        "" => rpc::router(),
        prefix => Router::new().nest(prefix, rpc::router()),
    }
}

/// `api/` → `/api`; `/` and empty → empty.
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("api/"), "/api");
        assert_eq!(normalize_base_path("/svc/rpc"), "/svc/rpc");
    }
}
