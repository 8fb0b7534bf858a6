//! The v1 protocol endpoint powered by `sqlrpc_core::rpc`.
//!
//! Every path and verb under the mount point goes to one handler, which
//! converts the axum request into an `RpcRequest`. The query string feeds
//! GET requests; any other verb reads a form-encoded body.

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, Uri},
    routing::any,
    Router,
};
use sqlrpc_core::rpc::types::parse_urlencoded;
use sqlrpc_core::rpc::{RpcRequest, RpcResponse, RpcRouter};
use sqlrpc_core::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", any(rpc_handler))
        .route("/{*path}", any(rpc_handler))
}

/// ANY /{base}/v1/... — route through the protocol router.
async fn rpc_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> RpcResponse {
    let query = uri.query().map(parse_urlencoded).unwrap_or_default();
    let form = if method == Method::GET {
        Vec::new()
    } else {
        parse_urlencoded(&String::from_utf8_lossy(&body))
    };

    let request = RpcRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query,
        form,
    };
    RpcRouter::new(state).handle(request).await
}
