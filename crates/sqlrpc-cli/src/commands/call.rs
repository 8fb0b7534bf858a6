//! `sqlrpc call` — Route one request in-process and print the envelope.

use sqlrpc_core::rpc::{RpcRequest, RpcRouter};
use sqlrpc_core::state::AppState;

use super::print_json;

/// Build a request from `target` (`/v1/...[?query]`) and `key=value` pairs.
///
/// Pairs go to the query string for GET and to the form body otherwise.
/// Values are passed through verbatim, so non-meta values must already be
/// JSON (`name='"ann"'`).
pub fn build_request(method: &str, target: &str, params: &[String]) -> Result<RpcRequest, String> {
    let mut request = RpcRequest::from_target(method.to_ascii_uppercase(), target);
    let is_get = request.method == "GET";
    for param in params {
        let (key, value) = param
            .split_once('=')
            .ok_or_else(|| format!("Invalid parameter '{}': expected key=value", param))?;
        request = if is_get {
            request.query(key, value)
        } else {
            request.form(key, value)
        };
    }
    Ok(request)
}

pub async fn run(
    state: &AppState,
    method: &str,
    target: &str,
    params: &[String],
) -> Result<(), String> {
    let request = build_request(method, target, params)?;
    let response = RpcRouter::new(state.clone()).handle(request).await;

    let body = serde_json::to_value(&response.body)
        .map_err(|e| format!("Failed to serialize response: {}", e))?;
    print_json(&body);

    if response.body.success {
        Ok(())
    } else {
        Err(format!("Request failed with status {}", response.status))
    }
}
