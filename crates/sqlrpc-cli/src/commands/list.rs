//! `sqlrpc list` — Print every discovered service.

use serde_json::{json, Value};
use sqlrpc_core::registry::ServiceDiscoverer;
use sqlrpc_core::state::AppState;

use super::print_json;

/// Describe the discovered services. With `validate_methods`, every routed
/// method is validated (and compiled) too and failures are reported inline.
pub fn describe(state: &AppState, validate_methods: bool) -> Value {
    let services: Vec<Value> = state
        .registry
        .discover_interfaces()
        .into_iter()
        .map(|decl| match state.validator.validate_interface(&decl.type_name) {
            Ok(valid) => {
                let mut entry = json!({
                    "type": valid.type_name,
                    "category": valid.service.category,
                    "version": valid.service.version,
                    "name": valid.service.name,
                    "kind": if valid.is_sql() { "sql" } else { "json" },
                    "methods": valid.method_names,
                });
                if validate_methods {
                    let errors: Vec<Value> = valid
                        .method_names
                        .iter()
                        .filter_map(|method| {
                            state
                                .validator
                                .validate_method(&decl.type_name, method)
                                .err()
                                .map(|e| {
                                    json!({
                                        "method": method,
                                        "type": e.type_name(),
                                        "message": e.to_string(),
                                    })
                                })
                        })
                        .collect();
                    entry["errors"] = Value::from(errors);
                }
                entry
            }
            Err(e) => json!({
                "type": decl.type_name,
                "error": { "type": e.type_name(), "message": e.to_string() },
            }),
        })
        .collect();

    json!({ "services": services })
}

pub async fn run(state: &AppState, validate_methods: bool) -> Result<(), String> {
    print_json(&describe(state, validate_methods));
    Ok(())
}
