//! Integration tests for the sqlrpc-cli commands.
//!
//! These tests exercise the same code paths as the binary against the
//! sample manifest in `config/`, using a temporary SQLite database.

use std::path::{Path, PathBuf};

use sqlrpc_cli::commands;
use sqlrpc_core::rpc::RpcRouter;
use sqlrpc_core::state::AppState;

fn sample_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

/// Create an AppState over a fresh database seeded from the sample schema.
fn test_state(dir: &tempfile::TempDir) -> AppState {
    let db = dir.path().join("app.db");
    let conn = rusqlite::Connection::open(&db).expect("Failed to open database");
    let schema = std::fs::read_to_string(sample_dir().join("schema.sql")).unwrap();
    conn.execute_batch(&schema).unwrap();
    conn.execute_batch(
        "INSERT INTO users (id, name, email) VALUES (1, 'ann', 'ann@example.com');
         INSERT INTO users (id, name, email, active) VALUES (2, 'bob', NULL, 0);",
    )
    .unwrap();

    let settings = dir.path().join("sqlrpc.yaml");
    std::fs::write(
        &settings,
        format!(
            "connectionStrings:\n  main: \"{db}\"\n  reports: \"Data Source={db};Mode=ReadOnly\"\ncommandRoot: \"{root}\"\nmanifests:\n  - \"{manifest}\"\n",
            db = db.display(),
            root = sample_dir().display(),
            manifest = sample_dir().join("services.yaml").display(),
        ),
    )
    .unwrap();

    commands::init_state(Some(&settings)).expect("Failed to build state")
}

async fn call(
    state: &AppState,
    method: &str,
    target: &str,
    params: &[&str],
) -> (u16, serde_json::Value) {
    let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    let request = commands::call::build_request(method, target, &params).unwrap();
    let response = RpcRouter::new(state.clone()).handle(request).await;
    (response.status, serde_json::to_value(&response.body).unwrap())
}

#[tokio::test]
async fn test_list_services() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let listing = commands::list::describe(&state, true);
    let services = listing["services"].as_array().unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(services[0]["type"], "IUserQueries");
    assert_eq!(services[0]["kind"], "sql");
    assert_eq!(
        services[0]["methods"],
        serde_json::json!(["CountActive", "FindUsers", "GetUser"])
    );
    assert_eq!(services[0]["errors"], serde_json::json!([]));
    assert_eq!(services[1]["name"], "admin");
}

#[tokio::test]
async fn test_query_methods() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let (status, body) = call(&state, "GET", "/v1/users/v1/queries/GetUser", &["id=1"]).await;
    assert_eq!(status, 200);
    assert_eq!(
        body["results"],
        serde_json::json!({ "id": 1, "name": "ann", "email": "ann@example.com", "active": 1 })
    );

    let (_, body) = call(&state, "GET", "/v1/users/v1/queries/FindUsers", &[]).await;
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    assert_eq!(body["results"][1]["email"], serde_json::Value::Null);

    let (_, body) = call(
        &state,
        "GET",
        "/v1/users/v1/queries/FindUsers?name=%22b%25%22",
        &[],
    )
    .await;
    assert_eq!(body["results"][0]["name"], "bob");

    let (_, body) = call(&state, "GET", "/v1/users/v1/queries/CountActive", &["$context=false"]).await;
    assert_eq!(body["results"], serde_json::json!([1]));
    assert!(body.get("context").is_none());
}

#[tokio::test]
async fn test_command_methods() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let (status, body) = call(
        &state,
        "POST",
        "/v1/users/v1/admin/AddUser",
        &["name=\"cy\""],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["results"]["recordsAffected"], 1);

    // The override file only deactivates active users.
    let (_, body) = call(&state, "POST", "/v1/users/v1/admin/Deactivate", &["id=2"]).await;
    assert_eq!(body["results"]["recordsAffected"], 0);

    let (_, body) = call(
        &state,
        "GET",
        "/v1/users/v1/admin/Deactivate?$meta=rawcommand",
        &[],
    )
    .await;
    assert_eq!(
        body["results"]["rawcommand"]
            .as_str()
            .unwrap()
            .trim_end(),
        "UPDATE users SET active = 0 WHERE id = @id AND active = 1"
    );

    let (status, body) = call(&state, "GET", "/v1/users/v1/admin/AddUser", &["name=\"x\""]).await;
    assert_eq!(status, 400);
    assert_eq!(body["errors"][0]["type"], "WrongHttpMethodError");
}

#[test]
fn test_build_request_routes_params_by_verb() {
    let params = vec!["id=1".to_string(), "$meta=command".to_string()];
    let get = commands::call::build_request("get", "/v1/a/b/c/d?x=1", &params).unwrap();
    assert_eq!(get.method, "GET");
    assert_eq!(get.query.len(), 3);
    assert!(get.form.is_empty());

    let post = commands::call::build_request("post", "/v1/a/b/c/d", &params).unwrap();
    assert_eq!(post.form.len(), 2);

    assert!(commands::call::build_request("GET", "/v1", &["nope".to_string()]).is_err());
}

#[test]
fn test_preprocess() {
    let out = commands::preprocess::render(
        "minilisp",
        "SELECT {prefix u [id, name]} FROM users u -- {not a macro}",
    )
    .unwrap();
    assert_eq!(
        out,
        "SELECT [u].[id] AS [u_id], [u].[name] AS [u_name] FROM users u -- {not a macro}"
    );

    let err = commands::preprocess::render("query-macros", "SELECT {qualify u}").unwrap_err();
    assert!(err.starts_with("MacroArityError"));

    assert!(commands::preprocess::render("unknown", "SELECT 1").is_err());
}
