//! Transport-agnostic v1 request router.
//!
//! `RpcRouter` takes an `AppState` and routes `/v1/...` requests by path
//! depth. It is free of any HTTP framework dependency so the same router
//! backs the axum adapter and the CLI.
//!
//! | segments after `v1` | result                                   |
//! |---------------------|------------------------------------------|
//! | 0                   | distinct categories                      |
//! | 1                   | distinct versions in a category          |
//! | 2                   | distinct interfaces in category/version  |
//! | 3                   | sorted method names of the interface     |
//! | 4                   | invoke the method                        |

use serde_json::{Map, Value};

use super::binding::{self, bind_parameters, split_meta};
use super::error::RpcError;
use super::types::{JsonResponse, RpcContext, RpcRequest, RpcResponse};
use crate::descriptor::{InterfaceDecl, ServiceDescriptor};
use crate::executor::{Executor, MethodExecutor, SqlExecutor};
use crate::registry::ServiceDiscoverer;
use crate::state::AppState;

pub const PROTOCOL_VERSION: &str = "v1";

const PATH_FORM: &str =
    "Requests must be of the form GET or POST `/v1/{category}/{version}/{interface}/{method}`";

/// Transport-agnostic router.
///
/// # Usage
///
/// ```ignore
/// let router = RpcRouter::new(app_state);
/// let response = router.handle(RpcRequest::get("/v1/users/v1/queries/GetUser").query("id", "12")).await;
/// ```
#[derive(Clone)]
pub struct RpcRouter {
    state: AppState,
}

impl RpcRouter {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Route `target` (`path?query`) with the given verb.
    pub async fn handle_path(&self, method: &str, target: &str) -> RpcResponse {
        self.handle(RpcRequest::from_target(method, target)).await
    }

    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let (meta, pairs) = split_meta(request.parameters());
        let include_context = binding::include_context(&meta);
        let mut context = RpcContext {
            meta_parameter_values: (!meta.is_empty()).then(|| meta.clone()),
            ..RpcContext::default()
        };

        let outcome = self
            .route(&request, &meta, &pairs, &mut context)
            .await;
        let context = include_context.then_some(context);

        match outcome {
            Ok(results) => RpcResponse::new(JsonResponse::success(context, results)),
            Err(err) => {
                let status = err.status_code();
                if status >= 500 {
                    tracing::error!("[rpc] {} {} failed: {}", request.method, request.path, err);
                } else {
                    tracing::warn!("[rpc] {} {} rejected: {}", request.method, request.path, err);
                }
                RpcResponse::new(JsonResponse::failure(status, context, err.to_json_errors()))
            }
        }
    }

    async fn route(
        &self,
        request: &RpcRequest,
        meta: &Map<String, Value>,
        pairs: &[(&str, &str)],
        context: &mut RpcContext,
    ) -> Result<Value, RpcError> {
        let segments = split_path(&request.path);
        let Some((version, rest)) = segments.split_first() else {
            return Err(RpcError::InvalidRequest(PATH_FORM.to_string()));
        };
        if !version.eq_ignore_ascii_case(PROTOCOL_VERSION) {
            return Err(RpcError::InvalidRequest(format!(
                "Unknown API version '{}'",
                version
            )));
        }

        let services = self.services();
        match rest {
            [] => Ok(distinct(services.iter().map(|(_, d)| d.category.as_str()))),
            [category] => {
                let found = services
                    .iter()
                    .filter(|(_, d)| d.category.eq_ignore_ascii_case(category))
                    .collect::<Vec<_>>();
                let first = found
                    .first()
                    .ok_or_else(|| RpcError::NotFound(format!("Category '{}'", category)))?;
                context.category = Some(first.1.category.clone());
                Ok(distinct(found.iter().map(|(_, d)| d.version.as_str())))
            }
            [category, version] => {
                let found = services
                    .iter()
                    .filter(|(_, d)| {
                        d.category.eq_ignore_ascii_case(category)
                            && d.version.eq_ignore_ascii_case(version)
                    })
                    .collect::<Vec<_>>();
                let first = found.first().ok_or_else(|| {
                    RpcError::NotFound(format!("Category '{}', version '{}'", category, version))
                })?;
                context.category = Some(first.1.category.clone());
                context.version = Some(first.1.version.clone());
                Ok(distinct(found.iter().map(|(_, d)| d.name.as_str())))
            }
            [category, version, interface] => {
                let (decl, service) = find_service(&services, category, version, interface)?;
                fill_service(context, service);
                let valid = self.state.validator.validate_interface(&decl.type_name)?;
                Ok(Value::from(valid.method_names.clone()))
            }
            [category, version, interface, method] => {
                let (decl, service) = find_service(&services, category, version, interface)?;
                fill_service(context, service);
                self.invoke(&decl.type_name, method, request, meta, pairs, context)
                    .await
            }
            _ => Err(RpcError::InvalidRequest(PATH_FORM.to_string())),
        }
    }

    async fn invoke(
        &self,
        type_name: &str,
        method: &str,
        request: &RpcRequest,
        meta: &Map<String, Value>,
        pairs: &[(&str, &str)],
        context: &mut RpcContext,
    ) -> Result<Value, RpcError> {
        let executor = self.executor(type_name, method)?;
        context.method = Some(executor.method_name().to_string());

        if let Some(command) = binding::meta_command(meta) {
            context.meta_command = Some(command.to_string());
            return Ok(executor.execute_meta(command, meta).await?);
        }

        if !executor.http_method().matches(&request.method) {
            return Err(RpcError::WrongHttpMethod(executor.http_method()));
        }

        let values = bind_parameters(executor.parameters(), pairs)?;
        context.parameter_values = Some(
            values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        );

        tracing::debug!(
            "[rpc] invoking {}.{} with {} parameter(s)",
            executor.interface(),
            executor.method_name(),
            values.len()
        );
        Ok(executor.execute(values).await?)
    }

    fn executor(&self, type_name: &str, method: &str) -> Result<Box<dyn Executor>, RpcError> {
        let valid = self.state.validator.validate_method(type_name, method)?;
        if let Some(executor) = SqlExecutor::new(valid.clone()) {
            return Ok(Box::new(executor));
        }
        self.state
            .registry
            .implementation_for(type_name)
            .and_then(|imp| MethodExecutor::new(valid, &imp))
            .map(|executor| Box::new(executor) as Box<dyn Executor>)
            .ok_or_else(|| RpcError::NoImplementation(type_name.to_string()))
    }

    /// Every (declaration, service descriptor) pair, in declaration order.
    fn services(&self) -> Vec<(&InterfaceDecl, &ServiceDescriptor)> {
        self.state
            .registry
            .discover_interfaces()
            .into_iter()
            .flat_map(|decl| decl.services.iter().map(move |s| (decl, &s.descriptor)))
            .collect()
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .collect()
}

fn find_service<'a>(
    services: &[(&'a InterfaceDecl, &'a ServiceDescriptor)],
    category: &str,
    version: &str,
    interface: &str,
) -> Result<(&'a InterfaceDecl, &'a ServiceDescriptor), RpcError> {
    services
        .iter()
        .find(|(_, d)| d.matches(category, version, interface))
        .copied()
        .ok_or_else(|| {
            RpcError::NotFound(format!(
                "Category '{}', version '{}', interface '{}'",
                category, version, interface
            ))
        })
}

fn fill_service(context: &mut RpcContext, service: &ServiceDescriptor) {
    context.category = Some(service.category.clone());
    context.version = Some(service.version.clone());
    context.interface = Some(service.name.clone());
}

/// Distinct names, case-insensitively, keeping the first spelling seen.
fn distinct<'a>(names: impl Iterator<Item = &'a str>) -> Value {
    let mut out: Vec<&str> = Vec::new();
    for name in names {
        if !out.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
            out.push(name);
        }
    }
    Value::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::descriptor::{
        CommandDecl, CommandKind, DbType, HttpVerb, MethodDecl, ParamDecl, ParamDescriptor,
        ServiceDecl, SqlServiceDecl,
    };
    use crate::executor::{Arguments, Implementation};
    use crate::registry::ServiceRegistry;
    use crate::state::AppStateInner;
    use serde_json::json;
    use std::sync::Arc;

    fn router(dir: &tempfile::TempDir) -> RpcRouter {
        let db = dir.path().join("app.db");
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO users (id, name) VALUES (1, 'ann'), (2, 'bob');",
        )
        .unwrap();

        let users = InterfaceDecl::new("IUserQueries")
            .service(ServiceDecl::sql(
                ServiceDescriptor::new("Users", "v1", "Queries"),
                SqlServiceDecl {
                    connection: Some("main".into()),
                    text_processor: Some("query-macros".into()),
                },
            ))
            .method(
                MethodDecl::new("GetUserName", "Optional<string>")
                    .command(CommandDecl::query("SELECT {qualify u [name]} FROM users u WHERE u.id = @id"))
                    .param(ParamDecl::new("id", ParamDescriptor::new(DbType::Int))),
            )
            .method(
                MethodDecl::new("ListNames", "List<string>")
                    .command(CommandDecl::query("SELECT name FROM users WHERE id > @min ORDER BY id"))
                    .param(ParamDecl::new("min", ParamDescriptor::new(DbType::Int))),
            )
            .method(
                MethodDecl::new("Rename", "Effect")
                    .command(CommandDecl::new(
                        CommandKind::Update,
                        "UPDATE users SET name = @name WHERE id = @id",
                    ))
                    .param(ParamDecl::new("id", ParamDescriptor::new(DbType::Int)))
                    .param(ParamDecl::new("name", ParamDescriptor::new(DbType::NVarChar))),
            );
        let calc = InterfaceDecl::new("ICalculator")
            .service(ServiceDecl::json(ServiceDescriptor::new("Math", "v2", "Calc")))
            .method(
                MethodDecl::new("Add", "long")
                    .http(HttpVerb::Get)
                    .param(ParamDecl::new("a", ParamDescriptor::new(DbType::BigInt)))
                    .param(ParamDecl::new("b", ParamDescriptor::new(DbType::BigInt))),
            )
            .method(MethodDecl::new("Clear", "Effect").http(HttpVerb::Post));

        let registry = ServiceRegistry::builder()
            .interface(users)
            .interface(calc)
            .implementation(
                "ICalculator",
                Implementation::new().method("Add", |args: Arguments| async move {
                    Ok(args.get::<i64>("a")? + args.get::<i64>("b")?)
                }),
            )
            .build()
            .unwrap();
        let settings = Settings::default().with_connection("main", db.to_string_lossy());
        RpcRouter::new(Arc::new(AppStateInner::new(settings, registry)))
    }

    async fn get(router: &RpcRouter, target: &str) -> (u16, Value) {
        let response = router.handle_path("GET", target).await;
        (response.status, serde_json::to_value(&response.body).unwrap())
    }

    #[tokio::test]
    async fn test_listing_by_depth() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir);

        let (status, body) = get(&router, "/v1").await;
        assert_eq!(status, 200);
        assert_eq!(body["results"], json!(["Users", "Math"]));

        let (_, body) = get(&router, "/v1/users").await;
        assert_eq!(body["results"], json!(["v1"]));
        assert_eq!(body["context"]["category"], "Users");

        let (_, body) = get(&router, "/v1/USERS/V1").await;
        assert_eq!(body["results"], json!(["Queries"]));

        let (_, body) = get(&router, "/v1/users/v1/queries").await;
        assert_eq!(body["results"], json!(["GetUserName", "ListNames", "Rename"]));
        assert_eq!(body["context"]["interface"], "Queries");
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir);

        let (status, body) = get(&router, "/v1/unknownCategory").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["type"], "NotFoundError");
        assert!(body.get("results").is_none());

        let (status, body) = get(&router, "/v2/users").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["message"], "Unknown API version 'v2'");

        let (status, body) = get(&router, "/v1/a/b/c/d/e").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["type"], "InvalidRequestError");

        let (status, body) = get(&router, "/v1/users/v1/queries/Nope").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["type"], "UnknownMethodError");

        let (status, body) = get(&router, "/v1/users/v1/queries/Rename?id=1&name=%22x%22").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["message"], "This action requires the HTTP POST method");

        let (status, body) = get(&router, "/v1/math/v2/calc/clear").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["type"], "NoImplementationError");
    }

    #[tokio::test]
    async fn test_invoke_sql_methods() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir);

        let (status, body) = get(&router, "/v1/users/v1/queries/getusername?id=2").await;
        assert_eq!(status, 200);
        assert_eq!(body["results"], "bob");
        assert!(body.get("errors").is_none());
        assert_eq!(body["context"]["method"], "GetUserName");
        assert_eq!(body["context"]["parameterValues"], json!({ "id": 2 }));
        assert!(body["context"].get("metaParameterValues").is_none());

        let (_, body) = get(&router, "/v1/users/v1/queries/GetUserName?id=2&$context=true").await;
        assert_eq!(body["context"]["metaParameterValues"], json!({ "context": true }));

        let (status, body) = get(&router, "/v1/users/v1/queries/GetUserName?id=9").await;
        assert_eq!(status, 200);
        assert_eq!(body["results"], Value::Null);

        let (_, body) = get(&router, "/v1/users/v1/queries/ListNames?min=5&$context=false").await;
        assert_eq!(body["results"], json!([]));
        assert!(body.get("context").is_none());

        let (status, body) = get(&router, "/v1/users/v1/queries/GetUserName").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["type"], "MissingRequiredParameterError");
        assert!(body["errors"][0]["message"].as_str().unwrap().contains("'id'"));

        let response = router
            .handle(
                RpcRequest::post("/v1/users/v1/queries/Rename")
                    .form("id", "1")
                    .form("name", "\"anna\""),
            )
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body.results, Some(json!({ "recordsAffected": 1 })));

        let (_, body) = get(&router, "/v1/users/v1/queries/GetUserName?id=1").await;
        assert_eq!(body["results"], "anna");
    }

    #[tokio::test]
    async fn test_meta_commands() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir);

        // Meta path skips the verb check.
        let (status, body) = get(&router, "/v1/users/v1/queries/Rename?$meta=rawcommand").await;
        assert_eq!(status, 200);
        assert_eq!(
            body["results"],
            json!({ "rawcommand": "UPDATE users SET name = @name WHERE id = @id" })
        );
        assert_eq!(body["context"]["metaCommand"], "rawcommand");
        assert_eq!(body["context"]["metaParameterValues"], json!({ "meta": "rawcommand" }));

        let (_, body) = get(&router, "/v1/users/v1/queries/GetUserName?$meta=command").await;
        assert_eq!(
            body["results"]["command"],
            "SELECT [u].[name] FROM users u WHERE u.id = @id"
        );

        let (status, body) = get(&router, "/v1/users/v1/queries/GetUserName?$meta=plan").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["type"], "UnknownMetaCommandError");
    }

    #[tokio::test]
    async fn test_invoke_plain_method() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir);

        let (status, body) = get(&router, "/v1/math/v2/calc/Add?a=2&b=%2240%22").await;
        assert_eq!(status, 200);
        assert_eq!(body["results"], 42);

        let (status, body) = get(&router, "/v1/math/v2/calc/Add?a=2&b=x").await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["type"], "ParameterDecodeError");
    }
}
