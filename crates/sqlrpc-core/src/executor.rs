//! The uniform dispatch contract.
//!
//! The router never cares whether a method is backed by a database command
//! or by code: it resolves an [`Executor`] and calls it with the decoded
//! parameter values.
//!
//! Plain-method interfaces register an [`Implementation`], a table of typed
//! async closures keyed by method name:
//!
//! ```ignore
//! let imp = Implementation::new().method("Add", |args: Arguments| async move {
//!     let a: i64 = args.get("a")?;
//!     let b: i64 = args.get("b")?;
//!     Ok(a + b)
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::descriptor::{HttpVerb, ParamValue, ServiceDescriptor};
use crate::error::ExecutionError;
use crate::sql::executor::CommandExecutor;
use crate::validate::{ValidMethod, ValidParam};

/// Decoded request parameters keyed by declared parameter name.
pub type ParameterValues = HashMap<String, ParamValue>;

/// Meta parameters (`$`-prefixed in the request), keyed without the `$`.
pub type MetaParameters = Map<String, Value>;

#[async_trait]
pub trait Executor: Send + Sync {
    fn service(&self) -> &ServiceDescriptor;

    /// Declared interface type name.
    fn interface(&self) -> &str;

    fn method_name(&self) -> &str;

    fn http_method(&self) -> HttpVerb;

    fn parameters(&self) -> &[ValidParam];

    async fn execute(&self, values: ParameterValues) -> Result<Value, ExecutionError>;

    async fn execute_meta(
        &self,
        command: &str,
        meta: &MetaParameters,
    ) -> Result<Value, ExecutionError>;
}

/// Executor for a database-command method.
pub struct SqlExecutor {
    method: Arc<ValidMethod>,
    command: CommandExecutor,
}

impl SqlExecutor {
    /// `None` when the method has no compiled command.
    pub fn new(method: Arc<ValidMethod>) -> Option<Self> {
        let command = CommandExecutor::new(method.command.clone()?);
        Some(Self { method, command })
    }

    pub fn command(&self) -> &CommandExecutor {
        &self.command
    }
}

#[async_trait]
impl Executor for SqlExecutor {
    fn service(&self) -> &ServiceDescriptor {
        &self.method.interface.service
    }

    fn interface(&self) -> &str {
        &self.method.interface.type_name
    }

    fn method_name(&self) -> &str {
        &self.method.name
    }

    fn http_method(&self) -> HttpVerb {
        self.method.verb
    }

    fn parameters(&self) -> &[ValidParam] {
        &self.method.parameters
    }

    async fn execute(&self, values: ParameterValues) -> Result<Value, ExecutionError> {
        Ok(self.command.execute(&values).await?.into_json())
    }

    async fn execute_meta(
        &self,
        command: &str,
        meta: &MetaParameters,
    ) -> Result<Value, ExecutionError> {
        self.command.execute_meta(command, meta)
    }
}

type Handler = Arc<dyn Fn(Arguments) -> BoxFuture<'static, Result<Value, ExecutionError>> + Send + Sync>;

/// Dispatch table for a plain-method interface.
#[derive(Clone, Default)]
pub struct Implementation {
    handlers: HashMap<String, Handler>,
}

impl Implementation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `name`.
    pub fn method<F, Fut, R>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ExecutionError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args: Arguments| {
            let fut = handler(args);
            async move {
                let result = fut.await?;
                serde_json::to_value(result).map_err(ExecutionError::from_handler)
            }
            .boxed()
        });
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Handler by exact name, then case-insensitively.
    fn handler(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned().or_else(|| {
            self.handlers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, h)| h.clone())
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Executor for a plain-method interface.
pub struct MethodExecutor {
    method: Arc<ValidMethod>,
    handler: Handler,
}

impl MethodExecutor {
    /// `None` when `implementation` has no handler for the method.
    pub fn new(method: Arc<ValidMethod>, implementation: &Implementation) -> Option<Self> {
        let handler = implementation.handler(&method.name)?;
        Some(Self { method, handler })
    }
}

#[async_trait]
impl Executor for MethodExecutor {
    fn service(&self) -> &ServiceDescriptor {
        &self.method.interface.service
    }

    fn interface(&self) -> &str {
        &self.method.interface.type_name
    }

    fn method_name(&self) -> &str {
        &self.method.name
    }

    fn http_method(&self) -> HttpVerb {
        self.method.verb
    }

    fn parameters(&self) -> &[ValidParam] {
        &self.method.parameters
    }

    async fn execute(&self, values: ParameterValues) -> Result<Value, ExecutionError> {
        let missing: Vec<String> = self
            .method
            .parameters
            .iter()
            .filter(|p| !p.optional && !values.contains_key(&p.name))
            .map(|p| p.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(ExecutionError::MissingArguments(missing));
        }

        (self.handler)(Arguments::new(values)).await
    }

    async fn execute_meta(
        &self,
        command: &str,
        _meta: &MetaParameters,
    ) -> Result<Value, ExecutionError> {
        Err(ExecutionError::UnknownMetaCommand(command.to_string()))
    }
}

/// Typed access to the arguments of a plain-method call.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: ParameterValues,
}

impl Arguments {
    pub fn new(values: ParameterValues) -> Self {
        Self { values }
    }

    /// Required argument; missing or `null` is an error.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, ExecutionError> {
        self.get_opt(name)?
            .ok_or_else(|| ExecutionError::MissingArguments(vec![name.to_string()]))
    }

    /// Optional argument; missing or `null` is `None`.
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ExecutionError> {
        match self.values.get(name) {
            None | Some(ParamValue::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.to_json()).map(Some).map_err(|e| {
                ExecutionError::handler(format!("argument '{}' has the wrong type: {}", name, e))
            }),
        }
    }

    pub fn raw(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn into_values(self) -> ParameterValues {
        self.values
    }
}
