//! Router-level error and its rendering into envelope error records.

use std::error::Error as StdError;

use super::types::JsonError;
use crate::descriptor::HttpVerb;
use crate::error::{DescriptorError, ExecutionError};
use crate::macros::MacroError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("This action requires the HTTP {0} method")]
    WrongHttpMethod(HttpVerb),

    #[error("Missing required parameter '{name}' of type '{type_name}'")]
    MissingRequiredParameter { name: String, type_name: String },

    #[error("Invalid parameter format for '{name}' of type '{type_name}'; failed while parsing: {reason}")]
    ParameterDecode {
        name: String,
        type_name: String,
        reason: String,
    },

    #[error("No implementation is registered for interface '{0}'")]
    NoImplementation(String),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl RpcError {
    /// HTTP status mirrored in the envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            RpcError::InvalidRequest(_)
            | RpcError::NotFound(_)
            | RpcError::WrongHttpMethod(_)
            | RpcError::MissingRequiredParameter { .. }
            | RpcError::ParameterDecode { .. }
            | RpcError::NoImplementation(_) => 400,
            RpcError::Descriptor(DescriptorError::UnknownMethod { .. }) => 400,
            RpcError::Descriptor(_) => 500,
            RpcError::Execution(ExecutionError::UnknownMetaCommand(_))
            | RpcError::Execution(ExecutionError::MissingArguments(_)) => 400,
            RpcError::Execution(_) => 500,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RpcError::InvalidRequest(_) => "InvalidRequestError",
            RpcError::NotFound(_) => "NotFoundError",
            RpcError::WrongHttpMethod(_) => "WrongHttpMethodError",
            RpcError::MissingRequiredParameter { .. } => "MissingRequiredParameterError",
            RpcError::ParameterDecode { .. } => "ParameterDecodeError",
            RpcError::NoImplementation(_) => "NoImplementationError",
            RpcError::Descriptor(e) => e.type_name(),
            RpcError::Execution(e) => e.type_name(),
        }
    }

    /// Render as a single error record with the cause chain nested in `inner`.
    pub fn to_json_errors(&self) -> Vec<JsonError> {
        let mut record = JsonError::new(self.to_string(), self.type_name());
        if let RpcError::Execution(ExecutionError::Database(err)) = self {
            record = with_sqlite_fields(record, err);
        }
        let cause = match self {
            RpcError::Descriptor(e) => e.source(),
            RpcError::Execution(e) => e.source(),
            _ => None,
        };
        vec![record.with_inner(cause_chain(cause))]
    }
}

fn cause_chain(mut current: Option<&(dyn StdError + 'static)>) -> Vec<JsonError> {
    let mut chain = Vec::new();
    while let Some(err) = current {
        chain.push(describe(err));
        current = err.source();
    }
    // Nest each cause inside the previous one.
    chain
        .into_iter()
        .rev()
        .fold(Vec::new(), |inner, record| vec![record.with_inner(inner)])
}

fn describe(err: &(dyn StdError + 'static)) -> JsonError {
    if let Some(e) = err.downcast_ref::<rusqlite::Error>() {
        return with_sqlite_fields(JsonError::new(e.to_string(), "SqliteError"), e);
    }
    if let Some(e) = err.downcast_ref::<MacroError>() {
        let record = JsonError::new(e.to_string(), e.type_name());
        return match e {
            MacroError::Syntax { offset, .. } => record.with_field("offset", *offset),
            _ => record,
        };
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return JsonError::new(err.to_string(), "IoError");
    }
    JsonError::new(err.to_string(), "Error")
}

fn with_sqlite_fields(record: JsonError, err: &rusqlite::Error) -> JsonError {
    match err.sqlite_error() {
        Some(ffi) => record
            .with_code(format!("{:?}", ffi.code))
            .with_field("number", ffi.extended_code),
        None => record,
    }
}
