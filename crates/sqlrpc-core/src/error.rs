//! Core error types.
//!
//! `DescriptorError` covers everything that can go wrong while turning a
//! declaration into a validated, compiled descriptor. These reflect a broken
//! contract, not a bad request, and surface as HTTP 500 (except
//! `UnknownMethod`, which a request can trigger by naming a method that does
//! not exist).
//!
//! `ExecutionError` covers failures while running a validated method.

use crate::macros::MacroError;

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Type '{0}' is not declared")]
    UnknownInterface(String),

    #[error("Type '{0}' is not an interface")]
    NotAnInterface(String),

    #[error("Interface '{type_name}' must declare exactly one service descriptor, found {found}")]
    MissingServiceDescriptor { type_name: String, found: usize },

    #[error("Method named '{method}' does not exist on interface '{type_name}'")]
    UnknownMethod { type_name: String, method: String },

    #[error("Overloaded method '{method}' is not allowed in RPC interface '{type_name}'")]
    AmbiguousMethod { type_name: String, method: String },

    #[error("Method '{method}' on interface '{type_name}' has no {expected} descriptor declared")]
    MissingMethodDescriptor {
        type_name: String,
        method: String,
        expected: &'static str,
    },

    #[error("Method '{method}' on interface '{type_name}' parameter '{parameter}' has no parameter descriptor declared")]
    MissingParameterDescriptor {
        type_name: String,
        method: String,
        parameter: String,
    },

    #[error("Method '{method}' on interface '{type_name}' declares parameter '{parameter}' more than once")]
    DuplicateParameter {
        type_name: String,
        method: String,
        parameter: String,
    },

    #[error("Method '{method}' on interface '{type_name}' returns `{returns}`; return type must be one of: `Effect`, `Optional<T>`, `List<T>`")]
    UnsupportedResultShape {
        type_name: String,
        method: String,
        returns: String,
    },

    #[error("No connection name specified for method '{method}' on interface '{type_name}' or its service descriptor")]
    MissingConnectionName { type_name: String, method: String },

    #[error("Connection name '{0}' is not configured")]
    UnknownConnection(String),

    #[error("Connection string for '{connection}' is invalid: {message}")]
    InvalidConnectionString { connection: String, message: String },

    #[error("Could not find a result converter for row type `{row_type}` (expected a registered `{convention}`)")]
    NoConverterFound { row_type: String, convention: String },

    #[error("Text processor '{0}' is not registered")]
    UnknownTextProcessor(String),

    #[error("While processing command text of method '{method}' on interface '{type_name}'")]
    CommandText {
        type_name: String,
        method: String,
        #[source]
        source: MacroError,
    },
}

impl DescriptorError {
    /// Short type name reported in the error envelope.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::UnknownInterface(_) => "UnknownInterfaceError",
            Self::NotAnInterface(_) => "NotAnInterfaceError",
            Self::MissingServiceDescriptor { .. } => "MissingServiceDescriptorError",
            Self::UnknownMethod { .. } => "UnknownMethodError",
            Self::AmbiguousMethod { .. } => "AmbiguousMethodError",
            Self::MissingMethodDescriptor { .. } => "MissingMethodDescriptorError",
            Self::MissingParameterDescriptor { .. } => "MissingParameterDescriptorError",
            Self::DuplicateParameter { .. } => "DuplicateParameterError",
            Self::UnsupportedResultShape { .. } => "UnsupportedResultShapeError",
            Self::MissingConnectionName { .. } => "MissingConnectionNameError",
            Self::UnknownConnection(_) => "UnknownConnectionError",
            Self::InvalidConnectionString { .. } => "InvalidConnectionStringError",
            Self::NoConverterFound { .. } => "NoConverterFoundError",
            Self::UnknownTextProcessor(_) => "UnknownTextProcessorError",
            Self::CommandText { .. } => "CommandTextError",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to open connection '{connection}'")]
    Connect {
        connection: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Timed out after {seconds}s while {operation}")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to convert result row {row}: {message}")]
    Conversion { row: usize, message: String },

    #[error("One or more required parameters are missing: {}", .0.join(", "))]
    MissingArguments(Vec<String>),

    #[error("{message}")]
    Handler {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unknown meta command '{0}'")]
    UnknownMetaCommand(String),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl ExecutionError {
    /// Build a handler failure from a plain message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary error raised by a method implementation.
    pub fn from_handler<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handler {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "ConnectionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Database(_) => "DatabaseError",
            Self::Conversion { .. } => "ConversionError",
            Self::MissingArguments(_) => "MissingArgumentsError",
            Self::Handler { .. } => "HandlerError",
            Self::UnknownMetaCommand(_) => "UnknownMetaCommandError",
            Self::Join(_) => "TaskJoinError",
        }
    }
}
