//! Compile a validated method declaration into an executable command.

use std::fmt;
use std::sync::Arc;

use crate::config::ConnectionTarget;
use crate::db::Database;
use crate::descriptor::{CommandKind, ParamDescriptor, ResultShape, ReturnType};
use crate::error::DescriptorError;

use super::converter::{ConverterRegistry, ResultConverter};

/// One bound command parameter.
#[derive(Debug, Clone)]
pub struct SqlParameter {
    /// Request-side parameter name.
    pub name: String,
    /// Name bound in the command text, e.g. `@id`.
    pub bind_name: String,
    pub descriptor: ParamDescriptor,
}

impl SqlParameter {
    pub fn new(name: impl Into<String>, descriptor: ParamDescriptor) -> Self {
        let name = name.into();
        let bind_name = match &descriptor.name {
            Some(n) if n.starts_with(['@', ':', '$']) => n.clone(),
            Some(n) => format!("@{}", n),
            None => format!("@{}", name),
        };
        Self {
            name,
            bind_name,
            descriptor,
        }
    }
}

/// Everything needed to run a method's command, built once per method.
pub struct CompiledCommand {
    pub kind: CommandKind,
    pub shape: ResultShape,
    pub row_type: Option<String>,
    /// Present for `List` and `Optional`.
    pub converter: Option<Arc<dyn ResultConverter>>,
    /// Command text before preprocessing.
    pub raw_text: String,
    /// Command text after preprocessing; what actually runs.
    pub text: String,
    pub database: Database,
    pub parameters: Vec<SqlParameter>,
}

impl fmt::Debug for CompiledCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCommand")
            .field("kind", &self.kind)
            .field("shape", &self.shape)
            .field("row_type", &self.row_type)
            .field("text", &self.text)
            .field("connection", &self.database.target().name)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl CompiledCommand {
    pub fn compile(
        kind: CommandKind,
        returns: &ReturnType,
        converters: &ConverterRegistry,
        raw_text: String,
        text: String,
        target: ConnectionTarget,
        parameters: Vec<SqlParameter>,
    ) -> Result<Self, DescriptorError> {
        let converter = match (&returns.shape, &returns.row_type) {
            (ResultShape::Effect, _) | (_, None) => None,
            (_, Some(row_type)) => Some(converters.resolve(row_type)?),
        };

        Ok(Self {
            kind,
            shape: returns.shape,
            row_type: returns.row_type.clone(),
            converter,
            raw_text,
            text,
            database: Database::new(target),
            parameters,
        })
    }

    pub fn has_side_effects(&self) -> bool {
        self.kind.has_side_effects()
    }
}
