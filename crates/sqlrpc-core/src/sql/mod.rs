//! Database-command family: text sources, compilation, row conversion and
//! execution.

pub mod compiler;
pub mod converter;
pub mod executor;
pub mod source;

pub use compiler::{CompiledCommand, SqlParameter};
pub use converter::{ConverterRegistry, ResultConverter, RowReader};
pub use executor::{CommandExecutor, CommandOutput, CommandResult};
pub use source::{CommandTextSource, FileCommandSource};
