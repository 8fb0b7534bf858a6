//! Runs a [`CompiledCommand`] against its connection.

use std::sync::Arc;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::descriptor::{ParamValue, ResultShape};
use crate::error::ExecutionError;
use crate::executor::ParameterValues;

use super::compiler::CompiledCommand;
use super::converter::RowReader;

/// Output of an `Effect` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub records_affected: usize,
}

/// Output of one execution, by result shape.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    List(Vec<Value>),
    Optional(Option<Value>),
    Effect(CommandResult),
}

impl CommandOutput {
    pub fn into_json(self) -> Value {
        match self {
            Self::List(rows) => Value::Array(rows),
            Self::Optional(row) => row.unwrap_or(Value::Null),
            Self::Effect(result) => serde_json::json!({ "recordsAffected": result.records_affected }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Arc<CompiledCommand>,
}

impl CommandExecutor {
    pub fn new(command: Arc<CompiledCommand>) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &CompiledCommand {
        &self.command
    }

    /// Execute with the given parameter values; absent values bind as NULL.
    pub async fn execute(&self, values: &ParameterValues) -> Result<CommandOutput, ExecutionError> {
        let bound = self.bind(values);
        let command = self.command.clone();
        tracing::debug!(
            "Executing {:?} command on '{}' with {} parameter(s)",
            command.kind,
            command.database.target().name,
            bound.len()
        );
        self.command
            .database
            .with_conn_async(move |conn| run(&command, conn, &bound))
            .await
    }

    pub async fn execute_list_as<T: DeserializeOwned>(
        &self,
        values: &ParameterValues,
    ) -> Result<Vec<T>, ExecutionError> {
        match self.execute(values).await? {
            CommandOutput::List(rows) => rows
                .into_iter()
                .enumerate()
                .map(|(row, value)| from_json(row, value))
                .collect(),
            other => Err(shape_mismatch(ResultShape::List, &other)),
        }
    }

    pub async fn execute_optional_as<T: DeserializeOwned>(
        &self,
        values: &ParameterValues,
    ) -> Result<Option<T>, ExecutionError> {
        match self.execute(values).await? {
            CommandOutput::Optional(row) => row.map(|value| from_json(0, value)).transpose(),
            other => Err(shape_mismatch(ResultShape::Optional, &other)),
        }
    }

    pub async fn execute_effect(
        &self,
        values: &ParameterValues,
    ) -> Result<CommandResult, ExecutionError> {
        match self.execute(values).await? {
            CommandOutput::Effect(result) => Ok(result),
            other => Err(shape_mismatch(ResultShape::Effect, &other)),
        }
    }

    /// Inspect the command text instead of running it.
    ///
    /// `command` returns the processed text, `rawcommand` the text before
    /// preprocessing. With `lines: true` the text is split into lines.
    pub fn execute_meta(
        &self,
        command: &str,
        meta: &Map<String, Value>,
    ) -> Result<Value, ExecutionError> {
        let key = command.to_ascii_lowercase();
        let text = match key.as_str() {
            "command" => &self.command.text,
            "rawcommand" => &self.command.raw_text,
            _ => return Err(ExecutionError::UnknownMetaCommand(command.to_string())),
        };

        let split = matches!(meta.get("lines"), Some(Value::Bool(true)))
            || matches!(meta.get("lines"), Some(Value::String(s)) if s.eq_ignore_ascii_case("true"));
        let rendered = if split {
            Value::Array(
                text.split('\n')
                    .map(|line| Value::String(line.trim_end_matches('\r').to_string()))
                    .collect(),
            )
        } else {
            Value::String(text.clone())
        };

        let mut out = Map::new();
        out.insert(key, rendered);
        Ok(Value::Object(out))
    }

    fn bind(&self, values: &ParameterValues) -> Vec<(String, ParamValue)> {
        self.command
            .parameters
            .iter()
            .map(|p| {
                let value = values.get(&p.name).cloned().unwrap_or(ParamValue::Null);
                (p.bind_name.clone(), value)
            })
            .collect()
    }
}

fn run(
    command: &CompiledCommand,
    conn: &Connection,
    bound: &[(String, ParamValue)],
) -> Result<CommandOutput, ExecutionError> {
    let mut stmt = conn.prepare(&command.text)?;
    for (name, value) in bound {
        // Declared parameters the text never references are skipped.
        if let Some(index) = stmt.parameter_index(name)? {
            stmt.raw_bind_parameter(index, value)?;
        }
    }

    if command.shape == ResultShape::Effect {
        let records_affected = stmt.raw_execute()?;
        return Ok(CommandOutput::Effect(CommandResult { records_affected }));
    }

    let converter = command.converter.as_ref().ok_or_else(|| {
        ExecutionError::handler("no result converter compiled for a row-returning command")
    })?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.raw_query();

    match command.shape {
        ResultShape::Optional => match rows.next()? {
            Some(row) => Ok(CommandOutput::Optional(Some(
                converter.convert(&RowReader::new(row, &columns, 0))?,
            ))),
            None => Ok(CommandOutput::Optional(None)),
        },
        _ => {
            let mut out = Vec::new();
            let mut index = 0;
            while let Some(row) = rows.next()? {
                out.push(converter.convert(&RowReader::new(row, &columns, index))?);
                index += 1;
            }
            Ok(CommandOutput::List(out))
        }
    }
}

fn from_json<T: DeserializeOwned>(row: usize, value: Value) -> Result<T, ExecutionError> {
    serde_json::from_value(value).map_err(|e| ExecutionError::Conversion {
        row,
        message: e.to_string(),
    })
}

fn shape_mismatch(expected: ResultShape, got: &CommandOutput) -> ExecutionError {
    let got = match got {
        CommandOutput::List(_) => "List",
        CommandOutput::Optional(_) => "Optional",
        CommandOutput::Effect(_) => "Effect",
    };
    ExecutionError::handler(format!(
        "command produces {} output, not {:?}",
        got, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionTarget, Settings};
    use crate::descriptor::{CommandKind, DbType, ParamDescriptor, ReturnType};
    use crate::sql::compiler::SqlParameter;
    use crate::sql::converter::{ColumnsConverter, ConverterRegistry};

    struct Fixture {
        _dir: tempfile::TempDir,
        target: ConnectionTarget,
        converters: ConverterRegistry,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, nick TEXT);
             INSERT INTO users (id, name, nick) VALUES (1, 'ann', NULL), (2, 'bob', 'b');",
        )
        .unwrap();
        let target =
            ConnectionTarget::parse("main", path.to_str().unwrap(), &Settings::default()).unwrap();
        let mut converters = ConverterRegistry::new();
        converters.register("User", Arc::new(ColumnsConverter));
        Fixture {
            _dir: dir,
            target,
            converters,
        }
    }

    fn executor(f: &Fixture, kind: CommandKind, returns: &str, text: &str) -> CommandExecutor {
        let compiled = CompiledCommand::compile(
            kind,
            &ReturnType::parse(returns).unwrap(),
            &f.converters,
            text.to_string(),
            text.to_string(),
            f.target.clone(),
            vec![SqlParameter::new("id", ParamDescriptor::new(DbType::Int).nullable())],
        )
        .unwrap();
        CommandExecutor::new(Arc::new(compiled))
    }

    fn values(id: i64) -> ParameterValues {
        let mut values = ParameterValues::new();
        values.insert("id".into(), ParamValue::Int(id));
        values
    }

    #[tokio::test]
    async fn test_list_empty_and_populated() {
        let f = fixture();
        let exec = executor(&f, CommandKind::Query, "List<User>", "SELECT id, name FROM users WHERE id >= @id ORDER BY id");

        let rows = exec.execute(&values(1)).await.unwrap();
        match rows {
            CommandOutput::List(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[1]["name"], Value::String("bob".into()));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            exec.execute(&values(99)).await.unwrap(),
            CommandOutput::List(vec![])
        );
    }

    #[tokio::test]
    async fn test_optional_absent_and_present() {
        let f = fixture();
        let exec = executor(&f, CommandKind::Query, "Optional<string>", "SELECT name FROM users WHERE id = @id");
        assert_eq!(
            exec.execute(&values(2)).await.unwrap(),
            CommandOutput::Optional(Some(Value::String("bob".into())))
        );
        assert_eq!(
            exec.execute(&values(3)).await.unwrap(),
            CommandOutput::Optional(None)
        );

        let name: Option<String> = exec.execute_optional_as(&values(1)).await.unwrap();
        assert_eq!(name.as_deref(), Some("ann"));
    }

    #[tokio::test]
    async fn test_effect_and_missing_values_bind_null() {
        let f = fixture();
        let exec = executor(&f, CommandKind::Update, "Effect", "UPDATE users SET nick = 'x' WHERE id = @id OR @id IS NULL");
        let result = exec.execute_effect(&ParameterValues::new()).await.unwrap();
        assert_eq!(result.records_affected, 2);

        let result = exec.execute_effect(&values(1)).await.unwrap();
        assert_eq!(result, CommandResult { records_affected: 1 });
        assert_eq!(
            CommandOutput::Effect(result).into_json(),
            serde_json::json!({ "recordsAffected": 1 })
        );
    }

    #[tokio::test]
    async fn test_typed_list_and_conversion_errors() {
        #[derive(Debug, Deserialize)]
        struct User {
            id: i64,
            name: String,
        }

        let f = fixture();
        let exec = executor(&f, CommandKind::Query, "List<User>", "SELECT id, name FROM users ORDER BY id");
        let users: Vec<User> = exec.execute_list_as(&values(0)).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!((users[0].id, users[0].name.as_str()), (1, "ann"));

        let exec = executor(&f, CommandKind::Query, "List<int>", "SELECT nick FROM users ORDER BY id");
        let err = exec.execute(&values(0)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Conversion { row: 0, .. }));
    }

    #[tokio::test]
    async fn test_database_errors_surface() {
        let f = fixture();
        let exec = executor(&f, CommandKind::Query, "List<int>", "SELECT id FROM missing_table");
        let err = exec.execute(&values(0)).await.unwrap_err();
        assert_eq!(err.type_name(), "DatabaseError");
    }

    #[test]
    fn test_meta_commands() {
        let f = fixture();
        let compiled = CompiledCommand::compile(
            CommandKind::Query,
            &ReturnType::parse("List<int>").unwrap(),
            &f.converters,
            "SELECT {qualify u [id]}\r\nFROM users u".into(),
            "SELECT [u].[id]\r\nFROM users u".into(),
            f.target.clone(),
            vec![],
        )
        .unwrap();
        let exec = CommandExecutor::new(Arc::new(compiled));

        let none = Map::new();
        assert_eq!(
            exec.execute_meta("command", &none).unwrap(),
            serde_json::json!({ "command": "SELECT [u].[id]\r\nFROM users u" })
        );

        let mut lines = Map::new();
        lines.insert("lines".into(), Value::Bool(true));
        assert_eq!(
            exec.execute_meta("RawCommand", &lines).unwrap(),
            serde_json::json!({ "rawcommand": ["SELECT {qualify u [id]}", "FROM users u"] })
        );

        assert!(matches!(
            exec.execute_meta("explain", &none),
            Err(ExecutionError::UnknownMetaCommand(_))
        ));
    }
}
