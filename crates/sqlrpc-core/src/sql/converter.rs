//! Row → JSON conversion.
//!
//! The executor reads rows by ordinal and hands each one to the method's
//! [`ResultConverter`]. Primitive row types (`int`, `string?`, `guid`, ...)
//! use [`BasicConverter`]; any other row type needs a converter registered
//! as `<RowType>.Converter`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use rusqlite::types::ValueRef;
use rusqlite::Row;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::descriptor::value::{parse_datetime, parse_datetime_offset};
use crate::descriptor::ParamValue;
use crate::error::{DescriptorError, ExecutionError};

/// Suffix of the registered converter name for a row type.
pub const CONVERTER_SUFFIX: &str = ".Converter";

/// Ordinal access to the current row, with name lookup for custom converters.
pub struct RowReader<'a, 'stmt> {
    row: &'a Row<'stmt>,
    columns: &'a [String],
    index: usize,
}

impl<'a, 'stmt> RowReader<'a, 'stmt> {
    pub(crate) fn new(row: &'a Row<'stmt>, columns: &'a [String], index: usize) -> Self {
        Self {
            row,
            columns,
            index,
        }
    }

    /// Zero-based position of this row in the result set.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_name(&self, ordinal: usize) -> Option<&str> {
        self.columns.get(ordinal).map(String::as_str)
    }

    /// Ordinal of a column, matched case-insensitively.
    pub fn ordinal(&self, name: &str) -> Result<usize, ExecutionError> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| self.error(format!("column '{}' does not exist", name)))
    }

    pub fn is_null(&self, ordinal: usize) -> Result<bool, ExecutionError> {
        Ok(matches!(self.row.get_ref(ordinal)?, ValueRef::Null))
    }

    pub fn value_ref(&self, ordinal: usize) -> Result<ValueRef<'_>, ExecutionError> {
        Ok(self.row.get_ref(ordinal)?)
    }

    pub fn string(&self, ordinal: usize) -> Result<String, ExecutionError> {
        self.required(ordinal, BasicKind::String)
            .map(|v| v.to_json().as_str().unwrap_or_default().to_string())
    }

    pub fn null_string(&self, ordinal: usize) -> Result<Option<String>, ExecutionError> {
        Ok(self
            .nullable(ordinal, BasicKind::String)?
            .map(|v| v.to_json().as_str().unwrap_or_default().to_string()))
    }

    pub fn int64(&self, ordinal: usize) -> Result<i64, ExecutionError> {
        match self.required(ordinal, BasicKind::Long)? {
            ParamValue::Int(i) => Ok(i),
            _ => Err(self.error(format!("column {} is not an integer", ordinal))),
        }
    }

    pub fn null_int64(&self, ordinal: usize) -> Result<Option<i64>, ExecutionError> {
        match self.nullable(ordinal, BasicKind::Long)? {
            Some(ParamValue::Int(i)) => Ok(Some(i)),
            Some(_) => Err(self.error(format!("column {} is not an integer", ordinal))),
            None => Ok(None),
        }
    }

    pub fn bool(&self, ordinal: usize) -> Result<bool, ExecutionError> {
        match self.required(ordinal, BasicKind::Bool)? {
            ParamValue::Bool(b) => Ok(b),
            _ => Err(self.error(format!("column {} is not a boolean", ordinal))),
        }
    }

    pub fn decimal(&self, ordinal: usize) -> Result<Decimal, ExecutionError> {
        match self.required(ordinal, BasicKind::Decimal)? {
            ParamValue::Decimal(d) => Ok(d),
            _ => Err(self.error(format!("column {} is not a decimal", ordinal))),
        }
    }

    /// The column rendered as JSON without a declared type.
    pub fn json(&self, ordinal: usize) -> Result<Value, ExecutionError> {
        Ok(match self.row.get_ref(ordinal)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
        })
    }

    fn required(&self, ordinal: usize, kind: BasicKind) -> Result<ParamValue, ExecutionError> {
        self.nullable(ordinal, kind)?
            .ok_or_else(|| self.error(format!("column {} is null", ordinal)))
    }

    fn nullable(
        &self,
        ordinal: usize,
        kind: BasicKind,
    ) -> Result<Option<ParamValue>, ExecutionError> {
        let value = self.row.get_ref(ordinal)?;
        if matches!(value, ValueRef::Null) {
            return Ok(None);
        }
        kind.read(value)
            .map(Some)
            .map_err(|message| self.error(format!("column {}: {}", ordinal, message)))
    }

    fn error(&self, message: String) -> ExecutionError {
        ExecutionError::Conversion {
            row: self.index,
            message,
        }
    }
}

/// Converts one row into a JSON value.
pub trait ResultConverter: Send + Sync {
    fn convert(&self, row: &RowReader<'_, '_>) -> Result<Value, ExecutionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BasicKind {
    String,
    Int,
    Short,
    Long,
    Byte,
    Bool,
    Double,
    Decimal,
    DateTime,
    DateTimeOffset,
    Guid,
}

impl BasicKind {
    fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "string" => Self::String,
            "int" | "int32" => Self::Int,
            "short" | "int16" => Self::Short,
            "long" | "int64" => Self::Long,
            "byte" => Self::Byte,
            "bool" | "boolean" => Self::Bool,
            "double" | "float" => Self::Double,
            "decimal" => Self::Decimal,
            "datetime" => Self::DateTime,
            "datetimeoffset" => Self::DateTimeOffset,
            "guid" | "uuid" => Self::Guid,
            _ => return None,
        })
    }

    fn read(&self, value: ValueRef<'_>) -> Result<ParamValue, String> {
        match self {
            Self::String => match value {
                ValueRef::Text(t) => Ok(ParamValue::Text(
                    std::str::from_utf8(t).map_err(|e| e.to_string())?.to_string(),
                )),
                ValueRef::Integer(i) => Ok(ParamValue::Text(i.to_string())),
                ValueRef::Real(f) => Ok(ParamValue::Text(f.to_string())),
                _ => Err("expected text".to_string()),
            },
            Self::Int => read_int(value, i64::from(i32::MIN), i64::from(i32::MAX)),
            Self::Short => read_int(value, i64::from(i16::MIN), i64::from(i16::MAX)),
            Self::Long => read_int(value, i64::MIN, i64::MAX),
            Self::Byte => read_int(value, 0, i64::from(u8::MAX)),
            Self::Bool => match value {
                ValueRef::Integer(i) => Ok(ParamValue::Bool(i != 0)),
                ValueRef::Text(t) if t.eq_ignore_ascii_case(b"true") => Ok(ParamValue::Bool(true)),
                ValueRef::Text(t) if t.eq_ignore_ascii_case(b"false") => {
                    Ok(ParamValue::Bool(false))
                }
                _ => Err("expected a boolean".to_string()),
            },
            Self::Double => match value {
                ValueRef::Integer(i) => Ok(ParamValue::Float(i as f64)),
                ValueRef::Real(f) => Ok(ParamValue::Float(f)),
                _ => Err("expected a number".to_string()),
            },
            Self::Decimal => match value {
                ValueRef::Integer(i) => Ok(ParamValue::Decimal(Decimal::from(i))),
                ValueRef::Real(f) => Decimal::try_from(f)
                    .map(ParamValue::Decimal)
                    .map_err(|e| e.to_string()),
                ValueRef::Text(t) => {
                    let text = std::str::from_utf8(t).map_err(|e| e.to_string())?;
                    Decimal::from_str(text.trim())
                        .map(ParamValue::Decimal)
                        .map_err(|e| e.to_string())
                }
                _ => Err("expected a decimal".to_string()),
            },
            Self::DateTime => match value {
                ValueRef::Text(t) => {
                    let text = std::str::from_utf8(t).map_err(|e| e.to_string())?;
                    parse_datetime(text)
                        .map(ParamValue::DateTime)
                        .ok_or_else(|| format!("'{}' is not a date/time", text))
                }
                ValueRef::Integer(secs) => chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0)
                    .map(|dt| ParamValue::DateTime(dt.naive_utc()))
                    .ok_or_else(|| format!("{} is out of range", secs)),
                _ => Err("expected a date/time".to_string()),
            },
            Self::DateTimeOffset => match value {
                ValueRef::Text(t) => {
                    let text = std::str::from_utf8(t).map_err(|e| e.to_string())?;
                    parse_datetime_offset(text)
                        .map(ParamValue::DateTimeOffset)
                        .ok_or_else(|| format!("'{}' is not a date/time", text))
                }
                _ => Err("expected a date/time".to_string()),
            },
            Self::Guid => match value {
                ValueRef::Text(t) => {
                    let text = std::str::from_utf8(t).map_err(|e| e.to_string())?;
                    Uuid::parse_str(text.trim())
                        .map(ParamValue::Guid)
                        .map_err(|e| e.to_string())
                }
                ValueRef::Blob(b) => Uuid::from_slice(b)
                    .map(ParamValue::Guid)
                    .map_err(|e| e.to_string()),
                _ => Err("expected a GUID".to_string()),
            },
        }
    }
}

fn read_int(value: ValueRef<'_>, min: i64, max: i64) -> Result<ParamValue, String> {
    let i = match value {
        ValueRef::Integer(i) => i,
        ValueRef::Real(f) if f.fract() == 0.0 => f as i64,
        _ => return Err("expected an integer".to_string()),
    };
    if i < min || i > max {
        return Err(format!("{} is outside the range {}..={}", i, min, max));
    }
    Ok(ParamValue::Int(i))
}

/// Converter for primitive row types; reads column 0.
#[derive(Debug, Clone, Copy)]
pub struct BasicConverter {
    kind: BasicKind,
    nullable: bool,
}

impl BasicConverter {
    /// Resolve `int`, `string?`, `DateTimeOffset`, ... ; `None` for other types.
    pub fn for_type(row_type: &str) -> Option<Self> {
        let row_type = row_type.trim();
        let (name, nullable) = match row_type.strip_suffix('?') {
            Some(inner) => (inner.trim(), true),
            None => (row_type, false),
        };
        let kind = BasicKind::parse(name)?;
        Some(Self {
            kind,
            nullable: nullable || kind == BasicKind::String,
        })
    }
}

impl ResultConverter for BasicConverter {
    fn convert(&self, row: &RowReader<'_, '_>) -> Result<Value, ExecutionError> {
        let value = if self.nullable {
            row.nullable(0, self.kind)?
        } else {
            Some(row.required(0, self.kind)?)
        };
        Ok(value.map(|v| v.to_json()).unwrap_or(Value::Null))
    }
}

/// Renders every column of the row as a JSON object keyed by column name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnsConverter;

impl ResultConverter for ColumnsConverter {
    fn convert(&self, row: &RowReader<'_, '_>) -> Result<Value, ExecutionError> {
        let mut object = Map::with_capacity(row.column_count());
        for (ordinal, name) in row.columns.iter().enumerate() {
            object.insert(name.clone(), row.json(ordinal)?);
        }
        Ok(Value::Object(object))
    }
}

/// Converters registered by naming convention.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<String, Arc<dyn ResultConverter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the converter for `row_type` under `<row_type>.Converter`.
    pub fn register(&mut self, row_type: &str, converter: Arc<dyn ResultConverter>) {
        self.converters
            .insert(convention_name(row_type), converter);
    }

    pub fn contains(&self, row_type: &str) -> bool {
        self.converters.contains_key(&convention_name(row_type))
    }

    /// Primitive converter first, then the convention-named registration.
    pub fn resolve(&self, row_type: &str) -> Result<Arc<dyn ResultConverter>, DescriptorError> {
        if let Some(basic) = BasicConverter::for_type(row_type) {
            return Ok(Arc::new(basic));
        }
        let convention = convention_name(row_type);
        self.converters
            .get(&convention)
            .cloned()
            .ok_or_else(|| DescriptorError::NoConverterFound {
                row_type: row_type.trim().to_string(),
                convention,
            })
    }
}

fn convention_name(row_type: &str) -> String {
    format!("{}{}", row_type.trim(), CONVERTER_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn convert_first(sql: &str, converter: &dyn ResultConverter) -> Result<Value, ExecutionError> {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare(sql).unwrap();
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([]).unwrap();
        let row = rows.next().unwrap().unwrap();
        converter.convert(&RowReader::new(row, &columns, 0))
    }

    #[test]
    fn test_basic_converter_types() {
        let int = BasicConverter::for_type("int").unwrap();
        assert_eq!(convert_first("SELECT 42", &int).unwrap(), Value::from(42));
        assert!(convert_first("SELECT NULL", &int).is_err());
        assert!(convert_first("SELECT 3000000000", &int).is_err());

        let nullable = BasicConverter::for_type("int?").unwrap();
        assert_eq!(convert_first("SELECT NULL", &nullable).unwrap(), Value::Null);

        let string = BasicConverter::for_type("string").unwrap();
        assert_eq!(convert_first("SELECT NULL", &string).unwrap(), Value::Null);

        let boolean = BasicConverter::for_type("bool").unwrap();
        assert_eq!(convert_first("SELECT 1", &boolean).unwrap(), Value::Bool(true));

        let decimal = BasicConverter::for_type("decimal").unwrap();
        let exact = convert_first("SELECT '12345678901234567.89'", &decimal).unwrap();
        assert_eq!(exact.to_string(), "12345678901234567.89");
    }

    #[test]
    fn test_guid_from_text_and_blob() {
        let guid = BasicConverter::for_type("guid").unwrap();
        let text = convert_first("SELECT '6f9619ff-8b86-d011-b42d-00c04fc964ff'", &guid).unwrap();
        assert_eq!(text, Value::String("6f9619ff-8b86-d011-b42d-00c04fc964ff".into()));
        let blob = convert_first("SELECT X'6F9619FF8B86D011B42D00C04FC964FF'", &guid).unwrap();
        assert_eq!(blob, text);
    }

    #[test]
    fn test_columns_converter_and_reader_lookup() {
        let value = convert_first("SELECT 1 AS id, 'ann' AS Name, X'0102' AS raw", &ColumnsConverter).unwrap();
        assert_eq!(value["id"], Value::from(1));
        assert_eq!(value["Name"], Value::String("ann".into()));
        assert_eq!(value["raw"], Value::String("AQI=".into()));

        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT 1 AS Id, NULL AS note").unwrap();
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([]).unwrap();
        let row = rows.next().unwrap().unwrap();
        let reader = RowReader::new(row, &columns, 0);
        assert_eq!(reader.ordinal("id").unwrap(), 0);
        assert!(reader.ordinal("missing").is_err());
        assert_eq!(reader.int64(0).unwrap(), 1);
        assert_eq!(reader.null_string(1).unwrap(), None);
    }

    #[test]
    fn test_registry_resolution() {
        let mut registry = ConverterRegistry::new();
        assert!(registry.resolve("decimal?").is_ok());
        match registry.resolve("User") {
            Err(DescriptorError::NoConverterFound { convention, .. }) => {
                assert_eq!(convention, "User.Converter")
            }
            other => panic!("unexpected {:?}", other.err()),
        }
        registry.register("User", Arc::new(ColumnsConverter));
        assert!(registry.contains("User"));
        assert!(registry.resolve("User").is_ok());
    }
}
