//! Decoded parameter values.
//!
//! Request parameters arrive as JSON text. [`ParamDescriptor::decode`] turns
//! that text into a [`ParamValue`] of the descriptor's value domain; the
//! same value is echoed back in the response context and bound to the
//! database command.

use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use super::{ParamDescriptor, ValueDomain};

const DATETIME_STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATETIME_JSON_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A parameter value decoded into its declared domain.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Guid(Uuid),
    Bytes(Vec<u8>),
    Json(Value),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// JSON rendering (ISO-8601 dates, base64 bytes, hyphenated GUIDs).
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Decimal(d) => decimal_to_json(d),
            Self::Text(s) => Value::String(s.clone()),
            Self::DateTime(dt) => Value::String(dt.format(DATETIME_JSON_FORMAT).to_string()),
            Self::DateTimeOffset(dt) => Value::String(dt.to_rfc3339()),
            Self::Guid(g) => Value::String(g.hyphenated().to_string()),
            Self::Bytes(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
            Self::Json(v) => v.clone(),
        }
    }
}

/// Exact JSON number for `d`, digit for digit.
pub(crate) fn decimal_to_json(d: &Decimal) -> Value {
    let text = d.to_string();
    serde_json::Number::from_str(&text)
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqlValue::Null),
            Self::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Self::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Self::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Self::Decimal(d) => ToSqlOutput::Owned(SqlValue::Text(d.to_string())),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::DateTime(dt) => {
                ToSqlOutput::Owned(SqlValue::Text(dt.format(DATETIME_STORAGE_FORMAT).to_string()))
            }
            Self::DateTimeOffset(dt) => ToSqlOutput::Owned(SqlValue::Text(dt.to_rfc3339())),
            Self::Guid(g) => ToSqlOutput::Owned(SqlValue::Text(g.hyphenated().to_string())),
            Self::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Self::Json(v) => ToSqlOutput::Owned(SqlValue::Text(v.to_string())),
        })
    }
}

impl ParamDescriptor {
    /// Decode a JSON-encoded request value into this descriptor's domain.
    ///
    /// The error is a short reason suitable for embedding in a binding
    /// error message.
    pub fn decode(&self, raw: &str) -> Result<ParamValue, String> {
        let json: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        self.decode_value(json)
    }

    /// Decode an already-parsed JSON value.
    ///
    /// Text and binary values longer than a positive declared size are
    /// rejected; decimals are rounded half away from zero to the declared scale and must then
    /// fit the declared precision.
    pub fn decode_value(&self, json: Value) -> Result<ParamValue, String> {
        self.decode_domain(json).and_then(|value| self.constrain(value))
    }

    fn constrain(&self, value: ParamValue) -> Result<ParamValue, String> {
        let limit = self.size.filter(|&n| n > 0).map(|n| n as usize);
        match value {
            ParamValue::Text(s) => match limit {
                Some(max) if s.chars().count() > max => Err(format!(
                    "{} characters exceed {}",
                    s.chars().count(),
                    self.type_name()
                )),
                _ => Ok(ParamValue::Text(s)),
            },
            ParamValue::Bytes(b) => match limit {
                Some(max) if b.len() > max => {
                    Err(format!("{} bytes exceed {}", b.len(), self.type_name()))
                }
                _ => Ok(ParamValue::Bytes(b)),
            },
            ParamValue::Decimal(d) => {
                let d = match self.scale {
                    Some(scale) => {
                        d.round_dp_with_strategy(u32::from(scale), RoundingStrategy::MidpointAwayFromZero)
                    }
                    None => d,
                };
                if let Some(precision) = self.precision {
                    let scale = u32::from(self.scale.unwrap_or(0));
                    let integral = d.trunc().abs().to_string().trim_start_matches('0').len() as u32;
                    if integral + scale > u32::from(precision) {
                        return Err(format!("{} does not fit {}", d, self.type_name()));
                    }
                }
                Ok(ParamValue::Decimal(d))
            }
            other => Ok(other),
        }
    }

    fn decode_domain(&self, json: Value) -> Result<ParamValue, String> {
        if json.is_null() {
            return if self.accepts_null() {
                Ok(ParamValue::Null)
            } else {
                Err(format!("null is not a valid {}", self.type_name()))
            };
        }

        match self.domain() {
            ValueDomain::String => match json {
                Value::String(s) => Ok(ParamValue::Text(s)),
                Value::Number(n) => Ok(ParamValue::Text(n.to_string())),
                Value::Bool(b) => Ok(ParamValue::Text(b.to_string())),
                other => Err(format!("expected a string, found {}", json_kind(&other))),
            },
            ValueDomain::Int32 => decode_int(&json, i64::from(i32::MIN), i64::from(i32::MAX)),
            ValueDomain::Int64 => decode_int(&json, i64::MIN, i64::MAX),
            ValueDomain::Int16 => decode_int(&json, i64::from(i16::MIN), i64::from(i16::MAX)),
            ValueDomain::Byte => decode_int(&json, 0, i64::from(u8::MAX)),
            ValueDomain::Bool => match json {
                Value::Bool(b) => Ok(ParamValue::Bool(b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(ParamValue::Bool(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(ParamValue::Bool(false)),
                other => Err(format!("expected a boolean, found {}", json_kind(&other))),
            },
            ValueDomain::Double | ValueDomain::Single => match json {
                Value::Number(n) => n
                    .as_f64()
                    .map(ParamValue::Float)
                    .ok_or_else(|| format!("{} is out of range", n)),
                Value::String(s) => f64::from_str(s.trim())
                    .map(ParamValue::Float)
                    .map_err(|e| e.to_string()),
                other => Err(format!("expected a number, found {}", json_kind(&other))),
            },
            ValueDomain::Decimal => {
                let text = match &json {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.trim().to_string(),
                    other => return Err(format!("expected a number, found {}", json_kind(other))),
                };
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map(ParamValue::Decimal)
                    .map_err(|e| e.to_string())
            }
            ValueDomain::DateTime => match json {
                Value::String(s) => parse_datetime(&s)
                    .map(ParamValue::DateTime)
                    .ok_or_else(|| format!("'{}' is not an ISO-8601 date/time", s)),
                other => Err(format!("expected a date string, found {}", json_kind(&other))),
            },
            ValueDomain::DateTimeOffset => match json {
                Value::String(s) => parse_datetime_offset(&s)
                    .map(ParamValue::DateTimeOffset)
                    .ok_or_else(|| format!("'{}' is not an ISO-8601 date/time", s)),
                other => Err(format!("expected a date string, found {}", json_kind(&other))),
            },
            ValueDomain::Guid => match json {
                Value::String(s) => Uuid::parse_str(s.trim())
                    .map(ParamValue::Guid)
                    .map_err(|e| e.to_string()),
                other => Err(format!("expected a GUID string, found {}", json_kind(&other))),
            },
            ValueDomain::Bytes => match json {
                Value::String(s) => base64::engine::general_purpose::STANDARD
                    .decode(s.as_bytes())
                    .map(ParamValue::Bytes)
                    .map_err(|e| e.to_string()),
                other => Err(format!("expected a base64 string, found {}", json_kind(&other))),
            },
            ValueDomain::Json => Ok(ParamValue::Json(json)),
        }
    }
}

fn decode_int(json: &Value, min: i64, max: i64) -> Result<ParamValue, String> {
    let value = match json {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("{} is not an integer", n))?,
        Value::String(s) => i64::from_str(s.trim()).map_err(|e| e.to_string())?,
        other => return Err(format!("expected an integer, found {}", json_kind(other))),
    };
    if value < min || value > max {
        return Err(format!("{} is outside the range {}..={}", value, min, max));
    }
    Ok(ParamValue::Int(value))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse an ISO-8601 date or date/time. Offsets are normalised to UTC.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in [DATETIME_JSON_FORMAT, DATETIME_STORAGE_FORMAT] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse an ISO-8601 date/time with offset; offset-less input is taken as UTC.
pub fn parse_datetime_offset(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    let utc = FixedOffset::east_opt(0)?;
    parse_datetime(s).map(|naive| naive.and_utc().with_timezone(&utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DbType;

    #[test]
    fn test_decode_int_bounds() {
        let d = ParamDescriptor::new(DbType::TinyInt);
        assert_eq!(d.decode("200").unwrap(), ParamValue::Int(200));
        assert!(d.decode("300").is_err());
        assert!(d.decode("-1").is_err());
        assert!(ParamDescriptor::new(DbType::Int).decode("1.5").is_err());
    }

    #[test]
    fn test_decode_requires_json_text() {
        let d = ParamDescriptor::new(DbType::NVarChar);
        assert_eq!(
            d.decode("\"hello\"").unwrap(),
            ParamValue::Text("hello".into())
        );
        // A bare word is not JSON.
        assert!(d.decode("hello").is_err());
    }

    #[test]
    fn test_decode_null_handling() {
        assert!(ParamDescriptor::new(DbType::Int).decode("null").is_err());
        assert_eq!(
            ParamDescriptor::new(DbType::Int).nullable().decode("null").unwrap(),
            ParamValue::Null
        );
        assert_eq!(
            ParamDescriptor::new(DbType::VarChar).decode("null").unwrap(),
            ParamValue::Null
        );
    }

    #[test]
    fn test_decode_dates_and_guids() {
        let dt = ParamDescriptor::new(DbType::DateTime)
            .decode("\"2024-03-01T10:30:00Z\"")
            .unwrap();
        assert_eq!(
            dt.to_json(),
            Value::String("2024-03-01T10:30:00".into())
        );

        let g = ParamDescriptor::new(DbType::UniqueIdentifier)
            .decode("\"6f9619ff-8b86-d011-b42d-00c04fc964ff\"")
            .unwrap();
        assert!(matches!(g, ParamValue::Guid(_)));
    }

    #[test]
    fn test_decode_decimal_and_bytes() {
        let d = ParamDescriptor::new(DbType::Money).decode("12.50").unwrap();
        assert_eq!(d, ParamValue::Decimal(Decimal::from_str("12.50").unwrap()));

        let b = ParamDescriptor::new(DbType::VarBinary)
            .decode("\"AQID\"")
            .unwrap();
        assert_eq!(b, ParamValue::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn test_decode_enforces_size() {
        let name = ParamDescriptor::new(DbType::NVarChar).size(5);
        assert_eq!(name.decode("\"héllo\"").unwrap(), ParamValue::Text("héllo".into()));
        let err = name.decode("\"hello!\"").unwrap_err();
        assert!(err.contains("nvarchar(5)"));
        assert!(ParamDescriptor::new(DbType::NVarChar).size(-1).decode("\"hello!\"").is_ok());

        let bytes = ParamDescriptor::new(DbType::VarBinary).size(2);
        assert!(bytes.decode("\"AQI=\"").is_ok());
        assert!(bytes.decode("\"AQID\"").is_err());
    }

    #[test]
    fn test_decode_applies_scale_and_precision() {
        let amount = ParamDescriptor::new(DbType::Decimal).precision_scale(5, 2);
        assert_eq!(
            amount.decode("12.345").unwrap(),
            ParamValue::Decimal(Decimal::from_str("12.35").unwrap())
        );
        assert_eq!(
            amount.decode("\"999.999\"").unwrap_err(),
            "1000.00 does not fit decimal(5,2)"
        );
        assert!(amount.decode("-999.99").is_ok());
    }

    #[test]
    fn test_decimal_json_is_exact() {
        let d = Decimal::from_str("12345678901234567.89").unwrap();
        assert_eq!(decimal_to_json(&d).to_string(), "12345678901234567.89");
        assert_eq!(
            ParamValue::Decimal(Decimal::from_str("0.10").unwrap()).to_json().to_string(),
            "0.10"
        );
    }
}
