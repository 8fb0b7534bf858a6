//! Request-side parameter binding.
//!
//! Keys starting with `$` are protocol meta parameters and are split off
//! before binding. Every other value is a JSON-encoded string decoded into
//! the declared parameter's value domain.

use serde_json::Value;

use super::error::RpcError;
use crate::executor::{MetaParameters, ParameterValues};
use crate::validate::ValidParam;

pub const META_PREFIX: char = '$';

/// Split `$`-prefixed pairs off as meta parameters, keyed without the `$`.
///
/// Meta values are JSON; a value that is not valid JSON is kept as a string.
pub fn split_meta(pairs: &[(String, String)]) -> (MetaParameters, Vec<(&str, &str)>) {
    let mut meta = MetaParameters::new();
    let mut rest = Vec::with_capacity(pairs.len());
    for (key, raw) in pairs {
        match key.strip_prefix(META_PREFIX) {
            Some(name) => {
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
                meta.insert(name.to_ascii_lowercase(), value);
            }
            None => rest.push((key.as_str(), raw.as_str())),
        }
    }
    (meta, rest)
}

/// `$context`, default true.
pub fn include_context(meta: &MetaParameters) -> bool {
    match meta.get("context") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.eq_ignore_ascii_case("false"),
        _ => true,
    }
}

/// `$meta`, when present and a string.
pub fn meta_command(meta: &MetaParameters) -> Option<&str> {
    meta.get("meta").and_then(Value::as_str)
}

/// Decode every declared parameter from `pairs`.
///
/// An absent optional parameter is skipped and later bound as null. The
/// first missing required or undecodable value stops binding.
pub fn bind_parameters(
    declared: &[ValidParam],
    pairs: &[(&str, &str)],
) -> Result<ParameterValues, RpcError> {
    let mut values = ParameterValues::with_capacity(declared.len());
    for param in declared {
        let raw = pairs
            .iter()
            .find(|(k, _)| *k == param.name)
            .or_else(|| pairs.iter().find(|(k, _)| k.eq_ignore_ascii_case(&param.name)))
            .map(|(_, v)| *v);

        let Some(raw) = raw else {
            if param.optional {
                continue;
            }
            return Err(RpcError::MissingRequiredParameter {
                name: param.name.clone(),
                type_name: param.descriptor.type_name(),
            });
        };

        let value = param
            .descriptor
            .decode(raw)
            .map_err(|reason| RpcError::ParameterDecode {
                name: param.name.clone(),
                type_name: param.descriptor.type_name(),
                reason,
            })?;
        values.insert(param.name.clone(), value);
    }
    Ok(values)
}
