//! Request and envelope types of the v1 protocol.
//!
//! These types are standalone (not tied to axum or any HTTP framework) so
//! they can be built and serialized from any transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A transport-neutral inbound request.
#[derive(Debug, Clone, Default)]
pub struct RpcRequest {
    /// HTTP verb, e.g. `"GET"`.
    pub method: String,
    /// Path relative to the mount point, e.g. `/v1/users/v1/queries/GetUser`.
    pub path: String,
    /// Decoded query-string pairs.
    pub query: Vec<(String, String)>,
    /// Decoded form-body pairs.
    pub form: Vec<(String, String)>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: Vec::new(),
            form: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    /// Split `path?query` and decode the query string.
    pub fn from_target(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Self {
            method: method.into(),
            path: path.to_string(),
            query: parse_urlencoded(query),
            form: Vec::new(),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((key.into(), value.into()));
        self
    }

    /// Key/value pairs carrying parameters for this verb: the query string
    /// for GET, the form body otherwise.
    pub fn parameters(&self) -> &[(String, String)] {
        if self.method.eq_ignore_ascii_case("GET") {
            &self.query
        } else {
            &self.form
        }
    }
}

/// Decode `a=1&b=%22x%22` into pairs. `+` is a space.
pub fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k), decode_component(v))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// How a request was routed; echoed in the envelope unless `$context=false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_parameter_values: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_values: Option<Map<String, Value>>,
}

/// One error record; `inner` carries the cause chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner: Option<Vec<JsonError>>,
    /// Additional fields, flattened into the record.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JsonError {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
            code: None,
            stack: None,
            inner: None,
            extra: Map::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_inner(mut self, inner: Vec<JsonError>) -> Self {
        self.inner = (!inner.is_empty()).then_some(inner);
        self
    }
}

/// The uniform response envelope.
///
/// `errors` and `results` never co-occur; a success always carries
/// `results`, even when it is `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonResponse {
    pub success: bool,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RpcContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<JsonError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
}

impl JsonResponse {
    pub fn success(context: Option<RpcContext>, results: Value) -> Self {
        Self {
            success: true,
            status_code: 200,
            context,
            errors: None,
            results: Some(results),
        }
    }

    pub fn failure(status_code: u16, context: Option<RpcContext>, errors: Vec<JsonError>) -> Self {
        Self {
            success: false,
            status_code,
            context,
            errors: Some(errors),
            results: None,
        }
    }
}

/// An envelope plus the HTTP status it mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub status: u16,
    pub body: JsonResponse,
}

impl RpcResponse {
    pub fn new(body: JsonResponse) -> Self {
        Self {
            status: body.status_code,
            body,
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.body).unwrap_or_else(|_| {
            r#"{"success":false,"statusCode":500,"errors":[{"message":"Failed to serialize response","type":"SerializationError"}]}"#.into()
        })
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for RpcResponse {
    fn into_response(self) -> axum::response::Response {
        use axum::http::{header, StatusCode};

        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
            self.to_json_string(),
        )
            .into_response()
    }
}
