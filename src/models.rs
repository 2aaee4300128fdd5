use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// HTTP Method enum
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String")]
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::DELETE => "DELETE",
        }
    }

    /// Every method except GET carries a body when one is present
    pub fn sends_body(&self) -> bool {
        !matches!(self, HttpMethod::GET)
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::GET),
            "POST" => Ok(HttpMethod::POST),
            "PUT" => Ok(HttpMethod::PUT),
            "PATCH" => Ok(HttpMethod::PATCH),
            "DELETE" => Ok(HttpMethod::DELETE),
            _ => Err(format!("Unknown HTTP method: {}", s)),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared protocol of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Protocol {
    #[default]
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "WS")]
    Ws,
    #[serde(rename = "RPC", alias = "gRPC", alias = "GRPC")]
    Rpc,
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Ws => "WS",
            Protocol::Rpc => "RPC",
        }
    }
}

/// HTTP Header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Header {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Request body: free text or a structured JSON value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    Text(String),
    Json(Value),
}

impl RequestBody {
    /// Wire representation; structured bodies are serialized as compact JSON
    pub fn to_text(&self) -> String {
        match self {
            RequestBody::Text(text) => text.clone(),
            RequestBody::Json(value) => value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::Text(text) => text.is_empty(),
            RequestBody::Json(value) => value.is_null(),
        }
    }

    /// Script-facing value of the body
    pub fn to_value(&self) -> Value {
        match self {
            RequestBody::Text(text) => Value::String(text.clone()),
            RequestBody::Json(value) => value.clone(),
        }
    }

    /// Inverse of [`RequestBody::to_value`]; null clears the body
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(RequestBody::Text(text)),
            other => Some(RequestBody::Json(other)),
        }
    }
}

/// A single request as described by the caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct RequestSpec {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, with = "header_list")]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<RequestBody>,
    #[serde(default)]
    pub protocol: Protocol,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        RequestSpec {
            method,
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Case-insensitive header lookup, first match wins
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(key))
            .map(|h| h.value.as_str())
    }

    /// Body text to put on the wire, if the method sends one
    pub fn outgoing_body(&self) -> Option<String> {
        if !self.method.sends_body() {
            return None;
        }
        self.body
            .as_ref()
            .filter(|body| !body.is_empty())
            .map(RequestBody::to_text)
    }
}

/// Headers travel as a JSON object but keep their insertion order
mod header_list {
    use super::Header;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(headers: &[Header], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(headers.len()))?;
        for header in headers {
            map.serialize_entry(&header.key, &header.value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Header>, D::Error> {
        struct HeaderVisitor;

        impl<'de> Visitor<'de> for HeaderVisitor {
            type Value = Vec<Header>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header names to values")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(Vec::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut headers = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    headers.push(Header { key, value });
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_any(HeaderVisitor)
    }
}

/// One entry of an environment, as stored by the caller
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Flat variable bindings for one execution
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableMap(HashMap<String, String>);

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map from environment entries, skipping disabled or unnamed ones
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = Variable>,
    {
        VariableMap(
            entries
                .into_iter()
                .filter(|v| v.enabled && !v.key.is_empty())
                .map(|v| (v.key, v.value))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl From<HashMap<String, String>> for VariableMap {
    fn from(map: HashMap<String, String>) -> Self {
        VariableMap(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        VariableMap(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Which transport produced a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Engine {
    CurlBinary,
    NativeFetch,
    #[serde(rename = "websocket")]
    WebSocket,
    GrpcStub,
}

impl Engine {
    pub fn as_str(&self) -> &str {
        match self {
            Engine::CurlBinary => "curl-binary",
            Engine::NativeFetch => "native-fetch",
            Engine::WebSocket => "websocket",
            Engine::GrpcStub => "grpc-stub",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-phase durations in milliseconds
///
/// Phases a transport cannot observe stay `None` and are omitted on output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingBreakdown {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<f64>,
    pub total: f64,
}

impl TimingBreakdown {
    /// Only the wall-clock total is known
    pub fn total_only(total: f64) -> Self {
        TimingBreakdown {
            total,
            ..Default::default()
        }
    }
}

/// Uniform result of one dispatch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// 0 means the transport failed or the protocol is unsupported
    pub status: u16,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
    pub size: String,
    pub timings: TimingBreakdown,
    pub engine: Engine,
}

impl ExecutionResult {
    /// Status-0 envelope for a failed transport
    pub fn transport_failure(engine: Engine, message: impl Into<String>, total: f64) -> Self {
        let message = message.into();
        ExecutionResult {
            status: 0,
            size: format_size(message.len()),
            body: Value::String(message),
            headers: BTreeMap::new(),
            timings: TimingBreakdown::total_only(total),
            engine,
        }
    }
}

/// Parses a response body as JSON, keeping the raw text when it is not JSON
pub fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Formats a byte count as kilobytes with two decimals
pub fn format_size(bytes: usize) -> String {
    format!("{:.2} KB", bytes as f64 / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_spec_from_json() {
        let json = r#"{
            "method": "POST",
            "protocol": "HTTP",
            "url": "https://api.example.com/users",
            "headers": {"X-Trace": "1", "Accept": "application/json"},
            "body": {"name": "test"}
        }"#;
        let spec: RequestSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.method, HttpMethod::POST);
        assert_eq!(spec.headers[0].key, "X-Trace");
        assert_eq!(spec.headers[1].key, "Accept");
        assert_eq!(spec.header("accept"), Some("application/json"));
        assert_eq!(spec.outgoing_body().as_deref(), Some(r#"{"name":"test"}"#));
    }

    #[test]
    fn test_null_headers_and_body() {
        let json = r#"{"method": "GET", "url": "http://x", "headers": null, "body": null}"#;
        let spec: RequestSpec = serde_json::from_str(json).unwrap();
        assert!(spec.headers.is_empty());
        assert!(spec.body.is_none());
        assert_eq!(spec.protocol, Protocol::Http);
    }

    #[test]
    fn test_method_json_is_case_insensitive() {
        let spec: RequestSpec = serde_json::from_str(r#"{"method": "post", "url": "http://x"}"#).unwrap();
        assert_eq!(spec.method, HttpMethod::POST);
        assert_eq!(serde_json::to_string(&spec.method).unwrap(), r#""POST""#);

        let err = serde_json::from_str::<HttpMethod>(r#""TELEPORT""#).unwrap_err();
        assert!(err.to_string().contains("Unknown HTTP method: TELEPORT"));
    }

    #[test]
    fn test_grpc_alias() {
        let protocol: Protocol = serde_json::from_str(r#""gRPC""#).unwrap();
        assert_eq!(protocol, Protocol::Rpc);
    }

    #[test]
    fn test_get_never_sends_body() {
        let spec = RequestSpec::new(HttpMethod::GET, "http://x")
            .with_body(RequestBody::Text("ignored".into()));
        assert_eq!(spec.outgoing_body(), None);

        let spec = RequestSpec::new(HttpMethod::DELETE, "http://x")
            .with_body(RequestBody::Text("gone".into()));
        assert_eq!(spec.outgoing_body().as_deref(), Some("gone"));
    }

    #[test]
    fn test_variables_skip_disabled_entries() {
        let vars = VariableMap::from_entries(vec![
            Variable { key: "baseUrl".into(), value: "https://x".into(), enabled: true },
            Variable { key: "token".into(), value: "secret".into(), enabled: false },
            Variable { key: String::new(), value: "orphan".into(), enabled: true },
        ]);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("baseUrl"), Some("https://x"));
        assert_eq!(vars.get("token"), None);
    }

    #[test]
    fn test_engine_tags() {
        assert_eq!(serde_json::to_string(&Engine::CurlBinary).unwrap(), r#""curl-binary""#);
        assert_eq!(serde_json::to_string(&Engine::WebSocket).unwrap(), r#""websocket""#);
        assert_eq!(Engine::GrpcStub.as_str(), "grpc-stub");
    }

    #[test]
    fn test_timings_omit_unmeasured_phases() {
        let json = serde_json::to_value(TimingBreakdown::total_only(12.5)).unwrap();
        assert_eq!(json, serde_json::json!({"total": 12.5}));
    }

    #[test]
    fn test_parse_body_and_size() {
        assert_eq!(parse_body(r#"{"a":1}"#), serde_json::json!({"a": 1}));
        assert_eq!(parse_body("plain"), Value::String("plain".into()));
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(0), "0.00 KB");
    }
}
