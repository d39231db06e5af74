/// Stratum wire-protocol messages
///
/// Line-delimited JSON-RPC. The mining dialect (mining.subscribe /
/// mining.authorize / mining.submit) is shared by the Equihash and Kaspa
/// families; Beam speaks its login/solution dialect with top-level fields
/// and result codes instead of result/error objects.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct StratumRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,

    #[serde(default)]
    pub id: Value,

    pub method: String,

    #[serde(default)]
    pub params: Option<Value>,

    /// Beam puts request fields (api_key, nonce, output, ...) at the top
    /// level rather than in params.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StratumRequest {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Positional string param (mining dialect).
    pub fn param_str(&self, index: usize) -> Option<&str> {
        self.params
            .as_ref()?
            .as_array()?
            .get(index)?
            .as_str()
    }

    /// Top-level string field (Beam dialect).
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.extra.get(name)?.as_str()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StratumResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    pub id: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl StratumResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: Some("2.0".to_string()),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: WireError) -> Self {
        Self {
            jsonrpc: Some("2.0".to_string()),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WireError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("unknown method '{method}'"))
    }
}

/// Beam result message: code >= 0 is success, negative codes are the Beam
/// error taxonomy.
pub fn beam_result(id: Value, code: i32, description: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "result",
        "code": code,
        "description": description.into(),
    })
}

/// Beam login acknowledgement carrying the connection's nonce prefix.
pub fn beam_login_ok(id: Value, nonceprefix: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "result",
        "code": 0,
        "description": "Login successful",
        "nonceprefix": nonceprefix,
    })
}
