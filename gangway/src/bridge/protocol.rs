//! Streamable HTTP protocol details

use serde_json::Value;

use crate::errors::GatewayError;

pub const HEADER_PROTOCOL_VERSION: &str = "mcp-protocol-version";
pub const HEADER_SESSION_ID: &str = "mcp-session-id";

/// Newest first
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];

/// Echo a supported version, otherwise fall back to the newest
pub fn negotiate_version(requested: Option<&str>) -> &'static str {
    requested
        .map(str::trim)
        .and_then(|requested| {
            SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .copied()
                .find(|supported| *supported == requested)
        })
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Check JSON-RPC 2.0 framing: one message object or a non-empty batch
pub fn check_framing(body: &[u8]) -> Result<(), GatewayError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::ParseError(e.to_string()))?;

    match &value {
        Value::Object(_) => check_message(&value),
        Value::Array(batch) if !batch.is_empty() => batch.iter().try_for_each(check_message),
        Value::Array(_) => Err(GatewayError::MalformedPayload(
            "empty JSON-RPC batch".to_string(),
        )),
        _ => Err(GatewayError::MalformedPayload(
            "JSON-RPC payload must be an object or an array of objects".to_string(),
        )),
    }
}

fn check_message(message: &Value) -> Result<(), GatewayError> {
    let Some(object) = message.as_object() else {
        return Err(GatewayError::MalformedPayload(
            "batch entries must be objects".to_string(),
        ));
    };

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => Ok(()),
        _ => Err(GatewayError::MalformedPayload(
            "missing or invalid \"jsonrpc\": \"2.0\"".to_string(),
        )),
    }
}
