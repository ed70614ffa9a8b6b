//! JSON request and response bodies of the REST adapter.
//!
//! Missing request fields take their zero value; required fields are then
//! checked by the gateway core.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proto::QueueInfo;
use serde::{Deserialize, Serialize};

/// How the `message` field carries bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8 text. Non UTF-8 payloads are returned with replacement characters.
    #[default]
    Text,
    Base64,
}

impl Encoding {
    /// Turns a request `message` into payload bytes.
    pub fn decode(self, message: &str) -> Result<Vec<u8>, String> {
        match self {
            Self::Text => Ok(message.as_bytes().to_vec()),
            Self::Base64 => STANDARD
                .decode(message)
                .map_err(|e| format!("message is not valid base64: {e}")),
        }
    }

    /// Renders payload bytes for a response `message`.
    pub fn encode(self, payload: &[u8]) -> String {
        match self {
            Self::Text => String::from_utf8_lossy(payload).into_owned(),
            Self::Base64 => STANDARD.encode(payload),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PutRequest {
    pub queue: String,
    pub message: String,
    pub encoding: Encoding,
}

/// Body of `/get` and `/browse/first`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadRequest {
    pub queue: String,
    pub wait_ms: i64,
    pub max_msg_bytes: i64,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseNextRequest {
    pub browse_id: String,
    pub wait_ms: i64,
    pub max_msg_bytes: i64,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InquireRequest {
    pub queue: String,
}

/// `ok` or `error`.
pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";

/// Response of `/put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of `/get`, `/browse/first` and `/browse/next`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub empty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browse_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReadResponse {
    pub fn message(message: String) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            message: Some(message),
            empty: false,
            browse_id: None,
            error: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            status: STATUS_OK.to_string(),
            message: None,
            empty: true,
            browse_id: None,
            error: None,
        }
    }

    pub fn with_browse_id(mut self, browse_id: impl Into<String>) -> Self {
        self.browse_id = Some(browse_id.into());
        self
    }
}

/// Response of `/inquire/queue`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquireResponse {
    pub status: String,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub queue_desc: String,
    #[serde(default)]
    pub queue_type: i32,
    #[serde(default)]
    pub queue_usage: i32,
    #[serde(default)]
    pub def_persistence: i32,
    #[serde(default)]
    pub inhibit_get: i32,
    #[serde(default)]
    pub inhibit_put: i32,
    #[serde(default)]
    pub current_q_depth: i32,
    #[serde(default)]
    pub max_q_depth: i32,
    #[serde(default)]
    pub open_input_count: i32,
    #[serde(default)]
    pub open_output_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<QueueInfo> for InquireResponse {
    fn from(info: QueueInfo) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            queue: info.name,
            queue_desc: info.description,
            queue_type: info.queue_type,
            queue_usage: info.usage,
            def_persistence: info.def_persistence,
            inhibit_get: info.inhibit_get,
            inhibit_put: info.inhibit_put,
            current_q_depth: info.current_depth,
            max_q_depth: info.max_depth,
            open_input_count: info.open_input_count,
            open_output_count: info.open_output_count,
            error: None,
        }
    }
}

/// Body of every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub error: String,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub browse_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_request_fields_default_to_zero_values() {
        let req: ReadRequest = serde_json::from_str(r#"{"queue":"Q"}"#).expect("parse");
        assert_eq!(req.wait_ms, 0);
        assert_eq!(req.max_msg_bytes, 0);
        assert_eq!(req.encoding, Encoding::Text);

        let put: PutRequest = serde_json::from_str("{}").expect("parse");
        assert!(put.queue.is_empty());
    }

    #[test]
    fn base64_encoding_round_trips_binary() {
        let bytes = [0u8, 255, 10, 13];
        let text = Encoding::Base64.encode(&bytes);
        assert_eq!(Encoding::Base64.decode(&text).expect("decode"), bytes);
        assert!(Encoding::Base64.decode("***").is_err());
    }

    #[test]
    fn text_encoding_replaces_invalid_utf8() {
        assert_eq!(Encoding::Text.encode(b"hi"), "hi");
        assert_eq!(Encoding::Text.encode(&[0xff]), "\u{fffd}");
    }

    #[test]
    fn empty_read_response_omits_message_and_browse_id() {
        let json = serde_json::to_string(&ReadResponse::empty()).expect("serialize");
        assert_eq!(json, r#"{"status":"ok","empty":true}"#);
    }

    #[test]
    fn inquire_response_uses_queue_manager_field_names() {
        let info = QueueInfo {
            name: "DEV.QUEUE.1".to_string(),
            current_depth: 3,
            max_depth: 5000,
            ..QueueInfo::default()
        };
        let value = serde_json::to_value(InquireResponse::from(info)).expect("serialize");
        assert_eq!(value["queue"], "DEV.QUEUE.1");
        assert_eq!(value["current_q_depth"], 3);
        assert_eq!(value["max_q_depth"], 5000);
        assert!(value.get("error").is_none());
    }
}
