//! Request/response frames exchanged over the RPC transport.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ErrorKind, QueueError};
use crate::queue::QueueInfo;

/// Message bytes, carried as a base64 string on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Payload)
            .map_err(serde::de::Error::custom)
    }
}

/// One RPC call, tagged by `method`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RpcRequest {
    Put {
        queue: String,
        #[serde(default)]
        message: Payload,
    },
    Get {
        queue: String,
        #[serde(default)]
        wait_ms: i64,
        #[serde(default)]
        max_msg_bytes: i64,
    },
    BrowseFirst {
        queue: String,
        #[serde(default)]
        wait_ms: i64,
        #[serde(default)]
        max_msg_bytes: i64,
    },
    BrowseNext {
        browse_id: String,
        #[serde(default)]
        wait_ms: i64,
        #[serde(default)]
        max_msg_bytes: i64,
    },
    InquireQueue {
        queue: String,
    },
}

impl RpcRequest {
    /// Method name as it appears on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Get { .. } => "get",
            Self::BrowseFirst { .. } => "browse_first",
            Self::BrowseNext { .. } => "browse_next",
            Self::InquireQueue { .. } => "inquire_queue",
        }
    }
}

/// Call outcome marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcStatus {
    Ok,
    Error,
}

/// Response to an [`RpcRequest`]. Fields not relevant to the method are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub status: RpcStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Payload>,
    #[serde(default)]
    pub empty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browse_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_info: Option<QueueInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RpcResponse {
    /// Success without a body (put).
    pub fn ok() -> Self {
        Self {
            status: RpcStatus::Ok,
            message: None,
            empty: false,
            browse_id: None,
            queue_info: None,
            error: None,
            error_kind: None,
        }
    }

    /// Successful read carrying a message.
    pub fn message(payload: Vec<u8>) -> Self {
        Self {
            message: Some(Payload(payload)),
            ..Self::ok()
        }
    }

    /// Successful read that found nothing.
    pub fn empty() -> Self {
        Self {
            empty: true,
            ..Self::ok()
        }
    }

    /// Error response from a core failure.
    pub fn from_error(err: &QueueError) -> Self {
        Self {
            status: RpcStatus::Error,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Self::ok()
        }
    }

    /// Error response for a request that could not be handled at all.
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self {
            status: RpcStatus::Error,
            error: Some(reason.into()),
            error_kind: Some(ErrorKind::Validation),
            ..Self::ok()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RpcStatus::Ok
    }
}
