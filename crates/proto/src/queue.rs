use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Buffer ceiling applied when the caller asks for `max_bytes <= 0`.
pub const DEFAULT_MAX_MSG_BYTES: usize = 64 * 1024;

/// Opaque token referencing a server-held browse cursor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrowseToken(pub String);

impl BrowseToken {
    /// Returns the raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BrowseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BrowseToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BrowseToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Normalized parameters for a read-type operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// How long to wait for a message; zero means return immediately.
    pub wait: Duration,
    /// Largest message the caller accepts.
    pub max_bytes: usize,
}

impl ReadOptions {
    /// Builds options from wire values. Negative waits mean "no wait" and
    /// `max_bytes <= 0` falls back to [`DEFAULT_MAX_MSG_BYTES`].
    pub fn new(wait_ms: i64, max_bytes: i64) -> Self {
        let wait = Duration::from_millis(u64::try_from(wait_ms).unwrap_or(0));
        let max_bytes = usize::try_from(max_bytes)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_MSG_BYTES);
        Self { wait, max_bytes }
    }

    /// Non-blocking read with the default buffer ceiling.
    pub fn no_wait() -> Self {
        Self::new(0, 0)
    }

    /// Whether the read should block at all.
    pub fn waits(&self) -> bool {
        !self.wait.is_zero()
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::no_wait()
    }
}

/// Outcome of a destructive or browse read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A message was read.
    Message(Vec<u8>),
    /// Nothing became available within the wait interval.
    Empty,
}

impl Delivery {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Message bytes, or an empty buffer for [`Delivery::Empty`].
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Self::Message(payload) => payload,
            Self::Empty => Vec::new(),
        }
    }
}

/// Outcome of opening a browse cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseStart {
    /// The first message plus the token for follow-up reads.
    Opened {
        payload: Vec<u8>,
        token: BrowseToken,
    },
    /// The queue had nothing to browse; no session was created.
    Empty,
}

impl BrowseStart {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Token of the opened session, if any.
    pub fn token(&self) -> Option<&BrowseToken> {
        match self {
            Self::Opened { token, .. } => Some(token),
            Self::Empty => None,
        }
    }
}

/// Snapshot of queue attributes, true at the time of the inquiry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub description: String,
    pub queue_type: i32,
    pub usage: i32,
    pub def_persistence: i32,
    pub inhibit_get: i32,
    pub inhibit_put: i32,
    pub current_depth: i32,
    pub max_depth: i32,
    pub open_input_count: i32,
    pub open_output_count: i32,
}

/// Queue type value for a local queue.
pub const QUEUE_TYPE_LOCAL: i32 = 1;
/// Usage value for a normal (non transmission) queue.
pub const USAGE_NORMAL: i32 = 0;
