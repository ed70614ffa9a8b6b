//! Shared protocol types for the queue gateway.
//!
//! This crate defines the queue data model, the RPC wire frames and the
//! strongly-typed error enums shared across the workspace.

pub mod error;
pub mod queue;
pub mod rpc;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of the queue data model.
pub use queue::{
    BrowseStart, BrowseToken, DEFAULT_MAX_MSG_BYTES, Delivery, QUEUE_TYPE_LOCAL, QueueInfo,
    ReadOptions, USAGE_NORMAL,
};
/// Re-export of RPC request/response frames.
pub use rpc::{Payload, RpcRequest, RpcResponse, RpcStatus};
