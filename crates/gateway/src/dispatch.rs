//! Maps decoded RPC requests onto [`QueueGateway`] calls.

use proto::{BrowseStart, Delivery, RpcRequest, RpcResponse};
use tracing::debug;

use crate::connection::MAX_RPC_MSG_BYTES;
use crate::service::QueueGateway;

/// Executes one request and renders the outcome as a response.
///
/// Every failure is folded into an error response; nothing escapes as `Err`.
/// Reads are capped at [`MAX_RPC_MSG_BYTES`] so a delivered message always
/// fits in one response frame; larger messages stay on the queue.
pub async fn dispatch(gateway: &QueueGateway, request: RpcRequest) -> RpcResponse {
    let method = request.method();
    let response = match request {
        RpcRequest::Put { queue, message } => match gateway.put(&queue, message.as_bytes()).await {
            Ok(()) => RpcResponse::ok(),
            Err(e) => RpcResponse::from_error(&e),
        },
        RpcRequest::Get {
            queue,
            wait_ms,
            max_msg_bytes,
        } => delivery_response(
            gateway
                .get(&queue, wait_ms, frame_safe(max_msg_bytes))
                .await,
        ),
        RpcRequest::BrowseFirst {
            queue,
            wait_ms,
            max_msg_bytes,
        } => match gateway
            .browse_first(&queue, wait_ms, frame_safe(max_msg_bytes))
            .await
        {
            Ok(BrowseStart::Opened { payload, token }) => RpcResponse {
                browse_id: Some(token.0),
                ..RpcResponse::message(payload)
            },
            Ok(BrowseStart::Empty) => RpcResponse::empty(),
            Err(e) => RpcResponse::from_error(&e),
        },
        RpcRequest::BrowseNext {
            browse_id,
            wait_ms,
            max_msg_bytes,
        } => {
            let result = gateway
                .browse_next(&browse_id, wait_ms, frame_safe(max_msg_bytes))
                .await;
            match delivery_response(result) {
                r if r.is_ok() => RpcResponse {
                    browse_id: Some(browse_id),
                    ..r
                },
                r => r,
            }
        }
        RpcRequest::InquireQueue { queue } => match gateway.inquire_queue(&queue).await {
            Ok(info) => RpcResponse {
                queue_info: Some(info),
                ..RpcResponse::ok()
            },
            Err(e) => RpcResponse::from_error(&e),
        },
    };
    debug!(method, ok = response.is_ok(), "RPC dispatched");
    response
}

/// Clamps a requested read ceiling to what a response frame can carry.
/// Zero and negative values keep their "use the default" meaning.
fn frame_safe(max_msg_bytes: i64) -> i64 {
    max_msg_bytes.min(MAX_RPC_MSG_BYTES as i64)
}

fn delivery_response(result: Result<Delivery, proto::QueueError>) -> RpcResponse {
    match result {
        Ok(Delivery::Message(payload)) => RpcResponse::message(payload),
        Ok(Delivery::Empty) => RpcResponse::empty(),
        Err(e) => RpcResponse::from_error(&e),
    }
}
