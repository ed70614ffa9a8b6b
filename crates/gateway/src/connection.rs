//! Per-connection RPC handling: one request/response pair per bidirectional stream.

use std::sync::Arc;

use proto::{GatewayError, RpcRequest, RpcResponse};
use quinn::Connection;
use tracing::{debug, error, info};

use crate::dispatch::dispatch;
use crate::service::QueueGateway;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 1_048_576;

/// Headroom kept for the JSON envelope around a base64 payload.
const ENVELOPE_RESERVE: usize = 1024;

/// Largest message an RPC read will deliver: its base64 form plus the
/// envelope still fits in [`MAX_FRAME_LEN`].
pub const MAX_RPC_MSG_BYTES: usize = (MAX_FRAME_LEN - ENVELOPE_RESERVE) / 4 * 3;

/// Serves RPC streams arriving on a single QUIC connection
pub struct RpcConnection {
    conn: Connection,
    gateway: Arc<QueueGateway>,
}

impl RpcConnection {
    pub fn new(conn: Connection, gateway: Arc<QueueGateway>) -> Self {
        Self { conn, gateway }
    }

    /// Accept streams until the peer goes away, serving each on its own task.
    pub async fn run(self) -> Result<(), GatewayError> {
        let remote = self.conn.remote_address();
        info!("RPC connection started for {remote}");

        loop {
            match self.conn.accept_bi().await {
                Ok((mut send, mut recv)) => {
                    let gateway = self.gateway.clone();
                    tokio::spawn(async move {
                        match handle_stream(&mut recv, &mut send, &gateway).await {
                            Ok(()) => debug!("Stream handled successfully"),
                            Err(e) => error!("Stream error: {e}"),
                        }
                    });
                }
                Err(quinn::ConnectionError::ApplicationClosed(_))
                | Err(quinn::ConnectionError::LocallyClosed) => {
                    info!("Connection closed from {remote}");
                    break;
                }
                Err(e) => {
                    error!("Connection error from {remote}: {e}");
                    return Err(GatewayError::Connection(e.to_string()));
                }
            }
        }

        Ok(())
    }
}

async fn handle_stream(
    recv: &mut quinn::RecvStream,
    send: &mut quinn::SendStream,
    gateway: &QueueGateway,
) -> Result<(), GatewayError> {
    let body = read_frame(recv).await?;

    // A frame that is not a valid request still gets an answer.
    let response = match decode_request(&body) {
        Ok(request) => dispatch(gateway, request).await,
        Err(e) => RpcResponse::protocol_error(e.to_string()),
    };

    let frame = match encode_frame(&response) {
        Ok(frame) => frame,
        Err(e) => {
            error!(ok = response.is_ok(), "Response could not be framed: {e}");
            encode_frame(&RpcResponse::protocol_error(e.to_string()))?
        }
    };
    write_frame(send, &frame).await?;
    send.finish()
        .map_err(|e| GatewayError::Connection(e.to_string()))?;
    Ok(())
}

/// Reads one length-prefixed frame body.
pub(crate) async fn read_frame(recv: &mut quinn::RecvStream) -> Result<Vec<u8>, GatewayError> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf)
        .await
        .map_err(|e| GatewayError::Connection(e.to_string()))?;
    let len = parse_frame_len(len_buf);
    ensure_frame_len(len)?;

    let mut buf = vec![0u8; len];
    recv.read_exact(&mut buf)
        .await
        .map_err(|e| GatewayError::Connection(e.to_string()))?;
    Ok(buf)
}

/// Writes an already encoded frame.
pub(crate) async fn write_frame(
    send: &mut quinn::SendStream,
    frame: &[u8],
) -> Result<(), GatewayError> {
    send.write_all(frame)
        .await
        .map_err(|e| GatewayError::Connection(e.to_string()))
}

/// Parses a big-endian 4-byte frame length prefix.
fn parse_frame_len(len_buf: [u8; 4]) -> usize {
    u32::from_be_bytes(len_buf) as usize
}

/// Validates a frame length against [`MAX_FRAME_LEN`].
fn ensure_frame_len(len: usize) -> Result<(), GatewayError> {
    if len > MAX_FRAME_LEN {
        return Err(GatewayError::Protocol("Message too large".into()));
    }
    Ok(())
}

fn decode_request(buf: &[u8]) -> Result<RpcRequest, GatewayError> {
    serde_json::from_slice(buf).map_err(|e| GatewayError::Protocol(format!("Deserialize error: {e}")))
}

/// Serializes `value` to JSON behind a 4-byte big-endian length.
pub(crate) fn encode_frame<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, GatewayError> {
    let body =
        serde_json::to_vec(value).map_err(|e| GatewayError::Protocol(format!("Serialize error: {e}")))?;
    ensure_frame_len(body.len())?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_len_decodes_big_endian_u32() {
        assert_eq!(parse_frame_len([0, 0, 1, 44]), 300);
    }

    #[test]
    fn ensure_frame_len_rejects_too_large_input() {
        assert!(ensure_frame_len(MAX_FRAME_LEN).is_ok());
        let err = ensure_frame_len(MAX_FRAME_LEN + 1).expect_err("len should be rejected");
        assert!(err.to_string().contains("Message too large"));
    }

    #[test]
    fn decode_request_parses_tagged_json() {
        let request =
            decode_request(br#"{"method":"inquire_queue","queue":"DEV.QUEUE.1"}"#).expect("decode");
        assert_eq!(
            request,
            RpcRequest::InquireQueue {
                queue: "DEV.QUEUE.1".to_string()
            }
        );
    }

    #[test]
    fn decode_request_reports_unknown_method() {
        let err = decode_request(br#"{"method":"purge","queue":"Q"}"#).expect_err("must fail");
        assert!(err.to_string().contains("Deserialize error"));
    }

    #[test]
    fn max_rpc_message_encodes_within_frame() {
        let response = RpcResponse {
            browse_id: Some("0".repeat(32)),
            ..RpcResponse::message(vec![0u8; MAX_RPC_MSG_BYTES])
        };
        let frame = encode_frame(&response).expect("encode");
        assert!(frame.len() - 4 <= MAX_FRAME_LEN);

        let over = RpcResponse::message(vec![0u8; MAX_FRAME_LEN]);
        let err = encode_frame(&over).expect_err("oversized body");
        assert!(err.to_string().contains("Message too large"));
    }

    #[test]
    fn encode_frame_prefixes_body_length() {
        let frame = encode_frame(&RpcResponse::ok()).expect("encode");
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        assert_eq!(&frame[4..], br#"{"status":"ok","empty":false}"#);
    }
}
