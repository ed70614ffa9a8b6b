//! Route handlers mapping HTTP requests onto the gateway core.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use gateway::QueueGateway;
use proto::{BrowseStart, Delivery, ErrorKind, QueueError};
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::api::{
    BrowseNextRequest, Encoding, ErrorBody, HealthResponse, InquireRequest, InquireResponse,
    PutRequest, PutResponse, ReadRequest, ReadResponse, STATUS_ERROR, STATUS_OK,
};

type GatewayState = State<Arc<QueueGateway>>;

/// Builds the REST router over a shared gateway core.
pub fn router(gateway: Arc<QueueGateway>) -> Router {
    Router::new()
        .route("/put", post(put_handler))
        .route("/get", post(get_handler))
        .route("/browse/first", post(browse_first_handler))
        .route("/browse/next", post(browse_next_handler))
        .route("/inquire/queue", post(inquire_handler))
        .route("/health", get(health_handler))
        .with_state(gateway)
        .layer(TraceLayer::new_for_http())
}

/// Failed request: HTTP status plus an `{status:"error", error}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let status = status_for(err.kind());
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: STATUS_ERROR.to_string(),
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// HTTP status for each core error category.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorKind::Backend => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!("Rejected request body: {e}");
        ApiError::bad_request("invalid JSON")
    })
}

fn failed(route: &str, err: QueueError) -> ApiError {
    match &err {
        QueueError::Validation(_) => {}
        QueueError::Backend { op, source } => {
            error!(route, op = %op, reason = source.reason_code(), "Request failed: {err}");
        }
        _ => warn!(route, "Request failed: {err}"),
    }
    ApiError::from(err)
}

fn read_response(delivery: Delivery, encoding: Encoding) -> ReadResponse {
    match delivery {
        Delivery::Message(payload) => ReadResponse::message(encoding.encode(&payload)),
        Delivery::Empty => ReadResponse::empty(),
    }
}

async fn put_handler(
    State(gateway): GatewayState,
    body: Bytes,
) -> Result<Json<PutResponse>, ApiError> {
    let req: PutRequest = parse(&body)?;
    let payload = req
        .encoding
        .decode(&req.message)
        .map_err(ApiError::bad_request)?;
    gateway
        .put(&req.queue, &payload)
        .await
        .map_err(|e| failed("/put", e))?;
    Ok(Json(PutResponse {
        status: STATUS_OK.to_string(),
        error: None,
    }))
}

async fn get_handler(
    State(gateway): GatewayState,
    body: Bytes,
) -> Result<Json<ReadResponse>, ApiError> {
    let req: ReadRequest = parse(&body)?;
    let delivery = gateway
        .get(&req.queue, req.wait_ms, req.max_msg_bytes)
        .await
        .map_err(|e| failed("/get", e))?;
    Ok(Json(read_response(delivery, req.encoding)))
}

async fn browse_first_handler(
    State(gateway): GatewayState,
    body: Bytes,
) -> Result<Json<ReadResponse>, ApiError> {
    let req: ReadRequest = parse(&body)?;
    let start = gateway
        .browse_first(&req.queue, req.wait_ms, req.max_msg_bytes)
        .await
        .map_err(|e| failed("/browse/first", e))?;
    let response = match start {
        BrowseStart::Opened { payload, token } => {
            ReadResponse::message(req.encoding.encode(&payload)).with_browse_id(token.0)
        }
        BrowseStart::Empty => ReadResponse::empty(),
    };
    Ok(Json(response))
}

async fn browse_next_handler(
    State(gateway): GatewayState,
    body: Bytes,
) -> Result<Json<ReadResponse>, ApiError> {
    let req: BrowseNextRequest = parse(&body)?;
    let delivery = gateway
        .browse_next(&req.browse_id, req.wait_ms, req.max_msg_bytes)
        .await
        .map_err(|e| failed("/browse/next", e))?;
    Ok(Json(
        read_response(delivery, req.encoding).with_browse_id(req.browse_id),
    ))
}

async fn inquire_handler(
    State(gateway): GatewayState,
    body: Bytes,
) -> Result<Json<InquireResponse>, ApiError> {
    let req: InquireRequest = parse(&body)?;
    let info = gateway
        .inquire_queue(&req.queue)
        .await
        .map_err(|e| failed("/inquire/queue", e))?;
    Ok(Json(InquireResponse::from(info)))
}

async fn health_handler(State(gateway): GatewayState) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: STATUS_OK.to_string(),
        browse_sessions: gateway.session_count().await,
    })
}
