//! REST (HTTP/JSON) adapter for the queue gateway.

pub mod api;
pub mod handlers;
pub mod server;

/// Request and response bodies.
pub use api::{
    BrowseNextRequest, Encoding, ErrorBody, HealthResponse, InquireRequest, InquireResponse,
    PutRequest, PutResponse, ReadRequest, ReadResponse,
};
/// Router construction and error mapping.
pub use handlers::{ApiError, router, status_for};
/// Listener lifecycle.
pub use server::RestServer;
