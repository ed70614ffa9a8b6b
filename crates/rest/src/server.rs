//! REST listener lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use gateway::QueueGateway;
use proto::GatewayError;
use tokio::net::TcpListener;
use tracing::info;

use crate::handlers::router;

/// HTTP/JSON front end bound to a TCP listener
pub struct RestServer {
    listener: TcpListener,
    gateway: Arc<QueueGateway>,
}

impl RestServer {
    /// Binds the listener without serving yet.
    pub async fn bind(addr: SocketAddr, gateway: Arc<QueueGateway>) -> Result<Self, GatewayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Endpoint(format!("bind failed on {addr}: {e}")))?;
        Ok(Self { listener, gateway })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    pub async fn run<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr().map_err(|e| GatewayError::Endpoint(e.to_string()))?;
        info!(%addr, "REST adapter listening");

        axum::serve(self.listener, router(self.gateway))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::Connection(format!("server error: {e}")))?;

        info!("REST adapter stopped");
        Ok(())
    }
}
