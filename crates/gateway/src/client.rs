//! QUIC RPC client.

use std::net::SocketAddr;
use std::sync::Arc;

use proto::{GatewayError, RpcRequest, RpcResponse};
use quinn::{ClientConfig, Connection, Endpoint};
use rustls::pki_types::CertificateDer;
use tracing::debug;

use crate::connection::{encode_frame, read_frame, write_frame};

/// Client connection to a [`crate::QuicServer`]. Each call uses its own stream.
pub struct RpcClient {
    endpoint: Endpoint,
    conn: Connection,
}

impl RpcClient {
    /// Connects trusting only the given certificates.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        trusted: &[CertificateDer<'static>],
    ) -> Result<Self, GatewayError> {
        let mut roots = rustls::RootCertStore::empty();
        for cert in trusted {
            roots
                .add(cert.clone())
                .map_err(|e| GatewayError::Tls(e.to_string()))?;
        }
        let crypto = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| GatewayError::Tls(e.to_string()))?,
        ));

        let bind: SocketAddr = if addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let mut endpoint =
            Endpoint::client(bind).map_err(|e| GatewayError::Endpoint(e.to_string()))?;
        endpoint.set_default_client_config(client_config);

        let conn = endpoint
            .connect(addr, server_name)
            .map_err(|e| GatewayError::Connection(e.to_string()))?
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        debug!("RPC client connected to {addr}");
        Ok(Self { endpoint, conn })
    }

    /// Sends one request and waits for its response.
    pub async fn call(&self, request: &RpcRequest) -> Result<RpcResponse, GatewayError> {
        let (mut send, mut recv) = self
            .conn
            .open_bi()
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        write_frame(&mut send, &encode_frame(request)?).await?;
        send.finish()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        let body = read_frame(&mut recv).await?;
        serde_json::from_slice(&body)
            .map_err(|e| GatewayError::Protocol(format!("Deserialize error: {e}")))
    }

    /// Closes the connection and waits for the peer to acknowledge.
    pub async fn close(self) {
        self.conn.close(0u32.into(), b"done");
        self.endpoint.wait_idle().await;
    }
}
