//! QUIC RPC server bootstrap.

use std::net::SocketAddr;
use std::sync::Arc;

use proto::GatewayError;
use quinn::{Endpoint, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{error, info, warn};

use crate::connection::RpcConnection;
use crate::service::QueueGateway;

/// QUIC server that accepts connections and serves queue RPCs
pub struct QuicServer {
    endpoint: Endpoint,
    gateway: Arc<QueueGateway>,
    certificate: CertificateDer<'static>,
}

/// Closes a running [`QuicServer`] from another task.
#[derive(Clone)]
pub struct QuicServerHandle {
    endpoint: Endpoint,
}

impl QuicServerHandle {
    /// Stops accepting and closes every open connection.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"gateway shutdown");
    }
}

impl QuicServer {
    /// Create a QUIC server with an auto-generated self-signed certificate
    pub fn new_self_signed(
        addr: SocketAddr,
        gateway: Arc<QueueGateway>,
    ) -> Result<Self, GatewayError> {
        let (certs, key) = generate_self_signed_cert()?;
        let server = Self::bind(addr, certs, key, gateway)?;
        info!("QUIC RPC server listening on {}", server.bound_addr(addr));
        Ok(server)
    }

    /// Create a QUIC server with provided PEM cert and key
    pub fn new_with_certs(
        addr: SocketAddr,
        cert_pem: &[u8],
        key_pem: &[u8],
        gateway: Arc<QueueGateway>,
    ) -> Result<Self, GatewayError> {
        let certs = parse_certs(cert_pem)?;
        let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_pem))
            .map_err(|e: std::io::Error| GatewayError::Tls(e.to_string()))?
            .ok_or_else(|| GatewayError::Tls("No private key found".into()))?;

        let server = Self::bind(addr, certs, key, gateway)?;
        info!("QUIC RPC server listening on {} (custom cert)", server.bound_addr(addr));
        Ok(server)
    }

    fn bind(
        addr: SocketAddr,
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        gateway: Arc<QueueGateway>,
    ) -> Result<Self, GatewayError> {
        let certificate = certs
            .first()
            .cloned()
            .ok_or_else(|| GatewayError::Tls("No certificate found".into()))?;
        let server_config = make_server_config(certs, key)?;
        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| GatewayError::Endpoint(e.to_string()))?;
        Ok(Self {
            endpoint,
            gateway,
            certificate,
        })
    }

    /// Accept loop: runs until the endpoint is closed
    pub async fn run(self) {
        info!("QUIC RPC accept loop started");
        while let Some(incoming) = self.endpoint.accept().await {
            let gateway = self.gateway.clone();
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        info!("New QUIC connection from {remote}");
                        if let Err(e) = RpcConnection::new(conn, gateway).run().await {
                            warn!("Connection error from {remote}: {e}");
                        }
                    }
                    Err(e) => error!("Failed to accept connection: {e}"),
                }
            });
        }
        info!("QUIC endpoint closed");
    }

    /// Handle used to stop [`QuicServer::run`].
    pub fn handle(&self) -> QuicServerHandle {
        QuicServerHandle {
            endpoint: self.endpoint.clone(),
        }
    }

    /// Local address the server is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Leaf certificate presented to clients, for pinning in tests and tools.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    fn bound_addr(&self, requested: SocketAddr) -> SocketAddr {
        self.local_addr().unwrap_or(requested)
    }
}

/// Parses every certificate in a PEM bundle.
pub(crate) fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, GatewayError> {
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e: std::io::Error| GatewayError::Tls(e.to_string()))?;
    if certs.is_empty() {
        return Err(GatewayError::Tls("No certificate found".into()));
    }
    Ok(certs)
}

/// Generates a localhost self-signed certificate and private key pair.
fn generate_self_signed_cert()
-> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), GatewayError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| GatewayError::Tls(e.to_string()))?;

    let cert_der = CertificateDer::from(cert.cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(cert.key_pair.serialize_der())
        .map_err(|e| GatewayError::Tls(e.to_string()))?;

    Ok((vec![cert_der], key_der))
}

/// Builds a QUIC server config from DER certificates and private key.
fn make_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, GatewayError> {
    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Tls(e.to_string()))?;

    let server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| GatewayError::Tls(e.to_string()))?,
    ));

    Ok(server_config)
}

/// Installs the ring crypto provider once per process.
pub fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryQueueManager;

    fn gateway() -> Arc<QueueGateway> {
        Arc::new(QueueGateway::new(Arc::new(InMemoryQueueManager::with_queues(
            "QM1",
            ["DEV.QUEUE.1"],
        ))))
    }

    #[test]
    fn generate_cert_and_server_config_work() {
        ensure_crypto_provider();
        let (certs, key) =
            generate_self_signed_cert().expect("self-signed cert should be generated");
        assert_eq!(certs.len(), 1);
        make_server_config(certs, key).expect("server config should be created");
    }

    #[test]
    fn parse_certs_rejects_pem_without_certificates() {
        let err = parse_certs(b"not a pem").expect_err("must fail");
        assert!(err.to_string().contains("No certificate found"));
    }

    #[tokio::test]
    async fn new_with_certs_rejects_invalid_pem() {
        ensure_crypto_provider();
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("socket addr");
        let result = QuicServer::new_with_certs(addr, b"invalid cert", b"invalid key", gateway());
        let err = result.err().expect("invalid pem should fail");
        assert!(err.to_string().contains("TLS error"));
    }

    #[tokio::test]
    async fn new_with_certs_accepts_generated_pem() {
        ensure_crypto_provider();
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("certificate generation");
        let cert_pem = cert.cert.pem();
        let key_pem = cert.key_pair.serialize_pem();

        let addr: SocketAddr = "127.0.0.1:0".parse().expect("socket addr");
        let server =
            QuicServer::new_with_certs(addr, cert_pem.as_bytes(), key_pem.as_bytes(), gateway())
                .expect("valid generated cert should work");
        let local = server.local_addr().expect("local addr");
        assert!(local.port() > 0);
        assert_eq!(server.certificate().as_ref(), cert.cert.der().as_ref());
    }

    #[tokio::test]
    async fn closing_handle_ends_accept_loop() {
        ensure_crypto_provider();
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("socket addr");
        let server = QuicServer::new_self_signed(addr, gateway()).expect("server");
        let handle = server.handle();
        let task = tokio::spawn(server.run());
        handle.close();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("accept loop should stop")
            .expect("join");
    }
}
