//! Queue gateway core and its QUIC RPC transport.

pub mod backend;
pub mod browse;
pub mod client;
pub mod connect;
pub mod connection;
pub mod dispatch;
pub mod memory;
pub mod server;
pub mod service;
pub mod sweeper;

/// Backend seam implemented by queue manager clients.
pub use backend::{BrowseHandle, QueueClient};
/// Browse session registry and token generation.
pub use browse::{BrowseSessionTable, DEFAULT_BROWSE_TTL, OsRandomTokens, TokenSource};
/// QUIC RPC client.
pub use client::RpcClient;
/// Connection options and the backend connector.
pub use connect::{BackendKind, ConnectionOptions, Credentials, TlsOptions, connect};
/// Request dispatcher shared by transports.
pub use dispatch::dispatch;
/// In-process queue manager.
pub use memory::{InMemoryQueueManager, ManagerStats, QueueDefinition};
/// QUIC RPC server.
pub use server::{QuicServer, QuicServerHandle, ensure_crypto_provider};
/// Gateway core.
pub use service::QueueGateway;
/// Background idle-session sweeper.
pub use sweeper::SessionSweeper;
