//! Backend connection options and the connector that turns them into a
//! live [`QueueClient`].

use std::sync::Arc;

use proto::{BackendError, BackendOp, ConfigError, QueueError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::QueueClient;
use crate::memory::InMemoryQueueManager;

/// Which queue client implementation to connect with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process queue manager.
    #[default]
    Memory,
}

/// User/password authentication.
#[derive(Clone, Default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Channel security settings.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub enabled: bool,
    pub cipher_spec: String,
    pub key_repository: String,
}

/// Everything needed to reach the queue manager.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub kind: BackendKind,
    pub host: String,
    pub port: u16,
    pub channel: String,
    pub queue_manager: String,
    pub credentials: Option<Credentials>,
    pub tls: TlsOptions,
    /// Queues pre-defined on an in-process queue manager.
    pub queues: Vec<String>,
}

impl ConnectionOptions {
    /// `host(port)` connection name.
    pub fn connection_name(&self) -> String {
        format!("{}({})", self.host, self.port)
    }

    /// Rejects option sets that must not be used to connect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_manager.trim().is_empty() {
            return Err(ConfigError::MissingField("backend.queue_manager".to_string()));
        }
        if self.channel.trim().is_empty() {
            return Err(ConfigError::MissingField("backend.channel".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("backend.host".to_string()));
        }
        if self.tls.enabled {
            if self.tls.cipher_spec.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "backend.tls.cipher_spec".to_string(),
                    reason: "TLS enabled but no cipher spec configured".to_string(),
                });
            }
            if self.tls.key_repository.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "backend.tls.key_repository".to_string(),
                    reason: "TLS enabled but no key repository configured".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            host: "localhost".to_string(),
            port: 1414,
            channel: "DEV.APP.SVRCONN".to_string(),
            queue_manager: "QM1".to_string(),
            credentials: None,
            tls: TlsOptions::default(),
            queues: Vec::new(),
        }
    }
}

/// Validates `options` and opens the backend connection.
pub async fn connect(options: &ConnectionOptions) -> proto::Result<Arc<dyn QueueClient>> {
    options.validate()?;

    info!(
        qmgr = %options.queue_manager,
        conn = %options.connection_name(),
        channel = %options.channel,
        user = options.credentials.as_ref().map(|c| c.user.as_str()).unwrap_or(""),
        tls = options.tls.enabled,
        "Connecting to queue manager"
    );

    let client: Arc<dyn QueueClient> = match options.kind {
        BackendKind::Memory => {
            if options.queues.is_empty() {
                return Err(QueueError::backend(
                    BackendOp::Connect,
                    BackendError::Other("in-process queue manager has no queues defined".into()),
                )
                .into());
            }
            let manager = InMemoryQueueManager::with_queues(
                options.queue_manager.clone(),
                options.queues.iter().cloned(),
            );
            debug!(
                qmgr = manager.name(),
                queues = options.queues.len(),
                "In-process queue manager created"
            );
            Arc::new(manager)
        }
    };

    info!(qmgr = %options.queue_manager, "Connected to queue manager");
    if options.tls.enabled {
        info!(
            channel = %options.channel,
            cipher_spec = %options.tls.cipher_spec,
            "Channel configured for TLS"
        );
    }
    Ok(client)
}
