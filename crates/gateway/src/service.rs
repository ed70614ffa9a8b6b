//! Gateway core: the single owner of the backend connection and of the
//! browse session table.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use proto::{
    BackendError, BackendOp, BrowseStart, BrowseToken, Delivery, QueueError, QueueInfo,
    ReadOptions,
};
use tracing::{debug, info, warn};

use crate::backend::{BrowseHandle, QueueClient};
use crate::browse::{
    BrowseSessionTable, DEFAULT_BROWSE_TTL, OsRandomTokens, Registration, TokenSource,
    close_quietly,
};

/// Queue operations exposed to the protocol adapters.
pub struct QueueGateway {
    client: Arc<dyn QueueClient>,
    sessions: BrowseSessionTable,
    tokens: Arc<dyn TokenSource>,
    shut_down: AtomicBool,
}

impl QueueGateway {
    /// Creates a gateway over a connected client with the default browse TTL.
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        Self::with_ttl(client, DEFAULT_BROWSE_TTL)
    }

    /// Creates a gateway with a custom browse session idle TTL.
    pub fn with_ttl(client: Arc<dyn QueueClient>, ttl: Duration) -> Self {
        Self {
            client,
            sessions: BrowseSessionTable::new(ttl),
            tokens: Arc::new(OsRandomTokens),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Replaces the browse token generator.
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn browse_ttl(&self) -> Duration {
        self.sessions.ttl()
    }

    /// Number of open browse sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    /// Appends one message to `queue`.
    pub async fn put(&self, queue: &str, message: &[u8]) -> Result<(), QueueError> {
        require("queue", queue)?;
        self.client
            .put(queue, message)
            .await
            .map_err(|e| QueueError::backend(BackendOp::Put, e))?;
        debug!(queue, bytes = message.len(), "Message put");
        Ok(())
    }

    /// Removes and returns the next message from `queue`.
    pub async fn get(
        &self,
        queue: &str,
        wait_ms: i64,
        max_bytes: i64,
    ) -> Result<Delivery, QueueError> {
        require("queue", queue)?;
        let opts = ReadOptions::new(wait_ms, max_bytes);
        let delivery = into_delivery(BackendOp::Get, self.client.receive(queue, opts).await)?;
        debug!(queue, empty = delivery.is_empty(), "Get completed");
        Ok(delivery)
    }

    /// Opens a browse cursor on `queue` and returns its first message.
    ///
    /// A session is only created when a message was read.
    pub async fn browse_first(
        &self,
        queue: &str,
        wait_ms: i64,
        max_bytes: i64,
    ) -> Result<BrowseStart, QueueError> {
        require("queue", queue)?;
        let opts = ReadOptions::new(wait_ms, max_bytes);

        self.evict_idle_sessions().await;

        let handle = self
            .client
            .open_browse(queue)
            .await
            .map_err(|e| QueueError::backend(BackendOp::OpenBrowse, e))?;
        let pending = PendingBrowse::new(self.client.clone(), handle);

        let payload = match into_delivery(
            BackendOp::BrowseFirst,
            self.client.browse_first(handle, opts).await,
        ) {
            Ok(Delivery::Message(payload)) => payload,
            Ok(Delivery::Empty) => {
                pending.close().await;
                return Ok(BrowseStart::Empty);
            }
            Err(e) => {
                pending.close().await;
                return Err(e);
            }
        };

        let token = match self.tokens.mint() {
            Ok(token) => token,
            Err(reason) => {
                pending.close().await;
                return Err(QueueError::Token(reason));
            }
        };

        let registration = self
            .sessions
            .insert(self.client.as_ref(), token.clone(), handle)
            .await;
        // The table owns the handle now, or has closed it.
        pending.disarm();
        match registration {
            Registration::Registered => {
                debug!(queue, browse_id = %token, "Browse session opened");
                Ok(BrowseStart::Opened { payload, token })
            }
            Registration::Rejected => Err(QueueError::backend(
                BackendOp::BrowseFirst,
                BackendError::Connection("gateway is shutting down".to_string()),
            )),
        }
    }

    /// Advances the cursor identified by `browse_id`.
    ///
    /// An empty result leaves the session open so the caller can poll again.
    pub async fn browse_next(
        &self,
        browse_id: &str,
        wait_ms: i64,
        max_bytes: i64,
    ) -> Result<Delivery, QueueError> {
        require("browse_id", browse_id)?;
        let opts = ReadOptions::new(wait_ms, max_bytes);
        let token = BrowseToken::from(browse_id);

        self.evict_idle_sessions().await;

        let handle = self
            .sessions
            .lookup(&token)
            .await
            .ok_or_else(|| QueueError::SessionNotFound(browse_id.to_string()))?;

        let delivery = into_delivery(
            BackendOp::BrowseNext,
            self.client.browse_next(handle, opts).await,
        )?;
        if !delivery.is_empty() {
            self.sessions.touch(&token).await;
        }
        Ok(delivery)
    }

    /// Reads the attribute snapshot of `queue`.
    pub async fn inquire_queue(&self, queue: &str) -> Result<QueueInfo, QueueError> {
        require("queue", queue)?;
        self.client
            .inquire(queue)
            .await
            .map_err(|e| QueueError::backend(BackendOp::Inquire, e))
    }

    /// Closes sessions idle beyond the TTL. Returns how many were closed.
    pub async fn evict_idle_sessions(&self) -> usize {
        let evicted = self.sessions.evict_idle(self.client.as_ref()).await;
        if evicted > 0 {
            info!(evicted, "Evicted idle browse sessions");
        }
        evicted
    }

    /// Closes every browse session, then disconnects the backend.
    ///
    /// Safe to call more than once; only the first call does any work.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = self.client.clone();
        let (closed, disconnect) = self
            .sessions
            .close_all_then(self.client.as_ref(), || async move { client.disconnect().await })
            .await;
        info!(closed, "Browse sessions closed");
        match disconnect {
            Ok(()) => info!("Disconnected from queue manager"),
            Err(e) => warn!("Disconnect failed: {e}"),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// A browse handle not yet owned by the session table.
///
/// If the owning future is dropped before [`PendingBrowse::disarm`] or
/// [`PendingBrowse::close`], the handle is closed on a spawned task.
struct PendingBrowse {
    client: Arc<dyn QueueClient>,
    handle: BrowseHandle,
    armed: bool,
}

impl PendingBrowse {
    fn new(client: Arc<dyn QueueClient>, handle: BrowseHandle) -> Self {
        Self {
            client,
            handle,
            armed: true,
        }
    }

    async fn close(mut self) {
        self.armed = false;
        close_quietly(self.client.as_ref(), self.handle).await;
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingBrowse {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let client = self.client.clone();
        let handle = self.handle;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(handle = %handle, "Closing browse handle of a cancelled request");
                runtime.spawn(async move { close_quietly(client.as_ref(), handle).await });
            }
            Err(_) => warn!(handle = %handle, "Browse handle abandoned outside a runtime"),
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), QueueError> {
    if value.is_empty() {
        return Err(QueueError::Validation(field.to_string()));
    }
    Ok(())
}

/// Maps the backend "no message" sentinel to an empty delivery.
fn into_delivery(
    op: BackendOp,
    result: Result<Vec<u8>, BackendError>,
) -> Result<Delivery, QueueError> {
    match result {
        Ok(payload) => Ok(Delivery::Message(payload)),
        Err(BackendError::NoMessageAvailable) => Ok(Delivery::Empty),
        Err(e) => Err(QueueError::backend(op, e)),
    }
}
