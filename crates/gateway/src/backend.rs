//! Capability interface of a queue client connection.

use async_trait::async_trait;
use proto::{BackendError, QueueInfo, ReadOptions};

/// Backend handle of an open browse cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BrowseHandle(pub u64);

impl std::fmt::Display for BrowseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live connection to a queue manager.
///
/// Put, receive and inquire open and close a private handle per call. Reads
/// report "nothing to read" as [`BackendError::NoMessageAvailable`].
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Writes one message outside any syncpoint.
    async fn put(&self, queue: &str, payload: &[u8]) -> Result<(), BackendError>;

    /// Removes and returns the next message, waiting up to `opts.wait`.
    async fn receive(&self, queue: &str, opts: ReadOptions) -> Result<Vec<u8>, BackendError>;

    /// Opens a browse-mode handle positioned before the first message.
    async fn open_browse(&self, queue: &str) -> Result<BrowseHandle, BackendError>;

    /// Reads the first message through `handle` without removing it.
    async fn browse_first(
        &self,
        handle: BrowseHandle,
        opts: ReadOptions,
    ) -> Result<Vec<u8>, BackendError>;

    /// Advances `handle` to the next message without removing it.
    async fn browse_next(
        &self,
        handle: BrowseHandle,
        opts: ReadOptions,
    ) -> Result<Vec<u8>, BackendError>;

    /// Releases a browse handle.
    async fn close_browse(&self, handle: BrowseHandle) -> Result<(), BackendError>;

    /// Reads the fixed attribute set of a queue.
    async fn inquire(&self, queue: &str) -> Result<QueueInfo, BackendError>;

    /// Drops the connection. Later calls fail with [`BackendError::Connection`].
    async fn disconnect(&self) -> Result<(), BackendError>;
}
