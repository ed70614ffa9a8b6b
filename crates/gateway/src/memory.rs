//! In-process queue manager implementing [`QueueClient`].
//!
//! Queues live in process memory and must be defined before use. Messages
//! are kept in arrival order with increasing sequence numbers; browse cursors
//! remember the last sequence number they returned, so a cursor keeps its
//! place even when already-browsed messages are consumed by a get.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use proto::{BackendError, QUEUE_TYPE_LOCAL, QueueInfo, ReadOptions, USAGE_NORMAL};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::{BrowseHandle, QueueClient};

const DEFAULT_MAX_DEPTH: i32 = 5000;

/// Attributes of a queue created with [`InMemoryQueueManager::define_queue`].
#[derive(Debug, Clone)]
pub struct QueueDefinition {
    pub description: String,
    pub max_depth: i32,
}

impl Default for QueueDefinition {
    fn default() -> Self {
        Self {
            description: String::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Handle counters, used to verify that every opened handle gets closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    pub browse_opened: usize,
    pub browse_closed: usize,
    pub browse_open: usize,
    pub connected: bool,
}

struct StoredMessage {
    seq: u64,
    payload: Vec<u8>,
}

struct MemQueue {
    definition: QueueDefinition,
    inhibit_get: bool,
    inhibit_put: bool,
    messages: VecDeque<StoredMessage>,
    next_seq: u64,
    open_input: i32,
    open_output: i32,
    arrivals: Arc<Notify>,
}

impl MemQueue {
    fn new(definition: QueueDefinition) -> Self {
        Self {
            definition,
            inhibit_get: false,
            inhibit_put: false,
            messages: VecDeque::new(),
            next_seq: 0,
            open_input: 0,
            open_output: 0,
            arrivals: Arc::new(Notify::new()),
        }
    }

    fn depth(&self) -> i32 {
        i32::try_from(self.messages.len()).unwrap_or(i32::MAX)
    }
}

struct Cursor {
    queue: String,
    last_seq: Option<u64>,
}

struct ManagerState {
    connected: bool,
    queues: HashMap<String, MemQueue>,
    cursors: HashMap<u64, Cursor>,
}

impl ManagerState {
    fn ensure_connected(&self) -> Result<(), BackendError> {
        if self.connected {
            Ok(())
        } else {
            Err(BackendError::Connection("not connected".to_string()))
        }
    }

    fn queue(&self, name: &str) -> Result<&MemQueue, BackendError> {
        self.queues
            .get(name)
            .ok_or_else(|| BackendError::UnknownQueue(name.to_string()))
    }

    fn queue_mut(&mut self, name: &str) -> Result<&mut MemQueue, BackendError> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| BackendError::UnknownQueue(name.to_string()))
    }
}

#[derive(Clone, Copy)]
enum OpenMode {
    Input,
    Output,
}

/// Transient handle on a queue, released on drop.
struct OpenGuard<'a> {
    manager: &'a InMemoryQueueManager,
    queue: String,
    mode: OpenMode,
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.manager.state.lock();
        if let Some(q) = state.queues.get_mut(&self.queue) {
            match self.mode {
                OpenMode::Input => q.open_input -= 1,
                OpenMode::Output => q.open_output -= 1,
            }
        }
    }
}

/// Queue manager held entirely in process memory
pub struct InMemoryQueueManager {
    name: String,
    state: Mutex<ManagerState>,
    next_handle: AtomicU64,
    browse_opened: AtomicUsize,
    browse_closed: AtomicUsize,
}

impl InMemoryQueueManager {
    /// Creates a connected queue manager without any queues.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ManagerState {
                connected: true,
                queues: HashMap::new(),
                cursors: HashMap::new(),
            }),
            next_handle: AtomicU64::new(1),
            browse_opened: AtomicUsize::new(0),
            browse_closed: AtomicUsize::new(0),
        }
    }

    /// Creates a queue manager with default-attribute queues.
    pub fn with_queues<I, S>(name: impl Into<String>, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let manager = Self::new(name);
        for queue in queues {
            manager.define_queue(queue, QueueDefinition::default());
        }
        manager
    }

    /// Queue manager name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Defines a queue. Redefining an existing queue keeps its messages.
    pub fn define_queue(&self, name: impl Into<String>, definition: QueueDefinition) {
        let name = name.into();
        let mut state = self.state.lock();
        match state.queues.get_mut(&name) {
            Some(existing) => existing.definition = definition,
            None => {
                debug!(queue = %name, "Queue defined");
                state.queues.insert(name, MemQueue::new(definition));
            }
        }
    }

    /// Sets the get-inhibited flag of a queue.
    pub fn set_inhibit_get(&self, queue: &str, inhibited: bool) -> Result<(), BackendError> {
        self.state.lock().queue_mut(queue)?.inhibit_get = inhibited;
        Ok(())
    }

    /// Sets the put-inhibited flag of a queue.
    pub fn set_inhibit_put(&self, queue: &str, inhibited: bool) -> Result<(), BackendError> {
        self.state.lock().queue_mut(queue)?.inhibit_put = inhibited;
        Ok(())
    }

    /// Current number of messages on a queue.
    pub fn depth(&self, queue: &str) -> Result<usize, BackendError> {
        Ok(self.state.lock().queue(queue)?.messages.len())
    }

    pub fn stats(&self) -> ManagerStats {
        let state = self.state.lock();
        ManagerStats {
            browse_opened: self.browse_opened.load(Ordering::SeqCst),
            browse_closed: self.browse_closed.load(Ordering::SeqCst),
            browse_open: state.cursors.len(),
            connected: state.connected,
        }
    }

    fn open_transient(&self, queue: &str, mode: OpenMode) -> Result<OpenGuard<'_>, BackendError> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        let q = state.queue_mut(queue)?;
        match mode {
            OpenMode::Input => q.open_input += 1,
            OpenMode::Output => q.open_output += 1,
        }
        Ok(OpenGuard {
            manager: self,
            queue: queue.to_string(),
            mode,
        })
    }

    /// Runs `attempt` until it yields a message or the wait interval elapses.
    async fn wait_for<F>(
        &self,
        queue: &str,
        opts: ReadOptions,
        mut attempt: F,
    ) -> Result<Vec<u8>, BackendError>
    where
        F: FnMut(&mut ManagerState) -> Result<Option<Vec<u8>>, BackendError>,
    {
        let deadline = Instant::now() + opts.wait;
        loop {
            let arrivals = {
                let state = self.state.lock();
                state.ensure_connected()?;
                state.queue(queue)?.arrivals.clone()
            };
            let notified = arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                state.ensure_connected()?;
                if let Some(payload) = attempt(&mut state)? {
                    return Ok(payload);
                }
            }

            if !opts.waits() || tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(BackendError::NoMessageAvailable);
            }
        }
    }

    fn cursor_queue(&self, handle: BrowseHandle) -> Result<String, BackendError> {
        let state = self.state.lock();
        state.ensure_connected()?;
        state
            .cursors
            .get(&handle.0)
            .map(|c| c.queue.clone())
            .ok_or(BackendError::HandleClosed(handle.0))
    }

    async fn browse(
        &self,
        handle: BrowseHandle,
        opts: ReadOptions,
        restart: bool,
    ) -> Result<Vec<u8>, BackendError> {
        let queue = self.cursor_queue(handle)?;
        self.wait_for(&queue, opts, |state| {
            let cursor = state
                .cursors
                .get(&handle.0)
                .ok_or(BackendError::HandleClosed(handle.0))?;
            let after = if restart { None } else { cursor.last_seq };
            let q = state.queue(&queue)?;
            if q.inhibit_get {
                return Err(inhibited(&queue, "get"));
            }
            let Some(found) = q
                .messages
                .iter()
                .find(|m| after.is_none_or(|seq| m.seq > seq))
            else {
                return Ok(None);
            };
            check_fits(found.payload.len(), opts.max_bytes)?;
            let (seq, payload) = (found.seq, found.payload.clone());
            if let Some(cursor) = state.cursors.get_mut(&handle.0) {
                cursor.last_seq = Some(seq);
            }
            Ok(Some(payload))
        })
        .await
    }
}

fn inhibited(queue: &str, operation: &str) -> BackendError {
    BackendError::Inhibited {
        queue: queue.to_string(),
        operation: operation.to_string(),
    }
}

fn check_fits(length: usize, max_bytes: usize) -> Result<(), BackendError> {
    if length > max_bytes {
        return Err(BackendError::Truncated { length, max_bytes });
    }
    Ok(())
}

#[async_trait]
impl QueueClient for InMemoryQueueManager {
    async fn put(&self, queue: &str, payload: &[u8]) -> Result<(), BackendError> {
        let _handle = self.open_transient(queue, OpenMode::Output)?;
        let mut state = self.state.lock();
        state.ensure_connected()?;
        let q = state.queue_mut(queue)?;
        if q.inhibit_put {
            return Err(inhibited(queue, "put"));
        }
        if q.depth() >= q.definition.max_depth {
            return Err(BackendError::QueueFull {
                queue: queue.to_string(),
                max_depth: q.definition.max_depth,
            });
        }
        let seq = q.next_seq;
        q.next_seq += 1;
        q.messages.push_back(StoredMessage {
            seq,
            payload: payload.to_vec(),
        });
        q.arrivals.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str, opts: ReadOptions) -> Result<Vec<u8>, BackendError> {
        let _handle = self.open_transient(queue, OpenMode::Input)?;
        self.wait_for(queue, opts, |state| {
            let q = state.queue_mut(queue)?;
            if q.inhibit_get {
                return Err(inhibited(queue, "get"));
            }
            let Some(front) = q.messages.front() else {
                return Ok(None);
            };
            check_fits(front.payload.len(), opts.max_bytes)?;
            Ok(q.messages.pop_front().map(|m| m.payload))
        })
        .await
    }

    async fn open_browse(&self, queue: &str) -> Result<BrowseHandle, BackendError> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.queue_mut(queue)?.open_input += 1;
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        state.cursors.insert(
            handle,
            Cursor {
                queue: queue.to_string(),
                last_seq: None,
            },
        );
        self.browse_opened.fetch_add(1, Ordering::SeqCst);
        Ok(BrowseHandle(handle))
    }

    async fn browse_first(
        &self,
        handle: BrowseHandle,
        opts: ReadOptions,
    ) -> Result<Vec<u8>, BackendError> {
        self.browse(handle, opts, true).await
    }

    async fn browse_next(
        &self,
        handle: BrowseHandle,
        opts: ReadOptions,
    ) -> Result<Vec<u8>, BackendError> {
        self.browse(handle, opts, false).await
    }

    async fn close_browse(&self, handle: BrowseHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let cursor = state
            .cursors
            .remove(&handle.0)
            .ok_or(BackendError::HandleClosed(handle.0))?;
        if let Some(q) = state.queues.get_mut(&cursor.queue) {
            q.open_input -= 1;
        }
        self.browse_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn inquire(&self, queue: &str) -> Result<QueueInfo, BackendError> {
        let state = self.state.lock();
        state.ensure_connected()?;
        let q = state.queue(queue)?;
        Ok(QueueInfo {
            name: queue.to_string(),
            description: q.definition.description.clone(),
            queue_type: QUEUE_TYPE_LOCAL,
            usage: USAGE_NORMAL,
            def_persistence: 0,
            inhibit_get: i32::from(q.inhibit_get),
            inhibit_put: i32::from(q.inhibit_put),
            current_depth: q.depth(),
            max_depth: q.definition.max_depth,
            open_input_count: q.open_input,
            open_output_count: q.open_output,
        })
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.ensure_connected()?;
        state.connected = false;
        // Handles die with the connection.
        let orphaned: Vec<u64> = state.cursors.keys().copied().collect();
        for handle in orphaned {
            if let Some(cursor) = state.cursors.remove(&handle)
                && let Some(q) = state.queues.get_mut(&cursor.queue)
            {
                q.open_input -= 1;
            }
        }
        for q in state.queues.values() {
            q.arrivals.notify_waiters();
        }
        debug!(qmgr = %self.name, "Queue manager disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const Q: &str = "DEV.QUEUE.1";

    fn manager() -> InMemoryQueueManager {
        InMemoryQueueManager::with_queues("QM1", [Q])
    }

    #[tokio::test]
    async fn put_then_receive_is_fifo() {
        let qm = manager();
        qm.put(Q, b"a").await.expect("put a");
        qm.put(Q, b"b").await.expect("put b");

        assert_eq!(qm.receive(Q, ReadOptions::no_wait()).await.expect("a"), b"a");
        assert_eq!(qm.receive(Q, ReadOptions::no_wait()).await.expect("b"), b"b");
        assert_eq!(
            qm.receive(Q, ReadOptions::no_wait()).await,
            Err(BackendError::NoMessageAvailable)
        );
    }

    #[tokio::test]
    async fn unknown_queue_is_reported() {
        let qm = manager();
        let err = qm.put("MISSING", b"x").await.expect_err("must fail");
        assert_eq!(err, BackendError::UnknownQueue("MISSING".to_string()));
    }

    #[tokio::test]
    async fn receive_waits_for_a_late_put() {
        let qm = Arc::new(manager());
        let producer = qm.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.put(Q, b"late").await.expect("put");
        });

        let payload = qm
            .receive(Q, ReadOptions::new(2_000, 0))
            .await
            .expect("message should arrive within wait");
        assert_eq!(payload, b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn receive_gives_up_after_wait_interval() {
        let qm = manager();
        let started = Instant::now();
        let result = qm.receive(Q, ReadOptions::new(300, 0)).await;
        assert_eq!(result, Err(BackendError::NoMessageAvailable));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn oversized_message_is_refused_and_kept() {
        let qm = manager();
        qm.put(Q, b"0123456789").await.expect("put");
        let err = qm
            .receive(Q, ReadOptions::new(0, 4))
            .await
            .expect_err("truncation refused");
        assert_eq!(
            err,
            BackendError::Truncated {
                length: 10,
                max_bytes: 4
            }
        );
        assert_eq!(qm.depth(Q).expect("depth"), 1);
    }

    #[tokio::test]
    async fn browse_does_not_consume_and_survives_gets() {
        let qm = manager();
        for m in [b"a", b"b", b"c"] {
            qm.put(Q, m).await.expect("put");
        }
        let handle = qm.open_browse(Q).await.expect("open browse");
        let opts = ReadOptions::no_wait();
        assert_eq!(qm.browse_first(handle, opts).await.expect("first"), b"a");

        // A destructive get of the browsed message must not reset the cursor.
        assert_eq!(qm.receive(Q, opts).await.expect("get"), b"a");
        assert_eq!(qm.browse_next(handle, opts).await.expect("next"), b"b");
        assert_eq!(qm.browse_next(handle, opts).await.expect("next"), b"c");
        assert_eq!(
            qm.browse_next(handle, opts).await,
            Err(BackendError::NoMessageAvailable)
        );
        assert_eq!(qm.depth(Q).expect("depth"), 2);
    }

    #[tokio::test]
    async fn browse_handles_are_counted() {
        let qm = manager();
        let h1 = qm.open_browse(Q).await.expect("h1");
        let _h2 = qm.open_browse(Q).await.expect("h2");
        assert_eq!(qm.inquire(Q).await.expect("inq").open_input_count, 2);

        qm.close_browse(h1).await.expect("close");
        assert_eq!(
            qm.close_browse(h1).await,
            Err(BackendError::HandleClosed(h1.0))
        );
        let stats = qm.stats();
        assert_eq!(stats.browse_opened, 2);
        assert_eq!(stats.browse_closed, 1);
        assert_eq!(stats.browse_open, 1);
    }

    #[tokio::test]
    async fn inquire_reports_attributes() {
        let qm = manager();
        qm.define_queue(
            "DEV.QUEUE.2",
            QueueDefinition {
                description: "second".to_string(),
                max_depth: 2,
            },
        );
        qm.put("DEV.QUEUE.2", b"x").await.expect("put");
        qm.set_inhibit_get("DEV.QUEUE.2", true).expect("inhibit");

        let info = qm.inquire("DEV.QUEUE.2").await.expect("inquire");
        assert_eq!(info.name, "DEV.QUEUE.2");
        assert_eq!(info.description, "second");
        assert_eq!(info.queue_type, QUEUE_TYPE_LOCAL);
        assert_eq!(info.current_depth, 1);
        assert_eq!(info.max_depth, 2);
        assert_eq!(info.inhibit_get, 1);
        assert_eq!(info.inhibit_put, 0);
        assert_eq!(info.open_input_count, 0);
        assert_eq!(info.open_output_count, 0);
    }

    #[tokio::test]
    async fn full_and_inhibited_queues_reject_puts() {
        let qm = manager();
        qm.define_queue(
            "SMALL",
            QueueDefinition {
                max_depth: 1,
                ..QueueDefinition::default()
            },
        );
        qm.put("SMALL", b"1").await.expect("first put");
        assert!(matches!(
            qm.put("SMALL", b"2").await,
            Err(BackendError::QueueFull { max_depth: 1, .. })
        ));

        qm.set_inhibit_put(Q, true).expect("inhibit");
        let err = qm.put(Q, b"x").await.expect_err("inhibited");
        assert_eq!(err.reason_code(), 2051);
    }

    #[tokio::test]
    async fn disconnect_fails_later_calls_and_drops_handles() {
        let qm = manager();
        qm.open_browse(Q).await.expect("open");
        qm.disconnect().await.expect("disconnect");

        assert!(!qm.stats().connected);
        assert_eq!(qm.stats().browse_open, 0);
        assert!(qm.put(Q, b"x").await.expect_err("disconnected").is_connection());
        assert!(qm.disconnect().await.is_err());
    }
}
