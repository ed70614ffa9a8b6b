//! Registry of open browse cursors keyed by opaque token.

use std::collections::HashMap;
use std::time::Duration;

use proto::BrowseToken;
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::{BrowseHandle, QueueClient};

/// Idle time after which a browse session is closed.
pub const DEFAULT_BROWSE_TTL: Duration = Duration::from_secs(5 * 60);

const TOKEN_BYTES: usize = 16;

/// Source of unguessable browse tokens.
pub trait TokenSource: Send + Sync {
    fn mint(&self) -> Result<BrowseToken, String>;
}

/// Tokens made of 16 bytes from the operating system CSPRNG, hex encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomTokens;

impl TokenSource for OsRandomTokens {
    fn mint(&self) -> Result<BrowseToken, String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| e.to_string())?;
        Ok(BrowseToken(hex::encode(bytes)))
    }
}

struct BrowseSession {
    handle: BrowseHandle,
    last_used: Instant,
}

#[derive(Default)]
struct TableState {
    sessions: HashMap<BrowseToken, BrowseSession>,
    closed: bool,
}

/// Outcome of [`BrowseSessionTable::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// The table was already shut down; the handle has been closed instead.
    Rejected,
}

/// Token -> open browse handle, guarded by one lock over the whole map.
///
/// Handle closure and entry removal always happen under that lock, so no
/// entry is ever visible with a closed handle.
pub struct BrowseSessionTable {
    ttl: Duration,
    state: Mutex<TableState>,
}

impl BrowseSessionTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(TableState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Registers a freshly opened cursor with `last_used = now`.
    pub async fn insert(
        &self,
        client: &dyn QueueClient,
        token: BrowseToken,
        handle: BrowseHandle,
    ) -> Registration {
        let mut state = self.state.lock().await;
        if state.closed {
            close_quietly(client, handle).await;
            return Registration::Rejected;
        }
        state.sessions.insert(
            token,
            BrowseSession {
                handle,
                last_used: Instant::now(),
            },
        );
        Registration::Registered
    }

    /// Returns the session's handle and refreshes its idle timer.
    pub async fn lookup(&self, token: &BrowseToken) -> Option<BrowseHandle> {
        let mut state = self.state.lock().await;
        let session = state.sessions.get_mut(token)?;
        session.last_used = Instant::now();
        Some(session.handle)
    }

    /// Refreshes the idle timer of a live session.
    pub async fn touch(&self, token: &BrowseToken) {
        if let Some(session) = self.state.lock().await.sessions.get_mut(token) {
            session.last_used = Instant::now();
        }
    }

    /// Closes and removes every session idle for longer than the TTL.
    pub async fn evict_idle(&self, client: &dyn QueueClient) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let expired: Vec<BrowseToken> = state
            .sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_used) > self.ttl)
            .map(|(token, _)| token.clone())
            .collect();

        for token in &expired {
            if let Some(session) = state.sessions.remove(token) {
                close_quietly(client, session.handle).await;
                debug!(browse_id = %token, "Idle browse session evicted");
            }
        }
        expired.len()
    }

    /// Closes every session regardless of age and refuses later inserts.
    pub async fn close_all(&self, client: &dyn QueueClient) -> usize {
        self.close_all_then(client, || async {}).await.0
    }

    /// Runs `f` while holding the table lock, after closing every session.
    ///
    /// Used by shutdown so that no session can be registered between the
    /// bulk close and the backend disconnect.
    pub async fn close_all_then<F, Fut, T>(&self, client: &dyn QueueClient, f: F) -> (usize, T)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let mut state = self.state.lock().await;
        state.closed = true;
        let sessions: Vec<BrowseSession> = state.sessions.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            close_quietly(client, session.handle).await;
        }
        let out = f().await;
        drop(state);
        (sessions.len(), out)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, token: &BrowseToken) -> bool {
        self.state.lock().await.sessions.contains_key(token)
    }
}

pub(crate) async fn close_quietly(client: &dyn QueueClient, handle: BrowseHandle) {
    if let Err(e) = client.close_browse(handle).await {
        warn!(handle = %handle, "Failed to close browse handle: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryQueueManager;

    const Q: &str = "DEV.QUEUE.1";

    fn manager() -> InMemoryQueueManager {
        InMemoryQueueManager::with_queues("QM1", [Q])
    }

    #[test]
    fn os_random_tokens_are_32_hex_chars_and_distinct() {
        let first = OsRandomTokens.mint().expect("mint");
        let second = OsRandomTokens.mint().expect("mint");
        assert_eq!(first.as_str().len(), 32);
        assert!(hex::decode(first.as_str()).is_ok());
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_closes_only_expired_sessions() {
        let qm = manager();
        let table = BrowseSessionTable::new(Duration::from_secs(60));

        let old = qm.open_browse(Q).await.expect("open");
        table.insert(&qm, BrowseToken::from("old"), old).await;
        tokio::time::advance(Duration::from_secs(45)).await;

        let fresh = qm.open_browse(Q).await.expect("open");
        table.insert(&qm, BrowseToken::from("fresh"), fresh).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(table.evict_idle(&qm).await, 1);
        assert!(!table.contains(&BrowseToken::from("old")).await);
        assert!(table.contains(&BrowseToken::from("fresh")).await);
        assert_eq!(qm.stats().browse_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_refreshes_idle_timer() {
        let qm = manager();
        let table = BrowseSessionTable::new(Duration::from_secs(60));
        let handle = qm.open_browse(Q).await.expect("open");
        let token = BrowseToken::from("t");
        table.insert(&qm, token.clone(), handle).await;

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(table.lookup(&token).await, Some(handle));
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(table.evict_idle(&qm).await, 0);
        assert!(table.contains(&token).await);
    }

    #[tokio::test]
    async fn lookup_of_unknown_token_is_none() {
        let table = BrowseSessionTable::new(DEFAULT_BROWSE_TTL);
        assert_eq!(table.lookup(&BrowseToken::from("nope")).await, None);
    }

    #[tokio::test]
    async fn close_all_closes_every_handle_and_rejects_later_inserts() {
        let qm = manager();
        let table = BrowseSessionTable::new(DEFAULT_BROWSE_TTL);
        for i in 0..3 {
            let handle = qm.open_browse(Q).await.expect("open");
            table.insert(&qm, BrowseToken(format!("t{i}")), handle).await;
        }

        assert_eq!(table.close_all(&qm).await, 3);
        assert!(table.is_empty().await);
        assert_eq!(qm.stats().browse_closed, 3);

        let late = qm.open_browse(Q).await.expect("open");
        let outcome = table.insert(&qm, BrowseToken::from("late"), late).await;
        assert_eq!(outcome, Registration::Rejected);
        assert!(table.is_empty().await);
        assert_eq!(qm.stats().browse_open, 0);
    }
}
