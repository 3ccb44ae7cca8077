//! Pooled server sessions.
//!
//! Server sessions are cheap client-minted identifiers that servers expire
//! after the deployment's logical session timeout. The pool hands out the most
//! recently used session first and discards any that are within one minute of
//! expiring, judged against the timeout of the current topology snapshot.

use std::{
    collections::VecDeque,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::description::ClusterDescription;

/// Margin subtracted from the logical session timeout before a pooled
/// session is considered about to expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A server-side session identifier and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSession {
    id: Uuid,
    last_used_at: Option<Instant>,
    transaction_number: u64,
    dirty: bool,
}

impl ServerSession {
    fn new() -> Self {
        Self { id: Uuid::new_v4(), last_used_at: None, transaction_number: 0, dirty: false }
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns when the session was last sent to a server.
    #[must_use]
    pub fn last_used_at(&self) -> Option<Instant> {
        self.last_used_at
    }

    /// Returns the current transaction number.
    #[must_use]
    pub fn transaction_number(&self) -> u64 {
        self.transaction_number
    }

    /// Returns `true` if a network error made the session unusable.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Records that the session was just sent to a server.
    pub fn mark_used(&mut self) {
        self.last_used_at = Some(Instant::now());
    }

    /// Marks the session unusable; it will not be returned to the pool.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Increments and returns the transaction number.
    pub fn advance_transaction_number(&mut self) -> u64 {
        self.transaction_number += 1;
        self.transaction_number
    }
}

/// Pool of reusable server sessions.
pub struct ServerSessionPool {
    description: watch::Receiver<Arc<ClusterDescription>>,
    pool: Mutex<VecDeque<ServerSession>>,
}

impl ServerSessionPool {
    /// Creates a pool that reads the logical session timeout from `description`.
    #[must_use]
    pub fn new(description: watch::Receiver<Arc<ClusterDescription>>) -> Self {
        Self { description, pool: Mutex::new(VecDeque::new()) }
    }

    /// Returns the number of pooled sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    /// Returns `true` if no session is pooled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }

    /// Returns a pooled session that is not about to expire, or a new one.
    #[must_use]
    pub fn acquire(&self) -> ServerSession {
        let timeout = self.logical_session_timeout();
        let mut pool = self.pool.lock();
        while let Some(session) = pool.pop_front() {
            if !is_about_to_expire(&session, timeout) {
                return session;
            }
        }
        ServerSession::new()
    }

    /// Returns a session to the pool.
    ///
    /// Expired sessions at the tail are pruned first; dirty or nearly expired
    /// sessions are dropped instead of pooled.
    pub fn release(&self, session: ServerSession) {
        let timeout = self.logical_session_timeout();
        let mut pool = self.pool.lock();
        while pool.back().is_some_and(|s| is_about_to_expire(s, timeout)) {
            pool.pop_back();
        }
        if !session.is_dirty() && !is_about_to_expire(&session, timeout) {
            pool.push_front(session);
        }
    }

    fn logical_session_timeout(&self) -> Option<Duration> {
        self.description.borrow().logical_session_timeout()
    }
}

fn is_about_to_expire(session: &ServerSession, timeout: Option<Duration>) -> bool {
    let (Some(last_used), Some(timeout)) = (session.last_used_at, timeout) else {
        return true;
    };
    last_used.elapsed() + EXPIRY_MARGIN > timeout
}

impl fmt::Debug for ServerSessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSessionPool").field("pooled", &self.len()).finish()
    }
}

/// Options for [`Cluster::start_session`](crate::Cluster::start_session).
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct SessionOptions {
    /// Whether reads observe the session's own prior writes.
    #[builder(default)]
    pub causal_consistency: bool,
    /// Whether the session was started implicitly for one operation.
    #[builder(default)]
    pub is_implicit: bool,
}

/// A client session holding a pooled server session.
///
/// The server session is acquired lazily on first use and returned to the
/// pool when the handle is dropped.
pub struct ClientSession {
    pool: Arc<ServerSessionPool>,
    options: SessionOptions,
    server_session: Option<ServerSession>,
}

impl ClientSession {
    pub(crate) fn new(pool: Arc<ServerSessionPool>, options: SessionOptions) -> Self {
        Self { pool, options, server_session: None }
    }

    /// Returns the options the session was started with.
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Returns the server session, acquiring one from the pool if needed.
    pub fn server_session(&mut self) -> &mut ServerSession {
        self.server_session.get_or_insert_with(|| self.pool.acquire())
    }

    /// Returns `true` once a server session has been acquired.
    #[must_use]
    pub fn has_server_session(&self) -> bool {
        self.server_session.is_some()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(session) = self.server_session.take() {
            self.pool.release(session);
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("options", &self.options)
            .field("server_session", &self.server_session.as_ref().map(ServerSession::id))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        description::{ClusterId, ClusterType},
        endpoint::EndPoint,
        server_description::{ServerDescription, ServerId, ServerState, ServerType},
        settings::ConnectionMode,
    };

    fn description(timeout: Option<Duration>) -> Arc<ClusterDescription> {
        let id = ClusterId::new();
        let ep = EndPoint::new("a", 27017);
        let server = ServerDescription::builder()
            .server_id(ServerId::new(id, ep.clone()))
            .endpoint(ep)
            .state(ServerState::Connected)
            .server_type(ServerType::Standalone)
            .maybe_logical_session_timeout(timeout)
            .build();
        Arc::new(ClusterDescription::new(id, ConnectionMode::Automatic, ClusterType::Standalone, [server], None))
    }

    fn pool(timeout: Option<Duration>) -> (watch::Sender<Arc<ClusterDescription>>, Arc<ServerSessionPool>) {
        let (tx, rx) = watch::channel(description(timeout));
        (tx, Arc::new(ServerSessionPool::new(rx)))
    }

    #[test]
    fn test_acquire_mints_when_empty() {
        let (_tx, pool) = pool(Some(Duration::from_secs(1800)));
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_released_used_session_is_reused() {
        let (_tx, pool) = pool(Some(Duration::from_secs(1800)));
        let mut s = pool.acquire();
        s.mark_used();
        let id = s.id();
        pool.release(s);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.acquire().id(), id);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_never_used_session_is_not_pooled() {
        let (_tx, pool) = pool(Some(Duration::from_secs(1800)));
        pool.release(pool.acquire());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_dirty_session_is_discarded() {
        let (_tx, pool) = pool(Some(Duration::from_secs(1800)));
        let mut s = pool.acquire();
        s.mark_used();
        s.mark_dirty();
        pool.release(s);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_no_session_support_discards_everything() {
        let (_tx, pool) = pool(None);
        let mut s = pool.acquire();
        s.mark_used();
        pool.release(s);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_short_timeout_counts_as_about_to_expire() {
        let (tx, pool) = pool(Some(Duration::from_secs(1800)));
        let mut s = pool.acquire();
        s.mark_used();
        let id = s.id();
        pool.release(s);
        tx.send_replace(description(Some(Duration::from_secs(30))));
        assert_ne!(pool.acquire().id(), id);
    }

    #[test]
    fn test_client_session_returns_server_session_on_drop() {
        let (_tx, pool) = pool(Some(Duration::from_secs(1800)));
        let id = {
            let mut session = ClientSession::new(Arc::clone(&pool), SessionOptions::default());
            assert!(!session.has_server_session());
            let server_session = session.server_session();
            server_session.mark_used();
            assert_eq!(server_session.advance_transaction_number(), 1);
            server_session.id()
        };
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.acquire().id(), id);
    }
}
