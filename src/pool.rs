//! Idle connection pool.
//!
//! Connections are keyed by [`Address`].  A connection taken from the pool
//! (or freshly dialed) is held through a [`Lease`] until the exchange ends;
//! only connections whose last exchange left them reusable are returned.
//!
//! Idle connections older than the keep-alive duration are evicted, and at
//! most `max_idle` are kept, oldest evicted first.  When a Tokio runtime is
//! available a background task repeats the eviction until the pool is
//! empty.

use crate::address::Address;
use crate::connection::RealConnection;
use crate::util::lock_or_clear;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Shares idle HTTP connections between calls.
///
/// Clones share one pool.  Clients built from the same
/// [`HttpdBuilder`](crate::HttpdBuilder) share it by default.
///
/// ```rust
/// use std::time::Duration;
/// use uno::ConnectionPool;
///
/// let pool = ConnectionPool::new(10, Duration::from_secs(60));
/// assert_eq!(pool.idle_connection_count(), 0);
/// ```
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    max_idle: usize,
    keep_alive: Duration,
    state: Mutex<PoolState>,
    in_use: AtomicUsize,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Idle>,
    cleanup_running: bool,
}

struct Idle {
    conn: RealConnection,
    since: Instant,
}

impl Default for ConnectionPool {
    /// 5 idle connections, kept for 5 minutes.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5 * 60))
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_idle", &self.inner.max_idle)
            .field("keep_alive", &self.inner.keep_alive)
            .field("idle", &self.idle_connection_count())
            .field("in_use", &self.inner.in_use.load(Ordering::Relaxed))
            .finish()
    }
}

impl ConnectionPool {
    /// A pool keeping at most `max_idle` idle connections, each for at most
    /// `keep_alive`.
    pub fn new(max_idle: usize, keep_alive: Duration) -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                max_idle,
                keep_alive,
                state: Mutex::new(PoolState::default()),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Connections waiting for reuse.
    pub fn idle_connection_count(&self) -> usize {
        lock_or_clear(&self.inner.state).idle.len()
    }

    /// Idle connections plus connections currently carrying a call.
    pub fn connection_count(&self) -> usize {
        self.idle_connection_count() + self.inner.in_use.load(Ordering::Acquire)
    }

    /// Close every idle connection.  Connections in use are not affected.
    pub fn evict_all(&self) {
        let evicted: Vec<Idle> = lock_or_clear(&self.inner.state).idle.drain(..).collect();
        debug!(count = evicted.len(), "evicted all idle connections");
    }

    /// A healthy idle connection for `address`.  Unhealthy candidates found
    /// on the way are closed.
    pub(crate) fn acquire(&self, address: &Address) -> Option<Lease> {
        let mut state = lock_or_clear(&self.inner.state);
        let mut i = 0;
        while i < state.idle.len() {
            if state.idle[i].conn.route().address() != address {
                i += 1;
                continue;
            }
            let Some(mut idle) = state.idle.remove(i) else {
                break;
            };
            if idle.since.elapsed() < self.inner.keep_alive && idle.conn.is_healthy() {
                trace!(id = idle.conn.id(), "reusing pooled connection");
                return Some(self.lease(idle.conn));
            }
            trace!(id = idle.conn.id(), "discarding stale pooled connection");
        }
        None
    }

    /// Mark a fresh connection as in use.
    pub(crate) fn lease(&self, conn: RealConnection) -> Lease {
        self.inner.in_use.fetch_add(1, Ordering::AcqRel);
        Lease {
            conn: Some(conn),
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Return a reusable connection to the pool.
    pub(crate) fn release(&self, mut lease: Lease) {
        let Some(conn) = lease.conn.take() else {
            return;
        };
        drop(lease);
        if self.inner.max_idle == 0 || self.inner.keep_alive.is_zero() {
            return;
        }
        let spawn = {
            let mut state = lock_or_clear(&self.inner.state);
            trace!(id = conn.id(), "connection returned to pool");
            state.idle.push_back(Idle {
                conn,
                since: Instant::now(),
            });
            self.inner.cleanup(&mut state, Instant::now());
            !std::mem::replace(&mut state.cleanup_running, true)
        };
        if spawn {
            self.spawn_cleanup();
        }
    }

    fn spawn_cleanup(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            lock_or_clear(&self.inner.state).cleanup_running = false;
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        handle.spawn(cleanup_task(weak));
    }
}

impl PoolInner {
    /// Evict expired connections, then trim to `max_idle`.  Returns the
    /// delay until the next connection expires, or `None` when empty.
    fn cleanup(&self, state: &mut PoolState, now: Instant) -> Option<Duration> {
        let keep_alive = self.keep_alive;
        state.idle.retain(|idle| now.saturating_duration_since(idle.since) < keep_alive);
        while state.idle.len() > self.max_idle {
            if let Some(oldest) = state.idle.pop_front() {
                trace!(id = oldest.conn.id(), "evicting idle connection over limit");
            }
        }
        state
            .idle
            .iter()
            .map(|idle| keep_alive.saturating_sub(now.saturating_duration_since(idle.since)))
            .min()
    }
}

async fn cleanup_task(pool: Weak<PoolInner>) {
    loop {
        let delay = {
            let Some(inner) = pool.upgrade() else {
                return;
            };
            let mut state = lock_or_clear(&inner.state);
            match inner.cleanup(&mut state, Instant::now()) {
                Some(delay) => delay,
                None => {
                    state.cleanup_running = false;
                    return;
                }
            }
        };
        tokio::time::sleep(delay.max(Duration::from_millis(10))).await;
    }
}

/// A connection checked out of the pool.  Dropping it closes the
/// connection; [`ConnectionPool::release`] returns it.
pub(crate) struct Lease {
    conn: Option<RealConnection>,
    pool: Weak<PoolInner>,
}

impl Lease {
    pub(crate) fn conn(&mut self) -> Option<&mut RealConnection> {
        self.conn.as_mut()
    }

    pub(crate) fn route(&self) -> Option<&crate::Route> {
        self.conn.as_ref().map(RealConnection::route)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.in_use.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("conn", &self.conn).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Route;
    use crate::protocol::Protocol;
    use crate::proxy::Proxy;
    use crate::url::UnoUrl;

    fn address(url: &str) -> Address {
        Address::builder(&UnoUrl::get(url).unwrap()).build().unwrap()
    }

    /// A connection over an in-memory pipe.  The peer half is returned so
    /// the connection stays healthy while it lives.
    fn conn(address: &Address) -> (RealConnection, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(1024);
        let route = Route::new(address.clone(), Proxy::direct(), "127.0.0.1:80".parse().unwrap());
        (RealConnection::new(route, Protocol::Http11, None, Box::new(ours)), theirs)
    }

    #[tokio::test]
    async fn release_then_acquire_reuses() {
        let pool = ConnectionPool::default();
        let a = address("http://a.example/");
        let (c, _peer) = conn(&a);
        let id = c.id();
        let lease = pool.lease(c);
        assert_eq!(pool.connection_count(), 1);
        pool.release(lease);
        assert_eq!(pool.idle_connection_count(), 1);
        assert_eq!(pool.connection_count(), 1);

        let mut lease = pool.acquire(&a).expect("pooled connection");
        assert_eq!(lease.conn().map(|c| c.id()), Some(id));
        assert_eq!(pool.idle_connection_count(), 0);
        drop(lease);
        assert_eq!(pool.connection_count(), 0);
    }

    #[tokio::test]
    async fn acquire_matches_address() {
        let pool = ConnectionPool::default();
        let a = address("http://a.example/");
        let (c, _peer) = conn(&a);
        pool.release(pool.lease(c));
        // (url, reused, desc)
        let cases: &[(&str, bool, &str)] = &[
            ("http://b.example/", false, "other host"),
            ("http://a.example:8080/", false, "other port"),
            ("https://a.example/", false, "other scheme"),
            ("http://a.example/other/path", true, "same origin"),
        ];
        for &(url, reused, desc) in cases {
            let lease = pool.acquire(&address(url));
            assert_eq!(lease.is_some(), reused, "{desc}");
            if let Some(lease) = lease {
                pool.release(lease);
            }
        }
    }

    #[tokio::test]
    async fn closed_connections_are_not_reused() {
        let pool = ConnectionPool::default();
        let a = address("http://a.example/");
        let (c, peer) = conn(&a);
        pool.release(pool.lease(c));
        drop(peer);
        assert!(pool.acquire(&a).is_none());
        assert_eq!(pool.idle_connection_count(), 0);
    }

    #[tokio::test]
    async fn max_idle_evicts_oldest() {
        let pool = ConnectionPool::new(2, Duration::from_secs(60));
        let a = address("http://a.example/");
        let mut peers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (c, peer) = conn(&a);
            ids.push(c.id());
            peers.push(peer);
            pool.release(pool.lease(c));
        }
        assert_eq!(pool.idle_connection_count(), 2);
        let mut first = pool.acquire(&a).unwrap();
        assert_eq!(first.conn().map(|c| c.id()), Some(ids[1]), "oldest was evicted");
    }

    #[tokio::test]
    async fn keep_alive_expiry() {
        let pool = ConnectionPool::new(5, Duration::from_millis(50));
        let a = address("http://a.example/");
        let (c, _peer) = conn(&a);
        pool.release(pool.lease(c));
        assert_eq!(pool.idle_connection_count(), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.idle_connection_count(), 0, "background cleanup evicted it");
    }

    #[tokio::test]
    async fn zero_capacity_keeps_nothing() {
        let pool = ConnectionPool::new(0, Duration::from_secs(60));
        let a = address("http://a.example/");
        let (c, _peer) = conn(&a);
        pool.release(pool.lease(c));
        assert_eq!(pool.connection_count(), 0);
    }

    #[tokio::test]
    async fn evict_all_clears_idle() {
        let pool = ConnectionPool::default();
        let a = address("http://a.example/");
        let (c1, _p1) = conn(&a);
        let (c2, _p2) = conn(&a);
        let held = pool.lease(c1);
        pool.release(pool.lease(c2));
        pool.evict_all();
        assert_eq!(pool.idle_connection_count(), 0);
        assert_eq!(pool.connection_count(), 1, "leased connection still counted");
        drop(held);
    }
}
