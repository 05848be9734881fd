//! Shared utility functions.
//!
//! Small helpers used across modules: poison-tolerant locking, environment
//! lookup, pointer-identity wrappers for injected strategy objects, and the
//! timeout race used by every I/O step.

use crate::Error;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

/// Read an environment variable, returning `None` for empty or unset values.
pub(crate) fn read_env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Mutex helpers
// ---------------------------------------------------------------------------

/// Lock a [`Mutex`](std::sync::Mutex), recovering from poison.
///
/// The dispatcher queues, pool table and cookie store only hold plain
/// collections whose every mutation completes before any callback runs,
/// so a panic elsewhere never leaves them half-updated.
pub(crate) fn lock_or_clear<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("mutex poisoned by a prior panic; recovering");
            mutex.clear_poison();
            poisoned.into_inner()
        }
    }
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// An `Arc` compared and hashed by pointer identity.
///
/// Connection identity includes injected strategy objects (DNS, TLS,
/// authenticators, proxy selectors).  Two addresses share connections only
/// when they were configured with the *same* instances.
pub struct Shared<T: ?Sized>(pub(crate) Arc<T>);

impl<T: ?Sized> Shared<T> {
    /// Wrap an existing `Arc`.
    pub fn new(inner: Arc<T>) -> Self {
        Shared(inner)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Shared(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> std::ops::Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.addr(), state);
    }
}

impl<T: ?Sized> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:p})", self.addr())
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Race `fut` against `timeout`.  `None` or a zero duration means no limit.
///
/// On expiry the future is dropped (closing whatever socket it owned) and
/// a timeout error naming `what` is returned.
pub(crate) async fn with_timeout<F, T>(
    timeout: Option<Duration>,
    what: &'static str,
    fut: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    let Some(limit) = timeout.filter(|d| !d.is_zero()) else {
        return fut.await;
    };
    let fut = std::pin::pin!(fut);
    let delay = futures_timer::Delay::new(limit);
    match futures_util::future::select(fut, delay).await {
        futures_util::future::Either::Left((result, _)) => result,
        futures_util::future::Either::Right(((), _)) => {
            Err(Error::timeout(format!("{what} timed out after {limit:?}")))
        }
    }
}

/// Convert a non-negative duration to milliseconds, saturating.
pub(crate) fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_env_var_unset() {
        assert!(read_env_var("UNO_TEST_NONEXISTENT_VAR_12345").is_none());
    }

    #[test]
    fn lock_or_clear_recovers_from_poison() {
        use std::sync::Mutex;

        let mutex = Arc::new(Mutex::new(42_i32));
        let m2 = Arc::clone(&mutex);

        let _ = std::thread::spawn(move || {
            let _guard = m2.lock().unwrap();
            panic!("intentional panic to poison mutex");
        })
        .join();

        assert!(mutex.lock().is_err(), "mutex should be poisoned");
        let guard = lock_or_clear(&mutex);
        assert_eq!(*guard, 42);
        drop(guard);
        assert!(mutex.lock().is_ok(), "poison should be cleared");
    }

    #[test]
    fn shared_compares_by_identity() {
        use std::collections::HashSet;

        trait Named {
            fn name(&self) -> &str;
        }
        struct N(&'static str);
        impl Named for N {
            fn name(&self) -> &str {
                self.0
            }
        }

        let a: Arc<dyn Named> = Arc::new(N("a"));
        let same = Shared::new(Arc::clone(&a));
        let first = Shared::new(a);
        let twin: Shared<dyn Named> = Shared::new(Arc::new(N("a")));

        assert_eq!(first, same);
        assert_ne!(first, twin, "equal contents, different instances");
        assert_eq!(first.name(), twin.name());

        let set: HashSet<_> = [first.clone(), same, twin].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn with_timeout_table() {
        // (timeout, work duration, expect timeout, desc)
        let cases: &[(Option<Duration>, Duration, bool, &str)] = &[
            (None, Duration::from_millis(20), false, "no limit"),
            (Some(Duration::ZERO), Duration::from_millis(20), false, "zero means no limit"),
            (Some(Duration::from_secs(5)), Duration::from_millis(1), false, "finishes in time"),
            (Some(Duration::from_millis(20)), Duration::from_secs(5), true, "expires"),
        ];
        for &(timeout, work, expect_timeout, desc) in cases {
            let result = with_timeout(timeout, "test op", async move {
                tokio::time::sleep(work).await;
                Ok::<_, Error>(7)
            })
            .await;
            match result {
                Ok(v) => {
                    assert!(!expect_timeout, "{desc}");
                    assert_eq!(v, 7);
                }
                Err(e) => {
                    assert!(expect_timeout, "{desc}: {e}");
                    assert!(e.is_timeout(), "{desc}");
                }
            }
        }
    }

    #[test]
    fn duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_millis(Duration::MAX), i64::MAX);
    }
}
