//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound the handshake, the upstream connect, and tunnel idleness
//! - Treat a zero-second setting as "no limit" where a limit is optional
//!
//! Timed-out operations are dropped, which cancels any pending I/O they own.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Convert an optional-limit setting: `0` means unbounded.
pub fn optional_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// Run `fut` under `limit`. Returns `None` if the limit elapsed first.
pub async fn run_with_timeout<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Last-activity mark shared by both relay directions.
///
/// Either direction may `touch` it; the idle arm of the relay waits on
/// [`ActivityClock::idle_for`].
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record activity now.
    pub fn touch(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    /// Resolves once nothing has touched the clock for `limit`, or never
    /// when there is no limit.
    pub async fn idle_for(&self, limit: Option<Duration>) {
        let Some(limit) = limit else {
            return std::future::pending().await;
        };
        loop {
            let deadline = self.last() + limit;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}
