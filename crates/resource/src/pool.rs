//! Bounded connection pool.
//!
//! `Pool<P>` drives the [`Provider`] hooks directly: create on demand up to
//! `max_size`, validate idle entries before reuse, recycle on return,
//! destroy on expiry or failure. A tokio semaphore bounds the total
//! (idle + active); the permit travels with the [`PoolGuard`] and is
//! returned when the guard drops.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::{PoolError, PoolResult};
use crate::guard::PoolGuard;
use crate::provider::Provider;

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// Pool sizing and timing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections (idle + checked out).
    pub max_size: usize,
    /// How long an acquire waits for a free slot before failing.
    pub acquire_timeout: Duration,
    /// Idle entries older than this are destroyed instead of reused.
    pub idle_timeout: Duration,
    /// Entries older than this are destroyed regardless of activity.
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PoolConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 {
            return Err(PoolError::configuration("max_size must be greater than 0"));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::configuration(
                "acquire_timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Override the maximum size.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Override the acquire timeout.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// An idle entry with its age bookkeeping.
struct Entry<T> {
    conn: T,
    created_at: Instant,
    idle_since: Instant,
}

impl<T> Entry<T> {
    fn fresh(conn: T) -> Self {
        let now = Instant::now();
        Self {
            conn,
            created_at: now,
            idle_since: now,
        }
    }

    /// Re-wrap a returned connection, preserving its original `created_at`.
    fn returned(conn: T, created_at: Instant) -> Self {
        Self {
            conn,
            created_at,
            idle_since: Instant::now(),
        }
    }

    fn is_expired(&self, config: &PoolConfig) -> bool {
        self.created_at.elapsed() > config.max_lifetime
            || self.idle_since.elapsed() > config.idle_timeout
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successful acquisitions.
    pub acquired: u64,
    /// Returns to the pool (recycled or destroyed).
    pub released: u64,
    /// Connections ever created.
    pub created: u64,
    /// Connections ever destroyed (expired, broken, or unrecyclable).
    pub destroyed: u64,
    /// Currently checked out.
    pub active: usize,
    /// Currently idle.
    pub idle: usize,
}

struct PoolInner<P: Provider> {
    provider: P,
    config: PoolConfig,
    idle: Mutex<VecDeque<Entry<P::Conn>>>,
    stats: Mutex<PoolStats>,
    /// Bounds total connections (idle + active).
    semaphore: Semaphore,
}

// ---------------------------------------------------------------------------
// Pool<P>
// ---------------------------------------------------------------------------

/// A bounded pool of connections managed through a [`Provider`].
pub struct Pool<P: Provider> {
    inner: Arc<PoolInner<P>>,
}

impl<P: Provider> Clone for Pool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Provider> std::fmt::Debug for Pool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("provider", &self.inner.provider.id())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<P: Provider> Pool<P> {
    /// Create a pool for the given provider.
    pub fn new(provider: P, config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;
        let max = config.max_size;
        Ok(Self {
            inner: Arc::new(PoolInner {
                provider,
                config,
                idle: Mutex::new(VecDeque::with_capacity(max)),
                stats: Mutex::new(PoolStats::default()),
                semaphore: Semaphore::new(max),
            }),
        })
    }

    /// Acquire a connection, waiting up to the configured timeout for a
    /// free slot.
    ///
    /// The returned guard gives the connection back to the pool on drop,
    /// on every exit path including timeout and task abort.
    pub async fn acquire(&self) -> PoolResult<PoolGuard<P::Conn>> {
        let inner = &self.inner;
        let wait_started = Instant::now();

        let permit = tokio::time::timeout(inner.config.acquire_timeout, inner.semaphore.acquire())
            .await
            .map_err(|_| {
                let stats = inner.stats.lock();
                PoolError::Exhausted {
                    pool: inner.provider.id().to_string(),
                    active: stats.active,
                    max: inner.config.max_size,
                    waited_ms: wait_started.elapsed().as_millis() as u64,
                }
            })?
            .map_err(|_| {
                // the semaphore is never closed while the pool is alive
                PoolError::create_failed(inner.provider.id(), "pool semaphore closed", false)
            })?;

        // Reuse an idle connection when a healthy one exists; expired or
        // broken entries are destroyed and we fall through to create.
        let (conn, created_at) = loop {
            let entry = inner.idle.lock().pop_front();
            match entry {
                Some(entry) if entry.is_expired(&inner.config) => {
                    inner.provider.destroy(entry.conn).await;
                    inner.stats.lock().destroyed += 1;
                }
                Some(entry) => {
                    if inner.provider.validate(&entry.conn).await {
                        break (entry.conn, Some(entry.created_at));
                    }
                    tracing::warn!(
                        pool = inner.provider.id(),
                        "discarding broken idle connection"
                    );
                    inner.provider.destroy(entry.conn).await;
                    inner.stats.lock().destroyed += 1;
                }
                None => match inner.provider.create().await {
                    Ok(conn) => {
                        inner.stats.lock().created += 1;
                        break (conn, None);
                    }
                    // the permit drops here, freeing the slot
                    Err(err) => return Err(err),
                },
            }
        };

        {
            let mut stats = inner.stats.lock();
            stats.acquired += 1;
            stats.active += 1;
            stats.idle = inner.idle.lock().len();
        }

        // The permit rides with the guard; it is added back when the
        // release task runs.
        permit.forget();

        let pool = self.clone();
        Ok(PoolGuard::new(conn, move |conn| {
            pool.release(conn, created_at);
        }))
    }

    /// Return a connection to the pool (guard drop callback).
    ///
    /// Runs recycle/destroy on a spawned task so the drop itself never
    /// blocks; the semaphore permit is restored when the task finishes.
    fn release(&self, mut conn: P::Conn, created_at: Option<Instant>) {
        let inner = Arc::clone(&self.inner);
        drop(tokio::spawn(async move {
            let keep = inner.provider.recycle(&mut conn).await.is_ok();

            if keep {
                let entry = match created_at {
                    Some(created_at) => Entry::returned(conn, created_at),
                    None => Entry::fresh(conn),
                };
                inner.idle.lock().push_back(entry);
            } else {
                tracing::debug!(pool = inner.provider.id(), "destroying unrecyclable connection");
                inner.provider.destroy(conn).await;
                inner.stats.lock().destroyed += 1;
            }

            let mut stats = inner.stats.lock();
            stats.released += 1;
            stats.active = stats.active.saturating_sub(1);
            stats.idle = inner.idle.lock().len();
            drop(stats);

            inner.semaphore.add_permits(1);
        }));
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.lock().clone()
    }

    /// Destroy all idle connections.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = {
            let mut idle = self.inner.idle.lock();
            idle.drain(..).collect()
        };
        let count = entries.len();
        for entry in entries {
            self.inner.provider.destroy(entry.conn).await;
        }
        let mut stats = self.inner.stats.lock();
        stats.destroyed += count as u64;
        stats.idle = 0;
    }
}
