//! Lazily-created pools keyed by instance.

use std::hash::Hash;

use dashmap::DashMap;

use crate::error::PoolResult;
use crate::pool::Pool;
use crate::provider::Provider;

/// One pool per key (typically per instance id), created on first use.
///
/// The map is the only shared mutable state between executions targeting
/// the same instance; it is internally synchronized and hands out cloned
/// pool handles.
pub struct PoolSet<K, P>
where
    K: Eq + Hash,
    P: Provider,
{
    pools: DashMap<K, Pool<P>>,
}

impl<K, P> PoolSet<K, P>
where
    K: Eq + Hash + Clone,
    P: Provider,
{
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    /// Get the pool for `key`, creating it with `init` on first use.
    ///
    /// Concurrent first acquires for the same key race on the map entry;
    /// only one `init` result is kept.
    pub fn get_or_create<F>(&self, key: K, init: F) -> PoolResult<Pool<P>>
    where
        F: FnOnce() -> PoolResult<Pool<P>>,
    {
        if let Some(pool) = self.pools.get(&key) {
            return Ok(pool.value().clone());
        }
        let pool = init()?;
        let entry = self.pools.entry(key).or_insert(pool);
        Ok(entry.value().clone())
    }

    /// The pool for `key`, if one exists.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Pool<P>> {
        self.pools.get(key).map(|p| p.value().clone())
    }

    /// Number of live pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether any pools exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Shut down every pool, destroying idle connections.
    pub async fn shutdown(&self) {
        let pools: Vec<Pool<P>> = self.pools.iter().map(|entry| entry.value().clone()).collect();
        for pool in pools {
            pool.shutdown().await;
        }
        self.pools.clear();
    }
}

impl<K, P> Default for PoolSet<K, P>
where
    K: Eq + Hash + Clone,
    P: Provider,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> std::fmt::Debug for PoolSet<K, P>
where
    K: Eq + Hash,
    P: Provider,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSet")
            .field("pools", &self.pools.len())
            .finish()
    }
}
