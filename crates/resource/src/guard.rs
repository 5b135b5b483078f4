//! RAII guard for checked-out connections.

/// Wraps a checked-out connection; dropping it returns the connection to
/// its pool. Use `into_inner()` to take ownership without triggering the
/// return.
pub struct PoolGuard<T> {
    conn: Option<T>,
    on_drop: Option<Box<dyn FnOnce(T) + Send>>,
}

impl<T> PoolGuard<T> {
    /// Create a guard wrapping `conn` with a drop callback.
    pub fn new<F>(conn: T, on_drop: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            conn: Some(conn),
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Take the connection out of the guard, preventing the drop callback.
    #[must_use]
    pub fn into_inner(mut self) -> T {
        self.on_drop.take(); // prevent callback
        self.conn.take().expect("guard used after into_inner")
    }
}

impl<T> std::ops::Deref for PoolGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.conn.as_ref().expect("guard used after into_inner")
    }
}

impl<T> std::ops::DerefMut for PoolGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("guard used after into_inner")
    }
}

impl<T> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        if let (Some(conn), Some(on_drop)) = (self.conn.take(), self.on_drop.take()) {
            on_drop(conn);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PoolGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard").field("conn", &self.conn).finish()
    }
}
