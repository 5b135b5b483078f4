//! The connection lifecycle strategy a pool runs.

use async_trait::async_trait;

use crate::error::PoolResult;

/// Creates, validates, recycles, and destroys one kind of connection.
///
/// The pool calls these hooks directly; implementations hold whatever
/// driver state they need (connect options, credentials) and never see the
/// pool's bookkeeping.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// The connection type this provider manages.
    type Conn: Send + Sync + 'static;

    /// Label for logs and errors (typically the instance id).
    fn id(&self) -> &str;

    /// Establish a fresh connection.
    async fn create(&self) -> PoolResult<Self::Conn>;

    /// Check whether an idle connection is still usable. A `false` makes
    /// the pool destroy the entry and create a replacement; a broken
    /// connection is never handed to a script.
    async fn validate(&self, _conn: &Self::Conn) -> bool {
        true
    }

    /// Reset a connection before it returns to the idle set (e.g. roll
    /// back an open transaction). An error destroys the connection instead.
    async fn recycle(&self, _conn: &mut Self::Conn) -> PoolResult<()> {
        Ok(())
    }

    /// Dispose of a connection permanently.
    async fn destroy(&self, conn: Self::Conn) {
        drop(conn);
    }
}
