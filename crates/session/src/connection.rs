//! Driver seam
//!
//! A `Connector` opens connections; a `Connection` runs one statement at a
//! time. Sessions own exactly one connection and never share it.

use async_trait::async_trait;
use lockscope_core::{Credentials, Engine, HarnessResult, RowSet};

/// One open server connection
#[async_trait]
pub trait Connection: Send {
    /// Server family on the other end
    fn engine(&self) -> Engine;

    /// Run one statement and collect every row it returned
    ///
    /// Statements that return no rows (DDL, DML, `SET`, `BEGIN`) yield
    /// [`RowSet::empty`].
    async fn query(&mut self, sql: &str) -> HarnessResult<RowSet>;

    /// Disconnect
    ///
    /// The server rolls back whatever transaction is still open.
    async fn close(self: Box<Self>) -> HarnessResult<()>;
}

/// Opens connections for a registry
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection with `credentials`
    async fn connect(&self, credentials: &Credentials) -> HarnessResult<Box<dyn Connection>>;
}
