//! In-memory server for running the harness without a database
//!
//! `MemoryServer` speaks a small SQL subset with MySQL or PostgreSQL flavour:
//! row locks with blocking waits, lock wait timeouts, deadlock detection and
//! the engines' different error semantics inside a transaction. It is meant
//! for exercising the registry, sessions and the concurrency coordinator in
//! tests; it is not a database.
//!
//! ```
//! use lockscope_session::MemoryServer;
//!
//! let server = MemoryServer::mysql();
//! assert_eq!(server.open_connections(), 0);
//! ```

mod error;
mod lexer;
mod parser;
mod store;

use crate::connection::{Connection, Connector};
use async_trait::async_trait;
use error::Failure;
use lockscope_core::{Credentials, Engine, HarnessError, HarnessResult, RowSet};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::{ConnId, Exec, Store};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

struct ServerState {
    engine: Engine,
    store: Mutex<Store>,
    /// Fired whenever locks may have been released
    released: Notify,
    open: AtomicUsize,
    fail_next_close: AtomicBool,
    refuse: AtomicBool,
}

impl ServerState {
    async fn run(&self, conn: ConnId, sql: &str) -> Result<RowSet, Failure> {
        let stmt = match parser::parse(sql) {
            Ok(stmt) => stmt,
            Err(failure) => return Err(self.store.lock().abort_statement(conn, failure)),
        };

        let _clear = ClearWait { state: self, conn };
        let deadline = self.store.lock().lock_wait(conn).map(|d| Instant::now() + d);
        loop {
            // Registered before executing so a release between the attempt
            // and the wait is not missed
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let outcome = self.store.lock().execute(conn, &stmt);
            match outcome {
                Ok(rows) => {
                    self.released.notify_waiters();
                    return Ok(rows);
                }
                Err(Exec::Failed(failure)) => {
                    self.released.notify_waiters();
                    return Err(failure);
                }
                Err(Exec::Blocked) => {
                    trace!(target: "lockscope::memory", conn, sql, "statement blocked");
                }
            }

            let woke = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, notified).await.is_ok(),
                None => {
                    notified.await;
                    true
                }
            };
            if !woke {
                let failure = self
                    .store
                    .lock()
                    .abort_statement(conn, Failure::LockWaitTimeout);
                self.released.notify_waiters();
                return Err(failure);
            }
        }
    }

    fn disconnect(&self, conn: ConnId) {
        self.store.lock().disconnect(conn);
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.released.notify_waiters();
        debug!(target: "lockscope::memory", conn, "disconnected");
    }
}

/// Clears a connection's wait record when its statement ends or is dropped
struct ClearWait<'a> {
    state: &'a ServerState,
    conn: ConnId,
}

impl Drop for ClearWait<'_> {
    fn drop(&mut self) {
        self.state.store.lock().clear_wait(self.conn);
    }
}

/// An in-memory MySQL- or PostgreSQL-flavoured server
///
/// Clones share the same server.
#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<ServerState>,
}

impl MemoryServer {
    /// Empty server with the given engine's behaviour
    pub fn new(engine: Engine) -> Self {
        Self {
            state: Arc::new(ServerState {
                engine,
                store: Mutex::new(Store::new(engine)),
                released: Notify::new(),
                open: AtomicUsize::new(0),
                fail_next_close: AtomicBool::new(false),
                refuse: AtomicBool::new(false),
            }),
        }
    }

    /// MySQL-flavoured server
    pub fn mysql() -> Self {
        Self::new(Engine::MySql)
    }

    /// PostgreSQL-flavoured server
    pub fn postgres() -> Self {
        Self::new(Engine::Postgres)
    }

    /// Lock wait timeout for connections opened from now on
    ///
    /// Defaults to 50 seconds on MySQL and no timeout on PostgreSQL. A
    /// session's own `SET` still overrides it.
    pub fn with_lock_wait_timeout(self, timeout: Duration) -> Self {
        self.state.store.lock().set_default_lock_wait(Some(timeout));
        self
    }

    /// Engine this server imitates
    pub fn engine(&self) -> Engine {
        self.state.engine
    }

    /// Credentials accepted by this server
    pub fn credentials(&self) -> Credentials {
        Credentials {
            engine: self.state.engine,
            host: "memory".to_string(),
            port: self.state.engine.default_port(),
            user: "test".to_string(),
            password: String::new(),
            database: "test".to_string(),
        }
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Make the next connection close report an error
    ///
    /// The connection is still gone afterwards.
    pub fn fail_next_close(&self) {
        self.state.fail_next_close.store(true, Ordering::SeqCst);
    }

    /// Refuse new connections while `refuse` is true
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Row locks currently granted or awaited
    ///
    /// Columns: `OBJECT_NAME`, `LOCK_DATA`, `LOCK_MODE` (`X` or `S`),
    /// `LOCK_STATUS` (`GRANTED` or `WAITING`), `CONNECTION_ID`.
    pub fn locks(&self) -> RowSet {
        self.state.store.lock().lock_report()
    }

    /// Committed rows of `table`, or `None` if it does not exist
    pub fn table(&self, table: &str) -> Option<RowSet> {
        self.state.store.lock().committed(&table.to_ascii_lowercase())
    }
}

impl fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryServer")
            .field("engine", &self.state.engine)
            .field("open", &self.open_connections())
            .finish()
    }
}

#[async_trait]
impl Connector for MemoryServer {
    async fn connect(&self, credentials: &Credentials) -> HarnessResult<Box<dyn Connection>> {
        let endpoint = credentials.endpoint();
        if credentials.engine != self.state.engine {
            return Err(HarnessError::connection(
                endpoint,
                format!("server speaks {}", self.state.engine),
            ));
        }
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(HarnessError::connection(endpoint, "connection refused"));
        }
        let id = self.state.store.lock().connect();
        self.state.open.fetch_add(1, Ordering::SeqCst);
        debug!(target: "lockscope::memory", conn = id, endpoint = %endpoint, "connected");
        Ok(Box::new(MemoryConnection {
            id,
            endpoint,
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

/// One client connection to a [`MemoryServer`]
///
/// Dropping it disconnects, rolling back whatever it left open.
struct MemoryConnection {
    id: ConnId,
    endpoint: String,
    state: Arc<ServerState>,
    closed: bool,
}

impl MemoryConnection {
    fn disconnect(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.disconnect(self.id);
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn engine(&self) -> Engine {
        self.state.engine
    }

    async fn query(&mut self, sql: &str) -> HarnessResult<RowSet> {
        if self.closed {
            return Err(HarnessError::connection(&self.endpoint, "connection is closed"));
        }
        self.state
            .run(self.id, sql)
            .await
            .map_err(|failure| failure.into_error(self.state.engine, sql))
    }

    async fn close(mut self: Box<Self>) -> HarnessResult<()> {
        self.disconnect();
        if self.state.fail_next_close.swap(false, Ordering::SeqCst) {
            return Err(HarnessError::connection(
                &self.endpoint,
                "connection reset while closing",
            ));
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
