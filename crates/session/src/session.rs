//! Transactional session over one exclusive connection
//!
//! A `Session` is a cheap, clonable handle. Clones share the connection, so a
//! background statement can run on a clone while the test keeps the original.
//! Statements on one session are strictly ordered by an async mutex; a second
//! statement waits until the first one returns.
//!
//! Transaction state only changes when the server accepts a
//! transaction-control statement:
//!
//! ```text
//! NoTransaction --BEGIN--> Open --COMMIT--> Committed
//!                           |
//!                           +--ROLLBACK / close--> RolledBack
//! ```

use crate::connection::Connection;
use lockscope_core::{Engine, HarnessError, HarnessResult, RowSet, SessionId, TxnControl, TxnState};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Split a `;`-separated fixture script into statements
///
/// Blank statements are dropped. Semicolons inside string literals are not
/// recognized.
pub fn split_script(script: &str) -> impl Iterator<Item = &str> {
    script.split(';').map(str::trim).filter(|s| !s.is_empty())
}

struct SessionInner {
    id: SessionId,
    label: Option<String>,
    engine: Engine,
    endpoint: String,
    conn: tokio::sync::Mutex<Option<Box<dyn Connection>>>,
    state: Mutex<TxnState>,
    closed: AtomicBool,
    background: Mutex<Vec<AbortHandle>>,
}

/// The connection, borrowed for one statement
///
/// If the session was abandoned meanwhile, the connection is dropped when
/// the statement ends, including when its task is aborted.
struct ConnLease<'a> {
    guard: tokio::sync::MutexGuard<'a, Option<Box<dyn Connection>>>,
    closed: &'a AtomicBool,
}

impl Drop for ConnLease<'_> {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            self.guard.take();
        }
    }
}

/// A logical database session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        label: Option<String>,
        endpoint: String,
        conn: Box<dyn Connection>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                label,
                engine: conn.engine(),
                endpoint,
                conn: tokio::sync::Mutex::new(Some(conn)),
                state: Mutex::new(TxnState::NoTransaction),
                closed: AtomicBool::new(false),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registry-unique id
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Label given at open time, if any
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// Server family this session talks to
    pub fn engine(&self) -> Engine {
        self.inner.engine
    }

    /// `engine://user@host:port/database`
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Transaction state as seen through this session
    pub fn txn_state(&self) -> TxnState {
        *self.inner.state.lock()
    }

    /// True once `close` was called or the registry abandoned the session
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Run `sql` and return its rows
    ///
    /// Server errors come back as [`HarnessError::Statement`] and are never
    /// retried, lock wait timeouts and deadlocks included.
    pub async fn execute(&self, sql: &str) -> HarnessResult<RowSet> {
        self.ensure_open()?;
        let mut lease = ConnLease {
            guard: self.inner.conn.lock().await,
            closed: &self.inner.closed,
        };
        let conn = lease
            .guard
            .as_mut()
            .ok_or(HarnessError::SessionClosed(self.inner.id))?;

        debug!(target: "lockscope::session", session = %self.inner.id, sql, "execute");
        let result = conn.query(sql).await;
        match &result {
            Ok(rows) => {
                if let Some(control) = TxnControl::classify(sql) {
                    let mut state = self.inner.state.lock();
                    *state = state.after(control);
                }
                debug!(
                    target: "lockscope::session",
                    session = %self.inner.id,
                    rows = rows.len(),
                    "statement finished"
                );
            }
            Err(e) => {
                debug!(target: "lockscope::session", session = %self.inner.id, error = %e, "statement failed");
            }
        }
        result
    }

    /// `BEGIN`
    pub async fn begin(&self) -> HarnessResult<()> {
        self.execute("BEGIN").await.map(drop)
    }

    /// `COMMIT`
    pub async fn commit(&self) -> HarnessResult<()> {
        self.execute("COMMIT").await.map(drop)
    }

    /// `ROLLBACK`
    pub async fn rollback(&self) -> HarnessResult<()> {
        self.execute("ROLLBACK").await.map(drop)
    }

    /// Run a `;`-separated script, stopping at the first failing statement
    pub async fn run_script(&self, script: &str) -> HarnessResult<()> {
        for statement in split_script(script) {
            self.execute(statement).await?;
        }
        Ok(())
    }

    /// Track a background statement so `close` can abandon it
    pub fn track_background(&self, handle: AbortHandle) {
        let mut background = self.inner.background.lock();
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// Close the session
    ///
    /// Idempotent. Background statements still running are aborted and the
    /// connection is dropped without a rollback, which the server treats as
    /// an abrupt disconnect. Otherwise any open transaction is rolled back
    /// first. Failures are reported as [`HarnessError::Cleanup`], but the
    /// session ends up closed either way.
    pub async fn close(&self) -> HarnessResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let abandoned = self.abort_background();
        let conn = self.inner.conn.lock().await.take();
        let Some(mut conn) = conn else {
            return Ok(());
        };

        let mut failure = None;
        if abandoned == 0 {
            if let Err(e) = conn.query("ROLLBACK").await {
                failure = Some(e);
            }
        }
        {
            let mut state = self.inner.state.lock();
            if state.is_open() {
                *state = TxnState::RolledBack;
            }
        }
        if let Err(e) = conn.close().await {
            failure.get_or_insert(e);
        }

        match failure {
            None => {
                info!(
                    target: "lockscope::session",
                    session = %self.inner.id,
                    abandoned,
                    "session closed"
                );
                Ok(())
            }
            Some(e) => {
                warn!(target: "lockscope::session", session = %self.inner.id, error = %e, "close failed");
                Err(HarnessError::Cleanup {
                    session: self.inner.id,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Drop the connection without awaiting anything
    ///
    /// Used when the owning registry is dropped with sessions still open.
    pub(crate) fn abandon(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.abort_background();
        // A statement still holding the connection drops it when it ends
        if let Ok(mut guard) = self.inner.conn.try_lock() {
            guard.take();
        }
    }

    fn abort_background(&self) -> usize {
        let handles = std::mem::take(&mut *self.inner.background.lock());
        let mut aborted = 0;
        for handle in handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }

    fn ensure_open(&self) -> HarnessResult<()> {
        if self.is_closed() {
            Err(HarnessError::SessionClosed(self.inner.id))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("engine", &self.inner.engine)
            .field("state", &self.txn_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
