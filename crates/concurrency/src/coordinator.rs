//! Background statements with bounded waits
//!
//! A test that expects session B to block behind a lock held by session A
//! starts B's statement on a background task and probes it:
//!
//! ```text
//! 1. run_in_background(&b, sql)   - spawn, returns immediately
//! 2. probe() / await_with_timeout - StillPending while B is blocked
//! 3. A commits or rolls back
//! 4. wait()                       - Completed with B's final result
//! ```
//!
//! A timed-out probe never cancels the statement: it joins `&mut JoinHandle`
//! under `tokio::time::timeout`, so the task keeps running and a later
//! `wait` picks up its result. The task is registered with its session, and
//! only closing the session abandons it.

use lockscope_core::{HarnessConfig, HarnessError, HarnessResult, RowSet};
use lockscope_session::Session;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

/// Probe budget used when none is given
pub const DEFAULT_PROBE_BUDGET: Duration = Duration::from_millis(100);

/// Result of a bounded wait on a [`PendingOperation`]
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The statement returned, successfully or not
    Completed(HarnessResult<RowSet>),
    /// Still running when the wait ran out
    StillPending,
}

impl Outcome {
    /// True for [`Outcome::StillPending`]
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::StillPending)
    }

    /// True for [`Outcome::Completed`]
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// The statement's result, or `None` if it was still pending
    pub fn completed(self) -> Option<HarnessResult<RowSet>> {
        match self {
            Outcome::Completed(result) => Some(result),
            Outcome::StillPending => None,
        }
    }
}

/// A statement running on a background task
///
/// Dropping the handle detaches the task; it still finishes, or is
/// abandoned when its session closes.
pub struct PendingOperation {
    session: Session,
    sql: String,
    budget: Duration,
    started: Instant,
    handle: Option<JoinHandle<HarnessResult<RowSet>>>,
    result: Option<HarnessResult<RowSet>>,
}

/// Start `sql` on `session` in the background with the default budget
///
/// Must be called within a tokio runtime.
pub fn run_in_background(session: &Session, sql: impl Into<String>) -> PendingOperation {
    PendingOperation::spawn(session, sql.into(), DEFAULT_PROBE_BUDGET)
}

impl PendingOperation {
    fn spawn(session: &Session, sql: String, budget: Duration) -> Self {
        let task_session = session.clone();
        let task_sql = sql.clone();
        let handle = tokio::spawn(async move { task_session.execute(&task_sql).await });
        session.track_background(handle.abort_handle());
        debug!(
            target: "lockscope::coordinator",
            session = %session.id(),
            sql = %sql,
            budget_ms = budget.as_millis() as u64,
            "background statement spawned"
        );
        Self {
            session: session.clone(),
            sql,
            budget,
            started: Instant::now(),
            handle: Some(handle),
            result: None,
        }
    }

    /// Replace the budget used by [`probe`](Self::probe)
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Budget used by [`probe`](Self::probe)
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Session the statement runs on
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The statement
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Time since the statement was spawned
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once the statement returned; never waits
    pub fn is_finished(&self) -> bool {
        self.result.is_some() || self.handle.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Wait at most `timeout` for the statement
    ///
    /// Returns [`Outcome::StillPending`] without cancelling anything if the
    /// statement has not returned in time. Once completed, every later call
    /// returns the same result.
    pub async fn await_with_timeout(&mut self, timeout: Duration) -> Outcome {
        if let Some(result) = &self.result {
            return Outcome::Completed(result.clone());
        }
        let Some(handle) = self.handle.as_mut() else {
            return Outcome::Completed(Err(HarnessError::TaskFailed(format!(
                "no task for `{}`",
                self.sql
            ))));
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => Outcome::Completed(self.settle(joined)),
            Err(_) => {
                info!(
                    target: "lockscope::coordinator",
                    session = %self.session.id(),
                    elapsed_ms = self.elapsed().as_millis() as u64,
                    "statement still pending"
                );
                Outcome::StillPending
            }
        }
    }

    /// Wait for the operation's own budget
    pub async fn probe(&mut self) -> Outcome {
        self.await_with_timeout(self.budget).await
    }

    /// Wait until the statement returns
    ///
    /// Unbounded on the harness side; a server-side lock wait timeout still
    /// ends it with an error.
    pub async fn wait(&mut self) -> HarnessResult<RowSet> {
        if let Some(result) = &self.result {
            return result.clone();
        }
        match self.handle.as_mut() {
            Some(handle) => {
                let joined = handle.await;
                self.settle(joined)
            }
            None => Err(HarnessError::TaskFailed(format!("no task for `{}`", self.sql))),
        }
    }

    fn settle(
        &mut self,
        joined: Result<HarnessResult<RowSet>, JoinError>,
    ) -> HarnessResult<RowSet> {
        self.handle = None;
        let result = joined.unwrap_or_else(|e| Err(task_failure(&self.sql, e)));
        match &result {
            Ok(rows) => info!(
                target: "lockscope::coordinator",
                session = %self.session.id(),
                rows = rows.len(),
                elapsed_ms = self.elapsed().as_millis() as u64,
                "background statement completed"
            ),
            Err(e) => info!(
                target: "lockscope::coordinator",
                session = %self.session.id(),
                error = %e,
                elapsed_ms = self.elapsed().as_millis() as u64,
                "background statement failed"
            ),
        }
        self.result = Some(result.clone());
        result
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("session", &self.session.id())
            .field("sql", &self.sql)
            .field("budget", &self.budget)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn task_failure(sql: &str, err: JoinError) -> HarnessError {
    if err.is_cancelled() {
        return HarnessError::TaskFailed(format!("`{}` was abandoned when its session closed", sql));
    }
    let panic = err.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    HarnessError::TaskFailed(format!("`{}` panicked: {}", sql, message))
}

/// Spawns background statements with a configured default budget
#[derive(Debug, Clone, Copy)]
pub struct Coordinator {
    budget: Duration,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_BUDGET)
    }
}

impl Coordinator {
    /// Coordinator whose operations probe for `budget`
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    /// Coordinator using the configured `probe_budget_ms`
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.probe_budget())
    }

    /// Default budget of spawned operations
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Start `sql` on `session` in the background
    pub fn run_in_background(&self, session: &Session, sql: impl Into<String>) -> PendingOperation {
        PendingOperation::spawn(session, sql.into(), self.budget)
    }
}
