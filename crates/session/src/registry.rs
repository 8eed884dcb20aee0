//! Session registry
//!
//! Every connection a test opens goes through one registry, which guarantees
//! it gets closed:
//! - `close_all` closes every session, swallowing and logging failures so a
//!   cleanup problem never hides the test's own failure
//! - `scope` runs a test body and then `close_all`, even when the body panics
//! - dropping the registry disconnects whatever is still open

use crate::connection::Connector;
use crate::session::Session;
use futures::FutureExt;
use lockscope_core::{Credentials, HarnessError, HarnessResult, SessionId, SessionProfile};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`SessionRegistry::close_all`]
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Sessions closed by this call
    pub closed: usize,
    /// Close failures, already logged
    pub failures: Vec<HarnessError>,
}

impl CleanupReport {
    /// True if every close succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// First failure, if any
    pub fn into_result(self) -> HarnessResult<()> {
        match self.failures.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Opens sessions and closes all of them at teardown
pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    profile: SessionProfile,
    next_id: AtomicU64,
    sessions: Mutex<Vec<Session>>,
}

impl SessionRegistry {
    /// Registry opening connections through `connector`
    ///
    /// Every new session runs `profile`'s init statements before it is
    /// handed out.
    pub fn new(connector: Arc<dyn Connector>, profile: SessionProfile) -> Self {
        Self {
            connector,
            profile,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Profile applied to new sessions
    pub fn profile(&self) -> &SessionProfile {
        &self.profile
    }

    /// Open a session
    pub async fn open(&self, credentials: &Credentials) -> HarnessResult<Session> {
        self.open_session(credentials, None).await
    }

    /// Open a session with a label that shows up in logs
    pub async fn open_labeled(
        &self,
        credentials: &Credentials,
        label: impl Into<String>,
    ) -> HarnessResult<Session> {
        self.open_session(credentials, Some(label.into())).await
    }

    async fn open_session(
        &self,
        credentials: &Credentials,
        label: Option<String>,
    ) -> HarnessResult<Session> {
        let endpoint = credentials.endpoint();
        let mut conn = self.connector.connect(credentials).await?;

        for statement in self.profile.init_statements(credentials.engine) {
            if let Err(e) = conn.query(&statement).await {
                warn!(target: "lockscope::registry", endpoint = %endpoint, statement = %statement, error = %e, "session init failed");
                if let Err(close_err) = conn.close().await {
                    debug!(target: "lockscope::registry", error = %close_err, "close after failed init");
                }
                return Err(e);
            }
        }

        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let session = Session::new(id, label, endpoint, conn);
        self.sessions.lock().push(session.clone());
        info!(
            target: "lockscope::registry",
            session = %id,
            label = session.label().unwrap_or("-"),
            endpoint = session.endpoint(),
            "session opened"
        );
        Ok(session)
    }

    /// Open a session, run a `;`-separated fixture script, commit and close
    pub async fn setup(&self, credentials: &Credentials, script: &str) -> HarnessResult<()> {
        let session = self.open_labeled(credentials, "setup").await?;
        session.run_script(script).await?;
        session.commit().await?;
        session.close().await
    }

    /// Every session opened so far, in open order
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().clone()
    }

    /// Number of sessions opened so far
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True if no session was opened
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Sessions not closed yet
    pub fn open_count(&self) -> usize {
        self.sessions.lock().iter().filter(|s| !s.is_closed()).count()
    }

    /// Close every session
    ///
    /// Never fails: each failure is logged and collected in the report, and
    /// the remaining sessions are still closed. Safe to call repeatedly.
    pub async fn close_all(&self) -> CleanupReport {
        let sessions = self.sessions();
        let mut report = CleanupReport::default();
        for session in sessions {
            if session.is_closed() {
                continue;
            }
            match session.close().await {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    warn!(target: "lockscope::registry", session = %session.id(), error = %e, "cleanup failure ignored");
                    report.failures.push(e);
                }
            }
        }
        debug!(
            target: "lockscope::registry",
            closed = report.closed,
            failures = report.failures.len(),
            "close_all finished"
        );
        report
    }

    /// Run `body`, then close every session
    ///
    /// Cleanup runs whether the body returns or panics; a panic is resumed
    /// after cleanup.
    pub async fn scope<F: Future>(&self, body: F) -> F::Output {
        let outcome = AssertUnwindSafe(body).catch_unwind().await;
        let report = self.close_all().await;
        if !report.is_clean() {
            warn!(target: "lockscope::registry", failures = report.failures.len(), "scope cleanup had failures");
        }
        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        let mut abandoned = 0usize;
        for session in sessions {
            if !session.is_closed() {
                session.abandon();
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!(target: "lockscope::registry", sessions = abandoned, "registry dropped with open sessions, disconnecting");
        }
    }
}
