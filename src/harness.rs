//! One engine's sessions, credentials and probe budget in one place

use lockscope_concurrency::{Coordinator, PendingOperation};
use lockscope_core::{Credentials, Engine, HarnessConfig, HarnessResult, SessionProfile};
use lockscope_session::{CleanupReport, Connector, Session, SessionRegistry, SqlConnector};
#[cfg(feature = "test-util")]
use lockscope_session::MemoryServer;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Sessions against one server
///
/// Every session opened through a harness belongs to its registry and is
/// closed by [`close`](Self::close), by [`scope`](Self::scope), or when the
/// harness is dropped.
pub struct Harness {
    engine: Engine,
    credentials: Credentials,
    root: Option<Credentials>,
    registry: SessionRegistry,
    coordinator: Coordinator,
}

impl Harness {
    /// Harness for `engine` as configured, connecting through sqlx
    ///
    /// Fails with a configuration error if the engine has no endpoint.
    pub fn connect(config: &HarnessConfig, engine: Engine) -> HarnessResult<Self> {
        let credentials = config.credentials(engine)?;
        let root = config.root_credentials(engine).ok();
        info!(target: "lockscope::harness", endpoint = %credentials.endpoint(), "harness configured");
        Ok(Self::with_connector(
            Arc::new(SqlConnector),
            credentials,
            config.profile.clone(),
            Coordinator::from_config(config),
        )
        .with_root(root))
    }

    /// Harness over an in-memory server with the default profile
    #[cfg(feature = "test-util")]
    pub fn memory(server: &MemoryServer) -> Self {
        Self::with_connector(
            Arc::new(server.clone()),
            server.credentials(),
            SessionProfile::default(),
            Coordinator::default(),
        )
    }

    /// Harness over any connector
    pub fn with_connector(
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        profile: SessionProfile,
        coordinator: Coordinator,
    ) -> Self {
        Self {
            engine: credentials.engine,
            credentials,
            root: None,
            registry: SessionRegistry::new(connector, profile),
            coordinator,
        }
    }

    /// Credentials used by [`root_session`](Self::root_session)
    pub fn with_root(mut self, root: Option<Credentials>) -> Self {
        self.root = root;
        self
    }

    /// Engine of the server
    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Credentials sessions are opened with
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The registry owning every session of this harness
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Coordinator used by [`background`](Self::background)
    pub fn coordinator(&self) -> Coordinator {
        self.coordinator
    }

    /// Run a setup script on a throwaway session
    ///
    /// MySQL fixtures run as the root user when one is configured, since
    /// the regular user may lack DDL privileges.
    pub async fn setup(&self, script: &str) -> HarnessResult<()> {
        let credentials = match (self.engine, &self.root) {
            (Engine::MySql, Some(root)) => root,
            _ => &self.credentials,
        };
        self.registry.setup(credentials, script).await
    }

    /// Open a labeled session
    pub async fn session(&self, label: &str) -> HarnessResult<Session> {
        self.registry.open_labeled(&self.credentials, label).await
    }

    /// Open a session with the root credentials, falling back to the
    /// regular ones when no root user is configured
    pub async fn root_session(&self, label: &str) -> HarnessResult<Session> {
        let credentials = self.root.as_ref().unwrap_or(&self.credentials);
        self.registry.open_labeled(credentials, label).await
    }

    /// Start `sql` on `session` in the background with the configured budget
    pub fn background(&self, session: &Session, sql: impl Into<String>) -> PendingOperation {
        self.coordinator.run_in_background(session, sql)
    }

    /// Close every session; safe to call more than once
    pub async fn close(&self) -> CleanupReport {
        self.registry.close_all().await
    }

    /// Run `body`, then close every session even if `body` panicked
    pub async fn scope<F: Future>(&self, body: F) -> F::Output {
        self.registry.scope(body).await
    }
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("credentials", &self.credentials)
            .field("sessions", &self.registry.open_count())
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
