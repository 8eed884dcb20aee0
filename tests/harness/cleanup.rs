//! Registry teardown guarantees

use crate::common::{memory_harness, USERS};
use async_trait::async_trait;
use futures::FutureExt;
use lockscope::prelude::*;
use lockscope::session::{Connection, Connector};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_close_failure_still_closes_the_rest() {
    let (server, harness) = memory_harness(Engine::MySql);
    for label in ["a", "b", "c"] {
        harness.session(label).await.unwrap();
    }
    assert_eq!(server.open_connections(), 3);

    server.fail_next_close();
    let report = harness.close().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.closed, 2);
    assert!(report.into_result().is_err());
    assert_eq!(server.open_connections(), 0);
}

#[tokio::test]
async fn test_close_twice_is_clean() {
    let (server, harness) = memory_harness(Engine::Postgres);
    harness.session("a").await.unwrap();
    harness.close().await.into_result().unwrap();
    harness.close().await.into_result().unwrap();
    assert_eq!(server.open_connections(), 0);
}

#[tokio::test]
async fn test_scope_closes_after_failed_body() {
    let (server, harness) = memory_harness(Engine::MySql);
    let outcome = AssertUnwindSafe(harness.scope(async {
        let a = harness.session("a").await.unwrap();
        a.begin().await.unwrap();
        harness.session("b").await.unwrap();
        panic!("scenario assertion failed");
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert_eq!(server.open_connections(), 0);
    assert!(server.locks().is_empty());
}

#[tokio::test]
async fn test_dropping_the_harness_disconnects() {
    let (server, harness) = memory_harness(Engine::Postgres);
    let session = harness.session("a").await.unwrap();
    drop(harness);
    assert_eq!(server.open_connections(), 0);
    assert!(session.is_closed());
}

/// Connects to a memory server, remembering which user asked
struct RecordingConnector {
    server: MemoryServer,
    users: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self, credentials: &Credentials) -> HarnessResult<Box<dyn Connection>> {
        self.users.lock().unwrap().push(credentials.user.clone());
        self.server.connect(credentials).await
    }
}

fn recording_harness(engine: Engine) -> (Harness, Arc<Mutex<Vec<String>>>) {
    let server = MemoryServer::new(engine);
    let users = Arc::new(Mutex::new(Vec::new()));
    let connector = RecordingConnector {
        server: server.clone(),
        users: Arc::clone(&users),
    };
    let root = Credentials {
        user: "root".to_string(),
        ..server.credentials()
    };
    let harness = Harness::with_connector(
        Arc::new(connector),
        server.credentials(),
        SessionProfile::default(),
        Coordinator::default(),
    )
    .with_root(Some(root));
    (harness, users)
}

#[tokio::test]
async fn test_mysql_setup_runs_as_root() {
    let (harness, users) = recording_harness(Engine::MySql);
    harness.setup(USERS).await.unwrap();
    harness.session("a").await.unwrap();
    harness.root_session("check").await.unwrap();
    assert_eq!(*users.lock().unwrap(), ["root", "test", "root"]);
    harness.close().await.into_result().unwrap();
}

#[tokio::test]
async fn test_postgres_setup_runs_as_regular_user() {
    let (harness, users) = recording_harness(Engine::Postgres);
    harness.setup(USERS).await.unwrap();
    assert_eq!(*users.lock().unwrap(), ["test"]);
    harness.close().await.into_result().unwrap();
}
