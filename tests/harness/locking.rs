//! Blocked vs completed statements

use crate::common::{memory_harness, LOCK_SAMPLE, USERS};
use lockscope::prelude::*;
use std::time::Duration;

const SELECT_FOR_UPDATE: &str = "SELECT * FROM users WHERE id=1 FOR UPDATE";

#[tokio::test]
async fn test_second_locking_read_waits_for_commit() {
    let (_server, harness) = memory_harness(Engine::MySql);
    harness.setup(USERS).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();

    a.begin().await.unwrap();
    a.execute(SELECT_FOR_UPDATE).await.unwrap();

    b.begin().await.unwrap();
    let mut op = harness.background(&b, SELECT_FOR_UPDATE);
    assert_eq!(op.budget(), Duration::from_millis(100));
    assert!(op.probe().await.is_pending());

    a.commit().await.unwrap();
    let rows = op.wait().await.unwrap();
    assert_table_eq(
        "
+------+-------------+
|   id |   user_type |
|------+-------------|
|    1 |           1 |
+------+-------------+
",
        &rows,
    );
    harness.close().await.into_result().unwrap();
}

#[tokio::test]
async fn test_closing_open_transaction_releases_locks() {
    for engine in [Engine::MySql, Engine::Postgres] {
        let (server, harness) = memory_harness(engine);
        harness.setup(USERS).await.unwrap();
        let a = harness.session("a").await.unwrap();
        let b = harness.session("b").await.unwrap();

        a.begin().await.unwrap();
        a.execute("UPDATE users SET user_type = 9 WHERE id = 1")
            .await
            .unwrap();
        b.begin().await.unwrap();
        let mut op = harness.background(&b, SELECT_FOR_UPDATE);
        assert!(op.probe().await.is_pending());

        // Neither COMMIT nor ROLLBACK: closing must behave like a rollback
        a.close().await.unwrap();
        let rows = op.wait().await.unwrap();
        assert_eq!(rows.value(0, "user_type"), Some(&Value::Int(1)));

        harness.close().await;
        assert!(server.locks().is_empty());
    }
}

#[tokio::test]
async fn test_consistent_read_does_not_block() {
    let (_server, harness) = memory_harness(Engine::MySql);
    harness.setup(LOCK_SAMPLE).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();

    a.begin().await.unwrap();
    a.execute("UPDATE lock_sample SET val1 = 3 WHERE id = 2")
        .await
        .unwrap();

    b.begin().await.unwrap();
    let mut plain = harness.background(&b, "SELECT * FROM lock_sample WHERE id = 2");
    let rows = plain.probe().await.completed().unwrap().unwrap();
    assert_eq!(rows.value(0, "val1"), Some(&Value::Int(2)));

    let mut locking = harness.background(&b, "SELECT * FROM lock_sample WHERE id = 2 FOR SHARE");
    assert!(locking.probe().await.is_pending());
    a.commit().await.unwrap();
    let rows = locking.wait().await.unwrap();
    assert_eq!(rows.value(0, "val1"), Some(&Value::Int(3)));
    harness.close().await;
}

#[tokio::test]
async fn test_lock_wait_timeout_surfaces_as_error() {
    let server = MemoryServer::mysql().with_lock_wait_timeout(Duration::from_millis(300));
    let harness = Harness::with_connector(
        std::sync::Arc::new(server.clone()),
        server.credentials(),
        SessionProfile::server_defaults(),
        Coordinator::default(),
    );
    harness.setup(USERS).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();

    a.begin().await.unwrap();
    a.execute(SELECT_FOR_UPDATE).await.unwrap();
    b.begin().await.unwrap();

    let err = b.execute(SELECT_FOR_UPDATE).await.unwrap_err();
    assert!(err.is_lock_wait_timeout());
    assert!(err.to_string().contains("Lock wait timeout exceeded; try restarting transaction"));
    harness.close().await;
}

#[tokio::test]
async fn test_postgres_aborted_transaction_until_rollback() {
    let (_server, harness) = memory_harness(Engine::Postgres);
    harness.setup(USERS).await.unwrap();
    let a = harness.session("a").await.unwrap();

    a.begin().await.unwrap();
    let err = a.execute("INSERT INTO users VALUES (1, 1)").await.unwrap_err();
    assert_eq!(err.statement_kind(), Some(lockscope::core::StatementErrorKind::Other));

    let err = a.execute("SELECT * FROM users").await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Statement { code: Some(ref c), .. } if c == "25P02"
    ));
    a.rollback().await.unwrap();
    assert_eq!(a.execute("SELECT count(*) FROM users").await.unwrap().scalar(), Some(&Value::Int(3)));
    harness.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mysql_deadlock_rolls_back_victim() {
    let (server, harness) = memory_harness(Engine::MySql);
    harness.setup(USERS).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();

    a.begin().await.unwrap();
    b.begin().await.unwrap();
    a.execute("UPDATE users SET user_type = 2 WHERE id = 1").await.unwrap();
    b.execute("UPDATE users SET user_type = 2 WHERE id = 2").await.unwrap();

    let mut op = harness.background(&a, "UPDATE users SET user_type = 3 WHERE id = 2");
    assert!(op.probe().await.is_pending());
    let err = b
        .execute("UPDATE users SET user_type = 3 WHERE id = 1")
        .await
        .unwrap_err();
    assert!(err.is_deadlock());

    // B's whole transaction is gone, so A proceeds without B ending it
    op.wait().await.unwrap();
    a.commit().await.unwrap();
    let rows = server.table("users").unwrap();
    assert_eq!(rows.value(0, "user_type"), Some(&Value::Int(2)));
    assert_eq!(rows.value(1, "user_type"), Some(&Value::Int(3)));
    harness.close().await;
}
