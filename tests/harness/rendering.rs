//! Rendered tables of live harness state

use crate::common::{memory_harness, USERS};
use lockscope::prelude::*;

#[tokio::test]
async fn test_lock_report_renders_waiting_request() {
    let (server, harness) = memory_harness(Engine::MySql);
    harness.setup(USERS).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();

    a.begin().await.unwrap();
    a.execute("SELECT * FROM users WHERE id = 1 FOR UPDATE").await.unwrap();
    b.begin().await.unwrap();
    let mut op = harness.background(&b, "SELECT * FROM users WHERE id = 1 FOR UPDATE");
    assert!(op.probe().await.is_pending());

    // The setup session was connection 1
    assert_table_eq(
        "
+---------------+-------------+-------------+---------------+-----------------+
| OBJECT_NAME   |   LOCK_DATA | LOCK_MODE   | LOCK_STATUS   |   CONNECTION_ID |
|---------------+-------------+-------------+---------------+-----------------|
| users         |           1 | X           | GRANTED       |               2 |
| users         |           1 | X           | WAITING       |               3 |
+---------------+-------------+-------------+---------------+-----------------+
",
        &server.locks(),
    );

    a.rollback().await.unwrap();
    op.wait().await.unwrap();
    harness.close().await;
}

#[tokio::test]
async fn test_query_results_round_trip_through_compare() {
    let (_server, harness) = memory_harness(Engine::Postgres);
    harness.setup(USERS).await.unwrap();
    let session = harness.session("reader").await.unwrap();

    for sql in [
        "SELECT * FROM users",
        "SELECT id FROM users WHERE user_type = 1 ORDER BY id DESC",
        "SELECT count(*) FROM users",
        "SELECT 'lock from a' FROM users WHERE id = 1",
        "SELECT * FROM users WHERE id = 42",
    ] {
        let rows = session.execute(sql).await.unwrap();
        compare(&format_table(&rows), &rows).unwrap();
    }
    harness.close().await;
}

#[tokio::test]
async fn test_mismatch_reports_both_tables() {
    let (_server, harness) = memory_harness(Engine::MySql);
    harness.setup(USERS).await.unwrap();
    let session = harness.session("reader").await.unwrap();
    let rows = session.execute("SELECT * FROM users WHERE id = 2").await.unwrap();

    let err = compare(
        "
+------+-------------+
|   id |   user_type |
|------+-------------|
|    1 |           1 |
+------+-------------+
",
        &rows,
    )
    .unwrap_err();
    match err {
        HarnessError::AssertionMismatch { expected, actual } => {
            assert!(expected.contains("|    1 |           1 |"));
            assert!(actual.contains("|    2 |           1 |"));
        }
        other => panic!("expected a mismatch, got {:?}", other),
    }
    harness.close().await;
}
