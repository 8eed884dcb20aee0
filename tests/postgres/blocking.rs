//! Finding who blocks whom

use crate::common::{live_harness, live_server_log};
use lockscope::prelude::*;
use std::time::Duration;

const TEST_TABLE_A: &str = "
    drop table if exists test_table_a;
    create table test_table_a (i integer primary key, val varchar(255));
    insert into test_table_a values (1, 'a');
";

const LOCK_FROM_A: &str = "SELECT 'lock from a' FROM test_table_a WHERE i = 1 FOR UPDATE";
const LOCK_FROM_B: &str = "SELECT 'lock from b' FROM test_table_a WHERE i = 1 FOR UPDATE";

#[tokio::test]
#[ignore = "needs a live PostgreSQL server"]
async fn test_blocking_pair_and_lock_wait_log() {
    let harness = live_harness(Engine::Postgres).await;
    harness.setup(TEST_TABLE_A).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();
    let check = harness.session("check").await.unwrap();
    let pid_a = postgres::backend_pid(&a).await.unwrap();
    let pid_b = postgres::backend_pid(&b).await.unwrap();

    a.begin().await.unwrap();
    b.begin().await.unwrap();
    a.execute(LOCK_FROM_A).await.unwrap();

    // Long enough to pass deadlock_timeout, after which the wait is logged
    let mut op = harness
        .background(&b, LOCK_FROM_B)
        .with_budget(Duration::from_millis(1500));
    assert!(op.probe().await.is_pending());

    let expected = format!(
        "
+---------+---------------------------------------------------------------+---------+---------------------------------------------------------------+
|   w_pid | w_query                                                       |   b_pid | b_query                                                       |
|---------+---------------------------------------------------------------+---------+---------------------------------------------------------------|
|   {} | {} |   {} | {} |
+---------+---------------------------------------------------------------+---------+---------------------------------------------------------------+
",
        pid_cell(pid_b),
        LOCK_FROM_B,
        pid_cell(pid_a),
        LOCK_FROM_A
    );
    assert_table_eq(&expected, &postgres::blocking_pairs(&check).await.unwrap());

    a.rollback().await.unwrap();
    op.wait().await.unwrap();

    let log = match live_server_log() {
        Some(log) => log,
        None => {
            tracing::warn!(target: "lockscope::tests", "skipping log check: POSTGRES_LOG not set");
            harness.close().await;
            return;
        }
    };
    if postgres::setting(&check, "log_lock_waits").await.unwrap() != "on" {
        tracing::warn!(target: "lockscope::tests", "skipping log check: log_lock_waits is off");
        harness.close().await;
        return;
    }
    let lines = log.lines_for_pid(pid_b).unwrap();
    assert!(lines.iter().any(|line| line.contains("still waiting for ShareLock")));
    assert!(lines.iter().any(|line| line.contains(LOCK_FROM_B)));
    harness.close().await.into_result().unwrap();
}

#[tokio::test]
#[ignore = "needs a live PostgreSQL server"]
async fn test_txid_is_assigned_by_first_write() {
    let harness = live_harness(Engine::Postgres).await;
    harness.setup(TEST_TABLE_A).await.unwrap();
    let a = harness.session("a").await.unwrap();

    a.begin().await.unwrap();
    let first = postgres::current_txid(&a).await.unwrap();
    a.execute("UPDATE test_table_a SET val = 'b' WHERE i = 1").await.unwrap();
    assert_eq!(postgres::current_txid(&a).await.unwrap(), first);
    a.rollback().await.unwrap();

    a.begin().await.unwrap();
    assert!(postgres::current_txid(&a).await.unwrap() > first);
    harness.close().await.into_result().unwrap();
}
