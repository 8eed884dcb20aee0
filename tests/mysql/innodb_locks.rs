//! performance_schema and sys views while sessions block

use crate::common::live_harness;
use lockscope::prelude::*;

const T1: &str = "
    DROP TABLE IF EXISTS t1;
    CREATE TABLE t1 (
        num int NOT NULL,
        val varchar(32) NOT NULL,
        val_length int unsigned NOT NULL,
        PRIMARY KEY (num),
        KEY idx_vallength (val_length)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci;
    INSERT INTO t1 (num, val, val_length) VALUES
        (1, 'one', 3), (2, 'two', 3), (3, 'three', 5), (5, 'five', 4);
";

const GAP_INSERT: &str = "INSERT INTO t1 (num, val, val_length) values (10, 'ju', 2)";

#[tokio::test]
#[ignore = "needs a live MySQL server"]
async fn test_secondary_index_locks_and_gap_wait() {
    let harness = live_harness(Engine::MySql).await;
    harness.setup(T1).await.unwrap();
    let check = harness.root_session("check").await.unwrap();
    assert_eq!(
        mysql::isolation_level(&check).await.unwrap(),
        IsolationLevel::RepeatableRead
    );

    let s1 = harness.session("s1").await.unwrap();
    s1.begin().await.unwrap();
    s1.execute("SELECT * FROM t1 WHERE val_length = 3 FOR UPDATE")
        .await
        .unwrap();

    // Both the secondary index entries and their clustered records are locked
    assert_table_eq(
        "
+---------------+---------------+-------------+---------------+---------------+-------------+
| OBJECT_NAME   | INDEX_NAME    | LOCK_TYPE   | LOCK_MODE     | LOCK_STATUS   | LOCK_DATA   |
|---------------+---------------+-------------+---------------+---------------+-------------|
| t1            |               | TABLE       | IX            | GRANTED       |             |
| t1            | idx_vallength | RECORD      | X             | GRANTED       | 3, 1        |
| t1            | idx_vallength | RECORD      | X             | GRANTED       | 3, 2        |
| t1            | idx_vallength | RECORD      | X,GAP         | GRANTED       | 4, 5        |
| t1            | PRIMARY       | RECORD      | X,REC_NOT_GAP | GRANTED       | 1           |
| t1            | PRIMARY       | RECORD      | X,REC_NOT_GAP | GRANTED       | 2           |
+---------------+---------------+-------------+---------------+---------------+-------------+
",
        &mysql::data_locks(&check).await.unwrap(),
    );

    // The gap below val_length = 3 blocks inserts into it
    let s2 = harness.session("s2").await.unwrap();
    s2.begin().await.unwrap();
    let mut insert = harness.background(&s2, GAP_INSERT);
    assert!(insert.probe().await.is_pending());

    assert_table_eq(
        "
+---------------------+----------------+---------------+------------------------------------------------------------+------------------------+------------------+----------------------+
| locked_table_name   | locked_index   | locked_type   | waiting_query                                              | waiting_lock_mode      | blocking_query   | blocking_lock_mode   |
|---------------------+----------------+---------------+------------------------------------------------------------+------------------------+------------------+----------------------|
| t1                  | idx_vallength  | RECORD        | INSERT INTO t1 (num, val, val_length) values (10, 'ju', 2) | X,GAP,INSERT_INTENTION |                  | X                    |
+---------------------+----------------+---------------+------------------------------------------------------------+------------------------+------------------+----------------------+
",
        &mysql::lock_waits(&check).await.unwrap(),
    );

    // Plain reads take no locks and do not wait
    let s3 = harness.session("s3").await.unwrap();
    s3.begin().await.unwrap();
    assert_eq!(s3.execute("SELECT * FROM t1 WHERE val_length = 3").await.unwrap().len(), 2);
    assert!(s3.execute("SELECT * FROM t1 WHERE val_length = 1").await.unwrap().is_empty());
    assert_eq!(s3.execute("SELECT * FROM t1 WHERE num = 1").await.unwrap().len(), 1);

    // Locking reads of the same range wait on s1's exclusive locks
    s1.rollback().await.unwrap();
    insert.wait().await.unwrap();
    s1.begin().await.unwrap();
    s1.execute("SELECT * FROM t1 WHERE val_length = 3 FOR UPDATE")
        .await
        .unwrap();

    let s4 = harness.session("s4").await.unwrap();
    s4.begin().await.unwrap();
    let mut share = harness.background(&s4, "SELECT * FROM t1 WHERE val_length = 3 FOR SHARE");
    assert!(share.probe().await.is_pending());

    assert_table_eq(
        "
+---------------------+----------------+---------------+-------------------------------------------------+---------------------+------------------+----------------------+
| locked_table_name   | locked_index   | locked_type   | waiting_query                                   | waiting_lock_mode   | blocking_query   | blocking_lock_mode   |
|---------------------+----------------+---------------+-------------------------------------------------+---------------------+------------------+----------------------|
| t1                  | idx_vallength  | RECORD        | SELECT * FROM t1 WHERE val_length = 3 FOR SHARE | S                   |                  | X                    |
+---------------------+----------------+---------------+-------------------------------------------------+---------------------+------------------+----------------------+
",
        &mysql::lock_waits(&check).await.unwrap(),
    );

    let locks = mysql::data_locks(&check).await.unwrap();
    let status = locks.column_index("LOCK_STATUS").unwrap();
    let waiting = RowSet::new(
        locks.columns().to_vec(),
        locks
            .rows()
            .iter()
            .filter(|row| row.get(status) == Some(&Value::from("WAITING")))
            .cloned()
            .collect(),
    );
    assert_table_eq(
        "
+---------------+---------------+-------------+-------------+---------------+-------------+
| OBJECT_NAME   | INDEX_NAME    | LOCK_TYPE   | LOCK_MODE   | LOCK_STATUS   | LOCK_DATA   |
|---------------+---------------+-------------+-------------+---------------+-------------|
| t1            | idx_vallength | RECORD      | S           | WAITING       | 3, 1        |
+---------------+---------------+-------------+-------------+---------------+-------------+
",
        &waiting,
    );

    s1.rollback().await.unwrap();
    assert_eq!(share.wait().await.unwrap().len(), 2);
    assert!(mysql::lock_waits(&check).await.unwrap().is_empty());
    harness.close().await.into_result().unwrap();
}

#[tokio::test]
#[ignore = "needs a live MySQL server"]
async fn test_statement_history_of_blocking_threads() {
    let harness = live_harness(Engine::MySql).await;
    harness.setup(T1).await.unwrap();

    let s1 = harness.session("s1").await.unwrap();
    s1.begin().await.unwrap();
    s1.execute("SELECT * FROM t1 WHERE val_length = 3 FOR UPDATE")
        .await
        .unwrap();

    let s2 = harness.session("s2").await.unwrap();
    s2.begin().await.unwrap();
    s2.execute("SELECT 'operation2 history'").await.unwrap();
    let mut insert = harness.background(&s2, GAP_INSERT);
    assert!(insert.probe().await.is_pending());

    let check = harness.root_session("check").await.unwrap();
    let pair = mysql::blocking_threads(&check).await.unwrap().unwrap();

    // Nothing records which statement took a lock; history is the best guess
    assert_eq!(
        mysql::last_statement(&check, pair.blocking).await.unwrap().as_deref(),
        Some("SELECT * FROM t1 WHERE val_length = 3 FOR UPDATE")
    );
    assert_eq!(
        mysql::last_statement(&check, pair.waiting).await.unwrap().as_deref(),
        Some("SELECT 'operation2 history'")
    );

    let status = mysql::engine_status(&check).await.unwrap();
    assert!(status.contains("TRANSACTIONS"));

    s1.rollback().await.unwrap();
    insert.wait().await.unwrap();
    harness.close().await.into_result().unwrap();
}
