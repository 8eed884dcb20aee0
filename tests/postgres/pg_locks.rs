//! pg_locks while sessions hold and wait for row locks

use crate::common::{live_harness, USERS};
use lockscope::prelude::*;

#[tokio::test]
#[ignore = "needs a live PostgreSQL server"]
async fn test_begin_takes_a_virtualxid_per_session() {
    let harness = live_harness(Engine::Postgres).await;
    harness.setup(USERS).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();
    let check = harness.session("check").await.unwrap();
    let mut pids = [
        postgres::backend_pid(&a).await.unwrap(),
        postgres::backend_pid(&b).await.unwrap(),
    ];
    pids.sort_unstable();

    assert!(postgres::locks(&check).await.unwrap().is_empty());

    a.begin().await.unwrap();
    b.begin().await.unwrap();
    let expected = format!(
        "
+-------+------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------+
|   pid | locktype   | table_name   | page   | tuple   | transactionid   | mode          | granted   | state               |
|-------+------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------|
| {} | virtualxid |              |        |         |                 | ExclusiveLock | True      | idle in transaction |
| {} | virtualxid |              |        |         |                 | ExclusiveLock | True      | idle in transaction |
+-------+------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------+
",
        pid_cell(pids[0]),
        pid_cell(pids[1]),
    );
    assert_table_eq(&expected, &postgres::locks(&check).await.unwrap());

    a.rollback().await.unwrap();
    b.rollback().await.unwrap();
    assert!(postgres::locks(&check).await.unwrap().is_empty());
    harness.close().await.into_result().unwrap();
}

/// Three sessions queue for `FOR UPDATE` on the same row
///
/// The first waiter takes the tuple lock and waits on the holder's
/// transaction id; later waiters queue on the tuple lock. Each commit hands
/// the row to the next session in line.
#[tokio::test]
#[ignore = "needs a live PostgreSQL server"]
async fn test_for_update_queue_on_one_row() {
    const LOCK_ROW: &str = "SELECT * FROM users WHERE id = 1 FOR UPDATE";

    let harness = live_harness(Engine::Postgres).await;
    harness.setup(USERS).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();
    let c = harness.session("c").await.unwrap();
    let check = harness.session("check").await.unwrap();
    let pids = [
        postgres::backend_pid(&a).await.unwrap(),
        postgres::backend_pid(&b).await.unwrap(),
        postgres::backend_pid(&c).await.unwrap(),
    ];
    assert!(pids[0] < pids[1] && pids[1] < pids[2], "backends started out of pid order");
    let [p_a, p_b, p_c] = pids.map(pid_cell);

    a.begin().await.unwrap();
    b.begin().await.unwrap();
    c.begin().await.unwrap();
    // pg_stat_activity is read once per transaction, so every state below
    // is the one seen by this first check
    check.begin().await.unwrap();

    assert_table_eq(
        &format!(
            "
+-------+------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------+
|   pid | locktype   | table_name   | page   | tuple   | transactionid   | mode          | granted   | state               |
|-------+------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------|
| {p_a} | virtualxid |              |        |         |                 | ExclusiveLock | True      | idle in transaction |
| {p_b} | virtualxid |              |        |         |                 | ExclusiveLock | True      | idle in transaction |
| {p_c} | virtualxid |              |        |         |                 | ExclusiveLock | True      | idle in transaction |
+-------+------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------+
"
        ),
        &postgres::locks(&check).await.unwrap(),
    );

    // A locks the row
    a.execute(LOCK_ROW).await.unwrap();
    let t_a = pid_cell(postgres::current_txid(&a).await.unwrap());
    TableFormatter::right().assert_eq(
        &format!(
            "
+-------+---------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------+
|   pid |      locktype |   table_name |   page |   tuple |   transactionid |          mode |   granted |               state |
|-------+---------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------|
| {p_a} |      relation |        users |        |         |                 |  RowShareLock |      True | idle in transaction |
| {p_a} |      relation |   users_pkey |        |         |                 |  RowShareLock |      True | idle in transaction |
| {p_a} | transactionid |              |        |         |           {t_a} | ExclusiveLock |      True | idle in transaction |
| {p_a} |    virtualxid |              |        |         |                 | ExclusiveLock |      True | idle in transaction |
| {p_b} |    virtualxid |              |        |         |                 | ExclusiveLock |      True | idle in transaction |
| {p_c} |    virtualxid |              |        |         |                 | ExclusiveLock |      True | idle in transaction |
+-------+---------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------+
"
        ),
        &postgres::locks(&check).await.unwrap(),
    );

    // B takes the tuple lock and waits for A's transaction
    let mut op_b = harness.background(&b, LOCK_ROW);
    assert!(op_b.probe().await.is_pending());
    TableFormatter::right().assert_eq(
        &format!(
            "
+-------+---------------+--------------+--------+---------+-----------------+---------------------+-----------+---------------------+
|   pid |      locktype |   table_name |   page |   tuple |   transactionid |                mode |   granted |               state |
|-------+---------------+--------------+--------+---------+-----------------+---------------------+-----------+---------------------|
| {p_a} |      relation |        users |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_a} |      relation |   users_pkey |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_a} | transactionid |              |        |         |           {t_a} |       ExclusiveLock |      True | idle in transaction |
| {p_a} |    virtualxid |              |        |         |                 |       ExclusiveLock |      True | idle in transaction |
| {p_b} |      relation |        users |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_b} |      relation |   users_pkey |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_b} | transactionid |              |        |         |           {t_a} |           ShareLock |     False | idle in transaction |
| {p_b} |         tuple |        users |      0 |       1 |                 | AccessExclusiveLock |      True | idle in transaction |
| {p_b} |    virtualxid |              |        |         |                 |       ExclusiveLock |      True | idle in transaction |
| {p_c} |    virtualxid |              |        |         |                 |       ExclusiveLock |      True | idle in transaction |
+-------+---------------+--------------+--------+---------+-----------------+---------------------+-----------+---------------------+
"
        ),
        &postgres::locks(&check).await.unwrap(),
    );

    // C queues behind B on the tuple lock
    let mut op_c = harness.background(&c, LOCK_ROW);
    assert!(op_c.probe().await.is_pending());
    TableFormatter::right().assert_eq(
        &format!(
            "
+-------+---------------+--------------+--------+---------+-----------------+---------------------+-----------+---------------------+
|   pid |      locktype |   table_name |   page |   tuple |   transactionid |                mode |   granted |               state |
|-------+---------------+--------------+--------+---------+-----------------+---------------------+-----------+---------------------|
| {p_a} |      relation |        users |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_a} |      relation |   users_pkey |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_a} | transactionid |              |        |         |           {t_a} |       ExclusiveLock |      True | idle in transaction |
| {p_a} |    virtualxid |              |        |         |                 |       ExclusiveLock |      True | idle in transaction |
| {p_b} |      relation |        users |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_b} |      relation |   users_pkey |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_b} | transactionid |              |        |         |           {t_a} |           ShareLock |     False | idle in transaction |
| {p_b} |         tuple |        users |      0 |       1 |                 | AccessExclusiveLock |      True | idle in transaction |
| {p_b} |    virtualxid |              |        |         |                 |       ExclusiveLock |      True | idle in transaction |
| {p_c} |      relation |        users |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_c} |      relation |   users_pkey |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_c} |         tuple |        users |      0 |       1 |                 | AccessExclusiveLock |     False | idle in transaction |
| {p_c} |    virtualxid |              |        |         |                 |       ExclusiveLock |      True | idle in transaction |
+-------+---------------+--------------+--------+---------+-----------------+---------------------+-----------+---------------------+
"
        ),
        &postgres::locks(&check).await.unwrap(),
    );

    // A commits: B gets the row, C now waits for B's transaction
    a.commit().await.unwrap();
    op_b.wait().await.unwrap();
    let t_b = pid_cell(postgres::current_txid(&b).await.unwrap());
    assert!(op_c.probe().await.is_pending());
    TableFormatter::right().assert_eq(
        &format!(
            "
+-------+---------------+--------------+--------+---------+-----------------+---------------------+-----------+---------------------+
|   pid |      locktype |   table_name |   page |   tuple |   transactionid |                mode |   granted |               state |
|-------+---------------+--------------+--------+---------+-----------------+---------------------+-----------+---------------------|
| {p_b} |      relation |        users |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_b} |      relation |   users_pkey |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_b} | transactionid |              |        |         |           {t_b} |       ExclusiveLock |      True | idle in transaction |
| {p_b} |    virtualxid |              |        |         |                 |       ExclusiveLock |      True | idle in transaction |
| {p_c} |      relation |        users |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_c} |      relation |   users_pkey |        |         |                 |        RowShareLock |      True | idle in transaction |
| {p_c} | transactionid |              |        |         |           {t_b} |           ShareLock |     False | idle in transaction |
| {p_c} |         tuple |        users |      0 |       1 |                 | AccessExclusiveLock |      True | idle in transaction |
| {p_c} |    virtualxid |              |        |         |                 |       ExclusiveLock |      True | idle in transaction |
+-------+---------------+--------------+--------+---------+-----------------+---------------------+-----------+---------------------+
"
        ),
        &postgres::locks(&check).await.unwrap(),
    );

    // B commits: C gets the row
    b.commit().await.unwrap();
    op_c.wait().await.unwrap();
    let t_c = pid_cell(postgres::current_txid(&c).await.unwrap());
    TableFormatter::right().assert_eq(
        &format!(
            "
+-------+---------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------+
|   pid |      locktype |   table_name |   page |   tuple |   transactionid |          mode |   granted |               state |
|-------+---------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------|
| {p_c} |      relation |        users |        |         |                 |  RowShareLock |      True | idle in transaction |
| {p_c} |      relation |   users_pkey |        |         |                 |  RowShareLock |      True | idle in transaction |
| {p_c} | transactionid |              |        |         |           {t_c} | ExclusiveLock |      True | idle in transaction |
| {p_c} |    virtualxid |              |        |         |                 | ExclusiveLock |      True | idle in transaction |
+-------+---------------+--------------+--------+---------+-----------------+---------------+-----------+---------------------+
"
        ),
        &postgres::locks(&check).await.unwrap(),
    );

    c.commit().await.unwrap();
    assert!(postgres::locks(&check).await.unwrap().is_empty());
    check.rollback().await.unwrap();
    harness.close().await.into_result().unwrap();
}

#[tokio::test]
#[ignore = "needs a live PostgreSQL server"]
async fn test_row_lock_holder_gets_a_transaction_id() {
    let harness = live_harness(Engine::Postgres).await;
    harness.setup(USERS).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();
    let check = harness.session("check").await.unwrap();
    let pid_a = postgres::backend_pid(&a).await.unwrap();

    a.begin().await.unwrap();
    a.execute("SELECT * FROM users WHERE id = 1 FOR UPDATE").await.unwrap();
    b.begin().await.unwrap();
    let mut op = harness.background(&b, "SELECT * FROM users WHERE id = 1 FOR UPDATE");
    assert!(op.probe().await.is_pending());

    let rows = postgres::locks(&check).await.unwrap();
    let waiting: Vec<usize> = (0..rows.len())
        .filter(|&i| rows.value(i, "granted") == Some(&Value::Bool(false)))
        .collect();
    assert_eq!(waiting.len(), 1);
    // B waits on A's transaction id
    assert_eq!(
        rows.value(waiting[0], "locktype"),
        Some(&Value::Text("transactionid".into()))
    );
    assert!((0..rows.len()).any(|i| {
        rows.value(i, "pid").and_then(Value::as_i64) == Some(pid_a)
            && rows.value(i, "locktype") == Some(&Value::Text("transactionid".into()))
            && rows.value(i, "granted") == Some(&Value::Bool(true))
    }));

    a.commit().await.unwrap();
    op.wait().await.unwrap();
    harness.close().await.into_result().unwrap();
}
