//! Consistent reads and locking reads

use crate::common::{live_harness, LOCK_SAMPLE, USERS};
use lockscope::prelude::*;

const ANOTHER_SAMPLE: &str = "
    DROP TABLE IF EXISTS another_sample;
    CREATE TABLE another_sample (
        id bigint NOT NULL,
        val1 int NOT NULL,
        PRIMARY KEY (id)
    );
    INSERT INTO another_sample (id, val1) VALUES (1, 1), (2, 2), (3, 3);
";

#[tokio::test]
#[ignore = "needs a live MySQL server"]
async fn test_consistent_read_and_locking_read() {
    let harness = live_harness(Engine::MySql).await;
    harness.setup(LOCK_SAMPLE).await.unwrap();
    harness.setup(ANOTHER_SAMPLE).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();

    a.begin().await.unwrap();

    b.begin().await.unwrap();
    b.execute("UPDATE lock_sample SET val1 = 3 WHERE id = 2").await.unwrap();
    b.commit().await.unwrap();

    // The snapshot is taken by the first read, not by BEGIN
    let expected = "
+------+--------+
|   id |   val1 |
|------+--------|
|    1 |      1 |
|    2 |      3 |
|    3 |     10 |
|    4 |     10 |
|    5 |      4 |
|    6 |     10 |
+------+--------+
";
    assert_table_eq(expected, &a.execute("SELECT * FROM lock_sample").await.unwrap());

    b.execute("UPDATE lock_sample SET val1 = 6 WHERE id = 2").await.unwrap();
    b.execute("UPDATE another_sample SET val1 = 10 WHERE id = 1").await.unwrap();
    b.commit().await.unwrap();

    // The snapshot covers every table, including ones not read yet
    assert_table_eq(expected, &a.execute("SELECT * FROM lock_sample").await.unwrap());
    assert_table_eq(
        "
+------+--------+
|   id |   val1 |
|------+--------|
|    1 |      1 |
|    2 |      2 |
|    3 |      3 |
+------+--------+
",
        &a.execute("SELECT * FROM another_sample").await.unwrap(),
    );

    // A locking read sees the latest committed version
    assert_table_eq(
        "
+------+--------+
|   id |   val1 |
|------+--------|
|    2 |      6 |
+------+--------+
",
        &a.execute("SELECT * FROM lock_sample WHERE id = 2 FOR UPDATE")
            .await
            .unwrap(),
    );
    harness.close().await.into_result().unwrap();
}

#[tokio::test]
#[ignore = "needs a live MySQL server"]
async fn test_select_for_update_blocks_second_session() {
    let harness = live_harness(Engine::MySql).await;
    harness.setup(USERS).await.unwrap();
    let a = harness.session("a").await.unwrap();
    let b = harness.session("b").await.unwrap();

    a.begin().await.unwrap();
    a.execute("SELECT * FROM users WHERE id=1 FOR UPDATE").await.unwrap();

    b.begin().await.unwrap();
    let mut op = harness.background(&b, "SELECT * FROM users WHERE id=1 FOR UPDATE");
    assert!(op.probe().await.is_pending());

    a.commit().await.unwrap();
    assert_table_eq(
        "
+------+-------------+
|   id |   user_type |
|------+-------------|
|    1 |           1 |
+------+-------------+
",
        &op.wait().await.unwrap(),
    );
    harness.close().await.into_result().unwrap();
}
