//! InnoDB lock introspection
//!
//! `performance_schema.data_locks` and `sys.innodb_lock_waits` need a
//! session with access to those schemas; open it with the root credentials
//! when the test user lacks them.

use crate::{require_engine, scalar_int, unexpected};
use lockscope_core::{Engine, HarnessError, HarnessResult, IsolationLevel, RowSet, Value};
use lockscope_session::Session;
use tracing::debug;

/// Every lock InnoDB holds or waits for, ordered by all columns
pub const DATA_LOCKS_SQL: &str = "select OBJECT_NAME, INDEX_NAME, LOCK_TYPE, LOCK_MODE, \
     LOCK_STATUS, LOCK_DATA from performance_schema.data_locks order by 1, 2, 3, 4, 5, 6";

/// Waiting/blocking lock pairs, ordered by all columns
pub const LOCK_WAITS_SQL: &str = "select locked_table_name, locked_index, locked_type, \
     waiting_query, waiting_lock_mode, blocking_query, blocking_lock_mode \
     from sys.innodb_lock_waits order by 1, 2, 3, 4, 5, 6, 7";

const BLOCKING_THREADS_SQL: &str = "select b_t.THREAD_ID as blocking_thread_id, \
     w_t.THREAD_ID as waiting_thread_id \
     from sys.innodb_lock_waits w \
     left join information_schema.INNODB_TRX b_trx on w.blocking_trx_id = b_trx.trx_id \
     left join performance_schema.threads b_t on b_trx.trx_mysql_thread_id = b_t.PROCESSLIST_ID \
     left join information_schema.INNODB_TRX w_trx on w.waiting_trx_id = w_trx.trx_id \
     left join performance_schema.threads w_t on w_trx.trx_mysql_thread_id = w_t.PROCESSLIST_ID";

const ISOLATION_SQL: &str = "SHOW VARIABLES LIKE '%isolation%'";

const ENGINE_STATUS_SQL: &str = "SHOW ENGINE INNODB STATUS";

/// Performance-schema thread ids of one blocking/waiting pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPair {
    /// Thread of the transaction holding the lock
    pub blocking: u64,
    /// Thread of the transaction waiting for it
    pub waiting: u64,
}

/// `performance_schema.data_locks`
pub async fn data_locks(session: &Session) -> HarnessResult<RowSet> {
    require_engine(session, Engine::MySql, "data_locks")?;
    let rows = session.execute(DATA_LOCKS_SQL).await?;
    debug!(target: "lockscope::introspect", session = %session.id(), locks = rows.len(), "data_locks");
    Ok(rows)
}

/// `sys.innodb_lock_waits`
pub async fn lock_waits(session: &Session) -> HarnessResult<RowSet> {
    require_engine(session, Engine::MySql, "lock_waits")?;
    session.execute(LOCK_WAITS_SQL).await
}

/// Thread ids of the first blocking/waiting pair, `None` if nothing waits
pub async fn blocking_threads(session: &Session) -> HarnessResult<Option<ThreadPair>> {
    require_engine(session, Engine::MySql, "blocking_threads")?;
    let rows = session.execute(BLOCKING_THREADS_SQL).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let thread = |column: &str| -> HarnessResult<u64> {
        match rows.value(0, column) {
            Some(value) => value
                .as_u64()
                .ok_or_else(|| unexpected(BLOCKING_THREADS_SQL, value)),
            None => Err(unexpected(BLOCKING_THREADS_SQL, &Value::Null)),
        }
    };
    Ok(Some(ThreadPair {
        blocking: thread("blocking_thread_id")?,
        waiting: thread("waiting_thread_id")?,
    }))
}

/// Latest statement text recorded for a performance-schema thread
pub async fn last_statement(session: &Session, thread_id: u64) -> HarnessResult<Option<String>> {
    require_engine(session, Engine::MySql, "last_statement")?;
    let sql = format!(
        "select sql_text from performance_schema.events_statements_history \
         where thread_id = {} order by event_id desc limit 1",
        thread_id
    );
    let rows = session.execute(&sql).await?;
    Ok(rows.scalar().and_then(Value::as_str).map(str::to_string))
}

/// Session isolation level from `SHOW VARIABLES LIKE '%isolation%'`
pub async fn isolation_level(session: &Session) -> HarnessResult<IsolationLevel> {
    require_engine(session, Engine::MySql, "isolation_level")?;
    let rows = session.execute(ISOLATION_SQL).await?;
    // transaction_isolation on 8.0, tx_isolation on 5.7; both carry the same value
    let value = rows
        .value(0, "Value")
        .ok_or_else(|| HarnessError::statement(None, "no isolation variable", ISOLATION_SQL))?;
    value
        .as_str()
        .and_then(IsolationLevel::parse)
        .ok_or_else(|| unexpected(ISOLATION_SQL, value))
}

/// Text of `SHOW ENGINE INNODB STATUS`
pub async fn engine_status(session: &Session) -> HarnessResult<String> {
    require_engine(session, Engine::MySql, "engine_status")?;
    let rows = session.execute(ENGINE_STATUS_SQL).await?;
    match rows.value(0, "Status") {
        Some(Value::Text(status)) => Ok(status.clone()),
        Some(Value::Bytes(bytes)) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Some(other) => Err(unexpected(ENGINE_STATUS_SQL, other)),
        None => Err(HarnessError::statement(None, "no engine status row", ENGINE_STATUS_SQL)),
    }
}

/// `CONNECTION_ID()` of the session
pub async fn connection_id(session: &Session) -> HarnessResult<i64> {
    require_engine(session, Engine::MySql, "connection_id")?;
    let sql = "SELECT CONNECTION_ID()";
    let rows = session.execute(sql).await?;
    scalar_int(&rows, sql)
}
