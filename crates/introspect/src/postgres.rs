//! PostgreSQL lock introspection

use crate::{require_engine, scalar_int, unexpected};
use lockscope_core::{Engine, HarnessError, HarnessResult, RowSet, Value};
use lockscope_session::Session;
use tracing::debug;

/// Locks other backends hold or wait for, without `AccessShareLock`
///
/// Ordered by every column but `transactionid` so a rendered table is stable.
pub const LOCKS_SQL: &str = "select l.pid, l.locktype, c.relname as table_name, l.page, \
     l.tuple, l.transactionid, l.mode, l.granted, s.state \
     from pg_locks l \
     left join pg_class c on (l.relation = c.oid) \
     left join pg_stat_activity s on (l.pid = s.pid) \
     where l.mode <> 'AccessShareLock' and l.pid <> pg_backend_pid() \
     order by l.pid, l.locktype, c.relname, l.page, l.tuple, l.mode, l.granted, s.state";

/// Waiting/blocking backends with their current queries
pub const BLOCKING_PAIRS_SQL: &str = "select waiting.pid as w_pid, waiting.query as w_query, \
     blocking.pid as b_pid, blocking.query as b_query \
     from (select pid, unnest(pg_blocking_pids(pid)) as blocking_pid from pg_stat_activity) as locks \
     join pg_stat_activity as waiting on locks.pid = waiting.pid \
     join pg_stat_activity as blocking on locks.blocking_pid = blocking.pid \
     order by waiting.pid, blocking.pid";

/// Process id of the session's backend
pub async fn backend_pid(session: &Session) -> HarnessResult<i64> {
    require_engine(session, Engine::Postgres, "backend_pid")?;
    let sql = "SELECT pg_backend_pid()";
    let rows = session.execute(sql).await?;
    scalar_int(&rows, sql)
}

/// `txid_current()`, which assigns a transaction id if none was assigned yet
pub async fn current_txid(session: &Session) -> HarnessResult<i64> {
    require_engine(session, Engine::Postgres, "current_txid")?;
    let sql = "SELECT txid_current()";
    let rows = session.execute(sql).await?;
    scalar_int(&rows, sql)
}

/// Locks of every other backend
pub async fn locks(session: &Session) -> HarnessResult<RowSet> {
    require_engine(session, Engine::Postgres, "locks")?;
    let rows = session.execute(LOCKS_SQL).await?;
    debug!(target: "lockscope::introspect", session = %session.id(), locks = rows.len(), "pg_locks");
    Ok(rows)
}

/// Waiting/blocking pairs, empty when nothing waits
pub async fn blocking_pairs(session: &Session) -> HarnessResult<RowSet> {
    require_engine(session, Engine::Postgres, "blocking_pairs")?;
    session.execute(BLOCKING_PAIRS_SQL).await
}

/// Current value of a run-time parameter (`SHOW name`)
pub async fn setting(session: &Session, name: &str) -> HarnessResult<String> {
    require_engine(session, Engine::Postgres, "setting")?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(HarnessError::config(format!("invalid setting name {:?}", name)));
    }
    let sql = format!("SHOW {}", name);
    let rows = session.execute(&sql).await?;
    match rows.scalar() {
        Some(Value::Text(value)) => Ok(value.clone()),
        Some(other) => Err(unexpected(&sql, other)),
        None => Err(HarnessError::statement(None, "query returned no rows", sql)),
    }
}
