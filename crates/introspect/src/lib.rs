//! Lock and transaction introspection
//!
//! Queries the lock scenarios use to show what the server is doing while
//! sessions are blocked:
//! - mysql: InnoDB data locks, lock waits, thread ids, isolation, engine status
//! - postgres: backend pid, txid, pg_locks, blocking pairs, settings
//! - server_log: lines a backend wrote to the PostgreSQL server log
//!
//! Every query runs on a caller-supplied [`Session`](lockscope_session::Session);
//! engine-specific helpers refuse sessions of the other engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mysql;
pub mod postgres;
pub mod server_log;

pub use server_log::{pid_cell, ServerLog};

use lockscope_core::{Engine, HarnessError, HarnessResult, RowSet, Value};
use lockscope_session::Session;

fn require_engine(session: &Session, engine: Engine, what: &str) -> HarnessResult<()> {
    if session.engine() == engine {
        return Ok(());
    }
    Err(HarnessError::config(format!(
        "{} needs a {} session, session {} is {}",
        what,
        engine.as_str(),
        session.id(),
        session.engine().as_str()
    )))
}

/// Single integer cell of `rows`
fn scalar_int(rows: &RowSet, sql: &str) -> HarnessResult<i64> {
    match rows.scalar() {
        Some(value) => value.as_i64().ok_or_else(|| unexpected(sql, value)),
        None => Err(HarnessError::statement(None, "query returned no rows", sql)),
    }
}

fn unexpected(sql: &str, value: &Value) -> HarnessError {
    HarnessError::statement(
        None,
        format!("unexpected {} value {}", value.type_name(), value),
        sql,
    )
}
