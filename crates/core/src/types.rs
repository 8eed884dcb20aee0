//! Core types shared by every lockscope crate
//!
//! This module defines:
//! - SessionId: registry-unique identifier of a session
//! - Engine: which server family a session talks to
//! - TxnState: transaction state tracked per session
//! - TxnControl: classification of transaction-control statements
//! - IsolationLevel: session isolation profile

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a session within one registry
///
/// Ids are allocated sequentially starting at 1 and only appear in logs and
/// error messages; they carry no meaning on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw id
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Server family a session is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// MySQL-family server with InnoDB
    MySql,
    /// PostgreSQL server
    Postgres,
}

impl Engine {
    /// Default TCP port for the engine
    pub fn default_port(&self) -> u16 {
        match self {
            Engine::MySql => 3306,
            Engine::Postgres => 5432,
        }
    }

    /// Lowercase engine name as used in config files and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::MySql => "mysql",
            Engine::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction state of a session
///
/// State transitions only happen when a transaction-control statement routed
/// through the session is accepted by the server:
/// - any state → `Open` (BEGIN / START TRANSACTION)
/// - `Open` → `Committed` (COMMIT)
/// - `Open` → `RolledBack` (ROLLBACK, or closing the session)
///
/// Server-side aborts (deadlock victims, disconnects) are not reflected here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnState {
    /// No explicit transaction was ever started
    #[default]
    NoTransaction,
    /// BEGIN accepted, not yet finished
    Open,
    /// Last transaction committed
    Committed,
    /// Last transaction rolled back
    RolledBack,
}

impl TxnState {
    /// True while a transaction is open
    pub fn is_open(&self) -> bool {
        matches!(self, TxnState::Open)
    }

    /// State after the server accepted `control`
    pub fn after(self, control: TxnControl) -> TxnState {
        match control {
            TxnControl::Begin => TxnState::Open,
            TxnControl::Commit => TxnState::Committed,
            TxnControl::Rollback => TxnState::RolledBack,
        }
    }
}

/// A transaction-control statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnControl {
    /// BEGIN, BEGIN WORK, START TRANSACTION
    Begin,
    /// COMMIT, COMMIT WORK, END
    Commit,
    /// ROLLBACK, ROLLBACK WORK, ABORT
    Rollback,
}

impl TxnControl {
    /// Classify a statement, returning `None` for anything that is not plain
    /// transaction control
    ///
    /// `ROLLBACK TO [SAVEPOINT] x` only unwinds part of the transaction and
    /// is therefore not a `Rollback`.
    pub fn classify(sql: &str) -> Option<TxnControl> {
        let mut words = sql
            .trim()
            .trim_end_matches(';')
            .split_whitespace()
            .map(|w| w.to_ascii_uppercase());
        let first = words.next()?;
        let second = words.next();
        match (first.as_str(), second.as_deref()) {
            ("BEGIN", _) => Some(TxnControl::Begin),
            ("START", Some("TRANSACTION")) => Some(TxnControl::Begin),
            ("COMMIT", _) | ("END", None) | ("END", Some("WORK" | "TRANSACTION")) => {
                Some(TxnControl::Commit)
            }
            ("ROLLBACK", Some("TO")) => None,
            ("ROLLBACK", _) | ("ABORT", _) => Some(TxnControl::Rollback),
            _ => None,
        }
    }
}

/// Transaction isolation level applied to every session of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// READ UNCOMMITTED
    ReadUncommitted,
    /// READ COMMITTED
    ReadCommitted,
    /// REPEATABLE READ
    RepeatableRead,
    /// SERIALIZABLE
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, e.g. `REPEATABLE READ`
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Parse a level as servers report it
    ///
    /// Accepts `REPEATABLE-READ` (MySQL), `repeatable read` (PostgreSQL)
    /// and `repeatable_read`, in any case.
    pub fn parse(text: &str) -> Option<IsolationLevel> {
        let words: Vec<String> = text
            .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
            .filter(|w| !w.is_empty())
            .map(str::to_ascii_uppercase)
            .collect();
        match words.join(" ").as_str() {
            "READ UNCOMMITTED" => Some(IsolationLevel::ReadUncommitted),
            "READ COMMITTED" => Some(IsolationLevel::ReadCommitted),
            "REPEATABLE READ" => Some(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Some(IsolationLevel::Serializable),
            _ => None,
        }
    }
}
