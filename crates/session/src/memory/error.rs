//! Server-side failures of the in-memory server, rendered the way each
//! engine reports them

use lockscope_core::{Engine, HarnessError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Failure {
    /// Unparseable statement; carries the text near the problem
    Syntax(String),
    /// Statement shape outside the supported subset
    Unsupported(String),
    NoSuchTable(String),
    TableExists(String),
    UnknownColumn(String),
    UnknownSetting(String),
    Duplicate { table: String, key: String },
    NullKey(String),
    ColumnCount,
    LockWaitTimeout,
    Deadlock,
    /// PostgreSQL transaction already failed
    InFailedTransaction,
}

impl Failure {
    pub(crate) fn into_error(self, engine: Engine, sql: &str) -> HarnessError {
        let (code, message) = match engine {
            Engine::MySql => self.mysql(),
            Engine::Postgres => self.postgres(),
        };
        HarnessError::statement(Some(code.to_string()), message, sql)
    }

    fn mysql(self) -> (&'static str, String) {
        match self {
            Failure::Syntax(near) => (
                "1064",
                format!(
                    "You have an error in your SQL syntax; check the manual that corresponds to your MySQL server version for the right syntax to use near '{}'",
                    near
                ),
            ),
            Failure::Unsupported(what) => (
                "1235",
                format!("This version of MySQL doesn't yet support '{}'", what),
            ),
            Failure::NoSuchTable(t) => ("1146", format!("Table '{}' doesn't exist", t)),
            Failure::TableExists(t) => ("1050", format!("Table '{}' already exists", t)),
            Failure::UnknownColumn(c) => ("1054", format!("Unknown column '{}' in 'field list'", c)),
            Failure::UnknownSetting(n) => ("1193", format!("Unknown system variable '{}'", n)),
            Failure::Duplicate { table, key } => (
                "1062",
                format!("Duplicate entry '{}' for key '{}.PRIMARY'", key, table),
            ),
            Failure::NullKey(c) => ("1048", format!("Column '{}' cannot be null", c)),
            Failure::ColumnCount => (
                "1136",
                "Column count doesn't match value count at row 1".to_string(),
            ),
            Failure::LockWaitTimeout => (
                "1205",
                "Lock wait timeout exceeded; try restarting transaction".to_string(),
            ),
            Failure::Deadlock => (
                "1213",
                "Deadlock found when trying to get lock; try restarting transaction".to_string(),
            ),
            Failure::InFailedTransaction => (
                "1180",
                "Got error during COMMIT".to_string(),
            ),
        }
    }

    fn postgres(self) -> (&'static str, String) {
        match self {
            Failure::Syntax(near) => ("42601", format!("syntax error at or near \"{}\"", near)),
            Failure::Unsupported(what) => ("0A000", format!("{} is not supported", what)),
            Failure::NoSuchTable(t) => ("42P01", format!("relation \"{}\" does not exist", t)),
            Failure::TableExists(t) => ("42P07", format!("relation \"{}\" already exists", t)),
            Failure::UnknownColumn(c) => ("42703", format!("column \"{}\" does not exist", c)),
            Failure::UnknownSetting(n) => (
                "42704",
                format!("unrecognized configuration parameter \"{}\"", n),
            ),
            Failure::Duplicate { table, .. } => (
                "23505",
                format!("duplicate key value violates unique constraint \"{}_pkey\"", table),
            ),
            Failure::NullKey(c) => (
                "23502",
                format!("null value in column \"{}\" violates not-null constraint", c),
            ),
            Failure::ColumnCount => (
                "42601",
                "INSERT has more expressions than target columns".to_string(),
            ),
            Failure::LockWaitTimeout => ("55P03", "canceling statement due to lock timeout".to_string()),
            Failure::Deadlock => ("40P01", "deadlock detected".to_string()),
            Failure::InFailedTransaction => (
                "25P02",
                "current transaction is aborted, commands ignored until end of transaction block"
                    .to_string(),
            ),
        }
    }
}
