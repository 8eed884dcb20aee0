//! lockscope - observe row and gap locking under concurrent sessions
//!
//! lockscope drives several sessions against a live MySQL or PostgreSQL
//! server, runs statements that may block on a background task, and pins
//! what the server reports in psql-style tables.
//!
//! # Quick Start
//!
//! ```ignore
//! use lockscope::prelude::*;
//!
//! let config = HarnessConfig::load()?;
//! let harness = Harness::connect(&config, Engine::MySql)?;
//! harness.setup("CREATE TABLE t (id int PRIMARY KEY); INSERT INTO t VALUES (1)").await?;
//!
//! let a = harness.session("a").await?;
//! let b = harness.session("b").await?;
//! a.begin().await?;
//! a.execute("SELECT * FROM t WHERE id = 1 FOR UPDATE").await?;
//!
//! b.begin().await?;
//! let mut op = harness.background(&b, "SELECT * FROM t WHERE id = 1 FOR UPDATE");
//! assert!(op.probe().await.is_pending());
//! a.commit().await?;
//! assert_table_eq("...", &op.wait().await?);
//! harness.close().await.into_result()?;
//! ```
//!
//! # Architecture
//!
//! - [`core`]: values, row sets, errors, configuration
//! - [`session`]: connections, sessions and the registry that closes them
//! - [`concurrency`]: background statements with bounded waits
//! - [`format`]: table rendering and comparison
//! - [`introspect`]: lock views of each engine and the PostgreSQL log

pub mod harness;

pub use harness::Harness;

pub use lockscope_concurrency as concurrency;
pub use lockscope_core as core;
pub use lockscope_format as format;
pub use lockscope_introspect as introspect;
pub use lockscope_session as session;

/// Everything a scenario test usually needs
pub mod prelude {
    pub use crate::harness::Harness;
    pub use lockscope_concurrency::{run_in_background, Coordinator, Outcome, PendingOperation};
    pub use lockscope_core::{
        Credentials, Engine, HarnessConfig, HarnessError, HarnessResult, IsolationLevel, Row,
        RowSet, SessionProfile, TxnState, Value,
    };
    pub use lockscope_format::{assert_table_eq, compare, format_table, TableFormatter};
    pub use lockscope_introspect::{mysql, pid_cell, postgres, ServerLog};
    pub use lockscope_session::{Session, SessionRegistry};
    #[cfg(feature = "test-util")]
    pub use lockscope_session::MemoryServer;
}
