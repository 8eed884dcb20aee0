//! Sessions and the registry that owns them
//!
//! This crate provides:
//! - Connection / Connector: the driver seam
//! - SqlConnector: MySQL and PostgreSQL through sqlx
//! - MemoryServer: an in-memory server for tests without a database
//!   (`test-util` feature)
//! - Session: one transactional connection, clonable across tasks
//! - SessionRegistry: opens sessions and guarantees they are closed

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod registry;
pub mod session;
pub mod sql;

pub use connection::{Connection, Connector};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryServer;
pub use registry::{CleanupReport, SessionRegistry};
pub use session::{split_script, Session};
pub use sql::{map_sqlx_error, SqlConnector};
