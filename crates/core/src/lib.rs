//! Core types for lockscope
//!
//! This crate defines the foundational types used throughout the harness:
//! - SessionId, Engine, TxnState, TxnControl, IsolationLevel
//! - Value: one decoded result cell
//! - Row / RowSet: what a statement returned
//! - HarnessError: the error taxonomy
//! - HarnessConfig: endpoints, session profile and probe budget

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod rowset;
pub mod types;
pub mod value;

pub use config::{Credentials, EndpointConfig, HarnessConfig, SessionProfile, CONFIG_ENV_VAR};
pub use error::{HarnessError, HarnessResult, StatementErrorKind};
pub use rowset::{Row, RowSet};
pub use types::{Engine, IsolationLevel, SessionId, TxnControl, TxnState};
pub use value::Value;
