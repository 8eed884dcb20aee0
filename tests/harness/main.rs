//! Harness properties against the in-memory server
//!
//! Runs without any database:
//!
//! ```bash
//! cargo test --test harness
//! ```

#[path = "../common/mod.rs"]
mod common;

mod cleanup;
mod locking;
mod rendering;
