//! Concurrent execution coordinator
//!
//! Runs a statement on a background task so a test can tell "returned
//! quickly" from "still blocked after N ms" without hanging:
//! - run_in_background / Coordinator: spawn a statement on a session
//! - PendingOperation: probe with a bounded wait, then wait for the result
//! - Outcome: Completed(result) or StillPending

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;

pub use coordinator::{run_in_background, Coordinator, Outcome, PendingOperation, DEFAULT_PROBE_BUDGET};
