//! Shared helpers for the scenario suites
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's
//! main.rs.

#![allow(dead_code)]

use lockscope::prelude::*;
use std::ops::Deref;
use std::sync::Once;
use tokio::sync::MutexGuard;

// ============================================================================
// Initialization
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-writer subscriber honoring `RUST_LOG`, once per binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

// ============================================================================
// Live servers
// ============================================================================

// Scenarios share tables and read server-wide lock views
static LIVE: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// A live harness that holds the suite lock until dropped
pub struct LiveHarness {
    harness: Harness,
    _serial: MutexGuard<'static, ()>,
}

impl Deref for LiveHarness {
    type Target = Harness;

    fn deref(&self) -> &Harness {
        &self.harness
    }
}

/// Harness for a configured live server
///
/// Live scenarios are `#[ignore]`d and run with `cargo test -- --ignored`;
/// running one without the engine configured through `LOCKSCOPE_CONFIG` or
/// the `MYSQL_*` / `POSTGRES_*` variables fails instead of passing empty.
pub async fn live_harness(engine: Engine) -> LiveHarness {
    init_tracing();
    let config = HarnessConfig::load().expect("invalid lockscope configuration");
    assert!(
        config.endpoint(engine).is_some(),
        "{} is not configured; set LOCKSCOPE_CONFIG or the {} variables",
        engine,
        match engine {
            Engine::MySql => "MYSQL_*",
            Engine::Postgres => "POSTGRES_*",
        }
    );
    let serial = LIVE.lock().await;
    let harness = Harness::connect(&config, engine).expect("harness for configured engine");
    LiveHarness {
        harness,
        _serial: serial,
    }
}

/// Server log configured for PostgreSQL, if any
pub fn live_server_log() -> Option<ServerLog> {
    HarnessConfig::load()
        .ok()
        .and_then(|config| ServerLog::from_config(&config).ok().flatten())
}

// ============================================================================
// In-memory server
// ============================================================================

/// Harness over a fresh in-memory server of `engine`
pub fn memory_harness(engine: Engine) -> (MemoryServer, Harness) {
    init_tracing();
    let server = MemoryServer::new(engine);
    let harness = Harness::memory(&server);
    (server, harness)
}

// ============================================================================
// Fixtures
// ============================================================================

/// `users(id pk, user_type)` with three rows
pub const USERS: &str = "
    DROP TABLE IF EXISTS users;
    CREATE TABLE users (id int PRIMARY KEY, user_type int);
    INSERT INTO users VALUES (1, 1), (2, 1), (3, 1);
";

/// `lock_sample(id pk, val1)` with six rows
pub const LOCK_SAMPLE: &str = "
    DROP TABLE IF EXISTS lock_sample;
    CREATE TABLE lock_sample (
        id bigint NOT NULL,
        val1 int NOT NULL,
        PRIMARY KEY (id)
    );
    INSERT INTO lock_sample (id, val1) VALUES
        (1, 1), (2, 2), (3, 10), (4, 10), (5, 4), (6, 10);
";
