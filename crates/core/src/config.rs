//! Harness configuration via `lockscope.toml` or environment variables
//!
//! Endpoints for each engine, the session profile applied to every new
//! connection, and the default probe budget. Resolution order for
//! [`HarnessConfig::load`]:
//!
//! 1. the file named by `LOCKSCOPE_CONFIG`, if set
//! 2. otherwise the per-engine environment variables (`MYSQL_HOST`, ...)
//!
//! An engine without configuration is simply absent; live test suites skip it.

use crate::error::{HarnessError, HarnessResult};
use crate::types::{Engine, IsolationLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "LOCKSCOPE_CONFIG";

/// Connection parameters for one session
///
/// `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Server family
    pub engine: Engine,
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Database (schema) to connect to
    pub database: String,
}

impl Credentials {
    /// `engine://user@host:port/database`, safe for logs
    pub fn endpoint(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.engine, self.user, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// One engine's endpoint, as written in `lockscope.toml`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Host name or address
    pub host: String,
    /// TCP port; the engine default when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Regular test user
    pub user: String,
    /// Password of the test user
    pub password: String,
    /// Database (schema)
    pub database: String,
    /// Privileged user for fixtures and introspection; MySQL only in practice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_user: Option<String>,
    /// Password of the privileged user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("root_user", &self.root_user)
            .finish_non_exhaustive()
    }
}

impl EndpointConfig {
    /// Credentials of the regular test user
    pub fn credentials(&self, engine: Engine) -> Credentials {
        Credentials {
            engine,
            host: self.host.clone(),
            port: self.port.unwrap_or_else(|| engine.default_port()),
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        }
    }

    /// Credentials of the privileged user
    ///
    /// Falls back to `root` with the regular password when only
    /// `root_password` is missing, and to the regular user when neither
    /// root field is configured.
    pub fn root_credentials(&self, engine: Engine) -> Credentials {
        let mut creds = self.credentials(engine);
        match (&self.root_user, &self.root_password) {
            (None, None) => {}
            (user, password) => {
                creds.user = user.clone().unwrap_or_else(|| "root".to_string());
                creds.password = password.clone().unwrap_or_else(|| self.password.clone());
            }
        }
        creds
    }
}

/// Settings applied to every session right after it connects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProfile {
    /// MySQL `autocommit`. PostgreSQL sessions always start in autocommit.
    #[serde(default)]
    pub autocommit: bool,
    /// Server-side lock wait bound in seconds
    #[serde(default = "default_lock_wait_timeout_secs")]
    pub lock_wait_timeout_secs: Option<u64>,
    /// Server-side statement bound in milliseconds
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: Option<u64>,
    /// Session isolation level; server default when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationLevel>,
}

fn default_lock_wait_timeout_secs() -> Option<u64> {
    Some(5)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(5000)
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            autocommit: false,
            lock_wait_timeout_secs: default_lock_wait_timeout_secs(),
            statement_timeout_ms: default_statement_timeout_ms(),
            isolation: None,
        }
    }
}

impl SessionProfile {
    /// Profile that sends nothing: server defaults everywhere, MySQL autocommit on
    pub fn server_defaults() -> Self {
        Self {
            autocommit: true,
            lock_wait_timeout_secs: None,
            statement_timeout_ms: None,
            isolation: None,
        }
    }

    /// Statements that realize this profile on a fresh connection
    pub fn init_statements(&self, engine: Engine) -> Vec<String> {
        let mut stmts = Vec::new();
        match engine {
            Engine::MySql => {
                if !self.autocommit {
                    stmts.push("SET autocommit = 0".to_string());
                }
                if let Some(ms) = self.statement_timeout_ms {
                    stmts.push(format!("SET max_execution_time = {}", ms));
                }
                if let Some(secs) = self.lock_wait_timeout_secs {
                    stmts.push(format!("SET innodb_lock_wait_timeout = {}", secs));
                }
                if let Some(level) = self.isolation {
                    stmts.push(format!(
                        "SET SESSION TRANSACTION ISOLATION LEVEL {}",
                        level.as_sql()
                    ));
                }
            }
            Engine::Postgres => {
                if let Some(secs) = self.lock_wait_timeout_secs {
                    stmts.push(format!("SET lock_timeout = '{}s'", secs));
                }
                if let Some(ms) = self.statement_timeout_ms {
                    stmts.push(format!("SET statement_timeout = {}", ms));
                }
                if let Some(level) = self.isolation {
                    stmts.push(format!(
                        "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
                        level.as_sql()
                    ));
                }
            }
        }
        stmts
    }
}

/// Harness configuration loaded from `lockscope.toml` or the environment
///
/// # Example
///
/// ```toml
/// probe_budget_ms = 100
///
/// [mysql]
/// host = "127.0.0.1"
/// port = 3306
/// user = "app"
/// password = "app"
/// database = "mysql"
/// root_password = "root"
///
/// [postgres]
/// host = "127.0.0.1"
/// user = "postgres"
/// password = "postgres"
/// database = "postgres"
///
/// [profile]
/// autocommit = false
/// lock_wait_timeout_secs = 5
/// statement_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// MySQL endpoint, if configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql: Option<EndpointConfig>,
    /// PostgreSQL endpoint, if configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<EndpointConfig>,
    /// Profile applied to every session
    #[serde(default)]
    pub profile: SessionProfile,
    /// Default wait budget for background probes, in milliseconds
    #[serde(default = "default_probe_budget_ms")]
    pub probe_budget_ms: u64,
    /// PostgreSQL server log, for lock-wait log assertions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres_log: Option<PathBuf>,
}

fn default_probe_budget_ms() -> u64 {
    100
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            mysql: None,
            postgres: None,
            profile: SessionProfile::default(),
            probe_budget_ms: default_probe_budget_ms(),
            postgres_log: None,
        }
    }
}

impl HarnessConfig {
    /// `LOCKSCOPE_CONFIG` file if set, environment variables otherwise
    pub fn load() -> HarnessResult<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Self::from_env(),
        }
    }

    /// Parse config from TOML text
    pub fn from_toml_str(content: &str) -> HarnessResult<Self> {
        toml::from_str(content)
            .map_err(|e| HarnessError::config(format!("Failed to parse config: {}", e)))
    }

    /// Read and parse config from a file path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            HarnessError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Build config from the process environment
    pub fn from_env() -> HarnessResult<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build config from an explicit variable map
    ///
    /// Recognized variables:
    /// - `MYSQL_HOST`, `MYSQL_PORT`, `MYSQL_USER`, `MYSQL_PASSWORD`,
    ///   `MYSQL_DATABASE`, `MYSQL_ROOT_PASSWORD`
    /// - `POSTGRES_HOST`, `POSTGRES_PORT`, `POSTGRES_USER`,
    ///   `POSTGRES_PASSWORD`, `POSTGRES_DB`
    /// - `POSTGRES_LOG`, `LOCKSCOPE_PROBE_BUDGET_MS`
    pub fn from_vars(vars: &HashMap<String, String>) -> HarnessResult<Self> {
        let mut config = HarnessConfig::default();

        if let Some(host) = vars.get("MYSQL_HOST") {
            config.mysql = Some(EndpointConfig {
                host: host.clone(),
                port: parse_var(vars, "MYSQL_PORT")?,
                user: required_var(vars, "MYSQL_USER")?,
                password: required_var(vars, "MYSQL_PASSWORD")?,
                database: required_var(vars, "MYSQL_DATABASE")?,
                root_user: vars
                    .get("MYSQL_ROOT_PASSWORD")
                    .map(|_| "root".to_string()),
                root_password: vars.get("MYSQL_ROOT_PASSWORD").cloned(),
            });
        }

        if let Some(host) = vars.get("POSTGRES_HOST") {
            config.postgres = Some(EndpointConfig {
                host: host.clone(),
                port: parse_var(vars, "POSTGRES_PORT")?,
                user: required_var(vars, "POSTGRES_USER")?,
                password: required_var(vars, "POSTGRES_PASSWORD")?,
                database: required_var(vars, "POSTGRES_DB")?,
                root_user: None,
                root_password: None,
            });
        }

        config.postgres_log = vars.get("POSTGRES_LOG").map(PathBuf::from);
        if let Some(ms) = parse_var(vars, "LOCKSCOPE_PROBE_BUDGET_MS")? {
            config.probe_budget_ms = ms;
        }
        Ok(config)
    }

    /// Endpoint configured for `engine`
    pub fn endpoint(&self, engine: Engine) -> Option<&EndpointConfig> {
        match engine {
            Engine::MySql => self.mysql.as_ref(),
            Engine::Postgres => self.postgres.as_ref(),
        }
    }

    /// Regular credentials for `engine`
    ///
    /// # Errors
    ///
    /// Returns `Config` if the engine is not configured.
    pub fn credentials(&self, engine: Engine) -> HarnessResult<Credentials> {
        self.endpoint(engine)
            .map(|e| e.credentials(engine))
            .ok_or_else(|| HarnessError::config(format!("{} is not configured", engine)))
    }

    /// Privileged credentials for `engine`
    pub fn root_credentials(&self, engine: Engine) -> HarnessResult<Credentials> {
        self.endpoint(engine)
            .map(|e| e.root_credentials(engine))
            .ok_or_else(|| HarnessError::config(format!("{} is not configured", engine)))
    }

    /// Default probe budget
    pub fn probe_budget(&self) -> Duration {
        Duration::from_millis(self.probe_budget_ms)
    }

    /// Serialize this config to TOML and write it to the given path
    pub fn write_to_file(&self, path: &Path) -> HarnessResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HarnessError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn required_var(vars: &HashMap<String, String>, name: &str) -> HarnessResult<String> {
    vars.get(name)
        .cloned()
        .ok_or_else(|| HarnessError::config(format!("Missing environment variable {}", name)))
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
) -> HarnessResult<Option<T>> {
    match vars.get(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            HarnessError::config(format!("Invalid value '{}' for {}", raw, name))
        }),
    }
}
