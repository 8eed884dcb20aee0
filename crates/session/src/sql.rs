//! sqlx-backed driver for MySQL and PostgreSQL
//!
//! Statements are sent without bind arguments, so sqlx uses the text
//! protocol on both engines and every statement is accepted, `BEGIN`, `SET`
//! and `SHOW` included. Values arrive as text and are decoded by the
//! column's declared type.

use crate::connection::{Connection, Connector};
use async_trait::async_trait;
use lockscope_core::{Credentials, Engine, HarnessError, HarnessResult, Row, RowSet, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, ConnectOptions, Connection as _, Executor, Row as _, TypeInfo, ValueRef};
use tracing::debug;

/// Connects to live servers through sqlx
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlConnector;

#[async_trait]
impl Connector for SqlConnector {
    async fn connect(&self, credentials: &Credentials) -> HarnessResult<Box<dyn Connection>> {
        let endpoint = credentials.endpoint();
        debug!(target: "lockscope::session", endpoint = %endpoint, "connecting");
        match credentials.engine {
            Engine::MySql => {
                let options = MySqlConnectOptions::new()
                    .host(&credentials.host)
                    .port(credentials.port)
                    .username(&credentials.user)
                    .password(&credentials.password)
                    .database(&credentials.database);
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| HarnessError::connection(&endpoint, e.to_string()))?;
                Ok(Box::new(MySqlDriver { conn, endpoint }))
            }
            Engine::Postgres => {
                let options = PgConnectOptions::new()
                    .host(&credentials.host)
                    .port(credentials.port)
                    .username(&credentials.user)
                    .password(&credentials.password)
                    .database(&credentials.database);
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| HarnessError::connection(&endpoint, e.to_string()))?;
                Ok(Box::new(PgDriver { conn, endpoint }))
            }
        }
    }
}

struct MySqlDriver {
    conn: MySqlConnection,
    endpoint: String,
}

#[async_trait]
impl Connection for MySqlDriver {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    async fn query(&mut self, sql: &str) -> HarnessResult<RowSet> {
        let rows = (&mut self.conn)
            .fetch_all(sql)
            .await
            .map_err(|e| map_sqlx_error(e, sql, &self.endpoint))?;
        decode_mysql(&rows).map_err(|e| map_sqlx_error(e, sql, &self.endpoint))
    }

    async fn close(self: Box<Self>) -> HarnessResult<()> {
        let MySqlDriver { conn, endpoint } = *self;
        conn.close()
            .await
            .map_err(|e| HarnessError::connection(endpoint, e.to_string()))
    }
}

struct PgDriver {
    conn: PgConnection,
    endpoint: String,
}

#[async_trait]
impl Connection for PgDriver {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn query(&mut self, sql: &str) -> HarnessResult<RowSet> {
        let rows = (&mut self.conn)
            .fetch_all(sql)
            .await
            .map_err(|e| map_sqlx_error(e, sql, &self.endpoint))?;
        decode_pg(&rows).map_err(|e| map_sqlx_error(e, sql, &self.endpoint))
    }

    async fn close(self: Box<Self>) -> HarnessResult<()> {
        let PgDriver { conn, endpoint } = *self;
        conn.close()
            .await
            .map_err(|e| HarnessError::connection(endpoint, e.to_string()))
    }
}

/// Map a sqlx error raised while running `sql`
///
/// Server-side errors keep their code: the MySQL error number when there is
/// one (1205 tells a lock wait timeout apart from other `HY000` errors),
/// otherwise the SQLSTATE. Transport failures become connection errors.
pub fn map_sqlx_error(err: sqlx::Error, sql: &str, endpoint: &str) -> HarnessError {
    if let sqlx::Error::Database(db) = &err {
        let code = match db.try_downcast_ref::<MySqlDatabaseError>() {
            Some(mysql) => Some(mysql.number().to_string()),
            None => db.code().map(|c| c.into_owned()),
        };
        return HarnessError::statement(code, db.message(), sql);
    }
    if matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
    ) {
        return HarnessError::connection(endpoint, err.to_string());
    }
    HarnessError::statement(None, err.to_string(), sql)
}

/// How a column's values are decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoded {
    Signed,
    Unsigned,
    Float,
    Bool,
    Bytes,
    Text,
}

fn mysql_decoding(type_name: &str) -> Decoded {
    match type_name {
        t if t.ends_with("UNSIGNED") => Decoded::Unsigned,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "BOOLEAN" | "YEAR" => {
            Decoded::Signed
        }
        "FLOAT" | "DOUBLE" => Decoded::Float,
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => Decoded::Bytes,
        _ => Decoded::Text,
    }
}

fn pg_decoding(type_name: &str) -> Decoded {
    match type_name {
        "INT2" | "INT4" | "INT8" | "OID" => Decoded::Signed,
        "FLOAT4" | "FLOAT8" => Decoded::Float,
        "BOOL" => Decoded::Bool,
        "BYTEA" => Decoded::Bytes,
        _ => Decoded::Text,
    }
}

fn decode_mysql(rows: &[MySqlRow]) -> Result<RowSet, sqlx::Error> {
    let Some(first) = rows.first() else {
        return Ok(RowSet::empty());
    };
    let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();
    let decodings: Vec<Decoded> = first
        .columns()
        .iter()
        .map(|c| mysql_decoding(c.type_info().name()))
        .collect();

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(decodings.len());
        for (i, decoding) in decodings.iter().enumerate() {
            if row.try_get_raw(i)?.is_null() {
                values.push(Value::Null);
                continue;
            }
            let value = match decoding {
                Decoded::Signed => Value::Int(row.try_get_unchecked::<i64, _>(i)?),
                Decoded::Unsigned => Value::UInt(row.try_get_unchecked::<u64, _>(i)?),
                Decoded::Float => Value::Float(row.try_get_unchecked::<f64, _>(i)?),
                Decoded::Bool => Value::Bool(row.try_get_unchecked::<bool, _>(i)?),
                Decoded::Bytes => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                Decoded::Text => match row.try_get_unchecked::<String, _>(i) {
                    Ok(s) => Value::Text(s),
                    Err(_) => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                },
            };
            values.push(value);
        }
        out.push(Row::new(values));
    }
    Ok(RowSet::new(columns, out))
}

fn decode_pg(rows: &[PgRow]) -> Result<RowSet, sqlx::Error> {
    let Some(first) = rows.first() else {
        return Ok(RowSet::empty());
    };
    let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();
    let decodings: Vec<Decoded> = first
        .columns()
        .iter()
        .map(|c| pg_decoding(c.type_info().name()))
        .collect();

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(decodings.len());
        for (i, decoding) in decodings.iter().enumerate() {
            if row.try_get_raw(i)?.is_null() {
                values.push(Value::Null);
                continue;
            }
            let value = match decoding {
                Decoded::Signed | Decoded::Unsigned => Value::Int(row.try_get_unchecked::<i64, _>(i)?),
                Decoded::Float => Value::Float(row.try_get_unchecked::<f64, _>(i)?),
                Decoded::Bool => Value::Bool(row.try_get_unchecked::<bool, _>(i)?),
                Decoded::Bytes => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                Decoded::Text => Value::Text(row.try_get_unchecked::<String, _>(i)?),
            };
            values.push(value);
        }
        out.push(Row::new(values));
    }
    Ok(RowSet::new(columns, out))
}
