//! Tables, row locks and per-connection transaction state
//!
//! Every statement runs atomically under the server mutex: it either takes
//! all the row locks it needs and applies its changes, or takes nothing and
//! reports [`Exec::Blocked`] so the caller can wait and retry.
//!
//! Visibility is read-committed: a plain `SELECT` sees the before image of
//! rows another connection changed but has not committed yet. Locking reads,
//! `UPDATE` and `DELETE` work on the latest version.

use super::error::Failure;
use super::parser::{ColumnDef, Filter, Item, LockMode, Projection, Scalar, Statement};
use lockscope_core::{Engine, Row, RowSet, TxnControl, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

pub(crate) type ConnId = u64;

/// Outcome of a statement that did not produce rows
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Exec {
    /// A lock is held by another connection; retry once locks are released
    Blocked,
    Failed(Failure),
}

impl From<Failure> for Exec {
    fn from(failure: Failure) -> Self {
        Exec::Failed(failure)
    }
}

/// Primary key of a row: the value of the table's first column
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    fn of(value: &Value) -> Option<Key> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Key::Int(i64::from(*b))),
            Value::Int(i) => Some(Key::Int(*i)),
            Value::UInt(u) => Some(match i64::try_from(*u) {
                Ok(i) => Key::Int(i),
                Err(_) => Key::Text(u.to_string()),
            }),
            Value::Bytes(b) => Some(Key::Text(String::from_utf8_lossy(b).into_owned())),
            other => Some(Key::Text(other.to_string())),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Default)]
struct RowLock {
    exclusive: Option<ConnId>,
    shared: BTreeSet<ConnId>,
}

impl RowLock {
    /// Connections other than `conn` whose hold conflicts with `mode`
    fn blockers(&self, conn: ConnId, mode: LockMode) -> impl Iterator<Item = ConnId> + '_ {
        let exclusive = self.exclusive.filter(|&owner| owner != conn);
        let shared = self
            .shared
            .iter()
            .copied()
            .filter(move |&holder| mode == LockMode::Exclusive && holder != conn);
        exclusive.into_iter().chain(shared)
    }

    fn grant(&mut self, conn: ConnId, mode: LockMode) {
        match mode {
            LockMode::Exclusive => {
                self.shared.remove(&conn);
                self.exclusive = Some(conn);
            }
            LockMode::Shared => {
                if self.exclusive != Some(conn) {
                    self.shared.insert(conn);
                }
            }
        }
    }

    fn release(&mut self, conn: ConnId) {
        if self.exclusive == Some(conn) {
            self.exclusive = None;
        }
        self.shared.remove(&conn);
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

/// Source of one output column
enum Cell {
    Column(usize),
    Constant(Value),
}

/// Uncommitted change to one row; `before` is `None` for an inserted row
#[derive(Debug)]
struct Pending {
    owner: ConnId,
    before: Option<Vec<Value>>,
}

#[derive(Debug)]
struct Column {
    name: String,
    integer: bool,
}

impl Column {
    fn coerce(&self, value: Value) -> Value {
        if !self.integer {
            return value;
        }
        match value {
            Value::Text(s) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Text(s),
            },
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::Int(f as i64),
            other => other,
        }
    }
}

#[derive(Debug)]
struct Table {
    columns: Vec<Column>,
    /// Latest version of every row, uncommitted changes included
    rows: BTreeMap<Key, Vec<Value>>,
    pending: BTreeMap<Key, Pending>,
    locks: BTreeMap<Key, RowLock>,
}

impl Table {
    fn column_index(&self, name: &str) -> Result<usize, Failure> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Failure::UnknownColumn(name.to_string()))
    }

    fn resolve(&self, filter: &[(String, Value)]) -> Result<Vec<(usize, Value)>, Failure> {
        filter
            .iter()
            .map(|(name, value)| {
                let idx = self.column_index(name)?;
                Ok((idx, self.columns[idx].coerce(value.clone())))
            })
            .collect()
    }

    /// Rows as `conn` sees them without locking
    fn visible(&self, conn: ConnId) -> BTreeMap<&Key, &Vec<Value>> {
        let mut out = BTreeMap::new();
        for (key, row) in &self.rows {
            match self.pending.get(key) {
                Some(p) if p.owner != conn => {
                    if let Some(before) = &p.before {
                        out.insert(key, before);
                    }
                }
                _ => {
                    out.insert(key, row);
                }
            }
        }
        // Rows another connection deleted but has not committed
        for (key, p) in &self.pending {
            if p.owner != conn && !self.rows.contains_key(key) {
                if let Some(before) = &p.before {
                    out.insert(key, before);
                }
            }
        }
        out
    }

    fn holders_other_than(&self, conn: ConnId) -> BTreeSet<ConnId> {
        self.locks
            .values()
            .flat_map(|lock| lock.blockers(conn, LockMode::Exclusive).collect::<Vec<_>>())
            .collect()
    }
}

/// What a blocked connection is waiting for
#[derive(Debug, Clone)]
struct Wait {
    table: String,
    /// `None` for a table-level wait (DDL)
    key: Option<Key>,
    mode: LockMode,
    blockers: BTreeSet<ConnId>,
}

#[derive(Debug)]
struct ConnState {
    autocommit: bool,
    /// `BEGIN` issued and not yet ended
    explicit: bool,
    /// PostgreSQL: an error happened inside the transaction block
    aborted: bool,
    lock_wait: Option<Duration>,
    waiting: Option<Wait>,
    /// Values reported by `SHOW`, keyed by lowercase name
    settings: BTreeMap<String, String>,
}

impl ConnState {
    fn in_transaction(&self) -> bool {
        self.explicit || !self.autocommit
    }
}

pub(crate) struct Store {
    engine: Engine,
    default_lock_wait: Option<Duration>,
    next_conn: ConnId,
    tables: BTreeMap<String, Table>,
    conns: BTreeMap<ConnId, ConnState>,
}

impl Store {
    pub(crate) fn new(engine: Engine) -> Self {
        // innodb_lock_wait_timeout defaults to 50s; lock_timeout to none
        let default_lock_wait = match engine {
            Engine::MySql => Some(Duration::from_secs(50)),
            Engine::Postgres => None,
        };
        Self {
            engine,
            default_lock_wait,
            next_conn: 0,
            tables: BTreeMap::new(),
            conns: BTreeMap::new(),
        }
    }

    pub(crate) fn set_default_lock_wait(&mut self, lock_wait: Option<Duration>) {
        self.default_lock_wait = lock_wait;
    }

    pub(crate) fn connect(&mut self) -> ConnId {
        self.next_conn += 1;
        self.conns.insert(
            self.next_conn,
            ConnState {
                autocommit: true,
                explicit: false,
                aborted: false,
                lock_wait: self.default_lock_wait,
                waiting: None,
                settings: default_settings(self.engine, self.default_lock_wait),
            },
        );
        self.next_conn
    }

    /// Roll back whatever `conn` has open and forget it
    pub(crate) fn disconnect(&mut self, conn: ConnId) {
        self.finish(conn, false);
        self.conns.remove(&conn);
    }

    pub(crate) fn lock_wait(&self, conn: ConnId) -> Option<Duration> {
        self.conns.get(&conn).and_then(|s| s.lock_wait)
    }

    pub(crate) fn clear_wait(&mut self, conn: ConnId) {
        if let Some(state) = self.conns.get_mut(&conn) {
            state.waiting = None;
        }
    }

    /// End the current statement with `failure`, applying the engine's
    /// error semantics to the transaction
    ///
    /// MySQL rolls back the whole transaction on deadlock and only the
    /// statement otherwise. PostgreSQL rolls back on every error and, inside
    /// a transaction block, ignores further statements until it ends.
    pub(crate) fn abort_statement(&mut self, conn: ConnId, failure: Failure) -> Failure {
        self.clear_wait(conn);
        match self.engine {
            Engine::MySql => {
                if failure == Failure::Deadlock {
                    self.finish(conn, false);
                    if let Some(state) = self.conns.get_mut(&conn) {
                        state.explicit = false;
                    }
                }
            }
            Engine::Postgres => {
                self.finish(conn, false);
                if let Some(state) = self.conns.get_mut(&conn) {
                    if state.explicit {
                        state.aborted = true;
                    }
                }
            }
        }
        if !self.in_transaction(conn) {
            self.finish(conn, false);
        }
        failure
    }

    pub(crate) fn execute(&mut self, conn: ConnId, stmt: &Statement) -> Result<RowSet, Exec> {
        let Some(state) = self.conns.get(&conn) else {
            return Err(Exec::Failed(Failure::Unsupported(
                "statement on a closed connection".into(),
            )));
        };
        if self.engine == Engine::Postgres && state.aborted && !stmt.ends_transaction() {
            return Err(Exec::Failed(self.abort_statement(conn, Failure::InFailedTransaction)));
        }

        match self.dispatch(conn, stmt) {
            Ok(rows) => {
                self.clear_wait(conn);
                if !self.in_transaction(conn) {
                    self.finish(conn, true);
                }
                Ok(rows)
            }
            Err(Exec::Blocked) => Err(Exec::Blocked),
            Err(Exec::Failed(failure)) => Err(Exec::Failed(self.abort_statement(conn, failure))),
        }
    }

    fn dispatch(&mut self, conn: ConnId, stmt: &Statement) -> Result<RowSet, Exec> {
        match stmt {
            Statement::Control(control) => {
                self.control(conn, *control);
                Ok(RowSet::empty())
            }
            Statement::Set { name, value } => self.set(conn, name, value),
            Statement::SetIsolation(words) => {
                let level = match self.engine {
                    Engine::MySql => words.join("-"),
                    Engine::Postgres => words.join(" ").to_ascii_lowercase(),
                };
                self.remember(conn, "transaction_isolation", level);
                Ok(RowSet::empty())
            }
            Statement::Show(name) => self.show(conn, name),
            Statement::ShowVariables(pattern) => Ok(self.show_variables(conn, pattern)),
            Statement::Ignored => Ok(RowSet::empty()),
            Statement::CreateTable { name, columns } => self.create_table(conn, name, columns),
            Statement::DropTable { names, if_exists } => self.drop_tables(conn, names, *if_exists),
            Statement::Insert { table, columns, rows } => {
                self.insert(conn, table, columns.as_deref(), rows)
            }
            Statement::Select {
                table,
                projection,
                filter,
                order_by,
                lock,
            } => self.select(conn, table, projection, filter, order_by.as_ref(), *lock),
            Statement::SelectScalars(scalars) => Ok(self.scalars(conn, scalars)),
            Statement::Update {
                table,
                assignments,
                filter,
            } => self.update(conn, table, assignments, filter),
            Statement::Delete { table, filter } => self.delete(conn, table, filter),
        }
    }

    fn in_transaction(&self, conn: ConnId) -> bool {
        self.conns.get(&conn).is_some_and(ConnState::in_transaction)
    }

    fn control(&mut self, conn: ConnId, control: TxnControl) {
        let engine = self.engine;
        let Some(state) = self.conns.get(&conn) else {
            return;
        };
        let (in_txn, aborted) = (state.in_transaction(), state.aborted);
        match control {
            TxnControl::Begin => {
                // MySQL commits the running transaction; PostgreSQL only warns
                if engine == Engine::MySql && in_txn {
                    self.finish(conn, true);
                }
                if let Some(state) = self.conns.get_mut(&conn) {
                    state.explicit = true;
                }
            }
            TxnControl::Commit | TxnControl::Rollback => {
                // COMMIT of a failed PostgreSQL transaction rolls it back
                let commit = control == TxnControl::Commit && !aborted;
                self.finish(conn, commit);
                if let Some(state) = self.conns.get_mut(&conn) {
                    state.explicit = false;
                    state.aborted = false;
                }
            }
        }
    }

    fn set(&mut self, conn: ConnId, name: &str, value: &str) -> Result<RowSet, Exec> {
        match (self.engine, name) {
            (Engine::MySql, "autocommit") => {
                let on = parse_switch(value)?;
                let was_off = self.conns.get(&conn).is_some_and(|s| !s.autocommit);
                if on && was_off {
                    self.finish(conn, true);
                }
                if let Some(state) = self.conns.get_mut(&conn) {
                    if on && was_off {
                        state.explicit = false;
                    }
                    state.autocommit = on;
                }
            }
            (Engine::MySql, "innodb_lock_wait_timeout") => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| Failure::Syntax(value.to_string()))?;
                self.set_lock_wait(conn, Some(Duration::from_secs(secs)));
            }
            (Engine::Postgres, "lock_timeout") => {
                let wait = parse_pg_duration(value)?;
                self.set_lock_wait(conn, (!wait.is_zero()).then_some(wait));
            }
            (Engine::Postgres, "autocommit") => {
                return Err(Failure::Unsupported("SET AUTOCOMMIT".into()).into());
            }
            // statement timeouts, character sets and the like are accepted as-is
            _ => {}
        }
        let stored = match (self.engine, name) {
            (Engine::MySql, "autocommit") => {
                if parse_switch(value)? { "ON" } else { "OFF" }.to_string()
            }
            _ => value.to_string(),
        };
        self.remember(conn, name, stored);
        Ok(RowSet::empty())
    }

    fn remember(&mut self, conn: ConnId, name: &str, value: String) {
        if let Some(state) = self.conns.get_mut(&conn) {
            state.settings.insert(name.to_string(), value);
        }
    }

    fn settings(&self, conn: ConnId) -> impl Iterator<Item = (&String, &String)> {
        self.conns.get(&conn).into_iter().flat_map(|s| s.settings.iter())
    }

    fn show(&self, conn: ConnId, name: &str) -> Result<RowSet, Exec> {
        let value = self
            .settings(conn)
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| Failure::UnknownSetting(name.to_string()))?;
        Ok(RowSet::new(
            vec![name.to_string()],
            vec![Row::new(vec![Value::Text(value)])],
        ))
    }

    fn show_variables(&self, conn: ConnId, pattern: &str) -> RowSet {
        let rows: Vec<Row> = self
            .settings(conn)
            .filter(|(name, _)| like(pattern, name))
            .map(|(name, value)| Row::new(vec![Value::Text(name.clone()), Value::Text(value.clone())]))
            .collect();
        if rows.is_empty() {
            return RowSet::empty();
        }
        RowSet::new(vec!["Variable_name".to_string(), "Value".to_string()], rows)
    }

    fn set_lock_wait(&mut self, conn: ConnId, lock_wait: Option<Duration>) {
        if let Some(state) = self.conns.get_mut(&conn) {
            state.lock_wait = lock_wait;
        }
    }

    /// MySQL commits before any DDL statement
    fn implicit_commit(&mut self, conn: ConnId) {
        if self.engine != Engine::MySql {
            return;
        }
        self.finish(conn, true);
        if let Some(state) = self.conns.get_mut(&conn) {
            state.explicit = false;
        }
    }

    fn create_table(&mut self, conn: ConnId, name: &str, columns: &[ColumnDef]) -> Result<RowSet, Exec> {
        self.implicit_commit(conn);
        if self.tables.contains_key(name) {
            return Err(Failure::TableExists(name.to_string()).into());
        }
        let columns = columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                integer: c.integer,
            })
            .collect();
        self.tables.insert(
            name.to_string(),
            Table {
                columns,
                rows: BTreeMap::new(),
                pending: BTreeMap::new(),
                locks: BTreeMap::new(),
            },
        );
        Ok(RowSet::empty())
    }

    fn drop_tables(&mut self, conn: ConnId, names: &[String], if_exists: bool) -> Result<RowSet, Exec> {
        self.implicit_commit(conn);
        let mut blockers = BTreeSet::new();
        for name in names {
            match self.tables.get(name) {
                Some(table) => blockers.extend(table.holders_other_than(conn)),
                None if if_exists => {}
                None => return Err(Failure::NoSuchTable(name.clone()).into()),
            }
        }
        if let (false, Some(first)) = (blockers.is_empty(), names.first()) {
            return self.block(
                conn,
                Wait {
                    table: first.clone(),
                    key: None,
                    mode: LockMode::Exclusive,
                    blockers,
                },
            );
        }
        for name in names {
            self.tables.remove(name);
        }
        Ok(RowSet::empty())
    }

    fn insert(
        &mut self,
        conn: ConnId,
        table_name: &str,
        columns: Option<&[String]>,
        rows: &[Vec<Value>],
    ) -> Result<RowSet, Exec> {
        let table = self.table(table_name)?;
        let targets: Vec<usize> = match columns {
            Some(names) => names
                .iter()
                .map(|n| table.column_index(n))
                .collect::<Result<_, _>>()?,
            None => (0..table.columns.len()).collect(),
        };

        let mut new_rows = Vec::with_capacity(rows.len());
        let mut keys = BTreeSet::new();
        for values in rows {
            if values.len() != targets.len() {
                return Err(Failure::ColumnCount.into());
            }
            let mut row = vec![Value::Null; table.columns.len()];
            for (&idx, value) in targets.iter().zip(values) {
                row[idx] = table.columns[idx].coerce(value.clone());
            }
            let key = Key::of(&row[0]).ok_or_else(|| Failure::NullKey(table.columns[0].name.clone()))?;
            if !keys.insert(key.clone()) {
                return Err(duplicate(table_name, &key).into());
            }
            new_rows.push((key, row));
        }

        let keys: Vec<Key> = keys.into_iter().collect();
        self.acquire(conn, table_name, &keys, LockMode::Exclusive)?;

        let table = self.table_mut(table_name)?;
        if let Some((key, _)) = new_rows.iter().find(|(key, _)| table.rows.contains_key(key)) {
            return Err(duplicate(table_name, key).into());
        }
        for (key, row) in new_rows {
            table
                .pending
                .entry(key.clone())
                .or_insert(Pending { owner: conn, before: None });
            table.rows.insert(key, row);
        }
        Ok(RowSet::empty())
    }

    fn select(
        &mut self,
        conn: ConnId,
        table_name: &str,
        projection: &Projection,
        filter: &Filter,
        order_by: Option<&(String, bool)>,
        lock: Option<LockMode>,
    ) -> Result<RowSet, Exec> {
        let table = self.table(table_name)?;
        let filter = table.resolve(filter)?;
        let (names, cells): (Vec<String>, Vec<Cell>) = match projection {
            Projection::All => table
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.name.clone(), Cell::Column(i)))
                .unzip(),
            Projection::Columns(items) => items
                .iter()
                .map(|item| match item {
                    Item::Column(c) => table
                        .column_index(c)
                        .map(|i| (table.columns[i].name.clone(), Cell::Column(i))),
                    Item::Literal { value, text } => Ok((
                        self.literal_name(text),
                        Cell::Constant(value.clone()),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .unzip(),
            Projection::Count(_) => (Vec::new(), Vec::new()),
        };
        let order = match order_by {
            Some((column, descending)) => Some((table.column_index(column)?, *descending)),
            None => None,
        };

        let mut matched: Vec<(Key, Vec<Value>)> = match lock {
            Some(_) => table
                .rows
                .iter()
                .filter(|(_, row)| row_matches(row, &filter))
                .map(|(k, row)| (k.clone(), row.clone()))
                .collect(),
            None => table
                .visible(conn)
                .into_iter()
                .filter(|(_, row)| row_matches(row, &filter))
                .map(|(k, row)| (k.clone(), row.clone()))
                .collect(),
        };

        if let Some(mode) = lock {
            let keys: Vec<Key> = matched.iter().map(|(k, _)| k.clone()).collect();
            self.acquire(conn, table_name, &keys, mode)?;
        }

        if let Projection::Count(written) = projection {
            let column = match self.engine {
                Engine::MySql => written.as_str(),
                Engine::Postgres => "count",
            };
            return Ok(RowSet::from_rows(&[column], vec![vec![Value::Int(matched.len() as i64)]]));
        }

        if let Some((idx, descending)) = order {
            matched.sort_by(|(_, a), (_, b)| compare_values(&a[idx], &b[idx]));
            if descending {
                matched.reverse();
            }
        }
        if matched.is_empty() {
            return Ok(RowSet::empty());
        }
        let rows = matched
            .into_iter()
            .map(|(_, row)| {
                Row::new(
                    cells
                        .iter()
                        .map(|cell| match cell {
                            Cell::Column(i) => row[*i].clone(),
                            Cell::Constant(v) => v.clone(),
                        })
                        .collect(),
                )
            })
            .collect();
        Ok(RowSet::new(names, rows))
    }

    /// Column name the engine gives an unaliased literal
    fn literal_name(&self, text: &str) -> String {
        match self.engine {
            Engine::MySql => text.to_string(),
            Engine::Postgres => "?column?".to_string(),
        }
    }

    fn scalars(&self, conn: ConnId, scalars: &[Scalar]) -> RowSet {
        let mut columns = Vec::with_capacity(scalars.len());
        let mut values = Vec::with_capacity(scalars.len());
        for scalar in scalars {
            let (column, value) = match (self.engine, scalar) {
                (_, Scalar::Literal { value, text }) => (self.literal_name(text), value.clone()),
                (Engine::MySql, Scalar::ConnectionId { text }) => (text.clone(), Value::Int(conn as i64)),
                (Engine::Postgres, Scalar::ConnectionId { .. }) => {
                    ("pg_backend_pid".to_string(), Value::Int(conn as i64))
                }
            };
            columns.push(column);
            values.push(value);
        }
        RowSet::new(columns, vec![Row::new(values)])
    }

    fn update(
        &mut self,
        conn: ConnId,
        table_name: &str,
        assignments: &[(String, Value)],
        filter: &Filter,
    ) -> Result<RowSet, Exec> {
        let table = self.table(table_name)?;
        let filter = table.resolve(filter)?;
        let assignments: Vec<(usize, Value)> = table.resolve(assignments)?;
        if assignments.iter().any(|(idx, _)| *idx == 0) {
            return Err(Failure::Unsupported("updating the key column".into()).into());
        }
        let keys = matching_keys(table, &filter);
        self.acquire(conn, table_name, &keys, LockMode::Exclusive)?;

        let table = self.table_mut(table_name)?;
        for key in keys {
            let Some(row) = table.rows.get_mut(&key) else {
                continue;
            };
            let before = row.clone();
            for (idx, value) in &assignments {
                row[*idx] = value.clone();
            }
            table.pending.entry(key).or_insert(Pending {
                owner: conn,
                before: Some(before),
            });
        }
        Ok(RowSet::empty())
    }

    fn delete(&mut self, conn: ConnId, table_name: &str, filter: &Filter) -> Result<RowSet, Exec> {
        let table = self.table(table_name)?;
        let filter = table.resolve(filter)?;
        let keys = matching_keys(table, &filter);
        self.acquire(conn, table_name, &keys, LockMode::Exclusive)?;

        let table = self.table_mut(table_name)?;
        for key in keys {
            if let Some(before) = table.rows.remove(&key) {
                table.pending.entry(key).or_insert(Pending {
                    owner: conn,
                    before: Some(before),
                });
            }
        }
        Ok(RowSet::empty())
    }

    fn table(&self, name: &str) -> Result<&Table, Failure> {
        self.tables
            .get(name)
            .ok_or_else(|| Failure::NoSuchTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, Failure> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Failure::NoSuchTable(name.to_string()))
    }

    /// Take `mode` on every key, or none of them
    fn acquire(&mut self, conn: ConnId, table_name: &str, keys: &[Key], mode: LockMode) -> Result<(), Exec> {
        let table = self.table(table_name)?;
        let mut blockers = BTreeSet::new();
        let mut first_blocked = None;
        for key in keys {
            if let Some(lock) = table.locks.get(key) {
                let before = blockers.len();
                blockers.extend(lock.blockers(conn, mode));
                if first_blocked.is_none() && blockers.len() > before {
                    first_blocked = Some(key.clone());
                }
            }
        }
        if !blockers.is_empty() {
            return self.block(
                conn,
                Wait {
                    table: table_name.to_string(),
                    key: first_blocked,
                    mode,
                    blockers,
                },
            );
        }

        let table = self.table_mut(table_name)?;
        for key in keys {
            table.locks.entry(key.clone()).or_default().grant(conn, mode);
        }
        Ok(())
    }

    /// Record that `conn` waits, or fail it if waiting would close a cycle
    fn block<T>(&mut self, conn: ConnId, wait: Wait) -> Result<T, Exec> {
        if self.waits_on(&wait.blockers, conn) {
            return Err(Failure::Deadlock.into());
        }
        if let Some(state) = self.conns.get_mut(&conn) {
            state.waiting = Some(wait);
        }
        Err(Exec::Blocked)
    }

    /// True if any of `from` transitively waits on `target`
    fn waits_on(&self, from: &BTreeSet<ConnId>, target: ConnId) -> bool {
        let mut stack: Vec<ConnId> = from.iter().copied().collect();
        let mut seen = BTreeSet::new();
        while let Some(conn) = stack.pop() {
            if conn == target {
                return true;
            }
            if !seen.insert(conn) {
                continue;
            }
            if let Some(wait) = self.conns.get(&conn).and_then(|s| s.waiting.as_ref()) {
                stack.extend(wait.blockers.iter().copied());
            }
        }
        false
    }

    /// Commit or roll back everything `conn` changed and release its locks
    fn finish(&mut self, conn: ConnId, commit: bool) {
        for table in self.tables.values_mut() {
            let owned: Vec<Key> = table
                .pending
                .iter()
                .filter(|(_, p)| p.owner == conn)
                .map(|(k, _)| k.clone())
                .collect();
            for key in owned {
                let Some(pending) = table.pending.remove(&key) else {
                    continue;
                };
                if !commit {
                    match pending.before {
                        Some(row) => {
                            table.rows.insert(key, row);
                        }
                        None => {
                            table.rows.remove(&key);
                        }
                    }
                }
            }
            table.locks.retain(|_, lock| {
                lock.release(conn);
                !lock.is_free()
            });
        }
    }

    /// Granted and waiting row locks, one row per holder or waiter
    pub(crate) fn lock_report(&self) -> RowSet {
        let columns = ["OBJECT_NAME", "LOCK_DATA", "LOCK_MODE", "LOCK_STATUS", "CONNECTION_ID"];
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut push = |table: &str, key: &Key, mode: LockMode, status: &str, conn: ConnId| {
            rows.push(vec![
                Value::Text(table.to_string()),
                Value::Text(key.to_string()),
                Value::Text(mode.as_str().to_string()),
                Value::Text(status.to_string()),
                Value::Int(conn as i64),
            ]);
        };
        for (name, table) in &self.tables {
            for (key, lock) in &table.locks {
                if let Some(owner) = lock.exclusive {
                    push(name, key, LockMode::Exclusive, "GRANTED", owner);
                }
                for &holder in &lock.shared {
                    push(name, key, LockMode::Shared, "GRANTED", holder);
                }
                for (&conn, state) in &self.conns {
                    if let Some(wait) = &state.waiting {
                        if wait.table == *name && wait.key.as_ref() == Some(key) {
                            push(name, key, wait.mode, "WAITING", conn);
                        }
                    }
                }
            }
        }
        RowSet::from_rows(&columns, rows)
    }

    /// Committed contents of `table`, ordered by key
    pub(crate) fn committed(&self, table: &str) -> Option<RowSet> {
        let table = self.tables.get(table)?;
        let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        // Connection ids start at 1, so 0 owns no pending change
        let rows = table
            .visible(0)
            .into_values()
            .map(|row| Row::new(row.clone()))
            .collect();
        Some(RowSet::new(columns, rows))
    }
}

fn duplicate(table: &str, key: &Key) -> Failure {
    Failure::Duplicate {
        table: table.to_string(),
        key: key.to_string(),
    }
}

fn matching_keys(table: &Table, filter: &[(usize, Value)]) -> Vec<Key> {
    table
        .rows
        .iter()
        .filter(|(_, row)| row_matches(row, filter))
        .map(|(k, _)| k.clone())
        .collect()
}

fn row_matches(row: &[Value], filter: &[(usize, Value)]) -> bool {
    filter
        .iter()
        .all(|(idx, expected)| row.get(*idx).is_some_and(|v| values_equal(v, expected)))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::Int(i) => Some(*i as f64),
        Value::UInt(u) => Some(*u as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// SQL equality; NULL equals nothing
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Text(x), Value::Text(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        _ => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Sort order for `ORDER BY`: NULL first, then numbers, then text
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) | Value::Int(_) | Value::UInt(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
            Value::Bytes(_) => 3,
        }
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        _ => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

fn default_settings(engine: Engine, lock_wait: Option<Duration>) -> BTreeMap<String, String> {
    let pairs: Vec<(&str, String)> = match engine {
        Engine::MySql => vec![
            ("autocommit", "ON".into()),
            (
                "innodb_lock_wait_timeout",
                lock_wait.map_or(0, |d| d.as_secs()).to_string(),
            ),
            ("transaction_isolation", "REPEATABLE-READ".into()),
        ],
        Engine::Postgres => vec![
            ("lock_timeout", lock_wait.map_or("0".into(), |d| format!("{}ms", d.as_millis()))),
            ("log_lock_waits", "off".into()),
            ("transaction_isolation", "read committed".into()),
        ],
    };
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Case-insensitive SQL `LIKE` with `%` and `_`
fn like(pattern: &str, text: &str) -> bool {
    fn matches(p: &[char], t: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some((&'%', rest)) => (0..=t.len()).any(|i| matches(rest, &t[i..])),
            Some((&'_', rest)) => !t.is_empty() && matches(rest, &t[1..]),
            Some((c, rest)) => t.first() == Some(c) && matches(rest, &t[1..]),
        }
    }
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let t: Vec<char> = text.to_lowercase().chars().collect();
    matches(&p, &t)
}

fn parse_switch(value: &str) -> Result<bool, Failure> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        _ => Err(Failure::Syntax(value.to_string())),
    }
}

/// `lock_timeout` value: a bare number is milliseconds
fn parse_pg_duration(value: &str) -> Result<Duration, Failure> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: u64 = number
        .parse()
        .map_err(|_| Failure::Syntax(value.to_string()))?;
    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(number)),
        "s" => Ok(Duration::from_secs(number)),
        "min" => Ok(Duration::from_secs(number * 60)),
        _ => Err(Failure::Syntax(value.to_string())),
    }
}
