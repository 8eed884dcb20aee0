//! Parser for the in-memory server's SQL subset
//!
//! Supported statements:
//! - `BEGIN`, `START TRANSACTION`, `COMMIT`, `END`, `ROLLBACK`, `ABORT`
//! - `SET name = value`, `SET [SESSION] TRANSACTION ISOLATION LEVEL ..`,
//!   `SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL ..`, `SET NAMES ..`
//! - `SHOW name`, `SHOW [SESSION] VARIABLES LIKE 'pattern'`
//! - `CREATE TABLE t (col type, ...)` where the first column is the key
//! - `DROP TABLE [IF EXISTS] t, ...`
//! - `INSERT INTO t [(cols)] VALUES (...), ...`
//! - `SELECT *|cols|count(*) FROM t [WHERE col = lit [AND ...]] [ORDER BY col [ASC|DESC]]
//!   [FOR UPDATE|FOR SHARE|LOCK IN SHARE MODE]`
//! - `SELECT lit, ...`, `SELECT CONNECTION_ID()`, `SELECT pg_backend_pid()`
//! - `UPDATE t SET col = lit, ... [WHERE ...]`
//! - `DELETE FROM t [WHERE ...]`

use super::error::Failure;
use super::lexer::{tokenize, Token};
use lockscope_core::{TxnControl, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            LockMode::Shared => "S",
            LockMode::Exclusive => "X",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Item {
    Column(String),
    Literal { value: Value, text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    All,
    Columns(Vec<Item>),
    /// `count(*)`, with the column name as written
    Count(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Scalar {
    Literal { value: Value, text: String },
    ConnectionId { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnDef {
    pub(crate) name: String,
    pub(crate) integer: bool,
}

/// `col = literal` conjunction
pub(crate) type Filter = Vec<(String, Value)>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    Control(TxnControl),
    Set { name: String, value: String },
    /// Isolation level words, uppercased: `["READ", "COMMITTED"]`
    SetIsolation(Vec<String>),
    /// PostgreSQL `SHOW name`
    Show(String),
    /// MySQL `SHOW [SESSION] VARIABLES LIKE 'pattern'`
    ShowVariables(String),
    Ignored,
    CreateTable { name: String, columns: Vec<ColumnDef> },
    DropTable { names: Vec<String>, if_exists: bool },
    Insert { table: String, columns: Option<Vec<String>>, rows: Vec<Vec<Value>> },
    Select {
        table: String,
        projection: Projection,
        filter: Filter,
        order_by: Option<(String, bool)>,
        lock: Option<LockMode>,
    },
    SelectScalars(Vec<Scalar>),
    Update { table: String, assignments: Vec<(String, Value)>, filter: Filter },
    Delete { table: String, filter: Filter },
}

impl Statement {
    /// True for statements allowed inside a failed PostgreSQL transaction
    pub(crate) fn ends_transaction(&self) -> bool {
        matches!(
            self,
            Statement::Control(TxnControl::Commit) | Statement::Control(TxnControl::Rollback)
        )
    }
}

pub(crate) fn parse(sql: &str) -> Result<Statement, Failure> {
    let mut tokens = tokenize(sql)?;
    while tokens.last() == Some(&Token::Symbol(';')) {
        tokens.pop();
    }
    if tokens.is_empty() {
        return Err(Failure::Syntax(String::new()));
    }

    if let Some(control) = TxnControl::classify(sql) {
        return Ok(Statement::Control(control));
    }

    let mut parser = Parser { tokens, pos: 0 };
    let statement = parser.statement()?;
    if let Some(extra) = parser.peek() {
        return Err(Failure::Syntax(extra.text()));
    }
    Ok(statement)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn near(&self) -> Failure {
        Failure::Syntax(self.peek().map(Token::text).unwrap_or_default())
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), Failure> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.near())
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.peek() == Some(&Token::Symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), Failure> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.near())
        }
    }

    fn identifier(&mut self) -> Result<String, Failure> {
        match self.peek() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => {
                let name = w.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.near()),
        }
    }

    /// Table name; a `schema.` qualifier is dropped and the name lowercased
    fn table_name(&mut self) -> Result<String, Failure> {
        let mut name = self.identifier()?;
        while self.eat_symbol('.') {
            name = self.identifier()?;
        }
        Ok(name.to_ascii_lowercase())
    }

    fn literal(&mut self) -> Result<(Value, String), Failure> {
        let negative = self.eat_symbol('-');
        let token = self.next().ok_or_else(|| Failure::Syntax(String::new()))?;
        let sign = if negative { "-" } else { "" };
        match token {
            Token::Number(n) => {
                let text = format!("{}{}", sign, n);
                let value = match text.parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => text
                        .parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| Failure::Syntax(text.clone()))?,
                };
                Ok((value, text))
            }
            Token::Str(s) if !negative => Ok((Value::Text(s.clone()), s)),
            Token::Word(w) if !negative && w.eq_ignore_ascii_case("NULL") => Ok((Value::Null, w)),
            Token::Word(w) if !negative && w.eq_ignore_ascii_case("TRUE") => Ok((Value::Bool(true), w)),
            Token::Word(w) if !negative && w.eq_ignore_ascii_case("FALSE") => {
                Ok((Value::Bool(false), w))
            }
            other => Err(Failure::Syntax(other.text())),
        }
    }

    fn statement(&mut self) -> Result<Statement, Failure> {
        let first = self.peek().cloned().ok_or_else(|| Failure::Syntax(String::new()))?;
        if first.is_keyword("SET") {
            self.pos += 1;
            return self.set();
        }
        if first.is_keyword("CREATE") {
            self.pos += 1;
            return self.create_table();
        }
        if first.is_keyword("DROP") {
            self.pos += 1;
            return self.drop_table();
        }
        if first.is_keyword("INSERT") {
            self.pos += 1;
            return self.insert();
        }
        if first.is_keyword("SELECT") {
            self.pos += 1;
            return self.select();
        }
        if first.is_keyword("UPDATE") {
            self.pos += 1;
            return self.update();
        }
        if first.is_keyword("SHOW") {
            self.pos += 1;
            return self.show();
        }
        if first.is_keyword("DELETE") {
            self.pos += 1;
            return self.delete();
        }
        Err(Failure::Syntax(first.text()))
    }

    fn set(&mut self) -> Result<Statement, Failure> {
        // SET [SESSION|LOCAL|GLOBAL] name {=|TO} value
        let _ = self.eat_keyword("SESSION") || self.eat_keyword("LOCAL") || self.eat_keyword("GLOBAL");
        let name = match self.peek() {
            Some(Token::Word(w)) => w.to_ascii_lowercase(),
            _ => return Err(self.near()),
        };
        if matches!(name.as_str(), "transaction" | "characteristics") {
            // [AS TRANSACTION] ISOLATION LEVEL <words>; anything else is ignored
            let words: Vec<String> = self.tokens[self.pos..].iter().map(Token::text).collect();
            self.pos = self.tokens.len();
            return Ok(match words.iter().position(|w| w.eq_ignore_ascii_case("LEVEL")) {
                Some(idx) if idx + 1 < words.len() => Statement::SetIsolation(
                    words[idx + 1..].iter().map(|w| w.to_ascii_uppercase()).collect(),
                ),
                _ => Statement::Ignored,
            });
        }
        if name == "names" {
            self.pos = self.tokens.len();
            return Ok(Statement::Ignored);
        }
        self.pos += 1;
        if !self.eat_symbol('=') {
            self.expect_keyword("TO")?;
        }
        let value: Vec<String> = self.tokens[self.pos..]
            .iter()
            .map(|t| match t {
                Token::Str(s) | Token::Quoted(s) => s.clone(),
                other => other.text(),
            })
            .collect();
        self.pos = self.tokens.len();
        if value.is_empty() {
            return Err(Failure::Syntax(name));
        }
        let name = name.trim_start_matches("@@").to_string();
        Ok(Statement::Set { name, value: value.concat() })
    }

    fn show(&mut self) -> Result<Statement, Failure> {
        let _ = self.eat_keyword("SESSION");
        if self.eat_keyword("VARIABLES") {
            self.expect_keyword("LIKE")?;
            return match self.next() {
                Some(Token::Str(pattern)) => Ok(Statement::ShowVariables(pattern)),
                Some(other) => Err(Failure::Syntax(other.text())),
                None => Err(Failure::Syntax(String::new())),
            };
        }
        if self.at_keyword("ENGINE") {
            return Err(Failure::Unsupported("SHOW ENGINE".into()));
        }
        Ok(Statement::Show(self.identifier()?.to_ascii_lowercase()))
    }

    fn create_table(&mut self) -> Result<Statement, Failure> {
        self.expect_keyword("TABLE")?;
        if self.eat_keyword("IF") {
            return Err(Failure::Unsupported("CREATE TABLE IF NOT EXISTS".into()));
        }
        let name = self.table_name()?;
        self.expect_symbol('(')?;

        let mut columns = Vec::new();
        loop {
            let item_start = self.pos;
            let mut depth = 0usize;
            // Scan one top-level item up to ',' or the closing ')'
            loop {
                match self.peek() {
                    None => return Err(Failure::Syntax(String::new())),
                    Some(Token::Symbol('(')) => depth += 1,
                    Some(Token::Symbol(')')) if depth == 0 => break,
                    Some(Token::Symbol(')')) => depth -= 1,
                    Some(Token::Symbol(',')) if depth == 0 => break,
                    _ => {}
                }
                self.pos += 1;
            }
            let item = &self.tokens[item_start..self.pos];
            if let Some(column) = column_def(item) {
                columns.push(column);
            }
            if self.eat_symbol(',') {
                continue;
            }
            self.expect_symbol(')')?;
            break;
        }
        // Trailing table options (ENGINE=..., DEFAULT CHARSET=...) are ignored
        self.pos = self.tokens.len();
        if columns.is_empty() {
            return Err(Failure::Syntax(name));
        }
        Ok(Statement::CreateTable { name, columns })
    }

    fn drop_table(&mut self) -> Result<Statement, Failure> {
        self.expect_keyword("TABLE")?;
        let if_exists = if self.eat_keyword("IF") {
            self.expect_keyword("EXISTS")?;
            true
        } else {
            false
        };
        let mut names = vec![self.table_name()?];
        while self.eat_symbol(',') {
            names.push(self.table_name()?);
        }
        let _ = self.eat_keyword("CASCADE") || self.eat_keyword("RESTRICT");
        Ok(Statement::DropTable { names, if_exists })
    }

    fn insert(&mut self) -> Result<Statement, Failure> {
        self.expect_keyword("INTO")?;
        let table = self.table_name()?;
        let columns = if self.eat_symbol('(') {
            let mut columns = vec![self.identifier()?];
            while self.eat_symbol(',') {
                columns.push(self.identifier()?);
            }
            self.expect_symbol(')')?;
            Some(columns)
        } else {
            None
        };
        if !self.eat_keyword("VALUES") {
            self.expect_keyword("VALUE")?;
        }
        let mut rows = Vec::new();
        loop {
            self.expect_symbol('(')?;
            let mut row = vec![self.literal()?.0];
            while self.eat_symbol(',') {
                row.push(self.literal()?.0);
            }
            self.expect_symbol(')')?;
            rows.push(row);
            if !self.eat_symbol(',') {
                break;
            }
        }
        Ok(Statement::Insert { table, columns, rows })
    }

    fn select(&mut self) -> Result<Statement, Failure> {
        let projection = if self.eat_symbol('*') {
            Projection::All
        } else if self.at_keyword("count") && self.tokens.get(self.pos + 1) == Some(&Token::Symbol('(')) {
            let word = self.identifier()?;
            self.expect_symbol('(')?;
            self.expect_symbol('*')?;
            self.expect_symbol(')')?;
            Projection::Count(format!("{}(*)", word))
        } else {
            let start = self.pos;
            if let Some(scalars) = self.scalars()? {
                return Ok(Statement::SelectScalars(scalars));
            }
            self.pos = start;
            let mut items = vec![self.item()?];
            while self.eat_symbol(',') {
                items.push(self.item()?);
            }
            Projection::Columns(items)
        };

        self.expect_keyword("FROM")?;
        let table = self.table_name()?;
        let filter = self.filter()?;

        let order_by = if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            let column = self.identifier()?;
            let descending = if self.eat_keyword("DESC") {
                true
            } else {
                let _ = self.eat_keyword("ASC");
                false
            };
            Some((column, descending))
        } else {
            None
        };

        let lock = if self.eat_keyword("FOR") {
            if self.eat_keyword("UPDATE") {
                Some(LockMode::Exclusive)
            } else if self.eat_keyword("SHARE") {
                Some(LockMode::Shared)
            } else {
                return Err(self.near());
            }
        } else if self.eat_keyword("LOCK") {
            self.expect_keyword("IN")?;
            self.expect_keyword("SHARE")?;
            self.expect_keyword("MODE")?;
            Some(LockMode::Shared)
        } else {
            None
        };

        Ok(Statement::Select {
            table,
            projection,
            filter,
            order_by,
            lock,
        })
    }

    fn item(&mut self) -> Result<Item, Failure> {
        match self.peek() {
            Some(Token::Word(w)) if !["NULL", "TRUE", "FALSE"].iter().any(|k| w.eq_ignore_ascii_case(k)) => {
                Ok(Item::Column(self.identifier()?))
            }
            Some(Token::Quoted(_)) => Ok(Item::Column(self.identifier()?)),
            _ => {
                let (value, text) = self.literal()?;
                Ok(Item::Literal { value, text })
            }
        }
    }

    /// `SELECT` list made only of literals and connection-id calls, or
    /// `None` when a `FROM` clause follows
    fn scalars(&mut self) -> Result<Option<Vec<Scalar>>, Failure> {
        let mut scalars = Vec::new();
        loop {
            let is_call = |name: &str, parser: &Parser| {
                parser.at_keyword(name)
                    && parser.tokens.get(parser.pos + 1) == Some(&Token::Symbol('('))
                    && parser.tokens.get(parser.pos + 2) == Some(&Token::Symbol(')'))
            };
            if is_call("CONNECTION_ID", self) || is_call("pg_backend_pid", self) {
                let name = self.identifier()?;
                self.pos += 2;
                scalars.push(Scalar::ConnectionId {
                    text: format!("{}()", name),
                });
            } else {
                match self.peek() {
                    Some(Token::Number(_)) | Some(Token::Str(_)) | Some(Token::Symbol('-')) => {
                        let (value, text) = self.literal()?;
                        scalars.push(Scalar::Literal { value, text });
                    }
                    Some(t) if t.is_keyword("NULL") || t.is_keyword("TRUE") || t.is_keyword("FALSE") => {
                        let (value, text) = self.literal()?;
                        scalars.push(Scalar::Literal { value, text });
                    }
                    _ => return Ok(None),
                }
            }
            if !self.eat_symbol(',') {
                break;
            }
        }
        if self.peek().is_some() {
            return Ok(None);
        }
        Ok(Some(scalars))
    }

    fn filter(&mut self) -> Result<Filter, Failure> {
        let mut filter = Vec::new();
        if !self.eat_keyword("WHERE") {
            return Ok(filter);
        }
        loop {
            let column = self.identifier()?;
            if !self.eat_symbol('=') {
                return Err(Failure::Unsupported(format!(
                    "predicate on {} other than equality",
                    column
                )));
            }
            let (value, _) = self.literal()?;
            filter.push((column, value));
            if !self.eat_keyword("AND") {
                break;
            }
        }
        Ok(filter)
    }

    fn update(&mut self) -> Result<Statement, Failure> {
        let table = self.table_name()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.identifier()?;
            self.expect_symbol('=')?;
            let (value, _) = self.literal()?;
            assignments.push((column, value));
            if !self.eat_symbol(',') {
                break;
            }
        }
        let filter = self.filter()?;
        Ok(Statement::Update {
            table,
            assignments,
            filter,
        })
    }

    fn delete(&mut self) -> Result<Statement, Failure> {
        self.expect_keyword("FROM")?;
        let table = self.table_name()?;
        let filter = self.filter()?;
        Ok(Statement::Delete { table, filter })
    }
}

/// Column definition from one `CREATE TABLE` item, `None` for constraints
fn column_def(item: &[Token]) -> Option<ColumnDef> {
    const CONSTRAINTS: [&str; 7] = ["PRIMARY", "KEY", "UNIQUE", "INDEX", "CONSTRAINT", "FOREIGN", "CHECK"];
    let first = item.first()?;
    if CONSTRAINTS.iter().any(|k| first.is_keyword(k)) {
        return None;
    }
    let name = match first {
        Token::Word(w) | Token::Quoted(w) => w.clone(),
        _ => return None,
    };
    let integer = match item.get(1) {
        Some(Token::Word(ty)) => {
            let ty = ty.to_ascii_uppercase();
            ty.contains("INT") || ty == "SERIAL" || ty == "BIGSERIAL"
        }
        _ => false,
    };
    Some(ColumnDef { name, integer })
}
