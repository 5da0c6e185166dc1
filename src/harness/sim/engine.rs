//! Simulated database node
//!
//! Recognizes the statement shapes the scenarios send: HDFS-backed
//! `CREATE TABLE`, `INSERT ... VALUES`, `SELECT *` from a table, and
//! `SELECT *` from the `hdfs(...)` table function. Column lists and
//! `INSERT` statements go through `sqlparser` with the ClickHouse dialect. Every filesystem access
//! logs in as the principal selected by the URI, renewing an expired
//! ticket lazily on the next access. There is no background renewal.

use super::kdc::{SimulatedKdc, Ticket};
use super::namenode::SimulatedNameNode;
use crate::harness::clock::SharedClock;
use crate::harness::config::{ClusterConfig, EngineHdfsConfig, HdfsSection, PRINCIPAL_KEY};
use crate::harness::engine::QueryEngine;
use crate::harness::error::{HarnessError, HarnessResult};
use crate::harness::uri::StorageUri;
use async_trait::async_trait;
use regex::Regex;
use sqlparser::ast::{ColumnDef, Expr, SetExpr, Statement, UnaryOperator, Value};
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use tokio::sync::watch;

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*create\s+table\s+(\w+)\s*\((.*)\)\s*engine\s*=\s*hdfs\s*\(\s*'([^']*)'\s*,\s*'(\w+)'\s*\)\s*;?\s*$",
    )
    .expect("valid CREATE TABLE pattern")
});

static SELECT_TABLE_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*select\s+\*\s+from\s+hdfs\s*\(\s*'([^']*)'\s*,\s*'(\w+)'\s*,\s*'([^']*)'\s*\)\s*;?\s*$",
    )
    .expect("valid table function pattern")
});

static SELECT_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*select\s+\*\s+from\s+(\w+)\s*;?\s*$").expect("valid SELECT pattern")
});

/// Column type supported by the simulated node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    UInt,
    Int,
    Float,
    String,
}

impl ColumnType {
    fn parse(name: &str) -> Result<Self, String> {
        match name.to_ascii_lowercase().as_str() {
            "uint8" | "uint16" | "uint32" | "uint64" => Ok(ColumnType::UInt),
            "int8" | "int16" | "int32" | "int64" => Ok(ColumnType::Int),
            "float32" | "float64" => Ok(ColumnType::Float),
            "string" => Ok(ColumnType::String),
            _ => Err(format!(
                "Code: 50. DB::Exception: Unknown data type family: {}",
                name
            )),
        }
    }

    /// Render a value the way TSV output shows it
    fn render(self, raw: &str) -> Result<String, String> {
        let bad = || format!("Cannot parse input: '{}' as {:?}", raw, self);
        match self {
            ColumnType::UInt => raw.trim().parse::<u64>().map(|v| v.to_string()).map_err(|_| bad()),
            ColumnType::Int => raw.trim().parse::<i64>().map(|v| v.to_string()).map_err(|_| bad()),
            ColumnType::Float => raw.trim().parse::<f64>().map(|v| v.to_string()).map_err(|_| bad()),
            ColumnType::String => Ok(escape_tsv(raw)),
        }
    }
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    ty: ColumnType,
}

#[derive(Debug, Clone)]
struct TableDef {
    columns: Vec<Column>,
    uri: StorageUri,
}

pub struct SimulatedEngine {
    hdfs_config: EngineHdfsConfig,
    hdfs_host: String,
    hdfs_port: u16,
    kdc: Arc<SimulatedKdc>,
    namenode: Arc<SimulatedNameNode>,
    clock: SharedClock,
    tables: Mutex<HashMap<String, TableDef>>,
    /// Ticket cache keyed by full principal
    tickets: Mutex<HashMap<String, Ticket>>,
    relogins: AtomicUsize,
    running: AtomicBool,
    paused: watch::Sender<bool>,
}

impl SimulatedEngine {
    pub fn new(
        config: &ClusterConfig,
        kdc: Arc<SimulatedKdc>,
        namenode: Arc<SimulatedNameNode>,
        clock: SharedClock,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            hdfs_config: config.engine_hdfs.clone(),
            hdfs_host: config.hdfs.container.name.clone(),
            hdfs_port: config.hdfs.port,
            kdc,
            namenode,
            clock,
            tables: Mutex::new(HashMap::new()),
            tickets: Mutex::new(HashMap::new()),
            relogins: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            paused,
        }
    }

    /// Log in with the global credentials and start accepting statements
    pub fn start(&self) -> Result<(), String> {
        let section = self.hdfs_config.global_section();
        if section.get("hadoop.security.authentication").map(String::as_str) == Some("kerberos") {
            let principal = self.default_principal(&section);
            let ticket = self
                .kdc
                .kinit(&principal)
                .map_err(|e| format!("kinit failure: {}", e))?;
            self.tickets
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(principal, ticket);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Number of times an expired ticket was replaced
    pub fn relogin_count(&self) -> usize {
        self.relogins.load(Ordering::SeqCst)
    }

    fn default_principal(&self, section: &HdfsSection) -> String {
        section
            .get(PRINCIPAL_KEY)
            .map(|p| self.kdc.qualify(p))
            .unwrap_or_else(|| self.kdc.qualify("root"))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.paused.send_replace(false);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.send_replace(paused);
    }

    /// Principals currently holding a cached ticket
    pub fn cached_principals(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tickets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn dispatch(&self, statement: &str) -> Result<String, String> {
        if let Some(caps) = CREATE_TABLE.captures(statement) {
            return self.create_table(&caps[1], &caps[2], &caps[3], &caps[4]);
        }
        if let Some(caps) = SELECT_TABLE_FUNCTION.captures(statement) {
            return self.select_table_function(&caps[1], &caps[2], &caps[3]);
        }
        if let Some(caps) = SELECT_TABLE.captures(statement) {
            return self.select_table(&caps[1]);
        }
        let (name, rows) = parse_insert(statement)?;
        self.insert(&name, rows)
    }

    fn create_table(&self, name: &str, columns: &str, uri: &str, format: &str) -> Result<String, String> {
        let columns = parse_columns(columns)?;
        check_format(format)?;
        let uri = StorageUri::parse(uri).map_err(|e| format!("Code: 36. DB::Exception: {}", e))?;

        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        if tables.contains_key(name) {
            return Err(format!(
                "Code: 57. DB::Exception: Table default.{} already exists.",
                name
            ));
        }
        tables.insert(name.to_string(), TableDef { columns, uri });
        Ok(String::new())
    }

    fn insert(&self, name: &str, rows: Vec<Vec<String>>) -> Result<String, String> {
        let table = self.table(name)?;

        let mut payload = String::new();
        for row in rows {
            if row.len() != table.columns.len() {
                return Err(format!(
                    "Code: 62. DB::Exception: Number of values ({}) does not match number of columns ({})",
                    row.len(),
                    table.columns.len()
                ));
            }
            let rendered = row
                .iter()
                .zip(&table.columns)
                .map(|(raw, column)| {
                    column.ty.render(raw).map_err(|e| {
                        format!("Code: 27. DB::Exception: {} (column {})", e, column.name)
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            payload.push_str(&rendered.join("\t"));
            payload.push('\n');
        }

        let ticket = self.login(&table.uri)?;
        self.namenode
            .create(&ticket, &table.uri.path, payload.as_bytes())
            .map_err(|e| open_failure(&table.uri.path, &e))?;
        Ok(String::new())
    }

    fn select_table(&self, name: &str) -> Result<String, String> {
        let table = self.table(name)?;
        self.read_tsv(&table)
    }

    fn select_table_function(&self, uri: &str, format: &str, structure: &str) -> Result<String, String> {
        check_format(format)?;
        let table = TableDef {
            columns: parse_columns(structure)?,
            uri: StorageUri::parse(uri).map_err(|e| format!("Code: 36. DB::Exception: {}", e))?,
        };
        self.read_tsv(&table)
    }

    fn read_tsv(&self, table: &TableDef) -> Result<String, String> {
        let ticket = self.login(&table.uri)?;
        let bytes = self
            .namenode
            .read(&ticket, &table.uri.path)
            .map_err(|e| open_failure(&table.uri.path, &e))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| format!("Code: 27. DB::Exception: Cannot parse input: {}", e))?;

        let mut out = String::new();
        for (line_no, line) in text.lines().enumerate() {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != table.columns.len() {
                return Err(format!(
                    "Code: 27. DB::Exception: Cannot parse input: expected {} columns at row {}, got {}",
                    table.columns.len(),
                    line_no + 1,
                    fields.len()
                ));
            }
            let rendered = fields
                .iter()
                .zip(&table.columns)
                .map(|(field, column)| match column.ty {
                    ColumnType::String => Ok(field.to_string()),
                    ty => ty
                        .render(field)
                        .map_err(|e| format!("Code: 27. DB::Exception: {}", e)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            out.push_str(&rendered.join("\t"));
            out.push('\n');
        }
        Ok(out)
    }

    fn table(&self, name: &str) -> Result<TableDef, String> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| format!("Code: 60. DB::Exception: Table default.{} doesn't exist.", name))
    }

    /// Resolve the identity for `uri` and return a valid ticket for it
    fn login(&self, uri: &StorageUri) -> Result<Ticket, String> {
        if uri.host != self.hdfs_host || uri.port != self.hdfs_port {
            return Err(format!(
                "Code: 210. DB::Exception: Unable to connect to HDFS: {}:{}",
                uri.host, uri.port
            ));
        }

        let section = self
            .hdfs_config
            .effective_for(uri.principal.as_deref())
            .map_err(|e| match e {
                HarnessError::ConfigError { message } => {
                    format!("Code: 36. DB::Exception: {}", message)
                }
                other => format!("Code: 36. DB::Exception: {}", other),
            })?;

        let principal = match uri.principal.as_deref() {
            Some(user) if self.hdfs_config.user_section(user).is_none() => self.kdc.qualify(user),
            _ => self.default_principal(&section),
        };

        let now = self.clock.now();
        let mut tickets = self.tickets.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ticket) = tickets.get(&principal) {
            if ticket.is_valid_at(now) {
                return Ok(ticket.clone());
            }
            log::info!("Ticket for {} expired, running kinit again", principal);
            self.relogins.fetch_add(1, Ordering::SeqCst);
        }

        let ticket = self
            .kdc
            .kinit(&principal)
            .map_err(|e| format!("Code: 210. DB::Exception: kinit failure: {}", e))?;
        tickets.insert(principal, ticket.clone());
        Ok(ticket)
    }
}

#[async_trait]
impl QueryEngine for SimulatedEngine {
    async fn execute(&self, statement: &str) -> HarnessResult<String> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(HarnessError::IoError {
                message: "Connection refused".to_string(),
                path: "node".to_string(),
            });
        }

        // A paused node accepts the connection but never answers until resumed
        let mut paused = self.paused.subscribe();
        if paused.wait_for(|p| !*p).await.is_err() {
            return Err(HarnessError::IoError {
                message: "Connection reset".to_string(),
                path: "node".to_string(),
            });
        }

        self.dispatch(statement)
            .map_err(|diagnostic| HarnessError::engine(statement, diagnostic))
    }

    async fn ping(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !*self.paused.borrow()
    }
}

fn open_failure(path: &str, reason: &str) -> String {
    if reason.starts_with("GSS initiate failed") {
        format!("Code: 210. DB::Exception: {}", reason)
    } else {
        format!(
            "Code: 210. DB::Exception: Unable to open HDFS file: {} error: {}",
            path, reason
        )
    }
}

fn check_format(format: &str) -> Result<(), String> {
    if format.eq_ignore_ascii_case("TSV") || format == "TabSeparated" {
        Ok(())
    } else {
        Err(format!(
            "Code: 73. DB::Exception: Unknown format {}",
            format
        ))
    }
}

fn syntax_error(reason: impl std::fmt::Display) -> String {
    format!("Code: 62. DB::Exception: Syntax error: {}", reason)
}

fn parse_statement(sql: &str) -> Result<Statement, String> {
    let mut statements = Parser::parse_sql(&ClickHouseDialect {}, sql).map_err(syntax_error)?;
    match statements.len() {
        1 => Ok(statements.remove(0)),
        n => Err(syntax_error(format!("expected one statement, got {}", n))),
    }
}

/// Parse a `name Type, ...` structure list
fn parse_columns(structure: &str) -> Result<Vec<Column>, String> {
    let columns: Vec<ColumnDef> = match parse_statement(&format!("CREATE TABLE t ({})", structure))? {
        Statement::CreateTable(create) => create.columns,
        other => return Err(syntax_error(format!("unexpected statement {}", other))),
    };
    if columns.is_empty() {
        return Err(syntax_error("empty column list"));
    }

    columns
        .into_iter()
        .map(|column| {
            Ok(Column {
                ty: ColumnType::parse(&column.data_type.to_string())?,
                name: column.name.value,
            })
        })
        .collect()
}

/// Parse `INSERT INTO t VALUES (...), (...)` into the table name and raw row values
fn parse_insert(statement: &str) -> Result<(String, Vec<Vec<String>>), String> {
    let insert = match parse_statement(statement)? {
        Statement::Insert(insert) => insert,
        other => return Err(syntax_error(format!("unsupported statement {}", other))),
    };
    let rows = match insert.source.as_deref().map(|query| query.body.as_ref()) {
        Some(SetExpr::Values(values)) => &values.rows,
        _ => return Err(syntax_error("expected VALUES in INSERT")),
    };
    if rows.is_empty() {
        return Err(syntax_error("no rows in VALUES"));
    }

    let rows = rows
        .iter()
        .map(|row| row.iter().map(literal).collect::<Result<Vec<_>, _>>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok((insert.table.to_string(), rows))
}

fn literal(expr: &Expr) -> Result<String, String> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::Number(n, _) => Ok(n.clone()),
            Value::SingleQuotedString(s) => Ok(s.clone()),
            other => Err(syntax_error(format!("unsupported literal {}", other))),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => literal(expr).map(|v| format!("-{}", v)),
        other => Err(syntax_error(format!("unsupported value {}", other))),
    }
}

fn escape_tsv(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_insert_multiple_rows() {
        let (table, rows) =
            parse_insert("INSERT INTO Storage VALUES (1, 'Mark', 72.53), (2, 'O''Hara', -74.00)")
                .unwrap();
        assert_eq!(table, "Storage");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["1", "Mark", "72.53"]);
        assert_eq!(rows[1][1], "O'Hara");
        assert_eq!(rows[1][2], "-74.00");
    }

    #[test]
    fn test_parse_insert_rejects_garbage() {
        for statement in [
            "INSERT INTO T VALUES (1, 'open",
            "INSERT INTO T SELECT 1",
            "DROP TABLE T",
            "",
        ] {
            let err = parse_insert(statement).unwrap_err();
            assert!(err.contains("Syntax error"), "{}: {}", statement, err);
        }
    }

    #[test]
    fn test_float_rendering_matches_tsv_output() {
        assert_eq!(ColumnType::Float.render("72.53").unwrap(), "72.53");
        assert_eq!(ColumnType::Float.render("74.00").unwrap(), "74");
        assert_eq!(ColumnType::Float.render("555.222").unwrap(), "555.222");
        assert!(ColumnType::UInt.render("-1").is_err());
    }

    #[test]
    fn test_parse_columns() {
        let columns = parse_columns("id UInt64, text String, number Float64").unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2].ty, ColumnType::Float);
        assert!(parse_columns("id Decimal").is_err());
        assert!(parse_columns("").is_err());
    }

    #[test]
    fn test_statement_patterns() {
        assert!(CREATE_TABLE.is_match(
            "create table T (id UInt32, name String) ENGINE = HDFS('hdfs://h:9000/p', 'TSV')"
        ));
        assert!(SELECT_TABLE_FUNCTION.is_match(
            "select * from hdfs('hdfs://h:9000/p', 'TSV', 'id UInt64, text String')"
        ));
        assert!(SELECT_TABLE.is_match("SELECT * FROM T"));
        assert!(!SELECT_TABLE.is_match("select * from hdfs('x')"));
    }

    #[test]
    fn test_escape_tsv() {
        assert_eq!(escape_tsv("a\tb\nc\\"), "a\\tb\\nc\\\\");
    }
}
