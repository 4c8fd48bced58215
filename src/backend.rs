//! Collaborator boundary: SQL binding, routing and execution live behind [`Backend`].
//! The wire front end only sees statement metadata, result handles and affected-row counts.

pub mod memory;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BackendError, ProxyError, ProxyResult};
use crate::types::{ColumnType, Value};

pub use memory::MemoryBackend;

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Query,
    Insert,
    Update,
    Delete,
    /// Session variable assignments, in statement order.
    Set(Vec<(String, String)>),
    Empty,
    Other(String),
}

impl StatementKind {
    pub fn returns_rows(&self) -> bool { matches!(self, StatementKind::Query) }

    pub fn is_dml(&self) -> bool { matches!(self, StatementKind::Insert | StatementKind::Update | StatementKind::Delete) }

    pub fn command_tag(&self, rows: u64) -> String {
        match self {
            StatementKind::Query => format!("SELECT {}", rows),
            StatementKind::Insert => format!("INSERT 0 {}", rows),
            StatementKind::Update => format!("UPDATE {}", rows),
            StatementKind::Delete => format!("DELETE {}", rows),
            StatementKind::Set(_) => "SET".to_string(),
            StatementKind::Empty => String::new(),
            StatementKind::Other(tag) => tag.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescription {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDescription {
    pub fn new<S: Into<String>>(name: S, column_type: ColumnType) -> Self {
        ColumnDescription { name: name.into(), column_type }
    }
}

/// Result of binding SQL text: what kind of statement it is, what it takes and what it returns.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementContext {
    pub sql: String,
    pub kind: StatementKind,
    /// Inferred parameter types, `Unspecified` where the backend could not tell.
    pub param_types: Vec<ColumnType>,
    pub columns: Vec<ColumnDescription>,
}

/// One physical destination of a routed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteUnit {
    pub destination: String,
    pub sql: String,
    pub params: Vec<Value>,
}

/// Parameter tuples accumulated for one destination, executed in one round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchExecutionUnit {
    pub destination: String,
    pub sql: String,
    pub param_sets: Vec<Vec<Value>>,
}

impl BatchExecutionUnit {
    pub fn new(destination: String, sql: String) -> Self { BatchExecutionUnit { destination, sql, param_sets: Vec::new() } }
}

/// Open backend cursor. Rows come back in backend order.
pub trait ResultHandle: Send {
    fn columns(&self) -> &[ColumnDescription];
    fn has_next(&mut self) -> ProxyResult<bool>;
    fn next_row(&mut self) -> ProxyResult<Vec<Value>>;
    /// Release the cursor. Calling it twice is a no-op.
    fn close(&mut self);
}

pub trait Backend: Send + Sync {
    fn prepare(&self, sql: &str) -> ProxyResult<StatementContext>;
    fn execute_query(&self, ctx: &StatementContext, params: &[Value]) -> ProxyResult<Box<dyn ResultHandle>>;
    fn execute_update(&self, ctx: &StatementContext, params: &[Value]) -> ProxyResult<u64>;
    fn route(&self, ctx: &StatementContext, params: &[Value]) -> ProxyResult<Vec<RouteUnit>>;
    /// One affected count per accumulated parameter tuple.
    fn execute_batch(&self, unit: &BatchExecutionUnit) -> ProxyResult<Vec<i64>>;
}

pub type SharedBackend = Arc<dyn Backend>;

static PLACEHOLDER_RE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"\$([0-9]+)"));
static SET_RE: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"(?is)^SET\s+(?:SESSION\s+|LOCAL\s+)?(.+)$"));

fn compiled(re: &'static Result<Regex, regex::Error>) -> ProxyResult<&'static Regex> {
    re.as_ref().map_err(|e| ProxyError::protocol(format!("invalid pattern: {}", e)))
}

/// Highest `$n` placeholder referenced by the statement.
pub fn placeholder_count(sql: &str) -> ProxyResult<usize> {
    let re = compiled(&PLACEHOLDER_RE)?;
    Ok(re.captures_iter(sql).filter_map(|c| c[1].parse::<usize>().ok()).max().unwrap_or(0))
}

fn unquote(v: &str) -> String {
    let v = v.trim();
    v.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| v.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(v)
        .to_string()
}

fn parse_assignments(sql: &str, body: &str) -> ProxyResult<Vec<(String, String)>> {
    body.split(',')
        .map(|part| -> ProxyResult<(String, String)> {
            let part = part.trim();
            let (name, value) = part
                .split_once('=')
                .or_else(|| {
                    let lower = part.to_ascii_lowercase();
                    lower.find(" to ").map(|pos| (&part[..pos], &part[pos + 4..]))
                })
                .ok_or_else(|| BackendError::new("42601".to_string(), format!("syntax error in \"{}\"", sql)))?;
            Ok((name.trim().to_string(), unquote(value)))
        })
        .collect()
}

/// Leading-keyword classification for statements the backend has no binding for.
pub fn classify(sql: &str) -> ProxyResult<StatementKind> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Ok(StatementKind::Empty);
    }
    let keyword = trimmed.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
    Ok(match keyword.as_str() {
        "SELECT" | "WITH" | "SHOW" | "VALUES" => StatementKind::Query,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "SET" => {
            let re = compiled(&SET_RE)?;
            let body = re.captures(trimmed).and_then(|c| c.get(1)).map(|m| m.as_str()).unwrap_or_default();
            StatementKind::Set(parse_assignments(trimmed, body)?)
        }
        "BEGIN" | "START" => StatementKind::Other("BEGIN".to_string()),
        "COMMIT" | "END" => StatementKind::Other("COMMIT".to_string()),
        "ROLLBACK" | "ABORT" => StatementKind::Other("ROLLBACK".to_string()),
        _ => {
            let mut words = trimmed.split_whitespace().take(2).map(|w| w.to_ascii_uppercase());
            match (words.next(), words.next()) {
                (Some(a), Some(b)) if matches!(a.as_str(), "CREATE" | "DROP" | "ALTER") => StatementKind::Other(format!("{} {}", a, b)),
                (Some(a), _) => StatementKind::Other(a),
                _ => StatementKind::Other(keyword),
            }
        }
    })
}
