//! Scripted in-memory backend. Statements are matched on normalized SQL text; anything not
//! scripted is classified by leading keyword. DML fans out over the configured destinations.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::backend::{
    classify, placeholder_count, Backend, BatchExecutionUnit, ColumnDescription, ResultHandle, RouteUnit, StatementContext,
    StatementKind,
};
use crate::error::{BackendError, ProxyError, ProxyResult};
use crate::types::{ColumnType, TypeRegistry, Value};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureFile {
    #[serde(default)]
    pub destinations: Vec<String>,
    #[serde(default)]
    pub statements: Vec<StatementFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatementFixture {
    pub sql: String,
    #[serde(default)]
    pub param_types: Vec<String>,
    #[serde(default)]
    pub columns: Vec<ColumnFixture>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Affected rows per parameter tuple per destination, default 1.
    #[serde(default)]
    pub affected: Option<u64>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub error: Option<BackendError>,
    #[serde(default)]
    pub fail_destination: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnFixture {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone)]
struct Script {
    ctx: StatementContext,
    rows: Vec<Vec<Value>>,
    affected: u64,
    broadcast: bool,
    error: Option<BackendError>,
    fail_destination: Option<String>,
}

fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ").trim_end_matches(';').trim_end().to_string()
}

fn type_named(name: &str) -> Result<ColumnType> {
    ColumnType::from_name(name).ok_or_else(|| anyhow!("unknown column type '{}' in fixture", name))
}

/// Convert a fixture cell into a typed value through the column's text codec.
fn json_to_value(t: ColumnType, v: &serde_json::Value) -> ProxyResult<Value> {
    match (v, t.element()) {
        (serde_json::Value::Null, _) => Ok(Value::Null),
        (serde_json::Value::Array(items), Some(elem)) => {
            items.iter().map(|i| json_to_value(elem, i)).collect::<ProxyResult<Vec<_>>>().map(Value::Array)
        }
        (serde_json::Value::String(s), _) => TypeRegistry::global().codec_for_type(t)?.parse_text(s),
        (other, _) => TypeRegistry::global().codec_for_type(t)?.parse_text(&other.to_string()),
    }
}

struct MemoryResult {
    columns: Vec<ColumnDescription>,
    rows: VecDeque<Vec<Value>>,
    open: Option<Arc<AtomicUsize>>,
}

impl ResultHandle for MemoryResult {
    fn columns(&self) -> &[ColumnDescription] { &self.columns }

    fn has_next(&mut self) -> ProxyResult<bool> {
        if self.open.is_none() {
            return Err(ProxyError::illegal_state("result handle is closed"));
        }
        Ok(!self.rows.is_empty())
    }

    fn next_row(&mut self) -> ProxyResult<Vec<Value>> {
        if self.open.is_none() {
            return Err(ProxyError::illegal_state("result handle is closed"));
        }
        self.rows.pop_front().ok_or_else(|| ProxyError::illegal_state("no more rows"))
    }

    fn close(&mut self) {
        if let Some(open) = self.open.take() {
            open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryResult {
    fn drop(&mut self) { self.close(); }
}

pub struct MemoryBackend {
    destinations: Vec<String>,
    scripts: HashMap<String, Script>,
    open_handles: Arc<AtomicUsize>,
    batches: Mutex<Vec<BatchExecutionUnit>>,
    updates: Mutex<Vec<(String, Vec<Value>)>>,
}

impl Default for MemoryBackend {
    fn default() -> Self { MemoryBackend::new(vec!["ds_0".to_string()]) }
}

impl MemoryBackend {
    pub fn new(destinations: Vec<String>) -> Self {
        let destinations = if destinations.is_empty() { vec!["ds_0".to_string()] } else { destinations };
        MemoryBackend {
            destinations,
            scripts: HashMap::new(),
            open_handles: Arc::new(AtomicUsize::new(0)),
            batches: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fixtures(fixtures: FixtureFile) -> Result<Self> {
        let mut backend = MemoryBackend::new(fixtures.destinations);
        for st in fixtures.statements {
            let columns = st
                .columns
                .iter()
                .map(|c| -> Result<ColumnDescription> { Ok(ColumnDescription::new(c.name.clone(), type_named(&c.type_name)?)) })
                .collect::<Result<Vec<_>>>()?;
            let rows = st
                .rows
                .iter()
                .map(|row| {
                    if row.len() != columns.len() {
                        return Err(anyhow!("fixture row has {} cells, expected {} for '{}'", row.len(), columns.len(), st.sql));
                    }
                    row.iter()
                        .zip(columns.iter())
                        .map(|(cell, col)| json_to_value(col.column_type, cell).map_err(|e| anyhow!("{}: {}", st.sql, e)))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            let param_types = st.param_types.iter().map(|t| type_named(t)).collect::<Result<Vec<_>>>()?;
            let mut script = backend.script_for(&st.sql, param_types, columns)?;
            script.rows = rows;
            script.affected = st.affected.unwrap_or(1);
            script.broadcast = st.broadcast;
            script.error = st.error;
            script.fail_destination = st.fail_destination;
            backend.scripts.insert(normalize_sql(&st.sql), script);
        }
        Ok(backend)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading fixtures {}", path.display()))?;
        let fixtures: FixtureFile = serde_json::from_str(&text).with_context(|| format!("parsing fixtures {}", path.display()))?;
        debug!("loaded {} fixture statements from {}", fixtures.statements.len(), path.display());
        MemoryBackend::from_fixtures(fixtures)
    }

    fn script_for(&self, sql: &str, param_types: Vec<ColumnType>, columns: Vec<ColumnDescription>) -> Result<Script> {
        let kind = classify(sql).map_err(|e| anyhow!("{}", e))?;
        let count = placeholder_count(sql).map_err(|e| anyhow!("{}", e))?;
        let mut param_types = param_types;
        if param_types.len() < count {
            param_types.resize(count, ColumnType::Unspecified);
        }
        Ok(Script {
            ctx: StatementContext { sql: sql.to_string(), kind, param_types, columns },
            rows: Vec::new(),
            affected: 1,
            broadcast: false,
            error: None,
            fail_destination: None,
        })
    }

    /// Script a row-returning statement.
    pub fn with_query(mut self, sql: &str, param_types: Vec<ColumnType>, columns: Vec<ColumnDescription>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut script = self.script_for(sql, param_types, columns)?;
        script.ctx.kind = StatementKind::Query;
        script.rows = rows;
        self.scripts.insert(normalize_sql(sql), script);
        Ok(self)
    }

    /// Script a DML statement that reports `affected` rows per tuple per destination.
    pub fn with_update(mut self, sql: &str, param_types: Vec<ColumnType>, affected: u64, broadcast: bool) -> Result<Self> {
        let mut script = self.script_for(sql, param_types, Vec::new())?;
        script.affected = affected;
        script.broadcast = broadcast;
        self.scripts.insert(normalize_sql(sql), script);
        Ok(self)
    }

    pub fn with_error(mut self, sql: &str, error: BackendError) -> Result<Self> {
        let mut script = self.script_for(sql, Vec::new(), Vec::new())?;
        script.error = Some(error);
        self.scripts.insert(normalize_sql(sql), script);
        Ok(self)
    }

    /// Make batch execution on `destination` fail for an already scripted `sql`.
    pub fn with_failing_destination(mut self, sql: &str, destination: &str) -> Result<Self> {
        let script = self
            .scripts
            .get_mut(&normalize_sql(sql))
            .ok_or_else(|| anyhow!("no script for '{}'", sql))?;
        script.fail_destination = Some(destination.to_string());
        Ok(self)
    }

    pub fn destinations(&self) -> &[String] { &self.destinations }

    /// Result handles currently open.
    pub fn open_handles(&self) -> usize { self.open_handles.load(Ordering::SeqCst) }

    pub fn executed_batches(&self) -> Vec<BatchExecutionUnit> { self.batches.lock().clone() }

    pub fn executed_updates(&self) -> Vec<(String, Vec<Value>)> { self.updates.lock().clone() }

    fn script(&self, sql: &str) -> Option<&Script> { self.scripts.get(&normalize_sql(sql)) }

    fn check_error(&self, sql: &str) -> ProxyResult<()> {
        match self.script(sql).and_then(|s| s.error.clone()) {
            Some(e) => Err(ProxyError::Backend(e)),
            None => Ok(()),
        }
    }
}

impl Backend for MemoryBackend {
    fn prepare(&self, sql: &str) -> ProxyResult<StatementContext> {
        if let Some(script) = self.script(sql) {
            return Ok(script.ctx.clone());
        }
        let kind = classify(sql)?;
        let count = placeholder_count(sql)?;
        Ok(StatementContext { sql: sql.to_string(), kind, param_types: vec![ColumnType::Unspecified; count], columns: Vec::new() })
    }

    fn execute_query(&self, ctx: &StatementContext, params: &[Value]) -> ProxyResult<Box<dyn ResultHandle>> {
        self.check_error(&ctx.sql)?;
        let script = self.script(&ctx.sql).ok_or_else(|| {
            BackendError::new("42P01".to_string(), format!("no relation is scripted for \"{}\"", normalize_sql(&ctx.sql)))
        })?;
        debug!("memory backend query '{}' params={:?} rows={}", ctx.sql, params, script.rows.len());
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryResult {
            columns: script.ctx.columns.clone(),
            rows: script.rows.iter().cloned().collect(),
            open: Some(self.open_handles.clone()),
        }))
    }

    fn execute_update(&self, ctx: &StatementContext, params: &[Value]) -> ProxyResult<u64> {
        self.check_error(&ctx.sql)?;
        let units = self.route(ctx, params)?;
        let per_unit = self.script(&ctx.sql).map(|s| s.affected).unwrap_or(1);
        self.updates.lock().push((ctx.sql.clone(), params.to_vec()));
        Ok(if ctx.kind.is_dml() { per_unit * units.len() as u64 } else { 0 })
    }

    fn route(&self, ctx: &StatementContext, params: &[Value]) -> ProxyResult<Vec<RouteUnit>> {
        let broadcast = self.script(&ctx.sql).map(|s| s.broadcast).unwrap_or(false);
        let targets: Vec<&String> = if broadcast {
            self.destinations.iter().collect()
        } else {
            let key = params.iter().find_map(Value::as_i64).unwrap_or(0);
            let idx = key.rem_euclid(self.destinations.len() as i64) as usize;
            self.destinations.get(idx).into_iter().collect()
        };
        Ok(targets
            .into_iter()
            .map(|d| RouteUnit { destination: d.clone(), sql: ctx.sql.clone(), params: params.to_vec() })
            .collect())
    }

    fn execute_batch(&self, unit: &BatchExecutionUnit) -> ProxyResult<Vec<i64>> {
        self.check_error(&unit.sql)?;
        let script = self.script(&unit.sql);
        if script.and_then(|s| s.fail_destination.as_deref()) == Some(unit.destination.as_str()) {
            return Err(BackendError::new("08006".to_string(), format!("destination {} is unavailable", unit.destination)).into());
        }
        let affected = script.map(|s| s.affected).unwrap_or(1) as i64;
        debug!("memory backend batch on {} with {} tuples", unit.destination, unit.param_sets.len());
        self.batches.lock().push(unit.clone());
        Ok(vec![affected; unit.param_sets.len()])
    }
}
