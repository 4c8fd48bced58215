//! Per-connection protocol state: prepared statements, portals, error recovery and the
//! buffered extended-query cycle. Transport-free; the listener feeds decoded messages in and
//! writes the returned backend messages out.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::backend::{SharedBackend, StatementKind};
use crate::error::{ProxyError, ProxyResult};
use crate::pgwire_server::batch::BatchExecutor;
use crate::pgwire_server::cancel::CancelHandle;
use crate::pgwire_server::messages::{BindMessage, DescribeTarget, FrontendMessage, ParseMessage};
use crate::pgwire_server::portal::{Portal, PortalState};
use crate::pgwire_server::send::{BackendMessage, FieldDescription};
use crate::pgwire_server::statement::{PreparedStatement, PreparedStatementRegistry};
use crate::types::{FormatCode, TypeRegistry, Value};

pub struct Session {
    backend: SharedBackend,
    statements: PreparedStatementRegistry,
    portals: HashMap<String, Portal>,
    /// Extended-protocol messages waiting for Sync or Flush.
    pending: Vec<FrontendMessage>,
    in_error: bool,
    in_transaction: bool,
    /// Between ReadyForQuery and the next message; cancel requests seen here are stale.
    idle: bool,
    cancel: CancelHandle,
}

/// A buffered run that can go to the backend as one batch.
struct BatchShape<'a> {
    parse: Option<&'a ParseMessage>,
    /// Bind of each group and whether the group described its portal.
    groups: Vec<(&'a BindMessage, bool)>,
}

fn batch_shape(pending: &[FrontendMessage]) -> Option<BatchShape<'_>> {
    let mut iter = pending.iter().peekable();
    let parse = match iter.peek() {
        Some(FrontendMessage::Parse(p)) => {
            iter.next();
            Some(p)
        }
        _ => None,
    };
    let mut statement: Option<&str> = parse.map(|p| p.name.as_str());
    let mut groups = Vec::new();
    while let Some(msg) = iter.next() {
        let FrontendMessage::Bind(bind) = msg else { return None };
        if !bind.portal.is_empty() {
            return None;
        }
        match statement {
            Some(s) if s != bind.statement => return None,
            Some(_) => {}
            None => statement = Some(&bind.statement),
        }
        let describe = matches!(iter.peek(), Some(FrontendMessage::Describe { target: DescribeTarget::Portal, name }) if name.is_empty());
        if describe {
            iter.next();
        }
        match iter.next() {
            Some(FrontendMessage::Execute { portal, .. }) if portal.is_empty() => groups.push((bind, describe)),
            _ => return None,
        }
    }
    (groups.len() >= 2).then_some(BatchShape { parse, groups })
}

impl Session {
    pub fn new(backend: SharedBackend) -> Self {
        Session {
            backend,
            statements: PreparedStatementRegistry::new(),
            portals: HashMap::new(),
            pending: Vec::new(),
            in_error: false,
            in_transaction: false,
            idle: true,
            cancel: CancelHandle::register(),
        }
    }

    pub fn process_id(&self) -> i32 { self.cancel.process_id() }

    pub fn secret_key(&self) -> i32 { self.cancel.secret_key() }

    pub fn in_transaction(&self) -> bool { self.in_transaction }

    pub fn open_portals(&self) -> usize { self.portals.values().filter(|p| p.state() != PortalState::Closed).count() }

    pub fn statement_count(&self) -> usize { self.statements.len() }

    /// Feed one frontend message; returns what must be written back, possibly nothing.
    pub fn handle(&mut self, msg: FrontendMessage) -> Vec<BackendMessage> {
        let mut out = Vec::new();
        if self.idle {
            self.cancel.flag().store(false, Ordering::SeqCst);
            self.idle = false;
        }
        match msg {
            FrontendMessage::Sync => {
                self.flush(&mut out);
                self.ready(&mut out);
            }
            FrontendMessage::Flush => self.flush(&mut out),
            FrontendMessage::Query(sql) => {
                self.flush(&mut out);
                if let Err(e) = self.simple_query(&sql, &mut out) {
                    warn!(target: "pgwire", "simple query failed: {}", e);
                    out.push(BackendMessage::error(&e));
                }
                self.ready(&mut out);
            }
            FrontendMessage::Terminate => self.close_all(),
            other => self.pending.push(other),
        }
        out
    }

    /// Reply for a message that could not even be decoded: same recovery as any other error.
    pub fn protocol_error(&mut self, err: &ProxyError) -> Vec<BackendMessage> {
        let mut out = Vec::new();
        self.flush(&mut out);
        if !self.in_error {
            out.push(BackendMessage::error(err));
            self.in_error = true;
        }
        out
    }

    /// Release every backend cursor and forget all statements.
    pub fn close_all(&mut self) {
        self.pending.clear();
        self.close_portals();
        self.statements.clear();
    }

    fn close_portals(&mut self) {
        for (_, mut portal) in self.portals.drain() {
            portal.close();
        }
    }

    /// End of a query cycle. Outside an explicit transaction every portal is closed; explicitly
    /// closed portals are forgotten either way.
    fn ready(&mut self, out: &mut Vec<BackendMessage>) {
        if self.in_transaction {
            self.portals.retain(|_, p| p.state() != PortalState::Closed);
        } else {
            self.close_portals();
        }
        self.in_error = false;
        self.idle = true;
        out.push(BackendMessage::ReadyForQuery(if self.in_transaction { b'T' } else { b'I' }));
    }

    fn flush(&mut self, out: &mut Vec<BackendMessage>) {
        let pending = std::mem::take(&mut self.pending);
        let mut start = 0;
        if !self.in_error {
            if let Some(shape) = batch_shape(&pending) {
                if let Some(parse) = shape.parse {
                    self.dispatch_parse(parse, out);
                    start = 1;
                }
                if self.in_error || self.try_batch(&shape.groups, out) {
                    return;
                }
            }
        }
        for msg in &pending[start..] {
            if self.in_error {
                debug!(target: "pgwire", "discarding {} until Sync", msg.name());
                continue;
            }
            if let Err(e) = self.process(msg, out) {
                warn!(target: "pgwire", "{} failed: {}", msg.name(), e);
                out.push(BackendMessage::error(&e));
                self.in_error = true;
            }
        }
    }

    fn dispatch_parse(&mut self, parse: &ParseMessage, out: &mut Vec<BackendMessage>) {
        if let Err(e) = self.parse(parse, out) {
            warn!(target: "pgwire", "Parse failed: {}", e);
            out.push(BackendMessage::error(&e));
            self.in_error = true;
        }
    }

    fn process(&mut self, msg: &FrontendMessage, out: &mut Vec<BackendMessage>) -> ProxyResult<()> {
        match msg {
            FrontendMessage::Parse(p) => self.parse(p, out),
            FrontendMessage::Bind(b) => self.bind(b, out),
            FrontendMessage::Describe { target: DescribeTarget::Statement, name } => {
                let stmt = self.statements.get(name)?;
                out.push(BackendMessage::ParameterDescription(stmt.param_oids()));
                out.push(if stmt.ctx.kind.returns_rows() {
                    BackendMessage::RowDescription(
                        stmt.ctx.columns.iter().map(|c| FieldDescription::from_column(c, FormatCode::Text)).collect(),
                    )
                } else {
                    BackendMessage::NoData
                });
                Ok(())
            }
            FrontendMessage::Describe { target: DescribeTarget::Portal, name } => {
                let portal = self.portals.get(name).ok_or_else(|| ProxyError::UnknownPortal(name.clone()))?;
                out.push(portal.describe()?);
                Ok(())
            }
            FrontendMessage::Execute { portal, max_rows } => self.execute(portal, *max_rows, out),
            FrontendMessage::Close { target, name } => {
                match target {
                    DescribeTarget::Statement => {
                        self.statements.remove(name);
                    }
                    // kept as Closed until ReadyForQuery so a later Execute is an illegal state
                    DescribeTarget::Portal => {
                        if let Some(p) = self.portals.get_mut(name) {
                            p.close();
                        }
                    }
                }
                out.push(BackendMessage::CloseComplete);
                Ok(())
            }
            other => Err(ProxyError::protocol(format!("unexpected {} in extended query cycle", other.name()))),
        }
    }

    fn parse(&mut self, p: &ParseMessage, out: &mut Vec<BackendMessage>) -> ProxyResult<()> {
        let ctx = self.backend.prepare(&p.sql)?;
        let stmt = PreparedStatement::new(p.name.clone(), ctx, &p.param_types)?;
        debug!(target: "pgwire", "parsed '{}' with {} params: {}", p.name, stmt.param_types.len(), p.sql);
        self.statements.register(stmt)?;
        out.push(BackendMessage::ParseComplete);
        Ok(())
    }

    fn decode_params(stmt: &PreparedStatement, bind: &BindMessage) -> ProxyResult<Vec<Value>> {
        if bind.params.len() != stmt.param_types.len() {
            return Err(ProxyError::protocol(format!(
                "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                bind.params.len(),
                stmt.name,
                stmt.param_types.len()
            )));
        }
        let registry = TypeRegistry::global();
        bind.params
            .iter()
            .zip(stmt.param_types.iter())
            .enumerate()
            .map(|(i, (raw, t))| registry.codec_for_type(*t)?.read_param(raw.as_deref(), bind.param_format(i)?))
            .collect()
    }

    fn bind(&mut self, b: &BindMessage, out: &mut Vec<BackendMessage>) -> ProxyResult<()> {
        let stmt = self.statements.get(&b.statement)?;
        if !b.portal.is_empty() && self.portals.get(&b.portal).is_some_and(|p| p.state() != PortalState::Closed) {
            return Err(ProxyError::DuplicatePortal(b.portal.clone()));
        }
        let params = Self::decode_params(&stmt, b)?;
        if let Some(mut old) = self.portals.remove(&b.portal) {
            old.close();
        }
        let mut portal = Portal::new(b.portal.clone(), stmt, params, b.result_formats.clone(), self.cancel.flag());
        portal.bind(&*self.backend)?;
        self.portals.insert(b.portal.clone(), portal);
        out.push(BackendMessage::BindComplete);
        Ok(())
    }

    fn execute(&mut self, name: &str, max_rows: i32, out: &mut Vec<BackendMessage>) -> ProxyResult<()> {
        let portal = self.portals.get_mut(name).ok_or_else(|| ProxyError::UnknownPortal(name.to_string()))?;
        portal.execute(&*self.backend, max_rows, out)?;
        let kind = portal.statement().ctx.kind.clone();
        self.track_transaction(&kind);
        Ok(())
    }

    fn track_transaction(&mut self, kind: &StatementKind) {
        if let StatementKind::Other(tag) = kind {
            match tag.as_str() {
                "BEGIN" => self.in_transaction = true,
                "COMMIT" | "ROLLBACK" => self.in_transaction = false,
                _ => {}
            }
        }
    }

    /// Run a buffered Bind/Execute run as one batch. Returns false when the run does not qualify
    /// and must be replayed message by message.
    fn try_batch(&mut self, groups: &[(&BindMessage, bool)], out: &mut Vec<BackendMessage>) -> bool {
        let Some((first, _)) = groups.first() else { return false };
        let Ok(stmt) = self.statements.get(&first.statement) else { return false };
        if !stmt.ctx.kind.is_dml() {
            return false;
        }
        let mut param_sets = Vec::with_capacity(groups.len());
        for (bind, _) in groups {
            match Self::decode_params(&stmt, bind) {
                Ok(params) => param_sets.push(params),
                Err(_) => return false,
            }
        }
        if let Some(mut old) = self.portals.remove("") {
            old.close();
        }
        match BatchExecutor::new(&*self.backend, &stmt.ctx, param_sets).execute() {
            Ok(outcome) => {
                debug!(target: "pgwire", "batched {} executions of '{}', {} rows total", groups.len(), stmt.name, outcome.total);
                for ((_, describe), count) in groups.iter().zip(outcome.per_tuple) {
                    out.push(BackendMessage::BindComplete);
                    if *describe {
                        out.push(BackendMessage::NoData);
                    }
                    out.push(BackendMessage::CommandComplete(stmt.ctx.kind.command_tag(count.max(0) as u64)));
                }
            }
            Err(e) => {
                warn!(target: "pgwire", "batch of '{}' failed: {}", stmt.name, e);
                out.push(BackendMessage::error(&e));
                self.in_error = true;
            }
        }
        true
    }

    fn simple_query(&mut self, sql: &str, out: &mut Vec<BackendMessage>) -> ProxyResult<()> {
        debug!(target: "pgwire", "simple query: {}", sql);
        if sql.trim().trim_end_matches(';').trim().is_empty() {
            out.push(BackendMessage::EmptyQueryResponse);
            return Ok(());
        }
        let ctx = self.backend.prepare(sql)?;
        let stmt = self.statements.register(PreparedStatement::new(String::new(), ctx, &[])?)?;
        if let Some(mut old) = self.portals.remove("") {
            old.close();
        }
        let mut portal = Portal::new(String::new(), stmt, Vec::new(), Vec::new(), self.cancel.flag());
        portal.bind(&*self.backend)?;
        if portal.statement().ctx.kind.returns_rows() {
            out.push(portal.describe()?);
        }
        portal.execute(&*self.backend, 0, out)?;
        let kind = portal.statement().ctx.kind.clone();
        self.track_transaction(&kind);
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) { self.close_all(); }
}
