//! Bound, executable statement instance with its own cursor and result formats.
//!
//! States: `Created -> Bound -> (Suspended <-> Bound)* -> Completed -> Closed`.
//! A row-producing portal opens its backend cursor on bind and keeps it open while suspended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, ColumnDescription, ResultHandle, StatementKind};
use crate::error::{ProxyError, ProxyResult};
use crate::pgwire_server::send::{BackendMessage, FieldDescription};
use crate::pgwire_server::statement::PreparedStatement;
use crate::types::{FormatCode, TypeRegistry, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalState {
    Created,
    Bound,
    Suspended,
    Completed,
    Closed,
}

pub struct Portal {
    name: String,
    statement: Arc<PreparedStatement>,
    params: Vec<Value>,
    result_formats: Vec<FormatCode>,
    state: PortalState,
    handle: Option<Box<dyn ResultHandle>>,
    columns: Vec<ColumnDescription>,
    cancel: Arc<AtomicBool>,
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("name", &self.name)
            .field("statement", &self.statement.name)
            .field("state", &self.state)
            .field("cursor_open", &self.handle.is_some())
            .finish()
    }
}

impl Portal {
    pub fn new(
        name: String,
        statement: Arc<PreparedStatement>,
        params: Vec<Value>,
        result_formats: Vec<FormatCode>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let columns = statement.ctx.columns.clone();
        Portal { name, statement, params, result_formats, state: PortalState::Created, handle: None, columns, cancel }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn state(&self) -> PortalState { self.state }

    pub fn statement(&self) -> &Arc<PreparedStatement> { &self.statement }

    /// Open the backend cursor for row-producing statements; other statements run on execute.
    pub fn bind(&mut self, backend: &dyn Backend) -> ProxyResult<()> {
        if self.state != PortalState::Created {
            return Err(ProxyError::illegal_state(format!("portal \"{}\" is already bound", self.name)));
        }
        if self.statement.ctx.kind.returns_rows() {
            let handle = backend.execute_query(&self.statement.ctx, &self.params)?;
            if !handle.columns().is_empty() {
                self.columns = handle.columns().to_vec();
            }
            self.handle = Some(handle);
        }
        self.state = PortalState::Bound;
        Ok(())
    }

    fn fields(&self) -> Vec<FieldDescription> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| FieldDescription::from_column(c, FormatCode::for_column(&self.result_formats, i)))
            .collect()
    }

    /// RowDescription with the negotiated format per column, or NoData.
    pub fn describe(&self) -> ProxyResult<BackendMessage> {
        match self.state {
            PortalState::Created => Err(ProxyError::illegal_state("cannot describe before bind")),
            PortalState::Closed => Err(ProxyError::illegal_state(format!("portal \"{}\" is closed", self.name))),
            _ if self.statement.ctx.kind.returns_rows() => Ok(BackendMessage::RowDescription(self.fields())),
            _ => Ok(BackendMessage::NoData),
        }
    }

    fn encode_row(&self, row: &[Value]) -> ProxyResult<BackendMessage> {
        if row.len() != self.columns.len() {
            return Err(ProxyError::protocol(format!("backend row has {} values, expected {}", row.len(), self.columns.len())));
        }
        let registry = TypeRegistry::global();
        let cells = row
            .iter()
            .zip(self.columns.iter())
            .enumerate()
            .map(|(i, (v, col))| {
                registry.codec_for_type(col.column_type)?.encode_cell(v, FormatCode::for_column(&self.result_formats, i))
            })
            .collect::<ProxyResult<Vec<_>>>()?;
        Ok(BackendMessage::DataRow(cells))
    }

    /// Pull up to `max_rows` rows (all when `max_rows <= 0`). Responses are appended to `out` as
    /// they are produced; on error the cursor is released and the error returned.
    pub fn execute(&mut self, backend: &dyn Backend, max_rows: i32, out: &mut Vec<BackendMessage>) -> ProxyResult<()> {
        match self.state {
            PortalState::Created => return Err(ProxyError::illegal_state(format!("portal \"{}\" is not bound", self.name))),
            PortalState::Closed => return Err(ProxyError::illegal_state(format!("portal \"{}\" is closed", self.name))),
            PortalState::Completed => {
                out.push(match self.statement.ctx.kind {
                    StatementKind::Empty => BackendMessage::EmptyQueryResponse,
                    ref kind => BackendMessage::CommandComplete(kind.command_tag(0)),
                });
                return Ok(());
            }
            PortalState::Bound | PortalState::Suspended => {}
        }
        let statement = self.statement.clone();
        let result = match &statement.ctx.kind {
            StatementKind::Empty => {
                out.push(BackendMessage::EmptyQueryResponse);
                Ok(())
            }
            StatementKind::Query => self.fetch(max_rows, out),
            StatementKind::Set(assignments) => backend.execute_update(&statement.ctx, &self.params).map(|_| {
                out.push(BackendMessage::CommandComplete("SET".to_string()));
                for (name, value) in assignments {
                    out.push(BackendMessage::ParameterStatus { name: name.clone(), value: value.clone() });
                }
            }),
            kind => backend
                .execute_update(&statement.ctx, &self.params)
                .map(|n| out.push(BackendMessage::CommandComplete(kind.command_tag(n)))),
        };
        match result {
            Ok(()) => {
                if self.state != PortalState::Suspended {
                    self.release();
                    self.state = PortalState::Completed;
                }
                Ok(())
            }
            Err(e) => {
                debug!(target: "pgwire", "portal '{}' failed: {}", self.name, e);
                self.release();
                self.state = PortalState::Completed;
                Err(e)
            }
        }
    }

    fn fetch(&mut self, max_rows: i32, out: &mut Vec<BackendMessage>) -> ProxyResult<()> {
        let limit = if max_rows <= 0 { u64::MAX } else { max_rows as u64 };
        let mut sent = 0u64;
        loop {
            if self.cancel.swap(false, Ordering::SeqCst) {
                return Err(ProxyError::Cancelled);
            }
            let handle = self.handle.as_mut().ok_or_else(|| ProxyError::illegal_state("portal cursor is not open"))?;
            if !handle.has_next()? {
                break;
            }
            if sent == limit {
                self.state = PortalState::Suspended;
                out.push(BackendMessage::PortalSuspended);
                debug!(target: "pgwire", "portal '{}' suspended after {} rows", self.name, sent);
                return Ok(());
            }
            let row = handle.next_row()?;
            out.push(self.encode_row(&row)?);
            sent += 1;
        }
        self.state = PortalState::Bound;
        out.push(BackendMessage::CommandComplete(StatementKind::Query.command_tag(sent)));
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut h) = self.handle.take() {
            h.close();
        }
    }

    /// Release the backend cursor. Valid in any state, repeated calls are no-ops.
    pub fn close(&mut self) {
        self.release();
        self.state = PortalState::Closed;
    }
}

impl Drop for Portal {
    fn drop(&mut self) { self.release(); }
}
