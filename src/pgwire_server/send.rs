use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::backend::ColumnDescription;
use crate::error::ProxyError;
use crate::types::FormatCode;

/// One RowDescription field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: i32,
    pub type_size: i16,
    pub format: FormatCode,
}

impl FieldDescription {
    pub fn from_column(col: &ColumnDescription, format: FormatCode) -> Self {
        FieldDescription {
            name: col.name.clone(),
            type_oid: col.column_type.oid(),
            type_size: col.column_type.type_size(),
            format,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    AuthenticationOk,
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery(u8),
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    ParameterDescription(Vec<i32>),
    RowDescription(Vec<FieldDescription>),
    /// Encoded cells, `None` for NULL.
    DataRow(Vec<Option<Vec<u8>>>),
    CommandComplete(String),
    PortalSuspended,
    EmptyQueryResponse,
    ErrorResponse { severity: &'static str, code: String, message: String, detail: Option<String> },
}

fn cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

impl BackendMessage {
    pub fn error(err: &ProxyError) -> BackendMessage {
        let (code, severity, message) = err.pgwire_fields();
        BackendMessage::ErrorResponse { severity, code, message, detail: err.detail().map(str::to_string) }
    }

    pub fn tag(&self) -> u8 {
        match self {
            BackendMessage::AuthenticationOk => b'R',
            BackendMessage::ParameterStatus { .. } => b'S',
            BackendMessage::BackendKeyData { .. } => b'K',
            BackendMessage::ReadyForQuery(_) => b'Z',
            BackendMessage::ParseComplete => b'1',
            BackendMessage::BindComplete => b'2',
            BackendMessage::CloseComplete => b'3',
            BackendMessage::NoData => b'n',
            BackendMessage::ParameterDescription(_) => b't',
            BackendMessage::RowDescription(_) => b'T',
            BackendMessage::DataRow(_) => b'D',
            BackendMessage::CommandComplete(_) => b'C',
            BackendMessage::PortalSuspended => b's',
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::ErrorResponse { .. } => b'E',
        }
    }

    /// Append the full frame (tag, length, payload).
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::new();
        match self {
            BackendMessage::AuthenticationOk => payload.extend_from_slice(&0i32.to_be_bytes()),
            BackendMessage::ParameterStatus { name, value } => {
                cstr(&mut payload, name);
                cstr(&mut payload, value);
            }
            BackendMessage::BackendKeyData { process_id, secret_key } => {
                payload.extend_from_slice(&process_id.to_be_bytes());
                payload.extend_from_slice(&secret_key.to_be_bytes());
            }
            BackendMessage::ReadyForQuery(status) => payload.push(*status), // 'I' idle, 'T' in-transaction, 'E' failed txn
            BackendMessage::ParseComplete
            | BackendMessage::BindComplete
            | BackendMessage::CloseComplete
            | BackendMessage::NoData
            | BackendMessage::PortalSuspended
            | BackendMessage::EmptyQueryResponse => {}
            BackendMessage::ParameterDescription(oids) => {
                payload.extend_from_slice(&(oids.len() as i16).to_be_bytes());
                for oid in oids {
                    payload.extend_from_slice(&oid.to_be_bytes());
                }
            }
            BackendMessage::RowDescription(fields) => {
                payload.extend_from_slice(&(fields.len() as i16).to_be_bytes());
                for f in fields {
                    cstr(&mut payload, &f.name); // field name
                    payload.extend_from_slice(&0i32.to_be_bytes()); // table oid
                    payload.extend_from_slice(&0i16.to_be_bytes()); // attr number
                    payload.extend_from_slice(&f.type_oid.to_be_bytes());
                    payload.extend_from_slice(&f.type_size.to_be_bytes());
                    payload.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
                    payload.extend_from_slice(&f.format.code().to_be_bytes());
                }
            }
            BackendMessage::DataRow(cells) => {
                payload.extend_from_slice(&(cells.len() as i16).to_be_bytes());
                for cell in cells {
                    match cell {
                        None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
                        Some(bytes) => {
                            payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                            payload.extend_from_slice(bytes);
                        }
                    }
                }
            }
            BackendMessage::CommandComplete(tag) => cstr(&mut payload, tag),
            BackendMessage::ErrorResponse { severity, code, message, detail } => {
                payload.push(b'S');
                cstr(&mut payload, severity);
                payload.push(b'V');
                cstr(&mut payload, severity);
                payload.push(b'C');
                cstr(&mut payload, code);
                payload.push(b'M');
                cstr(&mut payload, message);
                if let Some(d) = detail {
                    payload.push(b'D');
                    cstr(&mut payload, d);
                }
                payload.push(0);
            }
        }
        out.push(self.tag());
        out.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        out.extend_from_slice(&payload);
    }
}

/// Encode and write a batch of messages, flushing once at the end.
pub async fn send_messages(socket: &mut tokio::net::TcpStream, msgs: &[BackendMessage]) -> Result<()> {
    if msgs.is_empty() {
        return Ok(());
    }
    let mut out = Vec::new();
    for m in msgs {
        m.encode(&mut out);
    }
    debug!(target: "pgwire", "sending {} messages ({} bytes): {:?}", msgs.len(), out.len(), msgs.iter().map(|m| m.tag() as char).collect::<String>());
    socket.write_all(&out).await?;
    if let Err(e) = socket.flush().await {
        error!(target: "pgwire", "flush failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}
