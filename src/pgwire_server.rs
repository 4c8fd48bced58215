//! PostgreSQL wire-protocol front end.
//! - Startup without authentication, SSL/GSSENC refused, CancelRequest honoured
//! - Simple and extended query flows delegated to a [`Backend`](crate::backend::Backend)
//! - Portal suspension, binary/text result formats, batched DML pipelines

pub mod batch;
pub mod cancel;
pub mod messages;
pub mod portal;
pub mod send;
pub mod session;
pub mod statement;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::backend::SharedBackend;
use crate::config::{parse_bool, ProxyConfig};
use crate::error::ProxyError;
use crate::pgwire_server::messages::FrontendMessage;
use crate::pgwire_server::send::{send_messages, BackendMessage};
use crate::pgwire_server::session::Session;
use crate::types::PacketReader;

const PROTOCOL_V3: u32 = 196608;
const SSL_REQUEST: u32 = 80877103;
const GSSENC_REQUEST: u32 = 80877104;
const CANCEL_REQUEST: u32 = 80877102;

/// Upper bound for any single frame; larger lengths mean a desynchronised stream.
const MAX_FRAME_LEN: u32 = 1 << 30;

static CONN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn pgwire_trace_enabled(config: &ProxyConfig) -> bool {
    config.trace || std::env::var("PGPROXY_PGWIRE_TRACE").ok().and_then(|v| parse_bool(&v)).unwrap_or(false)
}

fn hex_dump_prefix(data: &[u8], max: usize) -> String {
    let take = data.len().min(max);
    data.iter().take(take).map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

pub async fn start_pgwire(backend: SharedBackend, config: ProxyConfig) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("pgwire listening on {}", addr);
    serve(listener, backend, Arc::new(config)).await
}

/// Accept loop over an already bound listener.
pub async fn serve(listener: TcpListener, backend: SharedBackend, config: Arc<ProxyConfig>) -> Result<()> {
    loop {
        let (mut socket, peer) = listener.accept().await?;
        let backend = backend.clone();
        let config = config.clone();
        let conn_id = CONN_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(e) = handle_conn(&mut socket, backend, &config, conn_id, &peer.to_string()).await {
                error!(target: "pgwire", "conn_id={} peer={} error: {}", conn_id, peer, e);
                let _ = socket.shutdown().await;
            }
        });
    }
}

/// Backend calls are synchronous; keep the runtime's other workers free while they run.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match tokio::runtime::Handle::try_current() {
        Ok(h) if h.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => tokio::task::block_in_place(f),
        _ => f(),
    }
}

async fn read_u32(socket: &mut TcpStream) -> Result<u32> {
    let mut b = [0u8; 4];
    socket.read_exact(&mut b).await?;
    Ok(u32::from_be_bytes(b))
}

async fn read_frame_body(socket: &mut TcpStream, len: u32) -> Result<Vec<u8>> {
    if !(4..=MAX_FRAME_LEN).contains(&len) {
        return Err(anyhow!("invalid frame length {}", len));
    }
    let mut buf = vec![0u8; (len - 4) as usize];
    socket.read_exact(&mut buf).await?;
    Ok(buf)
}

fn parse_startup_params(payload: &[u8]) -> HashMap<String, String> {
    let mut r = PacketReader::new(payload);
    let mut params = HashMap::new();
    while let Ok(key) = r.read_cstr() {
        if key.is_empty() {
            break;
        }
        match r.read_cstr() {
            Ok(value) => {
                params.insert(key, value);
            }
            Err(_) => break,
        }
    }
    params
}

async fn handle_conn(socket: &mut TcpStream, backend: SharedBackend, config: &ProxyConfig, conn_id: u64, peer: &str) -> Result<()> {
    debug!(target: "pgwire", "conn_id={} new connection established from {}", conn_id, peer);
    let trace = pgwire_trace_enabled(config);
    loop {
        let len = read_u32(socket).await?;
        let buf = read_frame_body(socket, len).await?;
        if trace {
            debug!(target: "pgwire", "conn_id={} startup packet len={}, first={} bytes: {}", conn_id, len, buf.len().min(32), hex_dump_prefix(&buf, 32));
        }
        let mut r = PacketReader::new(&buf);
        let code = r.read_i32()? as u32;
        match code {
            SSL_REQUEST | GSSENC_REQUEST => {
                debug!(target: "pgwire", "conn_id={} SSL/GSSENC request (code={}), refusing with 'N'", conn_id, code);
                socket.write_all(b"N").await?;
            }
            CANCEL_REQUEST => {
                let process_id = r.read_i32()?;
                let secret_key = r.read_i32()?;
                cancel::request_cancel(process_id, secret_key);
                return Ok(());
            }
            PROTOCOL_V3 => {
                let params = parse_startup_params(&buf[4..]);
                debug!(target: "pgwire", "conn_id={} startup user='{}' (keys={:?})", conn_id, params.get("user").map(String::as_str).unwrap_or(""), params.keys().collect::<Vec<_>>());
                let mut session = Session::new(backend);
                send_messages(socket, &startup_messages(config, &params, &session)).await?;
                let result = run_query_loop(socket, &mut session, conn_id, trace).await;
                session.close_all();
                return result;
            }
            other => {
                let err = ProxyError::protocol(format!("unsupported frontend protocol {}.{}", other >> 16, other & 0xFFFF));
                send_messages(socket, &[BackendMessage::error(&err)]).await?;
                return Ok(());
            }
        }
    }
}

fn startup_messages(config: &ProxyConfig, startup_params: &HashMap<String, String>, session: &Session) -> Vec<BackendMessage> {
    let param = |name: &str, value: &str| BackendMessage::ParameterStatus { name: name.to_string(), value: value.to_string() };
    let mut msgs = vec![
        BackendMessage::AuthenticationOk,
        param("server_version", &config.server_version),
        param("server_version_num", &config.server_version_num()),
        param("server_encoding", "UTF8"),
        param("client_encoding", "UTF8"),
        param("DateStyle", "ISO, MDY"),
        param("integer_datetimes", "on"),
        param("standard_conforming_strings", "on"),
        param("TimeZone", "UTC"),
        param("is_superuser", "off"),
    ];
    if let Some(user) = startup_params.get("user") {
        msgs.push(param("session_authorization", user));
    }
    if let Some(app_name) = startup_params.get("application_name") {
        msgs.push(param("application_name", app_name));
    }
    msgs.push(BackendMessage::BackendKeyData { process_id: session.process_id(), secret_key: session.secret_key() });
    msgs.push(BackendMessage::ReadyForQuery(b'I'));
    msgs
}

async fn run_query_loop(socket: &mut TcpStream, session: &mut Session, conn_id: u64, trace: bool) -> Result<()> {
    loop {
        let mut tag = [0u8; 1];
        if socket.read(&mut tag).await? == 0 {
            debug!(target: "pgwire", "conn_id={} client closed connection", conn_id);
            return Ok(());
        }
        let len = read_u32(socket).await?;
        let payload = read_frame_body(socket, len).await?;
        if trace {
            debug!(target: "pgwire", "conn_id={} recv '{}' len={} payload: {}", conn_id, tag[0] as char, len, hex_dump_prefix(&payload, 64));
        }
        let replies = match FrontendMessage::decode(tag[0], &payload) {
            Ok(FrontendMessage::Terminate) => {
                debug!(target: "pgwire", "conn_id={} terminate", conn_id);
                return Ok(());
            }
            Ok(msg) => {
                debug!(target: "pgwire", "conn_id={} {}", conn_id, msg.name());
                run_blocking(|| session.handle(msg))
            }
            Err(e) => {
                error!(target: "pgwire", "conn_id={} bad '{}' frame: {}", conn_id, tag[0] as char, e);
                session.protocol_error(&e)
            }
        };
        send_messages(socket, &replies).await?;
    }
}
