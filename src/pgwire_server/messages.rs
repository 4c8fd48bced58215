use crate::error::{ProxyError, ProxyResult};
use crate::types::{FormatCode, PacketReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeTarget {
    Statement,
    Portal,
}

impl DescribeTarget {
    fn from_byte(b: u8) -> ProxyResult<DescribeTarget> {
        match b {
            b'S' => Ok(DescribeTarget::Statement),
            b'P' => Ok(DescribeTarget::Portal),
            other => Err(ProxyError::protocol(format!("invalid describe/close target '{}'", other as char))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseMessage {
    pub name: String,
    pub sql: String,
    pub param_types: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindMessage {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<FormatCode>,
    /// Raw parameter bytes, `None` for NULL.
    pub params: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<FormatCode>,
}

impl BindMessage {
    /// Format of parameter `idx`: none given means text, one given applies to all.
    pub fn param_format(&self, idx: usize) -> ProxyResult<FormatCode> {
        match self.param_formats.len() {
            0 => Ok(FormatCode::Text),
            1 => Ok(self.param_formats[0]),
            n if idx < n => Ok(self.param_formats[idx]),
            n => Err(ProxyError::protocol(format!("bind message has {} parameter formats but {} parameters", n, self.params.len()))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    Parse(ParseMessage),
    Bind(BindMessage),
    Describe { target: DescribeTarget, name: String },
    Execute { portal: String, max_rows: i32 },
    Close { target: DescribeTarget, name: String },
    Sync,
    Flush,
    Query(String),
    Terminate,
}

fn read_formats(r: &mut PacketReader<'_>) -> ProxyResult<Vec<FormatCode>> {
    let n = r.read_i16()?;
    (0..n.max(0)).map(|_| FormatCode::from_i16(r.read_i16()?)).collect()
}

impl FrontendMessage {
    /// Decode one frame payload (without tag and length).
    pub fn decode(tag: u8, payload: &[u8]) -> ProxyResult<FrontendMessage> {
        let mut r = PacketReader::new(payload);
        let msg = match tag {
            b'P' => {
                let name = r.read_cstr()?;
                let sql = r.read_cstr()?;
                let n = r.read_i16()?;
                let param_types = (0..n.max(0)).map(|_| r.read_i32()).collect::<ProxyResult<Vec<_>>>()?;
                FrontendMessage::Parse(ParseMessage { name, sql, param_types })
            }
            b'B' => {
                let portal = r.read_cstr()?;
                let statement = r.read_cstr()?;
                let param_formats = read_formats(&mut r)?;
                let n = r.read_i16()?;
                let mut params = Vec::with_capacity(n.max(0) as usize);
                for _ in 0..n.max(0) {
                    let len = r.read_i32()?;
                    params.push(if len < 0 { None } else { Some(r.take(len as usize)?.to_vec()) });
                }
                let result_formats = read_formats(&mut r)?;
                FrontendMessage::Bind(BindMessage { portal, statement, param_formats, params, result_formats })
            }
            b'D' => {
                let target = DescribeTarget::from_byte(r.read_u8()?)?;
                FrontendMessage::Describe { target, name: r.read_cstr()? }
            }
            b'E' => {
                let portal = r.read_cstr()?;
                FrontendMessage::Execute { portal, max_rows: r.read_i32()? }
            }
            b'C' => {
                let target = DescribeTarget::from_byte(r.read_u8()?)?;
                FrontendMessage::Close { target, name: r.read_cstr()? }
            }
            b'S' => FrontendMessage::Sync,
            b'H' => FrontendMessage::Flush,
            b'Q' => FrontendMessage::Query(r.read_cstr()?),
            b'X' => FrontendMessage::Terminate,
            other => return Err(ProxyError::protocol(format!("unsupported message type '{}'", other as char))),
        };
        Ok(msg)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::Parse(_) => "Parse",
            FrontendMessage::Bind(_) => "Bind",
            FrontendMessage::Describe { .. } => "Describe",
            FrontendMessage::Execute { .. } => "Execute",
            FrontendMessage::Close { .. } => "Close",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Terminate => "Terminate",
        }
    }
}
