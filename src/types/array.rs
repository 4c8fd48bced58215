//! One-dimensional array cells, text (`{"a","b",NULL}`) and binary forms.

use crate::error::{ProxyError, ProxyResult};
use crate::types::registry::TypeRegistry;
use crate::types::{ColumnType, PacketReader, Value};

#[derive(Debug, PartialEq)]
enum Token {
    Null,
    Quoted(String),
}

/// Split an array literal into raw element tokens.
fn tokenize(input: &str) -> ProxyResult<Vec<Token>> {
    let s = input.trim();
    let body = s
        .strip_prefix('{')
        .ok_or_else(|| ProxyError::malformed("array", input, "array literal must start with '{'"))?;
    let mut chars = body.chars().peekable();
    let mut out = Vec::new();
    let mut expect_element = true;
    let mut closed = false;
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => continue,
            '}' => {
                if expect_element && !out.is_empty() {
                    return Err(ProxyError::malformed("array", input, "missing element after ','"));
                }
                closed = true;
                break;
            }
            ',' if !expect_element => expect_element = true,
            '"' if expect_element => {
                let mut element = String::new();
                let mut terminated = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some(e @ ('"' | '\\')) => element.push(e),
                            Some(other) => {
                                return Err(ProxyError::malformed("array", input, format!("unsupported escape '\\{}'", other)))
                            }
                            None => break,
                        },
                        '"' => {
                            terminated = true;
                            break;
                        }
                        other => element.push(other),
                    }
                }
                if !terminated {
                    return Err(ProxyError::malformed("array", input, "unterminated quoted element"));
                }
                out.push(Token::Quoted(element));
                expect_element = false;
            }
            '{' => return Err(ProxyError::malformed("array", input, "nested arrays are not supported")),
            c if expect_element => {
                let mut word = String::from(c);
                while let Some(&n) = chars.peek() {
                    if n == ',' || n == '}' || n.is_whitespace() {
                        break;
                    }
                    word.push(n);
                    chars.next();
                }
                if word != "NULL" {
                    return Err(ProxyError::malformed("array", input, format!("unquoted element '{}'", word)));
                }
                out.push(Token::Null);
                expect_element = false;
            }
            other => return Err(ProxyError::malformed("array", input, format!("unexpected '{}'", other))),
        }
    }
    if !closed {
        return Err(ProxyError::malformed("array", input, "missing closing '}'"));
    }
    if chars.any(|c| !c.is_whitespace()) {
        return Err(ProxyError::malformed("array", input, "trailing characters after '}'"));
    }
    Ok(out)
}

/// Parse an array literal into typed elements of `element`, in source order.
pub fn parse_array_text(input: &str, element: ColumnType) -> ProxyResult<Vec<Value>> {
    let codec = TypeRegistry::global().codec_for_type(element)?;
    tokenize(input)?
        .into_iter()
        .map(|tok| match tok {
            Token::Null if element.nullable_element() => Ok(Value::Null),
            Token::Null => Err(ProxyError::malformed(
                "array",
                input,
                format!("NULL element not allowed in {} array", element.name()),
            )),
            Token::Quoted(s) => codec.parse_text(&s),
        })
        .collect()
}

fn quote(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Render elements as `{"e1","e2",NULL}`. Every non-null element is quoted.
pub fn format_array_text(items: &[Value], element: ColumnType) -> ProxyResult<String> {
    let codec = TypeRegistry::global().codec_for_type(element)?;
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            Value::Null => out.push_str("NULL"),
            v => quote(&mut out, &codec.format_text(v)?),
        }
    }
    out.push('}');
    Ok(out)
}

pub fn encode_array_binary(items: &[Value], element: ColumnType, buf: &mut Vec<u8>) -> ProxyResult<()> {
    let codec = TypeRegistry::global().codec_for_type(element)?;
    let has_null = items.iter().any(Value::is_null);
    if has_null && !element.nullable_element() {
        return Err(ProxyError::TypeMismatch { column_type: element, value: "null" });
    }
    let ndim: i32 = if items.is_empty() { 0 } else { 1 };
    buf.extend_from_slice(&ndim.to_be_bytes());
    buf.extend_from_slice(&(has_null as i32).to_be_bytes());
    buf.extend_from_slice(&element.oid().to_be_bytes());
    if ndim == 0 {
        return Ok(());
    }
    buf.extend_from_slice(&(items.len() as i32).to_be_bytes());
    buf.extend_from_slice(&1i32.to_be_bytes());
    for item in items {
        match item {
            Value::Null => buf.extend_from_slice(&(-1i32).to_be_bytes()),
            v => {
                let start = buf.len();
                buf.extend_from_slice(&0i32.to_be_bytes());
                codec.write(buf, v)?;
                let len = (buf.len() - start - 4) as i32;
                buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
            }
        }
    }
    Ok(())
}

pub fn decode_array_binary(bytes: &[u8], element: ColumnType) -> ProxyResult<Vec<Value>> {
    let codec = TypeRegistry::global().codec_for_type(element)?;
    let mut r = PacketReader::new(bytes);
    let ndim = r.read_i32()?;
    let _has_null = r.read_i32()?;
    let elem_oid = r.read_i32()?;
    if elem_oid != element.oid() {
        return Err(ProxyError::protocol(format!(
            "array element oid {} does not match expected {}",
            elem_oid,
            element.oid()
        )));
    }
    match ndim {
        0 => return Ok(Vec::new()),
        1 => {}
        n => return Err(ProxyError::out_of_range("array", format!("{} dimensions, only 1 supported", n))),
    }
    let count = r.read_i32()?;
    let _lower_bound = r.read_i32()?;
    if count < 0 {
        return Err(ProxyError::protocol(format!("negative array length {}", count)));
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = r.read_i32()?;
        let v = codec.read(&mut r, len)?;
        if v.is_null() && !element.nullable_element() {
            return Err(ProxyError::protocol(format!("NULL element in {} array", element.name())));
        }
        out.push(v);
    }
    if r.remaining() != 0 {
        return Err(ProxyError::protocol(format!("{} trailing bytes after array", r.remaining())));
    }
    Ok(out)
}
