//! Per-type value strategies. A [`ValueCodec`] is a row of function pointers chosen once per
//! [`ColumnType`] when the registry is built; nothing is dispatched through reflection.

use std::num::IntErrorKind;

use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::error::{ProxyError, ProxyResult};
use crate::types::{array, numeric, reader, temporal, ColumnType, Numeric, PacketReader, Value};

/// Wire format code negotiated per parameter / result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatCode {
    #[default]
    Text,
    Binary,
}

impl FormatCode {
    pub fn from_i16(code: i16) -> ProxyResult<FormatCode> {
        match code {
            0 => Ok(FormatCode::Text),
            1 => Ok(FormatCode::Binary),
            other => Err(ProxyError::protocol(format!("invalid format code {}", other))),
        }
    }

    pub fn code(self) -> i16 {
        match self {
            FormatCode::Text => 0,
            FormatCode::Binary => 1,
        }
    }

    /// Resolve the format for column `idx`: empty means text, otherwise cycle through the list.
    pub fn for_column(formats: &[FormatCode], idx: usize) -> FormatCode {
        if formats.is_empty() { FormatCode::Text } else { formats[idx % formats.len()] }
    }
}

type LenFn = fn(ColumnType, &Value) -> ProxyResult<usize>;
type DecodeFn = fn(ColumnType, &[u8]) -> ProxyResult<Value>;
type EncodeFn = fn(ColumnType, &Value, &mut Vec<u8>) -> ProxyResult<()>;
type ParseFn = fn(ColumnType, &str) -> ProxyResult<Value>;
type FormatFn = fn(ColumnType, &Value) -> ProxyResult<String>;

#[derive(Clone, Copy)]
pub struct ValueCodec {
    column_type: ColumnType,
    len: LenFn,
    decode: DecodeFn,
    encode: EncodeFn,
    parse: ParseFn,
    format: FormatFn,
}

impl std::fmt::Debug for ValueCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCodec").field("column_type", &self.column_type).finish()
    }
}

impl ValueCodec {
    /// Strategy row for a concrete type. `Unspecified` has none.
    pub(crate) fn build(t: ColumnType) -> Option<ValueCodec> {
        use ColumnType as C;
        let row = |len: LenFn, decode: DecodeFn, encode: EncodeFn, parse: ParseFn, format: FormatFn| ValueCodec {
            column_type: t,
            len,
            decode,
            encode,
            parse,
            format,
        };
        Some(match t {
            C::Unspecified => return None,
            C::Bool => row(fixed_len, decode_bool, encode_bool, parse_bool, format_bool),
            C::Int2 | C::Int4 | C::Int8 => row(fixed_len, decode_int, encode_int, parse_int, format_int),
            C::Float4 | C::Float8 => row(fixed_len, decode_float, encode_float, parse_float, format_float),
            C::Numeric => row(numeric_len, decode_numeric, encode_numeric, parse_numeric, format_numeric),
            C::Text | C::Varchar | C::Bpchar => row(text_len, decode_text, encode_text, parse_text, format_text),
            C::Bytea => row(bytea_len, decode_bytea, encode_bytea, parse_bytea, format_bytea),
            C::Date | C::Time | C::Timestamp => row(fixed_len, decode_temporal, encode_temporal, parse_temporal, format_temporal),
            C::Uuid => row(fixed_len, decode_uuid, encode_uuid, parse_uuid, format_uuid),
            _ => row(array_len, decode_array, encode_array, parse_array, format_array),
        })
    }

    #[inline]
    pub fn column_type(&self) -> ColumnType { self.column_type }

    /// Byte length of the binary form of `v`.
    pub fn encoded_length(&self, v: &Value) -> ProxyResult<usize> { (self.len)(self.column_type, v) }

    /// Read a cell of `len` bytes (`-1` is NULL). The cursor moves by exactly `len` bytes even
    /// when the payload turns out to be malformed.
    pub fn read(&self, r: &mut PacketReader<'_>, len: i32) -> ProxyResult<Value> {
        if len < 0 {
            return Ok(Value::Null);
        }
        let bytes = r.take(len as usize)?;
        self.decode(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> ProxyResult<Value> { (self.decode)(self.column_type, bytes) }

    /// Append the binary form of `v`. Nothing is appended on error.
    pub fn write(&self, buf: &mut Vec<u8>, v: &Value) -> ProxyResult<()> {
        if v.is_null() {
            return Err(mismatch(self.column_type, v));
        }
        let mut scratch = Vec::new();
        (self.encode)(self.column_type, v, &mut scratch)?;
        buf.extend_from_slice(&scratch);
        Ok(())
    }

    /// Encode one DataRow cell in the requested format, `None` for NULL.
    pub fn encode_cell(&self, v: &Value, format: FormatCode) -> ProxyResult<Option<Vec<u8>>> {
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(match format {
            FormatCode::Text => self.format_text(v)?.into_bytes(),
            FormatCode::Binary => {
                let mut b = Vec::new();
                self.write(&mut b, v)?;
                b
            }
        }))
    }

    /// Append a length-prefixed cell in the requested format, `-1` for NULL.
    pub fn write_cell(&self, buf: &mut Vec<u8>, v: &Value, format: FormatCode) -> ProxyResult<()> {
        match self.encode_cell(v, format)? {
            None => buf.extend_from_slice(&(-1i32).to_be_bytes()),
            Some(body) => {
                buf.extend_from_slice(&(body.len() as i32).to_be_bytes());
                buf.extend_from_slice(&body);
            }
        }
        Ok(())
    }

    pub fn parse_text(&self, s: &str) -> ProxyResult<Value> { (self.parse)(self.column_type, s) }

    pub fn format_text(&self, v: &Value) -> ProxyResult<String> { (self.format)(self.column_type, v) }

    /// Decode a Bind parameter in its declared format.
    pub fn read_param(&self, raw: Option<&[u8]>, format: FormatCode) -> ProxyResult<Value> {
        match (raw, format) {
            (None, _) => Ok(Value::Null),
            (Some(bytes), FormatCode::Binary) => self.decode(bytes),
            (Some(bytes), FormatCode::Text) => {
                self.parse_text(&reader::utf8(bytes)?)
            }
        }
    }
}

fn mismatch(t: ColumnType, v: &Value) -> ProxyError { ProxyError::TypeMismatch { column_type: t, value: v.kind() } }

fn exact<'a>(t: ColumnType, bytes: &'a [u8]) -> ProxyResult<&'a [u8]> {
    match t.fixed_len() {
        Some(n) if n == bytes.len() => Ok(bytes),
        Some(n) => Err(ProxyError::protocol(format!("{} cell must be {} bytes, got {}", t.name(), n, bytes.len()))),
        None => Ok(bytes),
    }
}

fn fixed_len(t: ColumnType, _: &Value) -> ProxyResult<usize> {
    t.fixed_len().ok_or(ProxyError::UnsupportedType(t.oid()))
}

// bool

fn decode_bool(t: ColumnType, b: &[u8]) -> ProxyResult<Value> { Ok(Value::Bool(exact(t, b)?[0] != 0)) }

fn encode_bool(t: ColumnType, v: &Value, buf: &mut Vec<u8>) -> ProxyResult<()> {
    match v {
        Value::Bool(b) => {
            buf.push(*b as u8);
            Ok(())
        }
        other => Err(mismatch(t, other)),
    }
}

fn parse_bool(_: ColumnType, s: &str) -> ProxyResult<Value> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "yes" | "y" | "on" | "1" => Ok(Value::Bool(true)),
        "f" | "false" | "no" | "n" | "off" | "0" => Ok(Value::Bool(false)),
        _ => Err(ProxyError::malformed("boolean", s, "expected true or false")),
    }
}

fn format_bool(t: ColumnType, v: &Value) -> ProxyResult<String> {
    match v {
        Value::Bool(b) => Ok(if *b { "t" } else { "f" }.to_string()),
        other => Err(mismatch(t, other)),
    }
}

// integers

fn int_value(t: ColumnType, v: &Value) -> ProxyResult<Value> {
    let n = v.as_i64().ok_or_else(|| mismatch(t, v))?;
    let range = || ProxyError::out_of_range(t.name(), n.to_string());
    Ok(match t {
        ColumnType::Int2 => Value::Int2(i16::try_from(n).map_err(|_| range())?),
        ColumnType::Int4 => Value::Int4(i32::try_from(n).map_err(|_| range())?),
        _ => Value::Int8(n),
    })
}

fn decode_int(t: ColumnType, b: &[u8]) -> ProxyResult<Value> {
    let b = exact(t, b)?;
    Ok(match t {
        ColumnType::Int2 => Value::Int2(i16::from_be_bytes([b[0], b[1]])),
        ColumnType::Int4 => Value::Int4(i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        _ => Value::Int8(PacketReader::new(b).read_i64()?),
    })
}

fn encode_int(t: ColumnType, v: &Value, buf: &mut Vec<u8>) -> ProxyResult<()> {
    match int_value(t, v)? {
        Value::Int2(n) => buf.extend_from_slice(&n.to_be_bytes()),
        Value::Int4(n) => buf.extend_from_slice(&n.to_be_bytes()),
        Value::Int8(n) => buf.extend_from_slice(&n.to_be_bytes()),
        other => return Err(mismatch(t, &other)),
    }
    Ok(())
}

fn parse_int(t: ColumnType, s: &str) -> ProxyResult<Value> {
    let n = s.trim().parse::<i64>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => ProxyError::out_of_range(t.name(), s),
        _ => ProxyError::malformed("integer", s, e.to_string()),
    })?;
    int_value(t, &Value::Int8(n))
}

fn format_int(t: ColumnType, v: &Value) -> ProxyResult<String> {
    Ok(int_value(t, v)?.as_i64().unwrap_or_default().to_string())
}

// floats

fn float_value(t: ColumnType, v: &Value) -> ProxyResult<f64> {
    match v {
        Value::Float4(f) => Ok(*f as f64),
        Value::Float8(f) => Ok(*f),
        other => other.as_i64().map(|n| n as f64).ok_or_else(|| mismatch(t, other)),
    }
}

fn decode_float(t: ColumnType, b: &[u8]) -> ProxyResult<Value> {
    let b = exact(t, b)?;
    Ok(match t {
        ColumnType::Float4 => Value::Float4(f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        _ => Value::Float8(f64::from_bits(PacketReader::new(b).read_u64()?)),
    })
}

fn encode_float(t: ColumnType, v: &Value, buf: &mut Vec<u8>) -> ProxyResult<()> {
    match (t, v) {
        (ColumnType::Float4, Value::Float4(f)) => buf.extend_from_slice(&f.to_be_bytes()),
        (ColumnType::Float4, other) => buf.extend_from_slice(&(float_value(t, other)? as f32).to_be_bytes()),
        (_, other) => buf.extend_from_slice(&float_value(t, other)?.to_be_bytes()),
    }
    Ok(())
}

fn parse_float(t: ColumnType, s: &str) -> ProxyResult<Value> {
    let trimmed = s.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let special = match lowered.as_str() {
        "nan" => Some(f64::NAN),
        "infinity" | "+infinity" | "inf" => Some(f64::INFINITY),
        "-infinity" | "-inf" => Some(f64::NEG_INFINITY),
        _ => None,
    };
    let bad = |e: std::num::ParseFloatError| ProxyError::malformed("double precision", s, e.to_string());
    Ok(match t {
        ColumnType::Float4 => Value::Float4(match special {
            Some(f) => f as f32,
            None => trimmed.parse::<f32>().map_err(bad)?,
        }),
        _ => Value::Float8(match special {
            Some(f) => f,
            None => trimmed.parse::<f64>().map_err(bad)?,
        }),
    })
}

fn pg_float_text<F: std::fmt::Display>(f: F, nan: bool, inf: Option<bool>) -> String {
    match (nan, inf) {
        (true, _) => "NaN".to_string(),
        (_, Some(true)) => "Infinity".to_string(),
        (_, Some(false)) => "-Infinity".to_string(),
        _ => f.to_string(),
    }
}

fn format_float(t: ColumnType, v: &Value) -> ProxyResult<String> {
    let inf = |positive: bool, infinite: bool| infinite.then_some(positive);
    Ok(match (t, v) {
        (ColumnType::Float4, Value::Float4(f)) => pg_float_text(f, f.is_nan(), inf(*f > 0.0, f.is_infinite())),
        (ColumnType::Float4, other) => {
            let f = float_value(t, other)? as f32;
            pg_float_text(f, f.is_nan(), inf(f > 0.0, f.is_infinite()))
        }
        (_, other) => {
            let f = float_value(t, other)?;
            pg_float_text(f, f.is_nan(), inf(f > 0.0, f.is_infinite()))
        }
    })
}

// numeric

fn numeric_value(t: ColumnType, v: &Value) -> ProxyResult<Numeric> {
    match v {
        Value::Numeric(n) => Ok(n.clone()),
        other => other.as_i64().map(|n| Numeric::Finite(BigDecimal::from(n))).ok_or_else(|| mismatch(t, other)),
    }
}

fn numeric_len(t: ColumnType, v: &Value) -> ProxyResult<usize> {
    Ok(numeric::NumericWire::from_numeric(&numeric_value(t, v)?)?.encoded_len())
}

fn decode_numeric(_: ColumnType, b: &[u8]) -> ProxyResult<Value> { Ok(Value::Numeric(numeric::decode_numeric(b)?)) }

fn encode_numeric(t: ColumnType, v: &Value, buf: &mut Vec<u8>) -> ProxyResult<()> {
    numeric::encode_numeric(&numeric_value(t, v)?, buf)
}

fn parse_numeric(_: ColumnType, s: &str) -> ProxyResult<Value> { Ok(Value::Numeric(numeric::parse_numeric_text(s)?)) }

fn format_numeric(t: ColumnType, v: &Value) -> ProxyResult<String> { Ok(numeric_value(t, v)?.to_string()) }

// text family

/// Text rendering used when a textual column is handed a non-text value by the backend.
fn natural_text(v: &Value) -> ProxyResult<String> {
    let t = match v {
        Value::Text(s) => return Ok(s.clone()),
        Value::Bool(_) => ColumnType::Bool,
        Value::Int2(_) => ColumnType::Int2,
        Value::Int4(_) => ColumnType::Int4,
        Value::Int8(_) => ColumnType::Int8,
        Value::Float4(_) => ColumnType::Float4,
        Value::Float8(_) => ColumnType::Float8,
        Value::Numeric(_) => ColumnType::Numeric,
        Value::Bytea(_) => ColumnType::Bytea,
        Value::Date(_) => ColumnType::Date,
        Value::Time(_) => ColumnType::Time,
        Value::Timestamp(_) => ColumnType::Timestamp,
        Value::Uuid(_) => ColumnType::Uuid,
        Value::Null | Value::Array(_) => return Err(mismatch(ColumnType::Text, v)),
    };
    ValueCodec::build(t).ok_or(ProxyError::UnsupportedType(t.oid()))?.format_text(v)
}

fn text_len(t: ColumnType, v: &Value) -> ProxyResult<usize> { Ok(format_text(t, v)?.len()) }

fn decode_text(_: ColumnType, b: &[u8]) -> ProxyResult<Value> { reader::utf8(b).map(Value::Text) }

fn encode_text(t: ColumnType, v: &Value, buf: &mut Vec<u8>) -> ProxyResult<()> {
    buf.extend_from_slice(format_text(t, v)?.as_bytes());
    Ok(())
}

fn parse_text(_: ColumnType, s: &str) -> ProxyResult<Value> { Ok(Value::Text(s.to_string())) }

fn format_text(_: ColumnType, v: &Value) -> ProxyResult<String> { natural_text(v) }

// bytea

fn bytea_len(t: ColumnType, v: &Value) -> ProxyResult<usize> {
    match v {
        Value::Bytea(b) => Ok(b.len()),
        other => Err(mismatch(t, other)),
    }
}

fn decode_bytea(_: ColumnType, b: &[u8]) -> ProxyResult<Value> { Ok(Value::Bytea(b.to_vec())) }

fn encode_bytea(t: ColumnType, v: &Value, buf: &mut Vec<u8>) -> ProxyResult<()> {
    match v {
        Value::Bytea(b) => {
            buf.extend_from_slice(b);
            Ok(())
        }
        other => Err(mismatch(t, other)),
    }
}

fn parse_bytea(_: ColumnType, s: &str) -> ProxyResult<Value> {
    let Some(hex) = s.strip_prefix("\\x") else { return Ok(Value::Bytea(s.as_bytes().to_vec())) };
    if hex.len() % 2 != 0 {
        return Err(ProxyError::malformed("bytea", s, "odd number of hex digits"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| ProxyError::malformed("bytea", s, "invalid hexadecimal digit"))
        })
        .collect::<ProxyResult<Vec<u8>>>()
        .map(Value::Bytea)
}

fn format_bytea(t: ColumnType, v: &Value) -> ProxyResult<String> {
    match v {
        Value::Bytea(b) => {
            let mut out = String::with_capacity(2 + b.len() * 2);
            out.push_str("\\x");
            for byte in b {
                out.push_str(&format!("{:02x}", byte));
            }
            Ok(out)
        }
        other => Err(mismatch(t, other)),
    }
}

// temporal

fn decode_temporal(t: ColumnType, b: &[u8]) -> ProxyResult<Value> {
    let mut r = PacketReader::new(exact(t, b)?);
    Ok(match t {
        ColumnType::Date => Value::Date(temporal::pg_days_to_date(r.read_i32()?)?),
        ColumnType::Time => Value::Time(temporal::micros_to_time(r.read_i64()?)?),
        _ => Value::Timestamp(temporal::pg_micros_to_timestamp(r.read_i64()?)?),
    })
}

fn encode_temporal(t: ColumnType, v: &Value, buf: &mut Vec<u8>) -> ProxyResult<()> {
    match (t, v) {
        (ColumnType::Date, Value::Date(d)) => buf.extend_from_slice(&temporal::date_to_pg_days(d).to_be_bytes()),
        (ColumnType::Time, Value::Time(tm)) => buf.extend_from_slice(&temporal::time_to_micros(tm).to_be_bytes()),
        (ColumnType::Timestamp, Value::Timestamp(ts)) => {
            buf.extend_from_slice(&temporal::timestamp_to_pg_micros(ts)?.to_be_bytes())
        }
        (_, other) => return Err(mismatch(t, other)),
    }
    Ok(())
}

fn parse_temporal(t: ColumnType, s: &str) -> ProxyResult<Value> {
    Ok(match t {
        ColumnType::Date => Value::Date(temporal::parse_date(s)?),
        ColumnType::Time => Value::Time(temporal::parse_time(s)?),
        _ => Value::Timestamp(temporal::parse_timestamp(s)?),
    })
}

fn format_temporal(t: ColumnType, v: &Value) -> ProxyResult<String> {
    match (t, v) {
        (ColumnType::Date, Value::Date(d)) => Ok(temporal::format_date(d)),
        (ColumnType::Time, Value::Time(tm)) => Ok(temporal::format_time(tm)),
        (ColumnType::Timestamp, Value::Timestamp(ts)) => Ok(temporal::format_timestamp(ts)),
        (_, other) => Err(mismatch(t, other)),
    }
}

// uuid

fn decode_uuid(t: ColumnType, b: &[u8]) -> ProxyResult<Value> {
    let mut r = PacketReader::new(exact(t, b)?);
    let hi = r.read_u64()?;
    let lo = r.read_u64()?;
    Ok(Value::Uuid(Uuid::from_u64_pair(hi, lo)))
}

fn encode_uuid(t: ColumnType, v: &Value, buf: &mut Vec<u8>) -> ProxyResult<()> {
    match v {
        Value::Uuid(u) => {
            let (hi, lo) = u.as_u64_pair();
            buf.extend_from_slice(&hi.to_be_bytes());
            buf.extend_from_slice(&lo.to_be_bytes());
            Ok(())
        }
        other => Err(mismatch(t, other)),
    }
}

fn parse_uuid(_: ColumnType, s: &str) -> ProxyResult<Value> {
    Uuid::parse_str(s.trim()).map(Value::Uuid).map_err(|e| ProxyError::malformed("uuid", s, e.to_string()))
}

fn format_uuid(t: ColumnType, v: &Value) -> ProxyResult<String> {
    match v {
        Value::Uuid(u) => Ok(u.hyphenated().to_string()),
        other => Err(mismatch(t, other)),
    }
}

// arrays

fn element_of(t: ColumnType) -> ProxyResult<ColumnType> { t.element().ok_or(ProxyError::UnsupportedType(t.oid())) }

fn array_items(t: ColumnType, v: &Value) -> ProxyResult<&[Value]> {
    match v {
        Value::Array(items) => Ok(items),
        other => Err(mismatch(t, other)),
    }
}

fn array_len(t: ColumnType, v: &Value) -> ProxyResult<usize> {
    let mut scratch = Vec::new();
    encode_array(t, v, &mut scratch)?;
    Ok(scratch.len())
}

fn decode_array(t: ColumnType, b: &[u8]) -> ProxyResult<Value> {
    Ok(Value::Array(array::decode_array_binary(b, element_of(t)?)?))
}

fn encode_array(t: ColumnType, v: &Value, buf: &mut Vec<u8>) -> ProxyResult<()> {
    array::encode_array_binary(array_items(t, v)?, element_of(t)?, buf)
}

fn parse_array(t: ColumnType, s: &str) -> ProxyResult<Value> {
    Ok(Value::Array(array::parse_array_text(s, element_of(t)?)?))
}

fn format_array(t: ColumnType, v: &Value) -> ProxyResult<String> {
    array::format_array_text(array_items(t, v)?, element_of(t)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn codec(t: ColumnType) -> &'static ValueCodec { TypeRegistry::global().codec_for_type(t).unwrap() }

    #[test]
    fn fixed_width_lengths() {
        assert_eq!(codec(ColumnType::Int2).encoded_length(&Value::Int2(1)).unwrap(), 2);
        assert_eq!(codec(ColumnType::Int4).encoded_length(&Value::Int4(1)).unwrap(), 4);
        assert_eq!(codec(ColumnType::Int8).encoded_length(&Value::Int8(1)).unwrap(), 8);
        assert_eq!(codec(ColumnType::Float4).encoded_length(&Value::Float4(1.0)).unwrap(), 4);
        assert_eq!(codec(ColumnType::Float8).encoded_length(&Value::Float8(1.0)).unwrap(), 8);
        assert_eq!(codec(ColumnType::Uuid).encoded_length(&Value::Uuid(Uuid::nil())).unwrap(), 16);
        let n = Value::numeric(BigDecimal::from_str("9999.9999").unwrap());
        assert_eq!(codec(ColumnType::Numeric).encoded_length(&n).unwrap(), 12);
    }

    #[test]
    fn uuid_round_trip_advances_sixteen_bytes() {
        let c = codec(ColumnType::Uuid);
        for _ in 0..8 {
            let u = Uuid::new_v4();
            let mut buf = Vec::new();
            c.write(&mut buf, &Value::Uuid(u)).unwrap();
            buf.extend_from_slice(b"tail");
            let (hi, lo) = u.as_u64_pair();
            assert_eq!(&buf[..8], &hi.to_be_bytes());
            assert_eq!(&buf[8..16], &lo.to_be_bytes());
            let mut r = PacketReader::new(&buf);
            assert_eq!(c.read(&mut r, 16).unwrap(), Value::Uuid(u));
            assert_eq!(r.position(), 16);
        }
    }

    #[test]
    fn read_advances_exactly_even_on_bad_payload() {
        let c = codec(ColumnType::Numeric);
        let data = [0x00, 0x01, 0x00, 0x00, 0x12, 0x34, 0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB];
        let mut r = PacketReader::new(&data);
        assert!(c.read(&mut r, 10).is_err());
        assert_eq!(r.position(), 10);

        let mut r = PacketReader::new(&data);
        assert_eq!(codec(ColumnType::Text).read(&mut r, -1).unwrap(), Value::Null);
        assert_eq!(r.position(), 0);

        let mut r = PacketReader::new(&data[..3]);
        assert!(codec(ColumnType::Int4).read(&mut r, 4).is_err());
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn write_is_atomic() {
        let mut buf = vec![0xEE];
        let bad = Value::Array(vec![Value::Int4(1), Value::from("x")]);
        assert!(codec(ColumnType::Int4Array).write(&mut buf, &bad).is_err());
        assert_eq!(buf, vec![0xEE]);
        assert!(codec(ColumnType::Int2).write(&mut buf, &Value::Int4(70_000)).is_err());
        assert!(codec(ColumnType::Bool).write(&mut buf, &Value::Null).is_err());
        assert_eq!(buf, vec![0xEE]);
    }

    #[test]
    fn fixed_width_round_trips_are_byte_identical() {
        let cases = [
            (ColumnType::Int2, vec![0xFF, 0xFE]),
            (ColumnType::Int4, vec![0x00, 0x01, 0x02, 0x03]),
            (ColumnType::Int8, vec![0x80, 0, 0, 0, 0, 0, 0, 1]),
            (ColumnType::Float4, 11.1f32.to_be_bytes().to_vec()),
            (ColumnType::Float8, (-0.5f64).to_be_bytes().to_vec()),
            (ColumnType::Bool, vec![1]),
            (ColumnType::Date, 8_000i32.to_be_bytes().to_vec()),
            (ColumnType::Timestamp, 1_234_567_890_123i64.to_be_bytes().to_vec()),
        ];
        for (t, bytes) in cases {
            let c = codec(t);
            let v = c.decode(&bytes).unwrap();
            let mut out = Vec::new();
            c.write(&mut out, &v).unwrap();
            assert_eq!(out, bytes, "{:?}", t);
        }
    }

    #[test]
    fn text_forms() {
        assert_eq!(codec(ColumnType::Bool).format_text(&Value::Bool(true)).unwrap(), "t");
        assert_eq!(codec(ColumnType::Bool).parse_text("off").unwrap(), Value::Bool(false));
        assert_eq!(codec(ColumnType::Bytea).format_text(&Value::Bytea(vec![0xDE, 0xAD])).unwrap(), "\\xdead");
        assert_eq!(codec(ColumnType::Bytea).parse_text("\\xdead").unwrap(), Value::Bytea(vec![0xDE, 0xAD]));
        assert_eq!(codec(ColumnType::Float8).format_text(&Value::Float8(f64::NEG_INFINITY)).unwrap(), "-Infinity");
        assert_eq!(codec(ColumnType::Float8).format_text(&Value::Float8(1.5)).unwrap(), "1.5");
        assert_eq!(codec(ColumnType::Text).format_text(&Value::Int4(42)).unwrap(), "42");
        assert_eq!(
            codec(ColumnType::Date).parse_text("211012").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2021, 10, 12).unwrap())
        );
        assert_eq!(codec(ColumnType::Numeric).format_text(&Value::Int4(7)).unwrap(), "7");
    }

    #[test]
    fn integer_text_errors() {
        assert!(matches!(codec(ColumnType::Int4).parse_text("12a"), Err(ProxyError::MalformedLiteral { .. })));
        assert!(matches!(codec(ColumnType::Int2).parse_text("40000"), Err(ProxyError::ValueOutOfRange { .. })));
        assert!(matches!(
            codec(ColumnType::Int8).parse_text("99999999999999999999"),
            Err(ProxyError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn cells_and_params() {
        let c = codec(ColumnType::Int4);
        let mut buf = Vec::new();
        c.write_cell(&mut buf, &Value::Int4(5), FormatCode::Text).unwrap();
        c.write_cell(&mut buf, &Value::Int4(5), FormatCode::Binary).unwrap();
        c.write_cell(&mut buf, &Value::Null, FormatCode::Binary).unwrap();
        assert_eq!(buf, [&[0, 0, 0, 1, b'5'][..], &[0, 0, 0, 4, 0, 0, 0, 5], &[0xFF, 0xFF, 0xFF, 0xFF]].concat());

        assert_eq!(c.read_param(Some(&b"17"[..]), FormatCode::Text).unwrap(), Value::Int4(17));
        assert_eq!(c.read_param(Some(&17i32.to_be_bytes()[..]), FormatCode::Binary).unwrap(), Value::Int4(17));
        assert_eq!(c.read_param(None, FormatCode::Binary).unwrap(), Value::Null);
    }

    #[test]
    fn format_codes_cycle() {
        let fmts = [FormatCode::Binary, FormatCode::Text];
        assert_eq!(FormatCode::for_column(&fmts, 0), FormatCode::Binary);
        assert_eq!(FormatCode::for_column(&fmts, 1), FormatCode::Text);
        assert_eq!(FormatCode::for_column(&fmts, 2), FormatCode::Binary);
        assert_eq!(FormatCode::for_column(&[], 5), FormatCode::Text);
        assert!(FormatCode::from_i16(2).is_err());
    }
}
