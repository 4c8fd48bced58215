use crate::error::{ProxyError, ProxyResult};

/// Bounds-checked big-endian cursor over a message payload.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self { PacketReader { buf, pos: 0 } }

    #[inline]
    pub fn position(&self) -> usize { self.pos }

    #[inline]
    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    /// Consume exactly `n` bytes and hand them back as a slice.
    pub fn take(&mut self, n: usize) -> ProxyResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(ProxyError::protocol(format!(
                "read of {} bytes at offset {} overruns payload of {} bytes",
                n, self.pos, self.buf.len()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> ProxyResult<u8> { Ok(self.take(1)?[0]) }

    pub fn read_i16(&mut self) -> ProxyResult<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&mut self) -> ProxyResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> ProxyResult<i64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(i64::from_be_bytes(a))
    }

    pub fn read_u64(&mut self) -> ProxyResult<u64> { Ok(self.read_i64()? as u64) }

    /// Null-terminated string; the terminator is consumed.
    pub fn read_cstr(&mut self) -> ProxyResult<String> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ProxyError::protocol("cstring is not terminated"))?;
        let s = utf8(&rest[..end])?;
        self.pos += end + 1;
        Ok(s)
    }
}

/// Strict UTF-8 conversion for client-supplied text.
pub fn utf8(bytes: &[u8]) -> ProxyResult<String> {
    std::str::from_utf8(bytes).map(str::to_string).map_err(|e| {
        let at = e.valid_up_to();
        let bad: Vec<String> = bytes[at..].iter().take(e.error_len().unwrap_or(1)).map(|b| format!("0x{:02x}", b)).collect();
        ProxyError::InvalidEncoding(bad.join(" "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_advance_cursor() {
        let mut data = Vec::new();
        data.extend_from_slice(&7i16.to_be_bytes());
        data.extend_from_slice(&(-2i32).to_be_bytes());
        data.extend_from_slice(b"name\0");
        data.extend_from_slice(&42i64.to_be_bytes());
        let mut r = PacketReader::new(&data);
        assert_eq!(r.read_i16().unwrap(), 7);
        assert_eq!(r.position(), 2);
        assert_eq!(r.read_i32().unwrap(), -2);
        assert_eq!(r.read_cstr().unwrap(), "name");
        assert_eq!(r.position(), 11);
        assert_eq!(r.read_i64().unwrap(), 42);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn overrun_is_a_protocol_error() {
        let data = [0u8; 3];
        let mut r = PacketReader::new(&data);
        assert!(matches!(r.read_i32(), Err(ProxyError::Protocol(_))));
        assert_eq!(r.position(), 0);
        assert!(matches!(PacketReader::new(b"abc").read_cstr(), Err(ProxyError::Protocol(_))));
    }

    #[test]
    fn cstr_rejects_invalid_utf8() {
        let data = [b'S', b'E', 0xFF, b'L', 0, b'x', 0];
        let mut r = PacketReader::new(&data);
        match r.read_cstr() {
            Err(ProxyError::InvalidEncoding(bytes)) => assert_eq!(bytes, "0xff"),
            other => panic!("expected invalid encoding, got {:?}", other),
        }
        assert_eq!(r.position(), 0);
        assert_eq!(PacketReader::new("caf\u{e9}\0".as_bytes()).read_cstr().unwrap(), "caf\u{e9}");
    }
}
