//! NUMERIC binary wire format.
//!
//! Layout (all big-endian int16): `ndigits, weight, sign, dscale, digits[ndigits]`, where each
//! digit is a base-10000 group and `weight` is the power of 10000 of the first group.
//! `dscale` is the number of displayed fractional decimal digits and is carried through exactly,
//! so `9999.0` and `9999.00` encode differently.

use std::str::FromStr;

use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;

use crate::error::{ProxyError, ProxyResult};
use crate::types::reader::PacketReader;
use crate::types::value::Numeric;

pub const NUMERIC_POS: u16 = 0x0000;
pub const NUMERIC_NEG: u16 = 0x4000;
pub const NUMERIC_NAN: u16 = 0xC000;

const NBASE: u16 = 10000;
const DEC_DIGITS: usize = 4;
const MAX_DSCALE: i64 = 0x3FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericSign {
    Positive,
    Negative,
    NaN,
}

impl NumericSign {
    fn code(self) -> u16 {
        match self {
            NumericSign::Positive => NUMERIC_POS,
            NumericSign::Negative => NUMERIC_NEG,
            NumericSign::NaN => NUMERIC_NAN,
        }
    }
}

/// Mantissa and non-negative scale of `d`. A negative exponent (`1e5`) is widened to scale 0.
pub fn decimal_parts(d: &BigDecimal) -> (BigInt, i64) {
    let (mantissa, scale) = d.as_bigint_and_exponent();
    if scale < 0 {
        d.with_scale(0).as_bigint_and_exponent()
    } else {
        (mantissa, scale)
    }
}

/// Plain positional text, never exponent notation. All `scale` fractional digits are kept.
pub fn decimal_to_plain(d: &BigDecimal) -> String {
    let (mantissa, scale) = decimal_parts(d);
    let scale = scale as usize;
    let mut digits = mantissa.magnitude().to_string();
    if digits.len() <= scale {
        digits = format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits);
    }
    let split = digits.len() - scale;
    let mut out = String::with_capacity(digits.len() + 2);
    if mantissa.sign() == Sign::Minus {
        out.push('-');
    }
    out.push_str(&digits[..split]);
    if scale > 0 {
        out.push('.');
        out.push_str(&digits[split..]);
    }
    out
}

/// Decomposed NUMERIC as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericWire {
    pub sign: NumericSign,
    pub weight: i16,
    pub dscale: u16,
    pub digits: Vec<u16>,
}

impl NumericWire {
    pub fn nan() -> Self {
        NumericWire { sign: NumericSign::NaN, weight: 0, dscale: 0, digits: Vec::new() }
    }

    pub fn from_numeric(n: &Numeric) -> ProxyResult<Self> {
        match n {
            Numeric::Finite(d) => NumericWire::from_decimal(d),
            Numeric::NaN => Ok(NumericWire::nan()),
        }
    }

    pub fn from_decimal(d: &BigDecimal) -> ProxyResult<Self> {
        let (mantissa, scale) = decimal_parts(d);
        if scale > MAX_DSCALE {
            return Err(ProxyError::out_of_range("numeric", format!("display scale {} exceeds {}", scale, MAX_DSCALE)));
        }
        let scale = scale as usize;
        let mut all = mantissa.magnitude().to_string();
        if all.len() <= scale {
            all = format!("{}{}", "0".repeat(scale + 1 - all.len()), all);
        }
        let split = all.len() - scale;
        let int_part = all[..split].trim_start_matches('0');
        let frac_part = &all[split..];

        let int_pad = (DEC_DIGITS - int_part.len() % DEC_DIGITS) % DEC_DIGITS;
        let frac_pad = (DEC_DIGITS - frac_part.len() % DEC_DIGITS) % DEC_DIGITS;
        let mut aligned = String::with_capacity(int_pad + int_part.len() + frac_part.len() + frac_pad);
        aligned.push_str(&"0".repeat(int_pad));
        aligned.push_str(int_part);
        let int_groups = aligned.len() / DEC_DIGITS;
        aligned.push_str(frac_part);
        aligned.push_str(&"0".repeat(frac_pad));

        let mut digits: Vec<u16> = aligned
            .as_bytes()
            .chunks(DEC_DIGITS)
            .map(|c| c.iter().fold(0u16, |acc, b| acc * 10 + (b - b'0') as u16))
            .collect();
        let mut weight = int_groups as i64 - 1;
        while digits.last() == Some(&0) {
            digits.pop();
        }
        let leading = digits.iter().take_while(|&&g| g == 0).count();
        digits.drain(..leading);
        weight -= leading as i64;

        let weight = i16::try_from(weight)
            .map_err(|_| ProxyError::out_of_range("numeric", format!("weight {} does not fit in int16", weight)))?;
        if digits.len() > i16::MAX as usize {
            return Err(ProxyError::out_of_range("numeric", format!("{} digit groups", digits.len())));
        }
        let sign = if mantissa.sign() == Sign::Minus && !digits.is_empty() { NumericSign::Negative } else { NumericSign::Positive };
        Ok(NumericWire { sign, weight, dscale: scale as u16, digits })
    }

    /// Rebuild the exact decimal, scale taken from `dscale`.
    pub fn to_numeric(&self) -> ProxyResult<Numeric> {
        if self.sign == NumericSign::NaN {
            return Ok(Numeric::NaN);
        }
        let mut groups = String::with_capacity(self.digits.len() * DEC_DIGITS);
        for &group in &self.digits {
            if group >= NBASE {
                return Err(ProxyError::malformed("numeric", format!("{}", group), "digit group exceeds 9999"));
            }
            groups.push_str(&format!("{:04}", group));
        }
        // power of ten applied to the concatenated groups to land on `dscale` fractional digits
        let shift = DEC_DIGITS as i64 * (self.weight as i64 - self.digits.len() as i64 + 1) + self.dscale as i64;
        if shift >= 0 {
            groups.push_str(&"0".repeat(shift as usize));
        } else {
            let keep = groups.len().saturating_sub((-shift) as usize);
            groups.truncate(keep);
        }
        let mut mantissa = if groups.is_empty() {
            BigInt::from(0)
        } else {
            BigInt::parse_bytes(groups.as_bytes(), 10)
                .ok_or_else(|| ProxyError::malformed("numeric", groups.clone(), "invalid digit groups"))?
        };
        if self.sign == NumericSign::Negative {
            mantissa = -mantissa;
        }
        Ok(Numeric::Finite(BigDecimal::new(mantissa, self.dscale as i64)))
    }

    #[inline]
    pub fn encoded_len(&self) -> usize { 8 + 2 * self.digits.len() }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.digits.len() as i16).to_be_bytes());
        buf.extend_from_slice(&self.weight.to_be_bytes());
        buf.extend_from_slice(&self.sign.code().to_be_bytes());
        buf.extend_from_slice(&self.dscale.to_be_bytes());
        for d in &self.digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
    }

    pub fn read(bytes: &[u8]) -> ProxyResult<Self> {
        let mut r = PacketReader::new(bytes);
        let ndigits = r.read_i16()?;
        let weight = r.read_i16()?;
        let sign = match r.read_i16()? as u16 {
            NUMERIC_POS => NumericSign::Positive,
            NUMERIC_NEG => NumericSign::Negative,
            NUMERIC_NAN => NumericSign::NaN,
            other => return Err(ProxyError::malformed("numeric", format!("{:#06x}", other), "unknown sign code")),
        };
        let dscale = r.read_i16()?;
        if ndigits < 0 || dscale < 0 {
            return Err(ProxyError::malformed("numeric", format!("ndigits={} dscale={}", ndigits, dscale), "negative header field"));
        }
        if r.remaining() != ndigits as usize * 2 {
            return Err(ProxyError::malformed("numeric", format!("{} bytes", bytes.len()), "length does not match digit count"));
        }
        let mut digits = Vec::with_capacity(ndigits as usize);
        for _ in 0..ndigits {
            digits.push(r.read_i16()? as u16);
        }
        Ok(NumericWire { sign, weight, dscale: dscale as u16, digits })
    }
}

pub fn encode_numeric(n: &Numeric, buf: &mut Vec<u8>) -> ProxyResult<()> {
    NumericWire::from_numeric(n)?.write(buf);
    Ok(())
}

pub fn decode_numeric(bytes: &[u8]) -> ProxyResult<Numeric> {
    NumericWire::read(bytes)?.to_numeric()
}

pub fn parse_numeric_text(s: &str) -> ProxyResult<Numeric> {
    let st = s.trim();
    if st.eq_ignore_ascii_case("nan") {
        return Ok(Numeric::NaN);
    }
    if st.is_empty() || !st.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E')) {
        return Err(ProxyError::malformed("numeric", st, "invalid input syntax"));
    }
    let d = BigDecimal::from_str(st).map_err(|e| ProxyError::malformed("numeric", st, e.to_string()))?;
    let (mantissa, scale) = decimal_parts(&d);
    Ok(Numeric::Finite(BigDecimal::new(mantissa, scale)))
}
