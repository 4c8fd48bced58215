//! Tolerant date / time / timestamp literal parsing plus the binary temporal forms.
//!
//! Accepted date shapes: `yyyy-M-d`, `yy-M-d`, `yyyyMMdd`, `yyMMdd`, `MM/dd/yy`, `MM/dd/yyyy`.
//! Accepted time shapes: `HH[:mm[:ss[.f]]]` or digit-only `HH`, `HHmm`, `HHmmss[.f]`, where the
//! fraction has 1..=9 digits. Date and time are separated by `T` or a space. A trailing zone
//! offset (`+HH`, `+HHMM`, `+HH:MM`, `+HH:MM:SS`, either sign, optional leading space, or `Z`)
//! is validated and returned separately; the parsed value stays the local wall-clock value.

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::{ProxyError, ProxyResult};

const DAYS_BETWEEN_CE_AND_PG_EPOCH: i32 = 730_120; // 0001-01-01 -> 2000-01-01

fn pg_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

fn digits_only(s: &str) -> bool { !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) }

fn num(kind: &'static str, whole: &str, part: &str) -> ProxyResult<u32> {
    if !digits_only(part) {
        return Err(ProxyError::malformed(kind, whole, format!("expected digits, found '{}'", part)));
    }
    part.parse::<u32>().map_err(|e| ProxyError::malformed(kind, whole, e.to_string()))
}

fn expand_year(kind: &'static str, whole: &str, part: &str) -> ProxyResult<i32> {
    let y = num(kind, whole, part)? as i32;
    Ok(if part.len() <= 2 { 2000 + y } else { y })
}

pub fn parse_date(input: &str) -> ProxyResult<NaiveDate> {
    let s = input.trim();
    let (y, m, d) = if s.contains('-') {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err(ProxyError::malformed("date", input, "expected year-month-day"));
        }
        (expand_year("date", input, parts[0])?, num("date", input, parts[1])?, num("date", input, parts[2])?)
    } else if s.contains('/') {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return Err(ProxyError::malformed("date", input, "expected month/day/year"));
        }
        (expand_year("date", input, parts[2])?, num("date", input, parts[0])?, num("date", input, parts[1])?)
    } else if digits_only(s) && s.len() == 8 {
        (num("date", input, &s[..4])? as i32, num("date", input, &s[4..6])?, num("date", input, &s[6..])?)
    } else if digits_only(s) && s.len() == 6 {
        (2000 + num("date", input, &s[..2])? as i32, num("date", input, &s[2..4])?, num("date", input, &s[4..])?)
    } else {
        return Err(ProxyError::malformed("date", input, "unrecognized date layout"));
    };
    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| ProxyError::malformed("date", input, "date out of range"))
}

/// Split a trailing zone offset off a time literal.
fn split_offset<'a>(kind: &'static str, whole: &str, s: &'a str) -> ProxyResult<(&'a str, Option<FixedOffset>)> {
    if let Some(stripped) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        return Ok((stripped.trim_end(), FixedOffset::east_opt(0)));
    }
    let Some(pos) = s.find(['+', '-']) else { return Ok((s, None)) };
    let negative = s.as_bytes()[pos] == b'-';
    let zone = &s[pos + 1..];
    let fields: Vec<&str> = if zone.contains(':') {
        zone.split(':').collect()
    } else if zone.len() == 4 && digits_only(zone) {
        vec![&zone[..2], &zone[2..]]
    } else {
        vec![zone]
    };
    if fields.is_empty() || fields.len() > 3 || fields.iter().any(|f| f.len() > 2) {
        return Err(ProxyError::malformed(kind, whole, format!("bad zone offset '{}'", zone)));
    }
    let h = num(kind, whole, fields[0])?;
    let m = fields.get(1).map(|f| num(kind, whole, f)).transpose()?.unwrap_or(0);
    let sec = fields.get(2).map(|f| num(kind, whole, f)).transpose()?.unwrap_or(0);
    if h > 18 || m > 59 || sec > 59 {
        return Err(ProxyError::malformed(kind, whole, format!("zone offset '{}' out of range", zone)));
    }
    let total = (h * 3600 + m * 60 + sec) as i32;
    let offset = if negative { FixedOffset::west_opt(total) } else { FixedOffset::east_opt(total) }
        .ok_or_else(|| ProxyError::malformed(kind, whole, "zone offset out of range"))?;
    Ok((s[..pos].trim_end(), Some(offset)))
}

fn parse_fraction(kind: &'static str, whole: &str, frac: &str) -> ProxyResult<u32> {
    if frac.is_empty() || frac.len() > 9 {
        return Err(ProxyError::malformed(kind, whole, "fractional seconds must have 1 to 9 digits"));
    }
    let n = num(kind, whole, frac)?;
    Ok(n * 10u32.pow(9 - frac.len() as u32))
}

fn parse_clock(kind: &'static str, whole: &str, s: &str) -> ProxyResult<NaiveTime> {
    let (clock, frac) = match s.split_once('.') {
        Some((c, f)) => (c, Some(f)),
        None => (s, None),
    };
    let (h, m, sec) = if clock.contains(':') {
        let parts: Vec<&str> = clock.split(':').collect();
        if parts.len() > 3 {
            return Err(ProxyError::malformed(kind, whole, "too many time fields"));
        }
        let h = num(kind, whole, parts[0])?;
        let m = parts.get(1).map(|p| num(kind, whole, p)).transpose()?.unwrap_or(0);
        let sec = parts.get(2).map(|p| num(kind, whole, p)).transpose()?.unwrap_or(0);
        if frac.is_some() && parts.len() != 3 {
            return Err(ProxyError::malformed(kind, whole, "fraction without seconds"));
        }
        (h, m, sec)
    } else {
        match clock.len() {
            2 if frac.is_none() => (num(kind, whole, clock)?, 0, 0),
            4 if frac.is_none() => (num(kind, whole, &clock[..2])?, num(kind, whole, &clock[2..])?, 0),
            6 => (num(kind, whole, &clock[..2])?, num(kind, whole, &clock[2..4])?, num(kind, whole, &clock[4..])?),
            _ => return Err(ProxyError::malformed(kind, whole, "unrecognized time layout")),
        }
    };
    let nanos = frac.map(|f| parse_fraction(kind, whole, f)).transpose()?.unwrap_or(0);
    NaiveTime::from_hms_nano_opt(h, m, sec, nanos).ok_or_else(|| ProxyError::malformed(kind, whole, "time field out of range"))
}

/// Parse a time literal, returning the local value and the zone offset if one was written.
pub fn parse_time_with_offset(input: &str) -> ProxyResult<(NaiveTime, Option<FixedOffset>)> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ProxyError::malformed("time", input, "empty literal"));
    }
    let (clock, offset) = split_offset("time", input, s)?;
    Ok((parse_clock("time", input, clock)?, offset))
}

pub fn parse_time(input: &str) -> ProxyResult<NaiveTime> {
    parse_time_with_offset(input).map(|(t, _)| t)
}

/// Parse a timestamp literal, returning the local value and the zone offset if one was written.
pub fn parse_timestamp_with_offset(input: &str) -> ProxyResult<(NaiveDateTime, Option<FixedOffset>)> {
    let s = input.trim();
    let (date_part, time_part) = match s.find([' ', 'T']) {
        Some(pos) => (&s[..pos], Some(s[pos + 1..].trim_start())),
        None => (s, None),
    };
    let date = parse_date(date_part).map_err(|_| ProxyError::malformed("timestamp", input, "bad date part"))?;
    let (time, offset) = match time_part {
        Some(t) if !t.is_empty() => {
            let (clock, offset) = split_offset("timestamp", input, t)?;
            (parse_clock("timestamp", input, clock)?, offset)
        }
        _ => (NaiveTime::MIN, None),
    };
    Ok((date.and_time(time), offset))
}

pub fn parse_timestamp(input: &str) -> ProxyResult<NaiveDateTime> {
    parse_timestamp_with_offset(input).map(|(ts, _)| ts)
}

pub fn format_date(d: &NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn format_time(t: &NaiveTime) -> String { t.format("%H:%M:%S%.f").to_string() }

pub fn format_timestamp(ts: &NaiveDateTime) -> String { ts.format("%Y-%m-%d %H:%M:%S%.f").to_string() }

// Binary forms

pub fn date_to_pg_days(d: &NaiveDate) -> i32 { d.num_days_from_ce() - DAYS_BETWEEN_CE_AND_PG_EPOCH }

pub fn pg_days_to_date(days: i32) -> ProxyResult<NaiveDate> {
    days.checked_add(DAYS_BETWEEN_CE_AND_PG_EPOCH)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| ProxyError::out_of_range("date", format!("{} days from 2000-01-01", days)))
}

pub fn time_to_micros(t: &NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64 * 1_000_000 + (t.nanosecond() / 1_000) as i64
}

pub fn micros_to_time(micros: i64) -> ProxyResult<NaiveTime> {
    if !(0..86_400_000_000).contains(&micros) {
        return Err(ProxyError::out_of_range("time", format!("{} microseconds", micros)));
    }
    let secs = (micros / 1_000_000) as u32;
    let nanos = ((micros % 1_000_000) * 1_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or_else(|| ProxyError::out_of_range("time", format!("{} microseconds", micros)))
}

pub fn timestamp_to_pg_micros(ts: &NaiveDateTime) -> ProxyResult<i64> {
    (*ts - pg_epoch())
        .num_microseconds()
        .ok_or_else(|| ProxyError::out_of_range("timestamp", ts.to_string()))
}

pub fn pg_micros_to_timestamp(micros: i64) -> ProxyResult<NaiveDateTime> {
    pg_epoch()
        .checked_add_signed(Duration::microseconds(micros))
        .ok_or_else(|| ProxyError::out_of_range("timestamp", format!("{} microseconds from 2000-01-01", micros)))
}
