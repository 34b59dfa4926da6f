//! Date and time codecs.
//!
//! All three use fixed-width text so that a bulk's layout alone tells which
//! codec wrote it:
//!
//! ```text
//! Date        YYYY-MM-DD                            10 bytes
//! DateTime    YYYY-MM-DDTHH:MM:SS.nnnnnnnnn         29 bytes
//! TzDateTime  YYYY-MM-DDTHH:MM:SS.nnnnnnnnn+HH:MM   35 bytes
//! ```
//!
//! Years are limited to 0000..=9999, nanosecond precision is kept, leap
//! seconds are rejected, and offsets must be whole minutes.

use bytes::Bytes;
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};

use super::{scalar_value_type, Bulk};
use crate::error::{DecodeError, EncodeError};

const DATE_LEN: usize = 10;
const NAIVE_LEN: usize = 29;
const AWARE_LEN: usize = 35;

/// Calendar dates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Date;

/// Naive (offset-less) date-times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateTime;

/// Offset-aware date-times. The offset is stored, not normalized away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TzDateTime;

/// Fixed layouts: `#` is a digit, `+` an offset sign, anything else literal.
const DATE_LAYOUT: &[u8; DATE_LEN] = b"####-##-##";
const NAIVE_LAYOUT: &[u8; NAIVE_LEN] = b"####-##-##T##:##:##.#########";
const AWARE_LAYOUT: &[u8; AWARE_LEN] = b"####-##-##T##:##:##.#########+##:##";

fn fits(bulk: &[u8], layout: &[u8]) -> bool {
    bulk.len() == layout.len()
        && bulk.iter().zip(layout).all(|(&byte, &slot)| match slot {
            b'#' => byte.is_ascii_digit(),
            b'+' => byte == b'+' || byte == b'-',
            literal => byte == literal,
        })
}

/// Which sibling codec a well-formed temporal bulk belongs to.
fn written_as(bulk: &[u8]) -> Option<&'static str> {
    if fits(bulk, DATE_LAYOUT) {
        Some("date")
    } else if fits(bulk, NAIVE_LAYOUT) {
        Some("datetime")
    } else if fits(bulk, AWARE_LAYOUT) {
        Some("tzdatetime")
    } else {
        None
    }
}

fn check_shape(codec: &'static str, bulk: &[u8]) -> Result<(), DecodeError> {
    match written_as(bulk) {
        Some(found) if found == codec => Ok(()),
        Some(found) => Err(DecodeError::type_mismatch(codec, found, bulk)),
        None => Err(DecodeError::malformed(codec, bulk, "not a fixed-width temporal layout")),
    }
}

fn encode_date(codec: &'static str, date: &NaiveDate, out: &mut String) -> Result<(), EncodeError> {
    let year = date.year();
    if !(0..=9999).contains(&year) {
        return Err(EncodeError::new(codec, date, "year outside 0000..=9999"));
    }
    out.push_str(&format!("{:04}-{:02}-{:02}", year, date.month(), date.day()));
    Ok(())
}

fn encode_naive(codec: &'static str, value: &NaiveDateTime) -> Result<String, EncodeError> {
    let nanos = value.nanosecond();
    if nanos >= 1_000_000_000 {
        return Err(EncodeError::new(codec, value, "leap seconds are not storable"));
    }
    let mut out = String::with_capacity(AWARE_LEN);
    encode_date(codec, &value.date(), &mut out)?;
    out.push_str(&format!(
        "T{:02}:{:02}:{:02}.{:09}",
        value.hour(),
        value.minute(),
        value.second(),
        nanos
    ));
    Ok(out)
}

/// Parse a run of ASCII digits at `range`.
fn digits(codec: &'static str, bulk: &[u8], range: std::ops::Range<usize>) -> Result<u32, DecodeError> {
    let part = &bulk[range];
    if part.is_empty() || !part.iter().all(u8::is_ascii_digit) {
        return Err(DecodeError::malformed(codec, bulk, "expected digits"));
    }
    Ok(part.iter().fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0')))
}

fn expect_byte(codec: &'static str, bulk: &[u8], at: usize, byte: u8) -> Result<(), DecodeError> {
    if bulk[at] != byte {
        return Err(DecodeError::malformed(
            codec,
            bulk,
            format!("expected '{}' at offset {}", byte as char, at),
        ));
    }
    Ok(())
}

fn decode_date(codec: &'static str, bulk: &[u8]) -> Result<NaiveDate, DecodeError> {
    expect_byte(codec, bulk, 4, b'-')?;
    expect_byte(codec, bulk, 7, b'-')?;
    let year = digits(codec, bulk, 0..4)?;
    let month = digits(codec, bulk, 5..7)?;
    let day = digits(codec, bulk, 8..10)?;
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| DecodeError::malformed(codec, bulk, "no such date"))
}

fn decode_naive(codec: &'static str, bulk: &[u8]) -> Result<NaiveDateTime, DecodeError> {
    let date = decode_date(codec, bulk)?;
    expect_byte(codec, bulk, 10, b'T')?;
    expect_byte(codec, bulk, 13, b':')?;
    expect_byte(codec, bulk, 16, b':')?;
    expect_byte(codec, bulk, 19, b'.')?;
    let hour = digits(codec, bulk, 11..13)?;
    let minute = digits(codec, bulk, 14..16)?;
    let second = digits(codec, bulk, 17..19)?;
    let nanos = digits(codec, bulk, 20..29)?;
    if nanos >= 1_000_000_000 {
        return Err(DecodeError::malformed(codec, bulk, "leap second"));
    }
    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)
        .ok_or_else(|| DecodeError::malformed(codec, bulk, "no such time"))?;
    Ok(date.and_time(time))
}

impl Bulk for Date {
    type Value = NaiveDate;

    fn name(&self) -> &'static str {
        "date"
    }

    fn encode(&self, value: &NaiveDate) -> Result<Bytes, EncodeError> {
        let mut out = String::with_capacity(DATE_LEN);
        encode_date(self.name(), value, &mut out)?;
        Ok(Bytes::from(out))
    }

    fn decode(&self, bulk: &[u8]) -> Result<NaiveDate, DecodeError> {
        check_shape(self.name(), bulk)?;
        decode_date(self.name(), bulk)
    }
}

impl Bulk for DateTime {
    type Value = NaiveDateTime;

    fn name(&self) -> &'static str {
        "datetime"
    }

    fn encode(&self, value: &NaiveDateTime) -> Result<Bytes, EncodeError> {
        encode_naive(self.name(), value).map(Bytes::from)
    }

    fn decode(&self, bulk: &[u8]) -> Result<NaiveDateTime, DecodeError> {
        check_shape(self.name(), bulk)?;
        decode_naive(self.name(), bulk)
    }
}

impl Bulk for TzDateTime {
    type Value = chrono::DateTime<FixedOffset>;

    fn name(&self) -> &'static str {
        "tzdatetime"
    }

    fn encode(&self, value: &chrono::DateTime<FixedOffset>) -> Result<Bytes, EncodeError> {
        let offset = value.offset().local_minus_utc();
        if offset % 60 != 0 {
            return Err(EncodeError::new(self.name(), value, "offset is not a whole minute"));
        }
        let mut out = encode_naive(self.name(), &value.naive_local())?;
        let sign = if offset < 0 { '-' } else { '+' };
        let minutes = offset.abs() / 60;
        out.push_str(&format!("{}{:02}:{:02}", sign, minutes / 60, minutes % 60));
        Ok(Bytes::from(out))
    }

    fn decode(&self, bulk: &[u8]) -> Result<chrono::DateTime<FixedOffset>, DecodeError> {
        let codec = self.name();
        check_shape(codec, bulk)?;
        let local = decode_naive(codec, &bulk[..NAIVE_LEN])
            .map_err(|_| DecodeError::malformed(codec, bulk, "invalid local date-time"))?;
        let sign = match bulk[NAIVE_LEN] {
            b'+' => 1,
            b'-' => -1,
            _ => return Err(DecodeError::malformed(codec, bulk, "expected offset sign")),
        };
        expect_byte(codec, bulk, NAIVE_LEN + 3, b':')?;
        let hours = digits(codec, bulk, NAIVE_LEN + 1..NAIVE_LEN + 3)? as i32;
        let minutes = digits(codec, bulk, NAIVE_LEN + 4..NAIVE_LEN + 6)? as i32;
        if minutes >= 60 {
            return Err(DecodeError::malformed(codec, bulk, "offset minutes out of range"));
        }
        let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .ok_or_else(|| DecodeError::malformed(codec, bulk, "offset out of range"))?;
        offset
            .from_local_datetime(&local)
            .single()
            .ok_or_else(|| DecodeError::malformed(codec, bulk, "ambiguous local time"))
    }
}

scalar_value_type!(Date, DateTime, TzDateTime);
