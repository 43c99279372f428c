//! Field-level parsing primitives for JRU/DRU log text.
//!
//! Message blocks are made of `KEY : VALUE` lines, optionally followed by a
//! `-->description` suffix:
//!
//! ```text
//!   M_MODE : 0 -->Full Supervision
//!   V_TRAIN : 1023
//!   STM_MODE : Unknown
//! ```
//!
//! Everything here is tolerant: a line that is not a field is simply not a
//! field, and a value that cannot be converted yields a [`ParseIssue`] that
//! the caller logs before carrying the previous value forward.

use chrono::{NaiveDate, NaiveDateTime};
use nom::{
    IResult, Parser,
    bytes::complete::{take_till, take_while1},
    character::complete::{char, digit1, space0},
    combinator::map_res,
    sequence::{preceded, terminated},
};
use thiserror::Error;

pub const DATE_YEAR: &str = "DATE.YEAR";
pub const DATE_MONTH: &str = "DATE.MONTH";
pub const DATE_DAY: &str = "DATE.DAY";
pub const TIME_HOUR: &str = "TIME.HOUR";
pub const TIME_MINUTES: &str = "TIME.MINUTES";
pub const TIME_SECONDS: &str = "TIME.SECONDS";
pub const TIME_MILLISECONDS: &str = "TIME.MILLISECONDS";
/// Misspelling emitted by older recorder firmware.
pub const TIME_MILLISECONDES: &str = "TIME.MILLISECONDES";

/// Problems found while converting a single raw field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIssue {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("No digits in {field}: {raw:?}")]
    NoDigits { field: &'static str, raw: String },

    #[error("Value out of range in {field}: {raw:?}")]
    OutOfRange { field: &'static str, raw: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown antenna counter: {0}")]
    UnknownCounter(String),
}

/// A `KEY : VALUE -->description` line split into its parts.
///
/// `value` and `description` are trimmed; `description` is empty when the
/// line has no `-->` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLine<'a> {
    pub key: &'a str,
    pub value: &'a str,
    pub description: &'a str,
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Parse the key and the colon that follows it.
fn parse_key(input: &str) -> IResult<&str, &str> {
    preceded(
        space0,
        terminated(take_while1(is_key_char), (space0, char(':'))),
    )
    .parse(input)
}

/// Parse one `KEY : VALUE` line.
///
/// The value may not contain `-` except as the start of the `-->` separator,
/// so lines like `NID_C : -5` or `DATE : 2024-01-01` are not fields.
///
/// # Example
///
/// ```
/// use jru_report::parser::parse_field_line;
///
/// let field = parse_field_line("  M_LEVEL : 3 -->Level 2").unwrap();
/// assert_eq!(field.key, "M_LEVEL");
/// assert_eq!(field.value, "3");
/// assert_eq!(field.description, "Level 2");
/// ```
pub fn parse_field_line(line: &str) -> Option<FieldLine<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (rest, key) = parse_key(line).ok()?;

    let (value, description) = match rest.find('-') {
        None => (rest, ""),
        Some(pos) => (&rest[..pos], rest[pos..].strip_prefix("-->")?),
    };

    if value.is_empty() {
        return None;
    }

    Some(FieldLine {
        key,
        value: value.trim(),
        description: description.trim(),
    })
}

/// Whether a raw value is the recorder's "unknown" placeholder.
#[inline]
pub fn is_unknown(raw: &str) -> bool {
    raw.to_ascii_lowercase().contains("unknown")
}

fn first_digit_run(input: &str) -> IResult<&str, u64> {
    preceded(
        take_till(|c: char| c.is_ascii_digit()),
        map_res(digit1, |s: &str| s.parse::<u64>()),
    )
    .parse(input)
}

/// Extract the first contiguous run of digits as an integer.
pub fn leading_digits(field: &'static str, raw: &str) -> Result<u64, ParseIssue> {
    match first_digit_run(raw) {
        Ok((_, value)) => Ok(value),
        Err(_) if raw.contains(|c: char| c.is_ascii_digit()) => Err(ParseIssue::OutOfRange {
            field,
            raw: raw.to_string(),
        }),
        Err(_) => Err(ParseIssue::NoDigits {
            field,
            raw: raw.to_string(),
        }),
    }
}

/// Like [`leading_digits`] but narrowed to `u32`.
pub fn leading_digits_u32(field: &'static str, raw: &str) -> Result<u32, ParseIssue> {
    let value = leading_digits(field, raw)?;
    u32::try_from(value).map_err(|_| ParseIssue::OutOfRange {
        field,
        raw: raw.to_string(),
    })
}

/// Raw numeric timestamp components as read from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampParts {
    pub year: u64,
    pub month: u64,
    pub day: u64,
    pub hour: u64,
    pub minute: u64,
    pub second: u64,
    pub millis: u64,
}

impl TimestampParts {
    /// Build a calendar timestamp, rejecting impossible dates and times.
    pub fn assemble(&self) -> Result<NaiveDateTime, ParseIssue> {
        let invalid = || ParseIssue::InvalidTimestamp(format!("{:?}", self));
        let narrow = |v: u64| u32::try_from(v).map_err(|_| invalid());

        // chrono accepts 1000..=1999 ms as a leap second; the recorder never does.
        if self.millis >= 1000 {
            return Err(invalid());
        }

        let year = i32::try_from(self.year).map_err(|_| invalid())?;
        NaiveDate::from_ymd_opt(year, narrow(self.month)?, narrow(self.day)?)
            .and_then(|date| {
                date.and_hms_milli_opt(
                    narrow(self.hour).ok()?,
                    narrow(self.minute).ok()?,
                    narrow(self.second).ok()?,
                    narrow(self.millis).ok()?,
                )
            })
            .ok_or_else(invalid)
    }
}

/// Parse the `YYYY-MM-DD HH:MM:SS.mmm` prefix of legacy antenna lines.
pub fn parse_legacy_timestamp(raw: &str) -> Result<NaiveDateTime, ParseIssue> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.3f")
        .map_err(|e| ParseIssue::InvalidTimestamp(format!("{}: {}", raw, e)))
}
