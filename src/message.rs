//! Message block parsing with per-file carry-forward.
//!
//! A block is turned into a key/value map, a timestamp is assembled from the
//! `DATE.*`/`TIME.*` fields, and the level, mode, STM mode and speed fields
//! either update the carried value or inherit it when absent or unknown.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::parser::{
    DATE_DAY, DATE_MONTH, DATE_YEAR, ParseIssue, TIME_HOUR, TIME_MILLISECONDES, TIME_MILLISECONDS,
    TIME_MINUTES, TIME_SECONDS, TimestampParts, is_unknown, leading_digits, leading_digits_u32,
    parse_field_line,
};
use crate::record::{BtmAlarmEvent, TelemetryMessage, normalize_speed};

pub const M_LEVEL: &str = "M_LEVEL";
pub const M_MODE: &str = "M_MODE";
pub const STM_MODE: &str = "STM_MODE";
pub const V_TRAIN: &str = "V_TRAIN";
pub const Q_BTM_ALARM: &str = "Q_BTM_ALARM";

/// Last known good values, reset at the start of every input file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarryForward {
    pub level: Option<u32>,
    pub mode: Option<u32>,
    pub stm_mode: Option<u32>,
    pub speed: Option<u32>,
}

impl CarryForward {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Human-readable descriptions of `M_LEVEL` and `M_MODE` values.
///
/// Shared by every file of a run. The first non-empty description seen for a
/// value is kept.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DescriptionTables {
    pub level: BTreeMap<u32, String>,
    pub mode: BTreeMap<u32, String>,
}

impl DescriptionTables {
    pub fn level_description(&self, level: u32) -> Option<&str> {
        self.level.get(&level).map(String::as_str)
    }

    pub fn mode_description(&self, mode: u32) -> Option<&str> {
        self.mode.get(&mode).map(String::as_str)
    }

    fn remember(table: &mut BTreeMap<u32, String>, value: u32, description: &str) {
        if !description.is_empty() {
            table
                .entry(value)
                .or_insert_with(|| description.to_string());
        }
    }
}

/// Everything extracted from one block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockOutcome {
    /// Present only when the block carried a valid timestamp.
    pub message: Option<TelemetryMessage>,

    /// Present when the block carried `Q_BTM_ALARM` and a valid timestamp.
    pub alarm: Option<BtmAlarmEvent>,

    /// Field-level problems; none of them stopped the block from being parsed.
    pub issues: Vec<ParseIssue>,
}

/// Raw fields of a block keyed by upper-cased field name (last occurrence wins).
struct BlockFields {
    fields: HashMap<String, (String, String)>,
}

impl BlockFields {
    fn collect<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut fields = HashMap::new();
        for line in lines {
            if let Some(field) = parse_field_line(line.as_ref()) {
                fields.insert(
                    field.key.to_ascii_uppercase(),
                    (field.value.to_string(), field.description.to_string()),
                );
            }
        }
        Self { fields }
    }

    fn raw(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|(value, _)| value.as_str())
    }

    fn description(&self, key: &str) -> &str {
        self.fields
            .get(key)
            .map(|(_, desc)| desc.as_str())
            .unwrap_or("")
    }

    fn number(&self, key: &'static str) -> Result<u64, ParseIssue> {
        let raw = self.raw(key).ok_or(ParseIssue::MissingField(key))?;
        leading_digits(key, raw)
    }

    fn timestamp(&self) -> Result<NaiveDateTime, ParseIssue> {
        let millis_key = [TIME_MILLISECONDS, TIME_MILLISECONDES]
            .into_iter()
            .find(|key| self.fields.contains_key(*key))
            .ok_or(ParseIssue::MissingField(TIME_MILLISECONDS))?;

        TimestampParts {
            year: self.number(DATE_YEAR)?,
            month: self.number(DATE_MONTH)?,
            day: self.number(DATE_DAY)?,
            hour: self.number(TIME_HOUR)?,
            minute: self.number(TIME_MINUTES)?,
            second: self.number(TIME_SECONDS)?,
            millis: self.number(millis_key)?,
        }
        .assemble()
    }

    /// A fresh value for a carried field, or `None` when the field is absent,
    /// unknown or unparseable (the latter recorded as an issue).
    fn fresh(&self, key: &'static str, issues: &mut Vec<ParseIssue>) -> Option<u32> {
        let raw = self.raw(key)?;
        if is_unknown(raw) {
            return None;
        }
        leading_digits_u32(key, raw)
            .map_err(|issue| issues.push(issue))
            .ok()
    }
}

/// Parse one complete message block.
///
/// Carried fields are updated even when the block has no usable timestamp;
/// only the emission of the message itself depends on it.
pub fn parse_block<S: AsRef<str>>(
    lines: &[S],
    carry: &mut CarryForward,
    descriptions: &mut DescriptionTables,
) -> BlockOutcome {
    let fields = BlockFields::collect(lines);
    let mut outcome = BlockOutcome::default();

    let timestamp = fields
        .timestamp()
        .map_err(|issue| outcome.issues.push(issue))
        .ok();

    if let Some(ts) = timestamp
        && let Some(raw) = fields.raw(Q_BTM_ALARM)
    {
        // The record is kept even when its value is unreadable; it then reads 0.
        let value = leading_digits_u32(Q_BTM_ALARM, raw).unwrap_or_else(|issue| {
            outcome.issues.push(issue);
            0
        });
        outcome.alarm = Some(BtmAlarmEvent {
            timestamp: ts,
            value,
        });
    }

    if let Some(level) = fields.fresh(M_LEVEL, &mut outcome.issues) {
        DescriptionTables::remember(
            &mut descriptions.level,
            level,
            fields.description(M_LEVEL),
        );
        carry.level = Some(level);
    }

    if let Some(mode) = fields.fresh(M_MODE, &mut outcome.issues) {
        DescriptionTables::remember(&mut descriptions.mode, mode, fields.description(M_MODE));
        carry.mode = Some(mode);
    }

    if let Some(stm_mode) = fields.fresh(STM_MODE, &mut outcome.issues) {
        carry.stm_mode = Some(stm_mode);
    }

    if let Some(speed) = fields.fresh(V_TRAIN, &mut outcome.issues) {
        carry.speed = Some(normalize_speed(speed));
    }

    outcome.message = timestamp.map(|timestamp| TelemetryMessage {
        timestamp,
        level: carry.level,
        mode: carry.mode,
        speed_1kph: carry.speed,
        stm_mode: carry.stm_mode,
    });

    outcome
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    /// Render a message block the way the recorder prints it.
    pub(crate) fn block(ts: NaiveDateTime, fields: &[(&str, &str)]) -> Vec<String> {
        use chrono::{Datelike, Timelike};
        let mut lines = vec!["JRU MESSAGE 3 (".to_string()];
        lines.push(format!("  DATE.YEAR : {}", ts.year()));
        lines.push(format!("  DATE.MONTH : {}", ts.month()));
        lines.push(format!("  DATE.DAY : {}", ts.day()));
        lines.push(format!("  TIME.HOUR : {}", ts.hour()));
        lines.push(format!("  TIME.MINUTES : {}", ts.minute()));
        lines.push(format!("  TIME.SECONDS : {}", ts.second()));
        lines.push(format!(
            "  TIME.MILLISECONDS : {}",
            ts.nanosecond() / 1_000_000
        ));
        for (key, value) in fields {
            lines.push(format!("  {} : {}", key, value));
        }
        lines.push(")".to_string());
        lines
    }

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse_full_block() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        let lines = block(
            ts(10, 0, 0),
            &[
                ("M_LEVEL", "3 -->Level 2"),
                ("M_MODE", "0 -->Full Supervision"),
                ("STM_MODE", "4"),
                ("V_TRAIN", "87"),
            ],
        );

        let outcome = parse_block(&lines, &mut carry, &mut desc);
        let msg = outcome.message.unwrap();
        assert_eq!(msg.timestamp, ts(10, 0, 0));
        assert_eq!(msg.level, Some(3));
        assert_eq!(msg.mode, Some(0));
        assert_eq!(msg.stm_mode, Some(4));
        assert_eq!(msg.speed_1kph, Some(87));
        assert!(outcome.alarm.is_none());
        assert!(outcome.issues.is_empty());
        assert_eq!(desc.level_description(3), Some("Level 2"));
        assert_eq!(desc.mode_description(0), Some("Full Supervision"));
    }

    #[test]
    fn test_unknown_level_carries_forward() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();

        parse_block(&block(ts(10, 0, 0), &[("M_LEVEL", "3")]), &mut carry, &mut desc);
        let second = parse_block(
            &block(ts(10, 0, 1), &[("M_LEVEL", "Unknown")]),
            &mut carry,
            &mut desc,
        );

        assert_eq!(second.message.unwrap().level, Some(3));
    }

    #[test]
    fn test_speed_sentinel_is_zero() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        let outcome = parse_block(
            &block(ts(10, 0, 0), &[("V_TRAIN", "1023")]),
            &mut carry,
            &mut desc,
        );
        assert_eq!(outcome.message.unwrap().speed_1kph, Some(0));
        assert_eq!(carry.speed, Some(0));
    }

    #[test]
    fn test_fields_absent_without_history() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        let outcome = parse_block(&block(ts(10, 0, 0), &[]), &mut carry, &mut desc);
        let msg = outcome.message.unwrap();
        assert_eq!(msg.level, None);
        assert_eq!(msg.mode, None);
        assert_eq!(msg.speed_1kph, None);
        assert_eq!(msg.stm_mode, None);
    }

    #[test]
    fn test_bad_value_is_issue_and_carries() {
        let mut carry = CarryForward {
            speed: Some(40),
            ..Default::default()
        };
        let mut desc = DescriptionTables::default();
        let outcome = parse_block(
            &block(ts(10, 0, 0), &[("V_TRAIN", "n/a")]),
            &mut carry,
            &mut desc,
        );
        assert_eq!(outcome.message.unwrap().speed_1kph, Some(40));
        assert!(matches!(
            outcome.issues.as_slice(),
            [ParseIssue::NoDigits { field: "V_TRAIN", .. }]
        ));
    }

    #[test]
    fn test_missing_timestamp_still_updates_carry() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        let lines = ["JRU (", "  M_LEVEL : 2", "  Q_BTM_ALARM : 1", ")"];
        let outcome = parse_block(&lines, &mut carry, &mut desc);
        assert!(outcome.message.is_none());
        assert!(outcome.alarm.is_none());
        assert_eq!(carry.level, Some(2));
        assert!(matches!(
            outcome.issues.as_slice(),
            [ParseIssue::MissingField(_)]
        ));
    }

    #[test]
    fn test_invalid_calendar_date_drops_message() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        let lines = [
            "JRU (",
            "DATE.YEAR : 2023",
            "DATE.MONTH : 2",
            "DATE.DAY : 30",
            "TIME.HOUR : 1",
            "TIME.MINUTES : 2",
            "TIME.SECONDS : 3",
            "TIME.MILLISECONDS : 4",
            "V_TRAIN : 12",
            ")",
        ];
        let outcome = parse_block(&lines, &mut carry, &mut desc);
        assert!(outcome.message.is_none());
        assert!(matches!(
            outcome.issues.as_slice(),
            [ParseIssue::InvalidTimestamp(_)]
        ));
        assert_eq!(carry.speed, Some(12));
    }

    #[test]
    fn test_legacy_millis_spelling() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        let lines = [
            "JRU (",
            "DATE.YEAR : 2024",
            "DATE.MONTH : 1",
            "DATE.DAY : 2",
            "TIME.HOUR : 3",
            "TIME.MINUTES : 4",
            "TIME.SECONDS : 5",
            "TIME.MILLISECONDES : 600",
            ")",
        ];
        let outcome = parse_block(&lines, &mut carry, &mut desc);
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_milli_opt(3, 4, 5, 600)
            .unwrap();
        assert_eq!(outcome.message.unwrap().timestamp, expected);
    }

    #[test]
    fn test_alarm_emitted_with_message() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        let outcome = parse_block(
            &block(ts(10, 0, 5), &[("Q_BTM_ALARM", "1")]),
            &mut carry,
            &mut desc,
        );
        assert_eq!(
            outcome.alarm,
            Some(BtmAlarmEvent {
                timestamp: ts(10, 0, 5),
                value: 1
            })
        );
        assert!(outcome.message.is_some());
    }

    #[test]
    fn test_unreadable_alarm_value_reads_zero() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        let outcome = parse_block(
            &block(ts(10, 0, 5), &[("Q_BTM_ALARM", "n/a")]),
            &mut carry,
            &mut desc,
        );
        assert_eq!(
            outcome.alarm,
            Some(BtmAlarmEvent {
                timestamp: ts(10, 0, 5),
                value: 0
            })
        );
        assert!(outcome.issues.iter().any(|issue| matches!(
            issue,
            ParseIssue::NoDigits {
                field: "Q_BTM_ALARM",
                ..
            }
        )));
    }

    #[test]
    fn test_descriptions_first_write_wins() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        parse_block(&block(ts(10, 0, 0), &[("M_MODE", "5")]), &mut carry, &mut desc);
        parse_block(
            &block(ts(10, 0, 1), &[("M_MODE", "5 -->Staff Responsible")]),
            &mut carry,
            &mut desc,
        );
        parse_block(
            &block(ts(10, 0, 2), &[("M_MODE", "5 -->Something else")]),
            &mut carry,
            &mut desc,
        );
        assert_eq!(desc.mode_description(5), Some("Staff Responsible"));
    }

    #[test]
    fn test_repeated_key_last_wins() {
        let mut carry = CarryForward::default();
        let mut desc = DescriptionTables::default();
        let outcome = parse_block(
            &block(ts(10, 0, 0), &[("V_TRAIN", "10"), ("v_train", "20")]),
            &mut carry,
            &mut desc,
        );
        assert_eq!(outcome.message.unwrap().speed_1kph, Some(20));
    }
}
