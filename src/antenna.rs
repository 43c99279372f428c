//! Antenna self-test counter extraction.
//!
//! The BTM prints its antenna statistics as a group of fields spread over
//! many lines, with the record timestamp usually just before them:
//!
//! ```text
//!   DATE.YEAR : 2024
//!   ...
//!   TIME.MILLISECONDS : 0
//!   STAT_TYPE : 2
//!   CHANNEL_ID (0) : 0
//!   ANTENNA_ID (0) : 1
//!   NB_ANTENNA_TESTS_PERFORMED (0) : 1204
//!   ...
//!   NB_ANTENNA_TESTS_INCORRECT_LEVEL (0) : 0
//! ```
//!
//! Two independent strategies are applied to every line:
//! - [`AntennaStatsParser`] keeps a bounded window of recent lines and runs
//!   the multi-line matcher only when the last counter line arrives.
//! - [`LegacyLineMatcher`] matches the older single-line
//!   `<timestamp> ... ANTENNA <id> ... FLAG=value` format.
//!
//! The two are not reconciled: the same event may be reported by both.

use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};

use crate::parser::{ParseIssue, TimestampParts, parse_legacy_timestamp};
use crate::record::{AntennaCounterSnapshot, AntennaId, AntennaObservation, CounterFlag, CounterSet};

/// Substring of the final counter line; the window is only matched when it appears.
pub const TRIGGER: &str = "NB_ANTENNA_TESTS_INCORRECT_LEVEL";

/// Default number of lines kept in the sliding window.
pub const DEFAULT_WINDOW_LINES: usize = 80;

static STATS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?s)STAT_TYPE\s*:\s*2.*?CHANNEL_ID\s*\(0\)\s*:\s*0.*?ANTENNA_ID\s*\(0\)\s*:\s*(\d).*?",
        r"NB_ANTENNA_TESTS_PERFORMED\s*\(0\)\s*:\s*(\d+).*?",
        r"NB_ANTENNA_TESTS_FAILED\s*\(0\)\s*:\s*(\d+).*?",
        r"NB_ANTENNA_TESTS_FAILED_BALISE_VICINITY\s*\(0\)\s*:\s*(\d+).*?",
        r"NB_ANTENNA_TESTS_FAILED_NOISE_SUSPICION\s*\(0\)\s*:\s*(\d+).*?",
        r"NB_ANTENNA_TESTS_INCORRECT_PAM\s*\(0\)\s*:\s*(\d+).*?",
        r"NB_ANTENNA_TESTS_INCORRECT_LEVEL\s*\(0\)\s*:\s*(\d+)",
    ))
    .expect("antenna stats pattern is valid")
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)DATE\.YEAR\s*:\s*(\d+).*?DATE\.MONTH\s*:\s*(\d+).*?DATE\.DAY\s*:\s*(\d+)")
        .expect("antenna date pattern is valid")
});

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?s)TIME\.HOUR\s*:\s*(\d+).*?TIME\.MINUTES\s*:\s*(\d+).*?",
        r"TIME\.SECONDS\s*:\s*(\d+).*?TIME\.MILLI(?:SECONDS|SECONDES)\s*:\s*(\d+)",
    ))
    .expect("antenna time pattern is valid")
});

static LEGACY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)(?P<ts>\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}\.\d{3})",
        r".*?\bANT(?:ENNA)?\s*(?P<ant>[AB01])\b",
        r".*?\b(?P<flag>[A-Z0-9_]+)\s*=\s*(?P<val>\d+)",
    ))
    .expect("legacy antenna pattern is valid")
});

/// Result of a multi-line window match.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsMatch {
    /// A new snapshot for a (timestamp, antenna) pair not seen before.
    Snapshot(AntennaCounterSnapshot),

    /// The pair was already reported; the block is skipped.
    Duplicate {
        timestamp: NaiveDateTime,
        antenna: AntennaId,
    },

    /// Counters matched but no date/time fields were found in the window.
    MissingTimestamp,

    /// Counters matched but a value could not be converted.
    Invalid(ParseIssue),
}

/// (timestamp, antenna) pairs already emitted by the multi-line matcher.
pub type SeenSnapshots = HashSet<(NaiveDateTime, AntennaId)>;

fn capture_u64(caps: &Captures<'_>, index: usize, field: &'static str) -> Result<u64, ParseIssue> {
    let raw = caps.get(index).map(|m| m.as_str()).unwrap_or("");
    raw.parse().map_err(|_| ParseIssue::OutOfRange {
        field,
        raw: raw.to_string(),
    })
}

/// Timestamp of the statistics group, searched over the whole window.
///
/// When several groups are present, the last one starting before the counter
/// match at `counters_start` is preferred; otherwise the first in the window.
fn window_timestamp(
    text: &str,
    counters_start: usize,
) -> Option<Result<NaiveDateTime, ParseIssue>> {
    let date = closest_group(&DATE_RE, text, counters_start)?;
    let time = closest_group(&TIME_RE, text, counters_start)?;
    Some(timestamp_from_captures(&date, &time))
}

fn closest_group<'t>(re: &Regex, text: &'t str, before: usize) -> Option<Captures<'t>> {
    let mut first = None;
    let mut preceding = None;
    for caps in re.captures_iter(text) {
        let start = caps.get(0).map_or(0, |m| m.start());
        if start < before {
            preceding = Some(caps);
        } else if first.is_none() {
            first = Some(caps);
        }
    }
    preceding.or(first)
}

fn timestamp_from_captures(
    date: &Captures<'_>,
    time: &Captures<'_>,
) -> Result<NaiveDateTime, ParseIssue> {
    TimestampParts {
        year: capture_u64(date, 1, "DATE.YEAR")?,
        month: capture_u64(date, 2, "DATE.MONTH")?,
        day: capture_u64(date, 3, "DATE.DAY")?,
        hour: capture_u64(time, 1, "TIME.HOUR")?,
        minute: capture_u64(time, 2, "TIME.MINUTES")?,
        second: capture_u64(time, 3, "TIME.SECONDS")?,
        millis: capture_u64(time, 4, "TIME.MILLISECONDS")?,
    }
    .assemble()
}

/// Sliding-window matcher for multi-line antenna statistics.
///
/// One instance per input file; the window starts empty for every file.
#[derive(Debug)]
pub struct AntennaStatsParser {
    window: VecDeque<String>,
    capacity: usize,
}

impl AntennaStatsParser {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of lines currently held.
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    /// Feed one line. Returns a match result only when the line carries the
    /// trigger and the window holds a complete statistics group.
    pub fn observe(&mut self, line: &str, seen: &mut SeenSnapshots) -> Option<StatsMatch> {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(line.to_string());

        if !line.contains(TRIGGER) {
            return None;
        }

        let text = self.window.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
        let caps = STATS_RE.captures(&text)?;
        let start = caps.get(0).map_or(0, |m| m.start());
        let result = Self::evaluate(&text, start, &caps, seen);

        // Matched content is never matched again.
        self.window.clear();
        Some(result)
    }

    fn evaluate(
        text: &str,
        counters_start: usize,
        caps: &Captures<'_>,
        seen: &mut SeenSnapshots,
    ) -> StatsMatch {
        let timestamp = match window_timestamp(text, counters_start) {
            None => return StatsMatch::MissingTimestamp,
            Some(Err(issue)) => return StatsMatch::Invalid(issue),
            Some(Ok(ts)) => ts,
        };

        let antenna = match capture_u64(caps, 1, "ANTENNA_ID") {
            Ok(id) => AntennaId::from_index(u32::try_from(id).unwrap_or(u32::MAX)),
            Err(issue) => return StatsMatch::Invalid(issue),
        };

        let mut values = [0u64; CounterFlag::COUNT];
        for (i, flag) in CounterFlag::ALL.iter().enumerate() {
            match capture_u64(caps, i + 2, flag.as_str()) {
                Ok(v) => values[i] = v,
                Err(issue) => return StatsMatch::Invalid(issue),
            }
        }

        if !seen.insert((timestamp, antenna)) {
            return StatsMatch::Duplicate { timestamp, antenna };
        }

        StatsMatch::Snapshot(AntennaCounterSnapshot {
            timestamp,
            antenna,
            counters: CounterSet::from_values(values),
        })
    }
}

/// Single-line matcher for the legacy `ANTENNA <id> FLAG=value` format.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyLineMatcher;

impl LegacyLineMatcher {
    /// Match one line. `None` means the line is not in the legacy format.
    pub fn match_line(&self, line: &str) -> Option<Result<AntennaObservation, ParseIssue>> {
        let caps = LEGACY_RE.captures(line)?;
        Some(Self::observation(&caps))
    }

    fn observation(caps: &Captures<'_>) -> Result<AntennaObservation, ParseIssue> {
        let timestamp = parse_legacy_timestamp(&caps["ts"])?;

        let antenna = caps["ant"]
            .chars()
            .next()
            .and_then(AntennaId::from_designator)
            .ok_or_else(|| ParseIssue::UnknownCounter(caps["ant"].to_string()))?;

        let raw_flag = caps["flag"].to_ascii_uppercase();
        let name = raw_flag
            .strip_prefix("NB_ANTENNA_TESTS_")
            .unwrap_or(&raw_flag);
        let flag = CounterFlag::from_name(name)
            .ok_or_else(|| ParseIssue::UnknownCounter(raw_flag.clone()))?;

        let value = caps["val"].parse().map_err(|_| ParseIssue::OutOfRange {
            field: flag.as_str(),
            raw: caps["val"].to_string(),
        })?;

        Ok(AntennaObservation {
            timestamp,
            antenna,
            flag,
            value,
        })
    }
}

/// Explode a snapshot into per-flag observations.
pub fn snapshot_observations(snapshot: &AntennaCounterSnapshot) -> Vec<AntennaObservation> {
    CounterFlag::ALL
        .iter()
        .filter(|flag| snapshot.counters.contains(**flag))
        .map(|flag| AntennaObservation {
            timestamp: snapshot.timestamp,
            antenna: snapshot.antenna,
            flag: *flag,
            value: snapshot.counters.get(*flag),
        })
        .collect()
}
