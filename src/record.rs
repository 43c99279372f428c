//! Data structures representing parsed JRU/DRU records.
//!
//! This module defines the three base record kinds produced by the parsers
//! (telemetry messages, BTM alarm events, antenna counter observations) and
//! the antenna counter snapshot they are aggregated into.

use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speed codes the onboard unit reports when no valid speed is available.
pub const INVALID_SPEED_CODES: [u32; 2] = [1022, 1023];

/// Map the "no data" speed codes to standstill.
#[inline]
pub fn normalize_speed(speed: u32) -> u32 {
    if INVALID_SPEED_CODES.contains(&speed) {
        0
    } else {
        speed
    }
}

/// One of the two BTM antennas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AntennaId {
    A,
    B,
}

impl AntennaId {
    /// Antenna 0 is `A`; every other numeric id is `B`.
    pub fn from_index(index: u32) -> Self {
        if index == 0 { AntennaId::A } else { AntennaId::B }
    }

    /// Parse the single-character designator used by the legacy line format
    /// (`A`, `B`, `0`, `1`, case-insensitive).
    pub fn from_designator(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' | '0' => Some(AntennaId::A),
            'B' | '1' => Some(AntennaId::B),
            _ => None,
        }
    }
}

impl fmt::Display for AntennaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AntennaId::A => write!(f, "A"),
            AntennaId::B => write!(f, "B"),
        }
    }
}

/// Antenna self-test counters reported in the BTM statistics blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterFlag {
    Performed,
    Failed,
    FailedBaliseVicinity,
    FailedNoiseSuspicion,
    IncorrectPam,
    IncorrectLevel,
}

impl CounterFlag {
    pub const COUNT: usize = 6;

    /// All flags in report column order.
    pub const ALL: [CounterFlag; Self::COUNT] = [
        CounterFlag::Performed,
        CounterFlag::Failed,
        CounterFlag::FailedBaliseVicinity,
        CounterFlag::FailedNoiseSuspicion,
        CounterFlag::IncorrectPam,
        CounterFlag::IncorrectLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterFlag::Performed => "PERFORMED",
            CounterFlag::Failed => "FAILED",
            CounterFlag::FailedBaliseVicinity => "FAILED_BALISE_VICINITY",
            CounterFlag::FailedNoiseSuspicion => "FAILED_NOISE_SUSPICION",
            CounterFlag::IncorrectPam => "INCORRECT_PAM",
            CounterFlag::IncorrectLevel => "INCORRECT_LEVEL",
        }
    }

    /// Look up a flag by name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.as_str().eq_ignore_ascii_case(name))
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CounterFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw counter values of one snapshot. Flags never observed read as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet([Option<u64>; CounterFlag::COUNT]);

impl CounterSet {
    /// Build a set with every flag populated, in [`CounterFlag::ALL`] order.
    pub fn from_values(values: [u64; CounterFlag::COUNT]) -> Self {
        Self(values.map(Some))
    }

    /// Overwrite a single flag (last value wins).
    pub fn set(&mut self, flag: CounterFlag, value: u64) {
        self.0[flag.index()] = Some(value);
    }

    pub fn get(&self, flag: CounterFlag) -> u64 {
        self.0[flag.index()].unwrap_or(0)
    }

    /// Whether the flag was actually observed.
    pub fn contains(&self, flag: CounterFlag) -> bool {
        self.0[flag.index()].is_some()
    }
}

/// A parsed "Msg 3" telemetry event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub timestamp: NaiveDateTime,

    /// ETCS level (`M_LEVEL`), carried forward when unknown.
    pub level: Option<u32>,

    /// ETCS mode (`M_MODE`), carried forward when unknown.
    pub mode: Option<u32>,

    /// Train speed in km/h (`V_TRAIN`), with the no-data codes mapped to 0.
    pub speed_1kph: Option<u32>,

    /// STM mode (`STM_MODE`), carried forward when unknown.
    pub stm_mode: Option<u32>,
}

/// A `Q_BTM_ALARM` observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtmAlarmEvent {
    pub timestamp: NaiveDateTime,
    pub value: u32,
}

impl BtmAlarmEvent {
    /// Only events with value 1 count as an active alarm.
    pub fn is_active(&self) -> bool {
        self.value == 1
    }
}

/// A single (flag, value) counter observation for one antenna.
///
/// Both antenna parsing strategies emit these; they are grouped into
/// [`AntennaCounterSnapshot`]s once every input file has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntennaObservation {
    pub timestamp: NaiveDateTime,
    pub antenna: AntennaId,
    pub flag: CounterFlag,
    pub value: u64,
}

/// Cumulative self-test counters of one antenna at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntennaCounterSnapshot {
    pub timestamp: NaiveDateTime,
    pub antenna: AntennaId,
    pub counters: CounterSet,
}

/// Calendar month bucket, `(year, month)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(timestamp: &NaiveDateTime) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
