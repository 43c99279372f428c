//! Cross-stream joins: antenna counter deltas and BTM alarm context.
//!
//! Antenna counters are cumulative, so each snapshot is turned into a delta
//! against the previous snapshot of the same antenna. A decrease in any
//! counter is read as a device restart and the whole row restarts from the
//! raw values. Alarm context rows pair each active alarm with the telemetry
//! in force at the time and the first antenna delta row that follows it.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metrics::MonthlyAlarms;
use crate::record::{
    AntennaCounterSnapshot, AntennaId, BtmAlarmEvent, CounterFlag, CounterSet, MonthKey,
    TelemetryMessage,
};
use crate::store::{ChronoStore, Timestamped};

/// Default join window between an alarm and the following antenna snapshot.
pub const DEFAULT_MAX_DELTA_STAT_COUNTERS_S: f64 = 11.0 * 60.0;

/// Per-flag counter increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterDeltas([u64; CounterFlag::COUNT]);

impl CounterDeltas {
    pub fn get(&self, flag: CounterFlag) -> u64 {
        self.0[flag as usize]
    }

    /// Deltas in [`CounterFlag::ALL`] order.
    pub fn values(&self) -> [u64; CounterFlag::COUNT] {
        self.0
    }

    fn baseline(current: &CounterSet) -> Self {
        Self(CounterFlag::ALL.map(|flag| current.get(flag)))
    }

    fn between(previous: &CounterSet, current: &CounterSet) -> Self {
        Self(CounterFlag::ALL.map(|flag| current.get(flag) - previous.get(flag)))
    }
}

/// Whether any counter went down between two snapshots.
fn is_counter_reset(previous: &CounterSet, current: &CounterSet) -> bool {
    CounterFlag::ALL
        .iter()
        .any(|flag| current.get(*flag) < previous.get(*flag))
}

/// One antenna snapshot expressed as increments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AntennaDeltaRow {
    pub timestamp: NaiveDateTime,
    pub antenna: AntennaId,
    pub deltas: CounterDeltas,

    /// First snapshot of the antenna, or a counter went down.
    pub baseline: bool,

    /// Speed of the nearest telemetry message.
    pub speed_1kph: Option<u32>,

    /// Cumulative distance at the nearest telemetry message.
    pub cumulative_distance_km: Option<f64>,
}

impl Timestamped for AntennaDeltaRow {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Compute per-antenna deltas.
///
/// The result is ordered by timestamp; rows of the same instant keep antenna
/// order (A before B).
pub fn compute_antenna_deltas(
    snapshots: &ChronoStore<AntennaCounterSnapshot>,
) -> Vec<AntennaDeltaRow> {
    let mut per_antenna: BTreeMap<AntennaId, Vec<&AntennaCounterSnapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        per_antenna.entry(snapshot.antenna).or_default().push(snapshot);
    }

    let mut rows = Vec::with_capacity(snapshots.len());
    for (antenna, sequence) in per_antenna {
        let mut previous: Option<&CounterSet> = None;
        for snapshot in sequence {
            let current = &snapshot.counters;
            let (deltas, baseline) = match previous {
                Some(prev) if !is_counter_reset(prev, current) => {
                    (CounterDeltas::between(prev, current), false)
                }
                Some(_) => {
                    info!(
                        "Counter reset on antenna {} at {}; restarting deltas",
                        antenna, snapshot.timestamp
                    );
                    (CounterDeltas::baseline(current), true)
                }
                None => (CounterDeltas::baseline(current), true),
            };

            rows.push(AntennaDeltaRow {
                timestamp: snapshot.timestamp,
                antenna,
                deltas,
                baseline,
                speed_1kph: None,
                cumulative_distance_km: None,
            });
            previous = Some(current);
        }
    }

    rows.sort_by_key(|row| row.timestamp);
    rows
}

/// Attach the nearest telemetry speed and cumulative distance to every row.
pub fn augment_deltas(
    rows: &mut [AntennaDeltaRow],
    messages: &ChronoStore<TelemetryMessage>,
    cumulative_km: &[f64],
) {
    if messages.is_empty() {
        return;
    }
    for row in rows.iter_mut() {
        if let Some(idx) = messages.nearest_index(row.timestamp) {
            row.speed_1kph = messages.get(idx).and_then(|m| m.speed_1kph);
            row.cumulative_distance_km = cumulative_km.get(idx).copied();
        }
    }
    debug!("Augmented {} antenna delta rows with speed and distance", rows.len());
}

/// Context of one active BTM alarm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmContextRow {
    pub alarm_timestamp: NaiveDateTime,
    pub level: Option<u32>,
    pub mode: Option<u32>,
    pub speed_1kph: Option<u32>,
    pub stm_mode: Option<u32>,

    /// Deltas of the first antenna row inside the join window; `None` when
    /// no row qualifies.
    pub deltas: Option<CounterDeltas>,

    /// Timestamp of the antenna row the deltas were taken from.
    pub delta_timestamp: Option<NaiveDateTime>,
}

impl AlarmContextRow {
    /// Delta for a flag, `NaN` when not available.
    pub fn delta_or_nan(&self, flag: CounterFlag) -> f64 {
        self.deltas.map_or(f64::NAN, |d| d.get(flag) as f64)
    }
}

/// All alarm context rows plus the alarm counts derived while building them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlarmContext {
    pub rows: Vec<AlarmContextRow>,
    pub speed_zero: u64,
    pub speed_moving: u64,
    pub monthly: BTreeMap<MonthKey, MonthlyAlarms>,

    /// Alarms for which no antenna row was found inside the window.
    pub unmatched: u64,
}

/// Build the context of every active alarm.
///
/// `deltas` must be the time-ordered output of [`compute_antenna_deltas`].
pub fn build_alarm_context(
    alarms: &ChronoStore<BtmAlarmEvent>,
    messages: &ChronoStore<TelemetryMessage>,
    deltas: &ChronoStore<AntennaDeltaRow>,
    max_delta_stat_counters_s: f64,
) -> AlarmContext {
    let mut context = AlarmContext::default();

    for alarm in alarms.iter().filter(|a| a.is_active()) {
        let ts = alarm.timestamp;
        let msg = messages.at_or_before(ts);
        let speed = msg.and_then(|m| m.speed_1kph);

        if let Some(speed) = speed {
            let bucket = context.monthly.entry(MonthKey::of(&ts)).or_default();
            if speed == 0 {
                context.speed_zero += 1;
                bucket.standstill += 1;
            } else {
                context.speed_moving += 1;
                bucket.moving += 1;
            }
        }

        let matched = deltas.at_or_after(ts).filter(|row| {
            let gap_s = (row.timestamp - ts).num_milliseconds() as f64 / 1000.0;
            (0.0..=max_delta_stat_counters_s).contains(&gap_s)
        });

        match matched {
            Some(row) => debug!("BTM alarm @ {} using antenna snapshot {}", ts, row.timestamp),
            None => {
                warn!("No valid antenna delta snapshot for BTM alarm @ {}", ts);
                context.unmatched += 1;
            }
        }

        context.rows.push(AlarmContextRow {
            alarm_timestamp: ts,
            level: msg.and_then(|m| m.level),
            mode: msg.and_then(|m| m.mode),
            speed_1kph: speed,
            stm_mode: msg.and_then(|m| m.stm_mode),
            deltas: matched.map(|row| row.deltas),
            delta_timestamp: matched.map(|row| row.timestamp),
        });
    }

    context
}
