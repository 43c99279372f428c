//! Moving/standstill segmentation and distance integration.
//!
//! The engine walks the time-ordered telemetry messages once. Each pair of
//! consecutive messages forms an interval whose length is attributed to
//! moving or standstill time according to the speed reported at the end of
//! the interval. Intervals longer than the discontinuity threshold (recorder
//! off, file gap) and intervals going back in time contribute nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::record::{MonthKey, TelemetryMessage};
use crate::store::ChronoStore;

/// Default discontinuity threshold between two messages, in seconds.
pub const DEFAULT_MAX_DELTA_TIME_S: f64 = 30.0;

/// Speed (km/h) × seconds per km.
const RAW_PER_KM: f64 = 3600.0;

/// Time and raw distance accumulated in one calendar month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MonthlyMotion {
    pub moving_time_s: f64,
    pub standstill_time_s: f64,
    pub moving_distance_raw: f64,
    pub standstill_distance_raw: f64,
}

/// Active BTM alarms in one calendar month, split by train state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonthlyAlarms {
    pub standstill: u64,
    pub moving: u64,
}

/// Run-wide totals.
///
/// Raw distances are in km/h·s; divide by 3600 for km.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub moving_time_s: f64,
    pub standstill_time_s: f64,
    pub moving_distance_raw: f64,
    pub standstill_distance_raw: f64,
    pub moving_distance_km: f64,
    pub standstill_distance_km: f64,
    pub total_time_s: f64,
    pub total_distance_raw: f64,
    pub total_distance_km: f64,
    pub segments: u64,
    pub btm_alarm_speed_zero: u64,
    pub btm_alarm_speed_moving: u64,
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Moving time (s): {:.2}", self.moving_time_s)?;
        writeln!(f, "Standstill time (s): {:.2}", self.standstill_time_s)?;
        writeln!(f, "Total time (min): {:.2}", self.total_time_s / 60.0)?;
        writeln!(f, "Total distance (km): {:.3}", self.total_distance_km)?;
        writeln!(f, "Segments counted: {}", self.segments)?;
        writeln!(f, "BTM alarms at standstill: {}", self.btm_alarm_speed_zero)?;
        write!(f, "BTM alarms in movement: {}", self.btm_alarm_speed_moving)
    }
}

/// Output of one pass of the [`MetricsEngine`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceProfile {
    pub metrics: Metrics,

    /// Cumulative distance in km, index-aligned with the message sequence.
    pub cumulative_km: Vec<f64>,

    pub monthly: BTreeMap<MonthKey, MonthlyMotion>,

    /// Intervals skipped because they exceeded the threshold.
    pub discontinuities: u64,

    /// Intervals skipped because time went backwards.
    pub negative_intervals: u64,
}

/// Segment integrator over time-ordered telemetry.
#[derive(Debug, Clone, Copy)]
pub struct MetricsEngine {
    max_delta_time_s: f64,
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELTA_TIME_S)
    }
}

impl MetricsEngine {
    pub fn new(max_delta_time_s: f64) -> Self {
        Self { max_delta_time_s }
    }

    pub fn max_delta_time_s(&self) -> f64 {
        self.max_delta_time_s
    }

    pub fn run(&self, messages: &ChronoStore<TelemetryMessage>) -> DistanceProfile {
        self.run_sequence(messages.as_slice())
    }

    /// Integrate over a message sequence in the given order.
    pub fn run_sequence(&self, messages: &[TelemetryMessage]) -> DistanceProfile {
        let mut profile = DistanceProfile {
            cumulative_km: vec![0.0; messages.len()],
            ..Default::default()
        };

        let Some(first) = messages.first() else {
            return profile;
        };

        let mut metrics = Metrics::default();
        let mut last_ts = first.timestamp;
        let mut cumulative_km = 0.0;

        for (i, msg) in messages.iter().enumerate().skip(1) {
            let ts = msg.timestamp;
            let delta_t = (ts - last_ts).num_milliseconds() as f64 / 1000.0;

            if delta_t < 0.0 {
                warn!("Negative delta_t at index {} ({}); skipping interval", i, ts);
                profile.negative_intervals += 1;
                profile.cumulative_km[i] = cumulative_km;
                last_ts = ts;
                continue;
            }

            if delta_t > self.max_delta_time_s {
                info!(
                    "Reset detected (delta_t={:.2}s > {}s) at {}; skipping interval",
                    delta_t, self.max_delta_time_s, ts
                );
                profile.discontinuities += 1;
                profile.cumulative_km[i] = cumulative_km;
                last_ts = ts;
                continue;
            }

            let Some(speed) = msg.speed_1kph else {
                debug!("No speed at {}; carrying cumulative distance", ts);
                profile.cumulative_km[i] = cumulative_km;
                last_ts = ts;
                continue;
            };

            let delta_distance_raw = delta_t * f64::from(speed);
            let month = profile.monthly.entry(MonthKey::of(&last_ts)).or_default();

            if speed > 0 {
                metrics.moving_time_s += delta_t;
                metrics.moving_distance_raw += delta_distance_raw;
                month.moving_time_s += delta_t;
                month.moving_distance_raw += delta_distance_raw;
            } else {
                metrics.standstill_time_s += delta_t;
                metrics.standstill_distance_raw += delta_distance_raw;
                month.standstill_time_s += delta_t;
                month.standstill_distance_raw += delta_distance_raw;
            }

            cumulative_km += delta_distance_raw / RAW_PER_KM;
            profile.cumulative_km[i] = cumulative_km;
            metrics.segments += 1;
            last_ts = ts;
        }

        metrics.moving_distance_km = metrics.moving_distance_raw / RAW_PER_KM;
        metrics.standstill_distance_km = metrics.standstill_distance_raw / RAW_PER_KM;
        metrics.total_time_s = metrics.moving_time_s + metrics.standstill_time_s;
        metrics.total_distance_raw = metrics.moving_distance_raw + metrics.standstill_distance_raw;
        metrics.total_distance_km = metrics.moving_distance_km + metrics.standstill_distance_km;

        profile.metrics = metrics;
        profile
    }
}

/// One month of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRow {
    pub month: MonthKey,
    pub total_distance_km: f64,
    pub total_time_min: f64,
    pub moving_time_min: f64,
    pub standstill_time_min: f64,
    pub btm_alarm_speed_zero: u64,
    pub btm_alarm_speed_moving: u64,
    pub moving_distance_km: f64,
}

impl MonthlyRow {
    /// Alarms while moving per 1000 km travelled; 0 when nothing was travelled.
    pub fn alarms_per_1000_km(&self) -> f64 {
        alarms_per_1000_km(self.btm_alarm_speed_moving, self.moving_distance_km)
    }
}

pub fn alarms_per_1000_km(moving_alarms: u64, moving_distance_km: f64) -> f64 {
    if moving_distance_km > 0.0 {
        1000.0 * moving_alarms as f64 / moving_distance_km
    } else {
        0.0
    }
}

/// Merge motion and alarm buckets into one row per month present on either side.
pub fn rollup_months(
    motion: &BTreeMap<MonthKey, MonthlyMotion>,
    alarms: &BTreeMap<MonthKey, MonthlyAlarms>,
) -> Vec<MonthlyRow> {
    let months: BTreeSet<MonthKey> = motion.keys().chain(alarms.keys()).copied().collect();

    months
        .into_iter()
        .map(|month| {
            let m = motion.get(&month).copied().unwrap_or_default();
            let a = alarms.get(&month).copied().unwrap_or_default();
            MonthlyRow {
                month,
                total_distance_km: (m.moving_distance_raw + m.standstill_distance_raw) / RAW_PER_KM,
                total_time_min: (m.moving_time_s + m.standstill_time_s) / 60.0,
                moving_time_min: m.moving_time_s / 60.0,
                standstill_time_min: m.standstill_time_s / 60.0,
                btm_alarm_speed_zero: a.standstill,
                btm_alarm_speed_moving: a.moving,
                moving_distance_km: m.moving_distance_raw / RAW_PER_KM,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

    pub(crate) fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap()
            + TimeDelta::seconds(secs)
    }

    pub(crate) fn msg(secs: i64, speed: Option<u32>) -> TelemetryMessage {
        TelemetryMessage {
            timestamp: at(secs),
            level: Some(1),
            mode: Some(0),
            speed_1kph: speed,
            stm_mode: None,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_too_few_messages() {
        let engine = MetricsEngine::default();
        let profile = engine.run_sequence(&[msg(0, Some(50))]);
        assert_eq!(profile.metrics, Metrics::default());
        assert!(profile.monthly.is_empty());
        assert_eq!(profile.cumulative_km, vec![0.0]);

        let empty = engine.run_sequence(&[]);
        assert!(empty.cumulative_km.is_empty());
    }

    #[test]
    fn test_discontinuity_skips_interval() {
        let engine = MetricsEngine::new(30.0);
        let messages = [msg(0, Some(10)), msg(10, Some(10)), msg(50, Some(20))];
        let profile = engine.run_sequence(&messages);

        assert!(approx(profile.metrics.moving_time_s, 10.0));
        assert!(approx(profile.metrics.moving_distance_raw, 100.0));
        assert_eq!(profile.metrics.segments, 1);
        assert_eq!(profile.discontinuities, 1);
        assert!(approx(profile.cumulative_km[1], 100.0 / 3600.0));
        assert!(approx(profile.cumulative_km[2], 100.0 / 3600.0));
    }

    #[test]
    fn test_negative_delta_contributes_nothing() {
        let engine = MetricsEngine::default();
        let messages = [msg(100, Some(10)), msg(90, Some(10))];
        let profile = engine.run_sequence(&messages);
        assert_eq!(profile.metrics.segments, 0);
        assert!(approx(profile.metrics.total_time_s, 0.0));
        assert_eq!(profile.negative_intervals, 1);
    }

    #[test]
    fn test_standstill_and_missing_speed() {
        let engine = MetricsEngine::default();
        let messages = [
            msg(0, Some(0)),
            msg(5, Some(0)),
            msg(10, None),
            msg(20, Some(36)),
        ];
        let profile = engine.run_sequence(&messages);

        assert!(approx(profile.metrics.standstill_time_s, 5.0));
        assert!(approx(profile.metrics.moving_time_s, 10.0));
        // 36 km/h for 10 s is 100 m.
        assert!(approx(profile.metrics.total_distance_km, 0.1));
        assert_eq!(profile.metrics.segments, 2);
        assert_eq!(profile.cumulative_km, vec![0.0, 0.0, 0.0, 0.1]);
    }

    #[test]
    fn test_cumulative_is_non_decreasing() {
        let engine = MetricsEngine::default();
        let messages: Vec<_> = (0..20)
            .map(|i| msg(i * 7, if i % 3 == 0 { None } else { Some(i as u32 * 5) }))
            .collect();
        let profile = engine.run_sequence(&messages);
        for pair in profile.cumulative_km.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_month_keyed_by_interval_start() {
        let engine = MetricsEngine::default();
        // 23:59:50 on Jan 31 to 00:00:10 on Feb 1.
        let messages = [msg(50, Some(60)), msg(70, Some(60))];
        let profile = engine.run_sequence(&messages);
        let jan = MonthKey {
            year: 2024,
            month: 1,
        };
        assert_eq!(profile.monthly.len(), 1);
        assert!(approx(profile.monthly[&jan].moving_time_s, 20.0));
    }

    #[test]
    fn test_rollup_union_of_months() {
        let jan = MonthKey {
            year: 2024,
            month: 1,
        };
        let feb = MonthKey {
            year: 2024,
            month: 2,
        };
        let mut motion = BTreeMap::new();
        motion.insert(
            jan,
            MonthlyMotion {
                moving_time_s: 120.0,
                standstill_time_s: 60.0,
                moving_distance_raw: 7200.0,
                standstill_distance_raw: 0.0,
            },
        );
        let mut alarms = BTreeMap::new();
        alarms.insert(
            feb,
            MonthlyAlarms {
                standstill: 1,
                moving: 2,
            },
        );

        let rows = rollup_months(&motion, &alarms);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].month, jan);
        assert!(approx(rows[0].total_time_min, 3.0));
        assert!(approx(rows[0].moving_distance_km, 2.0));
        assert_eq!(rows[0].btm_alarm_speed_moving, 0);
        assert_eq!(rows[1].month, feb);
        assert_eq!(rows[1].btm_alarm_speed_moving, 2);
        assert!(approx(rows[1].total_distance_km, 0.0));
        assert!(approx(rows[1].alarms_per_1000_km(), 0.0));
    }

    #[test]
    fn test_alarms_per_1000_km() {
        assert!(approx(alarms_per_1000_km(3, 1500.0), 2.0));
        assert!(approx(alarms_per_1000_km(3, 0.0), 0.0));
    }
}
