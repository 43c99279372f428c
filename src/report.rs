//! Output shaping shared by the CSV export and the console summary.

use serde::Serialize;
use std::fmt;

use crate::metrics::{MonthlyRow, alarms_per_1000_km};

/// Label of the trailing totals row.
pub const TOTAL_LABEL: &str = "TOTAL";

/// Short code for an STM mode value.
pub fn stm_mode_code(stm_mode: Option<u32>) -> &'static str {
    match stm_mode {
        Some(3) => "CS",
        Some(4) => "HS",
        Some(5) => "DA",
        _ => "unknown",
    }
}

/// One line of the summary table, monthly or totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub label: String,
    pub total_distance_km: f64,
    pub total_time_min: f64,
    pub moving_time_min: f64,
    pub standstill_time_min: f64,
    pub btm_alarms_standstill: u64,
    pub btm_alarms_moving: u64,
    pub alarms_per_1000_km: f64,
}

impl SummaryRow {
    fn from_month(row: &MonthlyRow) -> Self {
        Self {
            label: row.month.to_string(),
            total_distance_km: row.total_distance_km,
            total_time_min: row.total_time_min,
            moving_time_min: row.moving_time_min,
            standstill_time_min: row.standstill_time_min,
            btm_alarms_standstill: row.btm_alarm_speed_zero,
            btm_alarms_moving: row.btm_alarm_speed_moving,
            alarms_per_1000_km: row.alarms_per_1000_km(),
        }
    }

    /// Cells as written to CSV, numbers rounded to integers.
    pub fn cells(&self) -> [String; 8] {
        [
            self.label.clone(),
            format!("{:.0}", self.total_distance_km),
            format!("{:.0}", self.total_time_min),
            format!("{:.0}", self.moving_time_min),
            format!("{:.0}", self.standstill_time_min),
            self.btm_alarms_standstill.to_string(),
            self.btm_alarms_moving.to_string(),
            format!("{:.0}", self.alarms_per_1000_km),
        ]
    }
}

/// Monthly rows followed by a totals row (absent when there are no months).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryTable {
    pub rows: Vec<SummaryRow>,
    pub total: Option<SummaryRow>,
}

impl SummaryTable {
    pub const HEADERS: [&'static str; 8] = [
        "Month",
        "Total distance (km)",
        "Total time (min)",
        "Moving time (min)",
        "Standstill time (min)",
        "BTM alarms (standstill)",
        "BTM alarms (moving)",
        "BTM alarms per 1000 km",
    ];

    /// Build the table from monthly rows.
    ///
    /// TOTAL sums each column; its distance is the summed total distance, not
    /// the moving distance. The rate is recomputed from the summed moving
    /// alarms and moving distance.
    pub fn from_monthly(monthly: &[MonthlyRow]) -> Self {
        let rows: Vec<SummaryRow> = monthly.iter().map(SummaryRow::from_month).collect();
        if monthly.is_empty() {
            return Self { rows, total: None };
        }

        let moving_distance_km: f64 = monthly.iter().map(|m| m.moving_distance_km).sum();
        let moving_alarms: u64 = monthly.iter().map(|m| m.btm_alarm_speed_moving).sum();

        let total = SummaryRow {
            label: TOTAL_LABEL.to_string(),
            total_distance_km: rows.iter().map(|r| r.total_distance_km).sum(),
            total_time_min: rows.iter().map(|r| r.total_time_min).sum(),
            moving_time_min: rows.iter().map(|r| r.moving_time_min).sum(),
            standstill_time_min: rows.iter().map(|r| r.standstill_time_min).sum(),
            btm_alarms_standstill: rows.iter().map(|r| r.btm_alarms_standstill).sum(),
            btm_alarms_moving: moving_alarms,
            alarms_per_1000_km: alarms_per_1000_km(moving_alarms, moving_distance_km),
        };

        Self {
            rows,
            total: Some(total),
        }
    }

    /// Monthly rows then the totals row.
    pub fn all_rows(&self) -> impl Iterator<Item = &SummaryRow> {
        self.rows.iter().chain(self.total.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for SummaryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<8} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8} {:>10}",
            "Month", "Dist km", "Time min", "Moving", "Standst.", "Alm 0", "Alm >0", "Alm/1000"
        )?;
        for row in self.all_rows() {
            let c = row.cells();
            writeln!(
                f,
                "{:<8} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8} {:>10}",
                c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]
            )?;
        }
        Ok(())
    }
}
