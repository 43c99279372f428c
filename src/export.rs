//! CSV export of the summary, antenna deltas and alarm context tables.
//!
//! Each table is written independently; [`export_all`] logs a failure in one
//! and still attempts the others.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use csv::Writer;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::join::{AlarmContextRow, AntennaDeltaRow};
use crate::message::DescriptionTables;
use crate::record::CounterFlag;
use crate::report::{SummaryTable, stm_mode_code};
use crate::reporter::Report;

pub const SUMMARY_FILE: &str = "summary.csv";
pub const ANTENNA_DELTAS_FILE: &str = "antenna_deltas.csv";
pub const ALARM_CONTEXT_FILE: &str = "btm_alarm_context.csv";

fn iso(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn start_csv<W: io::Write>(out: W, headers: &[String]) -> Result<Writer<W>> {
    let mut wtr = Writer::from_writer(out);
    wtr.write_record(headers).context("Failed to write CSV header")?;
    Ok(wtr)
}

/// Write the monthly summary table (header only when there are no months).
///
/// The TOTAL row's distance is the sum of the monthly total distances, which
/// include distance logged at standstill speeds. Older tooling summed the
/// moving distance here instead; only the alarm rate still uses it.
pub fn write_summary<W: io::Write>(out: W, table: &SummaryTable) -> Result<()> {
    let headers: Vec<String> = SummaryTable::HEADERS.iter().map(|h| h.to_string()).collect();
    let mut wtr = start_csv(out, &headers)?;
    for row in table.all_rows() {
        wtr.write_record(row.cells())?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn antenna_delta_headers() -> Vec<String> {
    let mut headers: Vec<String> = ["dt", "antenna", "speed_kph", "cum_distance"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    headers.extend(CounterFlag::ALL.iter().map(|f| format!("delta_{}", f.as_str())));
    headers
}

/// Write antenna delta rows in the order given.
pub fn write_antenna_deltas<W: io::Write>(out: W, rows: &[AntennaDeltaRow]) -> Result<()> {
    let mut wtr = start_csv(out, &antenna_delta_headers())?;
    for row in rows {
        let mut record = vec![
            iso(&row.timestamp),
            row.antenna.to_string(),
            opt(row.speed_1kph),
            row.cumulative_distance_km
                .map(|km| format!("{:.3}", km))
                .unwrap_or_default(),
        ];
        record.extend(row.deltas.values().iter().map(u64::to_string));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn alarm_context_headers() -> Vec<String> {
    let mut headers: Vec<String> = [
        "btm_alarm_timestamp",
        "m_mode",
        "m_mode_str",
        "STM_MODE",
        "current_speed_1kph",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect();
    headers.extend(
        CounterFlag::ALL
            .iter()
            .map(|f| format!("delta_{}", f.as_str().to_ascii_lowercase())),
    );
    headers
}

/// Write alarm context rows; unavailable deltas become empty cells.
pub fn write_alarm_context<W: io::Write>(
    out: W,
    rows: &[AlarmContextRow],
    descriptions: &DescriptionTables,
) -> Result<()> {
    let mut wtr = start_csv(out, &alarm_context_headers())?;
    for row in rows {
        let mode_str = row
            .mode
            .and_then(|m| descriptions.mode_description(m))
            .unwrap_or("");
        let mut record = vec![
            iso(&row.alarm_timestamp),
            opt(row.mode),
            mode_str.to_string(),
            stm_mode_code(row.stm_mode).to_string(),
            opt(row.speed_1kph),
        ];
        record.extend(
            CounterFlag::ALL
                .iter()
                .map(|flag| opt(row.deltas.map(|d| d.get(*flag)))),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn create(path: &Path) -> Result<fs::File> {
    fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}

/// Paths of the files actually written.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExportOutcome {
    pub written: Vec<PathBuf>,
    pub failed: usize,
}

/// Write all three tables into `out_dir`, creating it when needed.
///
/// The summary is always written; the antenna and alarm tables only when they
/// have rows.
pub fn export_all(
    out_dir: &Path,
    report: &Report,
    descriptions: &DescriptionTables,
) -> Result<ExportOutcome> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Cannot create output directory {}", out_dir.display()))?;

    let mut outcome = ExportOutcome::default();
    let mut record = |name: &str, result: Result<()>| {
        let path = out_dir.join(name);
        match result {
            Ok(()) => {
                info!("{} written: {}", name, path.display());
                outcome.written.push(path);
            }
            Err(e) => {
                warn!("Failed writing {}: {:#}", name, e);
                outcome.failed += 1;
            }
        }
    };

    let table = SummaryTable::from_monthly(&report.monthly);
    if table.is_empty() {
        warn!("No monthly metrics computed; writing empty summary");
    }
    let path = out_dir.join(SUMMARY_FILE);
    record(
        SUMMARY_FILE,
        create(&path).and_then(|f| write_summary(f, &table)),
    );

    if report.deltas.is_empty() {
        warn!("No antenna deltas to export");
    } else {
        let path = out_dir.join(ANTENNA_DELTAS_FILE);
        record(
            ANTENNA_DELTAS_FILE,
            create(&path).and_then(|f| write_antenna_deltas(f, report.deltas.as_slice())),
        );
    }

    if report.alarm_context.rows.is_empty() {
        info!("No BTM alarm context data to export");
    } else {
        let path = out_dir.join(ALARM_CONTEXT_FILE);
        record(
            ALARM_CONTEXT_FILE,
            create(&path).and_then(|f| {
                write_alarm_context(f, &report.alarm_context.rows, descriptions)
            }),
        );
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::CounterDeltas;
    use crate::metrics::MonthlyRow;
    use crate::metrics::tests::at;
    use crate::record::{AntennaId, MonthKey};

    fn to_string(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn delta_row() -> AntennaDeltaRow {
        AntennaDeltaRow {
            timestamp: at(0),
            antenna: AntennaId::B,
            deltas: CounterDeltas::default(),
            baseline: true,
            speed_1kph: Some(80),
            cumulative_distance_km: Some(1.23456),
        }
    }

    fn alarm_row(deltas: Option<CounterDeltas>) -> AlarmContextRow {
        AlarmContextRow {
            alarm_timestamp: at(30),
            level: Some(2),
            mode: Some(0),
            speed_1kph: None,
            stm_mode: Some(4),
            deltas,
            delta_timestamp: None,
        }
    }

    #[test]
    fn test_summary_csv() {
        let table = SummaryTable::from_monthly(&[MonthlyRow {
            month: MonthKey { year: 2024, month: 1 },
            total_distance_km: 10.4,
            total_time_min: 30.0,
            moving_time_min: 20.0,
            standstill_time_min: 10.0,
            btm_alarm_speed_zero: 0,
            btm_alarm_speed_moving: 1,
            moving_distance_km: 10.0,
        }]);
        let text = to_string(|buf| write_summary(buf, &table));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Month,Total distance (km)"));
        assert_eq!(lines[1], "2024-01,10,30,20,10,0,1,100");
        assert_eq!(lines[2], "TOTAL,10,30,20,10,0,1,100");
    }

    #[test]
    fn test_antenna_deltas_csv() {
        let text = to_string(|buf| write_antenna_deltas(buf, &[delta_row()]));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "dt,antenna,speed_kph,cum_distance,delta_PERFORMED,delta_FAILED,\
             delta_FAILED_BALISE_VICINITY,delta_FAILED_NOISE_SUSPICION,\
             delta_INCORRECT_PAM,delta_INCORRECT_LEVEL"
        );
        assert_eq!(lines[1], "2024-01-31T23:59:00,B,80,1.235,0,0,0,0,0,0");
    }

    #[test]
    fn test_alarm_context_csv_blank_deltas() {
        let mut descriptions = DescriptionTables::default();
        descriptions.mode.insert(0, "FULL SUPERVISION".to_string());

        let text = to_string(|buf| {
            write_alarm_context(buf, &[alarm_row(None)], &descriptions)
        });
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("btm_alarm_timestamp,m_mode,m_mode_str,STM_MODE"));
        assert!(lines[0].ends_with("delta_incorrect_level"));
        assert_eq!(lines[1], "2024-01-31T23:59:30,0,FULL SUPERVISION,HS,,,,,,,");
    }

    #[test]
    fn test_export_all_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        let report = Report {
            metrics: Default::default(),
            monthly: Vec::new(),
            deltas: crate::store::ChronoStore::from_unsorted(vec![delta_row()]),
            alarm_context: Default::default(),
            discontinuities: 0,
            negative_intervals: 0,
        };

        let outcome = export_all(&out, &report, &DescriptionTables::default()).unwrap();
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.written.len(), 2);
        assert!(out.join(SUMMARY_FILE).exists());
        assert!(out.join(ANTENNA_DELTAS_FILE).exists());
        assert!(!out.join(ALARM_CONTEXT_FILE).exists());

        let summary = fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
        assert_eq!(summary.lines().count(), 1);
    }
}
