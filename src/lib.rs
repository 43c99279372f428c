//! JRU Report - A Rust library and CLI for analysing JRU/DRU juridical recorder logs.
//!
//! This crate provides:
//! - A line scanner and nom-based field parser for recorder message blocks
//! - Multi-line and single-line extraction of BTM antenna self-test counters
//! - Time-ordered record stores with binary-search lookups
//! - Moving/standstill time and distance metrics with monthly roll-ups
//! - Antenna counter deltas and BTM alarm context joins
//! - Ingest statistics with HDR histograms and CSV export
//!
//! # Example
//!
//! ```rust,no_run
//! use jru_report::{config::ReporterConfig, reporter::Reporter};
//!
//! let mut reporter = Reporter::new(ReporterConfig::default());
//! reporter.parse_files(&["trip.log"]).expect("No readable input");
//!
//! let dataset = reporter.finalize();
//! let report = dataset.produce();
//!
//! println!("{}", report.metrics);
//! println!("{}", dataset.stats);
//! ```

pub mod antenna;
pub mod config;
pub mod export;
pub mod join;
pub mod message;
pub mod metrics;
pub mod parser;
pub mod record;
pub mod report;
pub mod reporter;
pub mod scanner;
pub mod stats;
pub mod store;

pub use antenna::{AntennaStatsParser, LegacyLineMatcher, StatsMatch};
pub use config::{Config, ReporterConfig};
pub use join::{AlarmContext, AlarmContextRow, AntennaDeltaRow, CounterDeltas};
pub use message::{BlockOutcome, CarryForward, DescriptionTables, parse_block};
pub use metrics::{Metrics, MetricsEngine, MonthlyRow};
pub use parser::{ParseIssue, is_unknown, parse_field_line};
pub use record::{
    AntennaCounterSnapshot, AntennaId, AntennaObservation, BtmAlarmEvent, CounterFlag,
    CounterSet, MonthKey, TelemetryMessage,
};
pub use report::{SummaryTable, stm_mode_code};
pub use reporter::{Dataset, Report, ReportError, Reporter};
pub use scanner::LineScanner;
pub use stats::{IngestStats, StatsSummary};
pub use store::{ChronoStore, Timestamped};
