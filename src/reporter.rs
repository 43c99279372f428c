//! Ingest pipeline and report production.
//!
//! A [`Reporter`] reads log files one at a time, feeding every line to the
//! antenna matchers and the block scanner. Per-file state (carried fields,
//! antenna window, open block) is dropped at each file boundary; the
//! description tables and the antenna dedup set live for the whole run.
//!
//! [`Reporter::finalize`] consumes the reporter and sorts every record list
//! exactly once into a [`Dataset`], from which a [`Report`] is computed.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::antenna::{
    AntennaStatsParser, LegacyLineMatcher, SeenSnapshots, StatsMatch, snapshot_observations,
};
use crate::config::ReporterConfig;
use crate::join::{
    AlarmContext, AntennaDeltaRow, augment_deltas, build_alarm_context, compute_antenna_deltas,
};
use crate::message::{CarryForward, DescriptionTables, parse_block};
use crate::metrics::{Metrics, MetricsEngine, MonthlyRow, rollup_months};
use crate::parser::ParseIssue;
use crate::record::{
    AntennaCounterSnapshot, AntennaId, AntennaObservation, BtmAlarmEvent, CounterSet,
    TelemetryMessage,
};
use crate::scanner::LineScanner;
use crate::stats::{IngestStats, StatsSummary};
use crate::store::ChronoStore;

/// Errors surfaced to the caller of a run.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No input files given")]
    NoInput,

    #[error("None of the {0} input files could be read")]
    NoReadableFiles(usize),
}

/// State that lives for one input file only.
struct FileContext {
    carry: CarryForward,
    antenna: AntennaStatsParser,
    scanner: LineScanner,
}

impl FileContext {
    fn new(config: &ReporterConfig) -> Self {
        Self {
            carry: CarryForward::default(),
            antenna: AntennaStatsParser::new(config.antenna_window_lines),
            scanner: LineScanner::new(),
        }
    }
}

/// Collects records from any number of log files.
#[derive(Debug)]
pub struct Reporter {
    config: ReporterConfig,
    messages: Vec<TelemetryMessage>,
    alarms: Vec<BtmAlarmEvent>,
    observations: Vec<AntennaObservation>,
    descriptions: DescriptionTables,
    seen_snapshots: SeenSnapshots,
    legacy: LegacyLineMatcher,
    stats: IngestStats,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(ReporterConfig::default())
    }
}

impl Reporter {
    pub fn new(config: ReporterConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
            alarms: Vec::new(),
            observations: Vec::new(),
            descriptions: DescriptionTables::default(),
            seen_snapshots: SeenSnapshots::new(),
            legacy: LegacyLineMatcher,
            stats: IngestStats::new(),
        }
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Parse every file in order. Unreadable files are logged and skipped.
    ///
    /// Returns the number of files read successfully.
    pub fn parse_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<usize, ReportError> {
        if paths.is_empty() {
            return Err(ReportError::NoInput);
        }

        let mut parsed = 0;
        for path in paths {
            match self.parse_file(path.as_ref()) {
                Ok(()) => parsed += 1,
                Err(e) => {
                    error!("{}", e);
                    self.stats.files_failed += 1;
                }
            }
        }

        if parsed == 0 {
            return Err(ReportError::NoReadableFiles(paths.len()));
        }
        Ok(parsed)
    }

    /// Parse a single file. Records read before an I/O error are kept.
    pub fn parse_file(&mut self, path: &Path) -> Result<(), ReportError> {
        info!("Parsing {}", path.display());
        let io_error = |source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_error)?;
        self.parse_reader(&path.display().to_string(), BufReader::new(file))
            .map_err(io_error)?;

        self.stats.files_parsed += 1;
        Ok(())
    }

    /// Parse one input stream with fresh per-file state.
    ///
    /// Undecodable bytes are replaced rather than rejected.
    pub fn parse_reader<R: BufRead>(&mut self, name: &str, mut reader: R) -> io::Result<()> {
        let mut ctx = FileContext::new(&self.config);
        let mut buf = Vec::new();

        let result = loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    self.process_line(line.trim_end_matches(['\n', '\r']), &mut ctx);
                }
                Err(e) => break Err(e),
            }
        };

        if let Some(lines) = ctx.scanner.finish() {
            warn!(
                "Unterminated block ({} lines) at end of {}; dropped",
                lines, name
            );
            self.stats.unterminated_blocks += 1;
        }

        result
    }

    fn process_line(&mut self, line: &str, ctx: &mut FileContext) {
        self.stats.lines += 1;

        if let Some(found) = ctx.antenna.observe(line, &mut self.seen_snapshots) {
            self.record_stats_match(found);
        }

        if let Some(found) = self.legacy.match_line(line) {
            match found {
                Ok(observation) => {
                    self.stats.fallback_observations += 1;
                    self.observations.push(observation);
                }
                Err(issue @ ParseIssue::UnknownCounter(_)) => {
                    debug!("Legacy antenna line ignored, not one of the six counters: {}", issue)
                }
                Err(issue) => debug!("Legacy antenna line ignored, unreadable: {}", issue),
            }
        }

        if let Some(block) = ctx.scanner.push(line) {
            self.record_block(&block, &mut ctx.carry);
        }
    }

    fn record_stats_match(&mut self, found: StatsMatch) {
        match found {
            StatsMatch::Snapshot(snapshot) => {
                self.stats.antenna_snapshots += 1;
                self.observations.extend(snapshot_observations(&snapshot));
            }
            StatsMatch::Duplicate { timestamp, antenna } => {
                warn!(
                    "Duplicate antenna-stats block skipped for antenna {} at {}",
                    antenna, timestamp
                );
                self.stats.duplicate_antenna_blocks += 1;
            }
            StatsMatch::MissingTimestamp => {
                warn!("Antenna stats matched but timestamp fields missing; skipping");
                self.stats.antenna_blocks_without_timestamp += 1;
            }
            StatsMatch::Invalid(issue) => {
                warn!("Antenna stats parse: {}", issue);
                self.stats.field_issues += 1;
            }
        }
    }

    fn record_block(&mut self, block: &[String], carry: &mut CarryForward) {
        self.stats.record_block(block.len());
        let outcome = parse_block(block, carry, &mut self.descriptions);

        for issue in &outcome.issues {
            debug!("Field issue: {}", issue);
        }
        self.stats.field_issues += outcome.issues.len() as u64;

        match outcome.message {
            Some(message) => {
                self.stats.messages += 1;
                self.messages.push(message);
            }
            None => {
                debug!("Block without usable timestamp dropped");
                self.stats.blocks_without_timestamp += 1;
            }
        }

        if let Some(alarm) = outcome.alarm {
            self.stats.alarms += 1;
            self.alarms.push(alarm);
        }
    }

    /// Stop ingesting and sort everything once.
    pub fn finalize(self) -> Dataset {
        let snapshots = aggregate_observations(&self.observations);
        let dataset = Dataset {
            config: self.config,
            messages: ChronoStore::from_unsorted(self.messages),
            alarms: ChronoStore::from_unsorted(self.alarms),
            snapshots: ChronoStore::from_unsorted(snapshots),
            observations: self.observations.len(),
            descriptions: self.descriptions,
            stats: self.stats.summary(),
        };

        info!(
            "Finalized {} messages, {} alarm records, {} antenna observations",
            dataset.messages.len(),
            dataset.alarms.len(),
            dataset.observations
        );
        dataset
    }
}

/// Group observations by (timestamp, antenna); the last value seen for a flag wins.
fn aggregate_observations(observations: &[AntennaObservation]) -> Vec<AntennaCounterSnapshot> {
    let mut index: HashMap<(NaiveDateTime, AntennaId), usize> = HashMap::new();
    let mut snapshots: Vec<AntennaCounterSnapshot> = Vec::new();

    for obs in observations {
        let slot = *index.entry((obs.timestamp, obs.antenna)).or_insert_with(|| {
            snapshots.push(AntennaCounterSnapshot {
                timestamp: obs.timestamp,
                antenna: obs.antenna,
                counters: CounterSet::default(),
            });
            snapshots.len() - 1
        });
        snapshots[slot].counters.set(obs.flag, obs.value);
    }

    snapshots
}

/// Sorted, read-only records of a finished ingest.
#[derive(Debug)]
pub struct Dataset {
    pub config: ReporterConfig,
    pub messages: ChronoStore<TelemetryMessage>,
    pub alarms: ChronoStore<BtmAlarmEvent>,
    pub snapshots: ChronoStore<AntennaCounterSnapshot>,

    /// Antenna observations before grouping into snapshots.
    pub observations: usize,
    pub descriptions: DescriptionTables,
    pub stats: StatsSummary,
}

impl Dataset {
    /// Compute metrics, antenna deltas and alarm context.
    pub fn produce(&self) -> Report {
        let engine = MetricsEngine::new(self.config.max_delta_time_s);
        let profile = engine.run(&self.messages);

        let mut delta_rows = compute_antenna_deltas(&self.snapshots);
        augment_deltas(&mut delta_rows, &self.messages, &profile.cumulative_km);
        let deltas = ChronoStore::from_unsorted(delta_rows);

        let alarm_context = build_alarm_context(
            &self.alarms,
            &self.messages,
            &deltas,
            self.config.max_delta_stat_counters_s,
        );

        let mut metrics = profile.metrics;
        metrics.btm_alarm_speed_zero = alarm_context.speed_zero;
        metrics.btm_alarm_speed_moving = alarm_context.speed_moving;

        let monthly = rollup_months(&profile.monthly, &alarm_context.monthly);

        info!(
            "Report: {} segments, {} discontinuities, {} antenna delta rows, {} active alarms",
            metrics.segments,
            profile.discontinuities,
            deltas.len(),
            alarm_context.rows.len()
        );

        Report {
            metrics,
            monthly,
            deltas,
            alarm_context,
            discontinuities: profile.discontinuities,
            negative_intervals: profile.negative_intervals,
        }
    }
}

/// Everything derived from a [`Dataset`].
#[derive(Debug, Clone)]
pub struct Report {
    pub metrics: Metrics,
    pub monthly: Vec<MonthlyRow>,
    pub deltas: ChronoStore<AntennaDeltaRow>,
    pub alarm_context: AlarmContext,
    pub discontinuities: u64,
    pub negative_intervals: u64,
}
