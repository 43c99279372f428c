//! Ingest statistics.
//!
//! Counts what the parsers saw and dropped while reading the input files,
//! plus the distribution of message block sizes.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Statistics collector owned by the reporter during ingest.
#[derive(Debug)]
pub struct IngestStats {
    /// Files read to the end
    pub files_parsed: u64,

    /// Files that could not be opened or stopped with a read error
    pub files_failed: u64,

    /// Total lines scanned
    pub lines: u64,

    /// Complete message blocks handed to the block parser
    pub blocks: u64,

    /// Blocks still open at end of file (dropped)
    pub unterminated_blocks: u64,

    /// Telemetry messages emitted
    pub messages: u64,

    /// Blocks dropped for lack of a usable timestamp
    pub blocks_without_timestamp: u64,

    /// BTM alarm events emitted
    pub alarms: u64,

    /// Field-level parse issues (value treated as absent)
    pub field_issues: u64,

    /// Antenna snapshots from the multi-line matcher
    pub antenna_snapshots: u64,

    /// Multi-line antenna groups already seen
    pub duplicate_antenna_blocks: u64,

    /// Multi-line antenna groups without a timestamp in the window
    pub antenna_blocks_without_timestamp: u64,

    /// Observations from the single-line legacy matcher
    pub fallback_observations: u64,

    /// Lines per message block
    block_lines: Histogram<u64>,

    start_time: Instant,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            files_parsed: 0,
            files_failed: 0,
            lines: 0,
            blocks: 0,
            unterminated_blocks: 0,
            messages: 0,
            blocks_without_timestamp: 0,
            alarms: 0,
            field_issues: 0,
            antenna_snapshots: 0,
            duplicate_antenna_blocks: 0,
            antenna_blocks_without_timestamp: 0,
            fallback_observations: 0,
            // 1 to 100k lines per block, 3 significant figures
            block_lines: Histogram::new_with_bounds(1, 100_000, 3)
                .expect("Failed to create block size histogram"),
            start_time: Instant::now(),
        }
    }

    /// Record a complete block and its line count.
    pub fn record_block(&mut self, lines: usize) {
        self.blocks += 1;
        let _ = self.block_lines.record((lines as u64).clamp(1, 100_000));
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Lines scanned per second since collection started.
    pub fn lines_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.lines as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> StatsSummary {
        let block_size = (self.block_lines.len() > 0).then(|| BlockSizePercentiles {
            p50: self.block_lines.value_at_quantile(0.50),
            p90: self.block_lines.value_at_quantile(0.90),
            p99: self.block_lines.value_at_quantile(0.99),
            min: self.block_lines.min(),
            max: self.block_lines.max(),
            mean: self.block_lines.mean(),
        });

        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            files_parsed: self.files_parsed,
            files_failed: self.files_failed,
            lines: self.lines,
            lines_per_second: self.lines_per_second(),
            blocks: self.blocks,
            unterminated_blocks: self.unterminated_blocks,
            messages: self.messages,
            blocks_without_timestamp: self.blocks_without_timestamp,
            alarms: self.alarms,
            field_issues: self.field_issues,
            antenna_snapshots: self.antenna_snapshots,
            duplicate_antenna_blocks: self.duplicate_antenna_blocks,
            antenna_blocks_without_timestamp: self.antenna_blocks_without_timestamp,
            fallback_observations: self.fallback_observations,
            block_size,
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile values of the block size histogram.
#[derive(Debug, Clone, Serialize)]
pub struct BlockSizePercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

/// Snapshot of collected statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub files_parsed: u64,
    pub files_failed: u64,
    pub lines: u64,
    pub lines_per_second: f64,
    pub blocks: u64,
    pub unterminated_blocks: u64,
    pub messages: u64,
    pub blocks_without_timestamp: u64,
    pub alarms: u64,
    pub field_issues: u64,
    pub antenna_snapshots: u64,
    pub duplicate_antenna_blocks: u64,
    pub antenna_blocks_without_timestamp: u64,
    pub fallback_observations: u64,
    pub block_size: Option<BlockSizePercentiles>,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f, "                  JRU/DRU INGEST STATISTICS")?;
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f)?;
        writeln!(f, "Runtime: {:.1}s", self.elapsed_secs)?;
        writeln!(
            f,
            "Files: {} parsed, {} failed",
            self.files_parsed, self.files_failed
        )?;
        writeln!(
            f,
            "Lines: {} ({:.0} lines/sec)",
            self.lines, self.lines_per_second
        )?;
        writeln!(
            f,
            "Blocks: {} complete, {} unterminated, {} without timestamp",
            self.blocks, self.unterminated_blocks, self.blocks_without_timestamp
        )?;
        writeln!(f, "Messages: {}", self.messages)?;
        writeln!(f, "BTM alarm records: {}", self.alarms)?;
        writeln!(f, "Field issues: {}", self.field_issues)?;
        writeln!(
            f,
            "Antenna snapshots: {} ({} duplicates, {} without timestamp)",
            self.antenna_snapshots,
            self.duplicate_antenna_blocks,
            self.antenna_blocks_without_timestamp
        )?;
        writeln!(f, "Legacy antenna observations: {}", self.fallback_observations)?;

        if let Some(ref p) = self.block_size {
            writeln!(f)?;
            writeln!(f, "Block Size Distribution (lines):")?;
            writeln!(f, "  Min: {}, Max: {}, Mean: {:.1}", p.min, p.max, p.mean)?;
            writeln!(f, "  P50: {}, P90: {}, P99: {}", p.p50, p.p90, p.p99)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_block() {
        let mut stats = IngestStats::new();
        stats.record_block(12);
        stats.record_block(14);

        assert_eq!(stats.blocks, 2);
        let summary = stats.summary();
        let sizes = summary.block_size.unwrap();
        assert_eq!(sizes.min, 12);
        assert_eq!(sizes.max, 14);
    }

    #[test]
    fn test_empty_summary_has_no_distribution() {
        let stats = IngestStats::new();
        let summary = stats.summary();
        assert!(summary.block_size.is_none());
        assert_eq!(summary.lines, 0);
    }

    #[test]
    fn test_summary_display() {
        let mut stats = IngestStats::new();
        stats.lines = 100;
        stats.messages = 3;
        stats.files_failed = 1;
        stats.record_block(10);

        let text = stats.summary().to_string();
        assert!(text.contains("Messages: 3"));
        assert!(text.contains("0 parsed, 1 failed"));
        assert!(text.contains("Block Size Distribution"));
    }
}
