//! JRU/DRU Reporter CLI - Parse juridical recorder logs and report motion and BTM alarm metrics.

use anyhow::{Context, Result};
use clap::Parser;
use jru_report::{
    config::Config,
    export::export_all,
    report::SummaryTable,
    reporter::{ReportError, Reporter},
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// JRU/DRU Reporter - Motion metrics, antenna counter deltas and BTM alarm context
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input log files, processed in the order given
    files: Vec<PathBuf>,

    /// Max delta (s) between messages before considering a reset
    #[arg(long, env = "JRU_MAX_DELTA_TIME")]
    max_delta_time: Option<u64>,

    /// Max minutes between an alarm and the antenna snapshot used for its deltas
    #[arg(long, env = "JRU_MAX_DELTA_STAT_COUNTERS_MIN")]
    max_delta_stat_counters_min: Option<u64>,

    /// Directory to write the CSV files to (default: directory of the first input file)
    #[arg(long, env = "JRU_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// Config file (default: platform config dir, jru-report/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the headline metrics as JSON
    #[arg(long)]
    json: bool,

    /// Print ingest statistics after parsing
    #[arg(short, long)]
    stats: bool,

    /// Skip CSV export
    #[arg(long)]
    no_export: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(&args)?;
    info!(
        "max_delta_time={}s, max_delta_stat_counters={}min",
        config.max_delta_time_s, config.max_delta_stat_counters_min
    );

    let mut reporter = Reporter::new(config.reporter_config());
    match reporter.parse_files(&args.files) {
        Ok(parsed) => info!("Parsed {} of {} files", parsed, args.files.len()),
        Err(e @ (ReportError::NoInput | ReportError::NoReadableFiles(_))) => {
            error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context("Parsing failed"),
    }

    let dataset = reporter.finalize();
    let report = dataset.produce();

    println!("[SUMMARY] Parsed {} JRU Msg 3 entries", dataset.messages.len());
    println!(
        "[SUMMARY] Parsed {} antenna test records",
        dataset.observations
    );
    println!("[SUMMARY] Parsed {} Q_BTM_ALARM records", dataset.alarms.len());
    println!("[SUMMARY] M_LEVEL map: {:?}", dataset.descriptions.level);
    println!("[SUMMARY] M_MODE map: {:?}", dataset.descriptions.mode);

    if args.json {
        let json = serde_json::to_string_pretty(&report.metrics)
            .context("Failed to serialize metrics")?;
        println!("{}", json);
    } else {
        print!("{}", report.metrics);
        println!("Context rows: {}", report.alarm_context.rows.len());
        println!();
        print!("{}", SummaryTable::from_monthly(&report.monthly));
    }

    if args.stats {
        println!("\n{}", dataset.stats);
    }

    if args.no_export {
        return Ok(ExitCode::SUCCESS);
    }

    match resolve_out_dir(args.out_dir.as_deref(), config.out_dir.as_deref(), &args.files) {
        Some(dir) => {
            let outcome = export_all(&dir, &report, &dataset.descriptions)?;
            if outcome.failed > 0 {
                warn!("{} export(s) failed", outcome.failed);
            }
        }
        None => warn!("No output directory resolved; skipping exports"),
    }

    Ok(ExitCode::SUCCESS)
}

/// Load the config file and apply command line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(secs) = args.max_delta_time {
        config.max_delta_time_s = secs;
    }
    if let Some(minutes) = args.max_delta_stat_counters_min {
        config.max_delta_stat_counters_min = minutes;
    }

    config.validate()?;
    Ok(config)
}

/// Output directory: command line, then config file, then the directory of
/// the first input file.
fn resolve_out_dir(
    cli: Option<&Path>,
    configured: Option<&Path>,
    files: &[PathBuf],
) -> Option<PathBuf> {
    if let Some(dir) = cli.or(configured) {
        return Some(dir.to_path_buf());
    }

    let first = files.first()?;
    let absolute = std::path::absolute(first).ok()?;
    let dir = absolute.parent()?.to_path_buf();
    info!("Output directory fallback to: {}", dir.display());
    Some(dir)
}
