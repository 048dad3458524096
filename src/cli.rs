//! CLI definition and dispatch.

use chrono::Local;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use crate::adapters::csv_audit_log::CsvAuditLog;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::snapshot_feed::{parse_timestamp, SnapshotFeed};
use crate::domain::churn::ChurnControlEngine;
use crate::domain::config_validation::{
    parse_horizons, validate_scanner_config, validate_tracker_config,
};
use crate::domain::error::ChurnwatchError;
use crate::domain::opportunity::{
    summarize_evals, validate_window, MissedOpportunityTracker, OpportunitySummary, TrackerConfig,
};
use crate::domain::scan::{ScanResult, ScannerConfig};
use crate::ports::config_port::ConfigPort;

#[derive(Parser, Debug)]
#[command(
    name = "churnwatch",
    about = "Rate-limited watch-universe control with missed-opportunity tracking"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a snapshot feed through the scanner and opportunity tracker
    Replay {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        feed: PathBuf,
        /// Overrides [tracker] logs_dir
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// Scan the first tick of a feed and print the result as JSON
    Scan {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        feed: PathBuf,
        /// Comma-separated current universe
        #[arg(long)]
        current: Option<String>,
    },
    /// Validate the [scanner] and [tracker] sections of a config file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Summarize an opportunity evaluation log
    Summarize {
        #[arg(long)]
        eval_log: PathBuf,
        /// Window in minutes (1 to 525600)
        #[arg(long, default_value_t = 60, allow_negative_numbers = true)]
        window: i64,
        /// Reference time (defaults to now)
        #[arg(long)]
        now: Option<String>,
    },
}

/// Tracker settings read from the `[tracker]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub tracker: TrackerConfig,
    pub logs_dir: PathBuf,
    pub summary_window_minutes: i64,
}

/// Outcome of a full replay.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub ticks: usize,
    pub scans: usize,
    pub failed_scans: usize,
    pub missed_recorded: usize,
    pub evaluations: usize,
    pub pending: usize,
    pub final_universe: Vec<String>,
    pub summary: Option<OpportunitySummary>,
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Replay {
            config,
            feed,
            logs_dir,
        } => run_replay(&config, &feed, logs_dir.as_deref()),
        Command::Scan {
            config,
            feed,
            current,
        } => run_scan(&config, &feed, current.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::Summarize {
            eval_log,
            window,
            now,
        } => run_summarize(&eval_log, window, now.as_deref()),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(fail)
}

fn fail(err: ChurnwatchError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn build_scanner_config(adapter: &dyn ConfigPort) -> Result<ScannerConfig, ChurnwatchError> {
    validate_scanner_config(adapter)?;
    let defaults = ScannerConfig::default();
    let config = ScannerConfig {
        max_watch: get_count(adapter, "scanner", "max_watch", defaults.max_watch)?,
        max_replacements_per_scan: get_count(
            adapter,
            "scanner",
            "max_replacements_per_scan",
            defaults.max_replacements_per_scan,
        )?,
        override_margin: adapter.get_double("scanner", "override_margin", defaults.override_margin),
        override_max_extra: get_count(
            adapter,
            "scanner",
            "override_max_extra",
            defaults.override_max_extra,
        )?,
        incumbent_bonus: adapter.get_double("scanner", "incumbent_bonus", defaults.incumbent_bonus),
        strong_rank_cutoff: get_count(
            adapter,
            "scanner",
            "strong_rank_cutoff",
            defaults.strong_rank_cutoff,
        )?,
        strong_topk: get_count(adapter, "scanner", "strong_topk", defaults.strong_topk)?,
    };
    config.validate()?;
    Ok(config)
}

pub fn build_tracker_settings(adapter: &dyn ConfigPort) -> Result<TrackerSettings, ChurnwatchError> {
    validate_tracker_config(adapter)?;
    let defaults = TrackerConfig::default();
    let lookahead_minutes = match adapter.get_string("tracker", "lookahead_minutes") {
        Some(raw) => parse_horizons(&raw)?,
        None => defaults.lookahead_minutes,
    };
    let max_age_days = u32::try_from(adapter.get_int(
        "tracker",
        "max_age_days",
        i64::from(defaults.max_age_days),
    ))
    .map_err(|_| ChurnwatchError::invalid("tracker", "max_age_days", "out of range"))?;

    let tracker = TrackerConfig {
        lookahead_minutes,
        max_records: get_count(adapter, "tracker", "max_records", defaults.max_records)?,
        max_age_days,
    };
    tracker.validate()?;
    let summary_window_minutes = adapter.get_int("tracker", "summary_window_minutes", 60);
    validate_window(summary_window_minutes)?;

    Ok(TrackerSettings {
        tracker,
        logs_dir: adapter
            .get_string("tracker", "logs_dir")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("opportunity")),
        summary_window_minutes,
    })
}

fn get_count(
    adapter: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, ChurnwatchError> {
    let fallback = i64::try_from(default).unwrap_or(i64::MAX);
    usize::try_from(adapter.get_int(section, key, fallback))
        .map_err(|_| ChurnwatchError::invalid(section, key, format!("{key} must not be negative")))
}

/// Drive every tick of `feed` through scan, record, evaluate and summarize.
///
/// The applied universe of each scan becomes the current universe of the
/// next. A tick whose scan fails is logged and skipped; the universe carries
/// over unchanged.
pub fn run_replay_loop(
    feed: &SnapshotFeed,
    scanner: ScannerConfig,
    tracker: &mut MissedOpportunityTracker,
    summary_window_minutes: i64,
) -> Result<ReplayReport, ChurnwatchError> {
    let engine = ChurnControlEngine::new(feed, scanner)?;
    let mut sink = |line: &str| info!(target: "churnwatch::tracker", "{line}");
    let mut report = ReplayReport {
        ticks: feed.len(),
        ..ReplayReport::default()
    };
    let mut current: Vec<String> = Vec::new();

    for (idx, tick) in feed.ticks().iter().enumerate() {
        feed.seek(idx);
        let candidates = tick.candidates();
        if candidates.iter().all(|s| s.trim().is_empty()) {
            info!(ts = %tick.ts, "[SCANNER] empty candidates, skipping scan");
            continue;
        }

        let result = match engine.scan_at(tick.ts, &candidates, &current, tick.metrics()) {
            Ok(result) => result,
            Err(e) => {
                warn!(ts = %tick.ts, error = %e, "[SCANNER] scan failed, universe unchanged");
                report.failed_scans += 1;
                continue;
            }
        };
        report.scans += 1;
        log_scan(&result, engine.config());
        current = result.applied_universe.clone();

        if !result.missed_new_strong.is_empty() {
            let snapshot = tick.price_snapshot(&result.missed_new_strong);
            report.missed_recorded += tracker.record_missed(&result, &snapshot, Some(&mut sink));
        }
        report.evaluations += tracker.evaluate_pending(feed, Some(tick.ts), Some(&mut sink));

        let summary = tracker.summarize(summary_window_minutes, Some(tick.ts));
        if summary.missed_strong > 0 {
            log_summary(&summary);
        }
        report.summary = Some(summary);
    }

    report.pending = tracker.pending_count();
    report.final_universe = current;
    Ok(report)
}

fn log_scan(result: &ScanResult, config: &ScannerConfig) {
    info!(
        "[SCANNER] ts={} raw={} filtered={} desired={} applied={}",
        result.ts_scan,
        result.raw_count,
        result.filtered_count,
        result.desired_universe.len(),
        result.applied_universe.len()
    );
    info!(
        "[SCANNER_CHURN] desired_swaps={} allowed={} override_extra={} applied_swaps={}",
        result.desired_swaps, result.allowed_swaps, result.override_extra, result.applied_swaps
    );
    if result.override_triggered {
        let worst = result
            .worst_incumbent_score
            .map_or_else(|| "None".to_string(), |s| format!("{s:.4}"));
        let examples: Vec<&str> = result
            .override_added
            .iter()
            .take(5)
            .map(String::as_str)
            .collect();
        info!(
            "[SCANNER_OVERRIDE] triggered=true margin={} worst_incumbent={} examples=[{}]",
            config.override_margin,
            worst,
            examples.join(",")
        );
    }
}

fn log_summary(summary: &OpportunitySummary) {
    let stats = summary.to_map();
    let get = |key: &str| stats.get(key).copied().unwrap_or(0.0);
    info!(
        "[OPPORTUNITY_SUMMARY] window={}m missed={} avg_5m={:.2} avg_15m={:.2} pos_15m={:.1}%",
        summary.window_minutes,
        summary.missed_strong,
        get("avg_5m"),
        get("avg_15m"),
        get("pos_15m")
    );
}

fn run_replay(config_path: &Path, feed_path: &Path, logs_dir: Option<&Path>) -> ExitCode {
    info!(config = %config_path.display(), "loading config");
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let scanner = match build_scanner_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let settings = match build_tracker_settings(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let feed = match SnapshotFeed::from_path(feed_path) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };
    info!(ticks = feed.len(), feed = %feed_path.display(), "loaded snapshot feed");

    let logs_dir = logs_dir.map_or(settings.logs_dir, Path::to_path_buf);
    let audit = CsvAuditLog::new(logs_dir);
    let mut tracker = match MissedOpportunityTracker::new(settings.tracker, Box::new(audit)) {
        Ok(t) => t,
        Err(e) => return fail(e),
    };

    match run_replay_loop(&feed, scanner, &mut tracker, settings.summary_window_minutes) {
        Ok(report) => print_json(&report),
        Err(e) => fail(e),
    }
}

fn run_scan(config_path: &Path, feed_path: &Path, current: Option<&str>) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let scanner = match build_scanner_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let feed = match SnapshotFeed::from_path(feed_path) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };
    let Some(tick) = feed.ticks().first() else {
        return fail(ChurnwatchError::Feed {
            reason: format!("{} contains no rows", feed_path.display()),
        });
    };

    let current = parse_symbol_list(current.unwrap_or_default());
    let engine = match ChurnControlEngine::new(&feed, scanner) {
        Ok(e) => e,
        Err(e) => return fail(e),
    };
    match engine.scan_at(tick.ts, &tick.candidates(), &current, tick.metrics()) {
        Ok(result) => {
            log_scan(&result, engine.config());
            print_json(&result)
        }
        Err(e) => fail(e),
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let scanner = match build_scanner_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let settings = match build_tracker_settings(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    eprintln!("Scanner:");
    eprintln!("  max_watch:                 {}", scanner.max_watch);
    eprintln!("  max_replacements_per_scan: {}", scanner.max_replacements_per_scan);
    eprintln!("  override_margin:           {}", scanner.override_margin);
    eprintln!("  override_max_extra:        {}", scanner.override_max_extra);
    eprintln!("  incumbent_bonus:           {}", scanner.incumbent_bonus);
    eprintln!("  strong_rank_cutoff:        {}", scanner.strong_rank_cutoff);
    eprintln!("  strong_topk:               {}", scanner.strong_topk);
    eprintln!("Tracker:");
    eprintln!("  lookahead_minutes:         {:?}", settings.tracker.lookahead_minutes);
    eprintln!("  max_records:               {}", settings.tracker.max_records);
    eprintln!("  max_age_days:              {}", settings.tracker.max_age_days);
    eprintln!("  logs_dir:                  {}", settings.logs_dir.display());
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn run_summarize(eval_log: &Path, window: i64, now: Option<&str>) -> ExitCode {
    if let Err(e) = validate_window(window) {
        return fail(e);
    }
    let now = match now {
        Some(raw) => match parse_timestamp(raw) {
            Some(ts) => ts,
            None => {
                eprintln!("error: invalid --now timestamp '{raw}'");
                return ExitCode::from(2);
            }
        },
        None => Local::now().naive_local(),
    };
    let evals = match CsvAuditLog::read_evals(eval_log) {
        Ok(e) => e,
        Err(e) => return fail(e),
    };
    info!(evals = evals.len(), window, "summarizing evaluation log");
    print_json(&summarize_evals(&evals, window, now))
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to serialize output: {e}");
            ExitCode::from(1)
        }
    }
}

/// Split a comma-separated symbol list, dropping blanks.
pub fn parse_symbol_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
