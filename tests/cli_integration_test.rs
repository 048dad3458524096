//! CLI integration tests for config building and the replay loop.
//!
//! Tests cover:
//! - Scanner/tracker config building from INI strings (defaults, overrides, rejects)
//! - Full replay over a snapshot feed written to disk
//! - Command dispatch for validate, scan and summarize

mod common;

use approx::assert_relative_eq;
use clap::Parser;
use churnwatch::adapters::csv_audit_log::CsvAuditLog;
use churnwatch::adapters::file_config_adapter::FileConfigAdapter;
use churnwatch::adapters::snapshot_feed::SnapshotFeed;
use churnwatch::cli::{self, Cli};
use churnwatch::domain::error::ChurnwatchError;
use churnwatch::domain::opportunity::MissedOpportunityTracker;
use churnwatch::domain::scan::{MissReason, ScannerConfig};
use common::*;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

fn write_temp_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn is_success(code: ExitCode) -> bool {
    // ExitCode has no PartialEq; compare the debug form.
    format!("{code:?}") == format!("{:?}", ExitCode::SUCCESS)
}

const VALID_INI: &str = r#"
[scanner]
max_watch = 2
max_replacements_per_scan = 1
override_margin = 10.0
override_max_extra = 3
incumbent_bonus = 0.1
strong_rank_cutoff = 30
strong_topk = 30

[tracker]
lookahead_minutes = 5
max_records = 100
max_age_days = 2
summary_window_minutes = 60
logs_dir = replay-logs
"#;

const FEED: &str = "\
ts,symbol,score,price,trade_value,change_rate,event_score,vwap,intraday_high
2024-03-04T09:30:00,A,3.0,100,,,,,
2024-03-04T09:30:00,B,2.0,50,,,,,
2024-03-04T09:30:00,C,1.0,10,,,,,
2024-03-04T09:35:00,A,1.0,100,,,,,
2024-03-04T09:35:00,B,2.0,50,,,,,
2024-03-04T09:35:00,C,5.0,10,,,,,
2024-03-04T09:35:00,D,4.0,20,9000000,2.5,,19.5,21
2024-03-04T09:40:00,C,5.0,10,,,,,
2024-03-04T09:40:00,B,2.0,50,,,,,
2024-03-04T09:40:00,D,4.0,22,,,,,
2024-03-04T09:45:00,C,5.0,10,,,,,
2024-03-04T09:45:00,E,NaN,1,,,,,
";

mod config_loading {
    use super::*;

    #[test]
    fn build_scanner_config_reads_all_keys() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let config = cli::build_scanner_config(&adapter).unwrap();

        assert_eq!(config.max_watch, 2);
        assert_eq!(config.max_replacements_per_scan, 1);
        assert_eq!(config.override_max_extra, 3);
        assert_relative_eq!(config.override_margin, 10.0);
        assert_relative_eq!(config.incumbent_bonus, 0.1);
        assert_eq!(config.strong_rank_cutoff, 30);
    }

    #[test]
    fn empty_sections_use_defaults() {
        let adapter = FileConfigAdapter::from_string("[scanner]\n[tracker]\n").unwrap();
        assert_eq!(
            cli::build_scanner_config(&adapter).unwrap(),
            ScannerConfig::default()
        );

        let settings = cli::build_tracker_settings(&adapter).unwrap();
        assert_eq!(settings.tracker.lookahead_minutes, vec![5, 15, 30]);
        assert_eq!(settings.tracker.max_records, 5000);
        assert_eq!(settings.tracker.max_age_days, 7);
        assert_eq!(settings.summary_window_minutes, 60);
        assert_eq!(settings.logs_dir, Path::new("opportunity"));
    }

    #[test]
    fn build_tracker_settings_reads_overrides() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let settings = cli::build_tracker_settings(&adapter).unwrap();

        assert_eq!(settings.tracker.lookahead_minutes, vec![5]);
        assert_eq!(settings.tracker.max_records, 100);
        assert_eq!(settings.tracker.max_age_days, 2);
        assert_eq!(settings.logs_dir, Path::new("replay-logs"));
    }

    #[test]
    fn zero_capacity_rejected() {
        let adapter = FileConfigAdapter::from_string("[scanner]\nmax_watch = 0\n").unwrap();
        let err = cli::build_scanner_config(&adapter).unwrap_err();
        assert!(matches!(err, ChurnwatchError::ConfigInvalid { key, .. } if key == "max_watch"));
    }

    #[test]
    fn malformed_number_rejected() {
        let adapter = FileConfigAdapter::from_string("[scanner]\nmax_watch = ten\n").unwrap();
        let err = cli::build_scanner_config(&adapter).unwrap_err();
        assert!(matches!(err, ChurnwatchError::ConfigInvalid { key, .. } if key == "max_watch"));

        let adapter =
            FileConfigAdapter::from_string("[tracker]\nmax_records = many\n").unwrap();
        assert!(cli::build_tracker_settings(&adapter).is_err());
    }

    #[test]
    fn oversized_window_and_age_rejected() {
        for content in [
            "[tracker]\nsummary_window_minutes = 9223372036854775807\n",
            "[tracker]\nmax_age_days = 200000000\n",
        ] {
            let adapter = FileConfigAdapter::from_string(content).unwrap();
            let err = cli::build_tracker_settings(&adapter).unwrap_err();
            assert!(matches!(err, ChurnwatchError::ConfigInvalid { .. }), "{content}");
        }
    }

    #[test]
    fn duplicate_horizon_rejected() {
        let adapter =
            FileConfigAdapter::from_string("[tracker]\nlookahead_minutes = 5,15,5\n").unwrap();
        let err = cli::build_tracker_settings(&adapter).unwrap_err();
        assert!(
            matches!(err, ChurnwatchError::ConfigInvalid { key, .. } if key == "lookahead_minutes")
        );
    }

    #[test]
    fn load_config_missing_file_fails() {
        assert!(cli::load_config(Path::new("/nonexistent/churnwatch.ini")).is_err());
    }

    #[test]
    fn parse_symbol_list_drops_blanks() {
        assert_eq!(
            cli::parse_symbol_list(" A, ,B,,C "),
            syms(&["A", "B", "C"])
        );
        assert!(cli::parse_symbol_list("").is_empty());
    }
}

mod replay {
    use super::*;

    #[test]
    fn replay_feeds_applied_universe_forward() {
        let dir = tempfile::TempDir::new().unwrap();
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let scanner = cli::build_scanner_config(&adapter).unwrap();
        let settings = cli::build_tracker_settings(&adapter).unwrap();
        let feed = SnapshotFeed::from_reader(FEED.as_bytes()).unwrap();

        let audit = CsvAuditLog::new(dir.path());
        let eval_path = audit.eval_path();
        let missed_path = audit.missed_path();
        let mut tracker = MissedOpportunityTracker::new(settings.tracker, Box::new(audit)).unwrap();

        let report =
            cli::run_replay_loop(&feed, scanner, &mut tracker, settings.summary_window_minutes)
                .unwrap();

        assert_eq!(report.ticks, 4);
        assert_eq!(report.scans, 3);
        assert_eq!(report.failed_scans, 1);
        assert_eq!(report.missed_recorded, 1);
        assert_eq!(report.evaluations, 1);
        assert_eq!(report.pending, 0);
        assert_eq!(report.final_universe, syms(&["C", "D"]));

        let record = &tracker.records()[0];
        assert_eq!(record.symbol, "D");
        assert_eq!(record.reason, MissReason::ChurnLimited);
        assert_eq!(record.price_at_scan, Some(20.0));
        assert_eq!(record.vwap_at_scan, Some(19.5));
        assert_relative_eq!(record.trade_value, 9_000_000.0);

        let evals = CsvAuditLog::read_evals(&eval_path).unwrap();
        assert_eq!(evals.len(), 1);
        assert_eq!(evals[0].ts_eval, at(9, 40));
        assert_relative_eq!(evals[0].return_pct, 10.0, epsilon = 1e-6);
        assert!(missed_path.exists());

        let summary = report.summary.unwrap();
        assert_eq!(summary.missed_strong, 1);
        assert_relative_eq!(summary.horizons[&5].avg_return_pct, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn replay_of_empty_feed_reports_nothing() {
        let feed = SnapshotFeed::from_reader("ts,symbol,score\n".as_bytes()).unwrap();
        let mut tracker = MissedOpportunityTracker::new(
            Default::default(),
            Box::new(MemoryAuditLog::new()),
        )
        .unwrap();
        let report =
            cli::run_replay_loop(&feed, ScannerConfig::default(), &mut tracker, 60).unwrap();
        assert_eq!(report.ticks, 0);
        assert_eq!(report.scans, 0);
        assert!(report.final_universe.is_empty());
        assert!(report.summary.is_none());
    }
}

mod commands {
    use super::*;

    #[test]
    fn validate_accepts_valid_config() {
        let ini = write_temp_file(VALID_INI);
        let cli = Cli::parse_from(["churnwatch", "validate", "--config", ini.path().to_str().unwrap()]);
        assert!(is_success(cli::run(cli)));
    }

    #[test]
    fn validate_rejects_bad_config() {
        let ini = write_temp_file("[scanner]\noverride_margin = -1\n");
        let cli = Cli::parse_from(["churnwatch", "validate", "--config", ini.path().to_str().unwrap()]);
        assert!(!is_success(cli::run(cli)));
    }

    #[test]
    fn scan_command_runs_first_tick() {
        let ini = write_temp_file(VALID_INI);
        let feed = write_temp_file(FEED);
        let cli = Cli::parse_from([
            "churnwatch",
            "scan",
            "--config",
            ini.path().to_str().unwrap(),
            "--feed",
            feed.path().to_str().unwrap(),
            "--current",
            "A,Z",
        ]);
        assert!(is_success(cli::run(cli)));
    }

    #[test]
    fn replay_command_writes_logs_to_override_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let ini = write_temp_file(VALID_INI);
        let feed = write_temp_file(FEED);
        let logs = dir.path().join("logs");
        let cli = Cli::parse_from([
            "churnwatch",
            "replay",
            "--config",
            ini.path().to_str().unwrap(),
            "--feed",
            feed.path().to_str().unwrap(),
            "--logs-dir",
            logs.to_str().unwrap(),
        ]);
        assert!(is_success(cli::run(cli)));
        assert!(logs.join("missed_candidates.csv").exists());
        assert!(logs.join("missed_opportunity_eval.csv").exists());
    }

    #[test]
    fn replay_command_missing_feed_fails() {
        let ini = write_temp_file(VALID_INI);
        let cli = Cli::parse_from([
            "churnwatch",
            "replay",
            "--config",
            ini.path().to_str().unwrap(),
            "--feed",
            "/nonexistent/feed.csv",
        ]);
        assert!(!is_success(cli::run(cli)));
    }

    #[test]
    fn summarize_reads_eval_log() {
        let log = write_temp_file(
            "ts_scan,code,reason,score,price_at_scan,ts_eval,lookahead_min,price_eval,return_pct\n\
             2024-03-04T09:30:00,D,churn_limited,4.000000,20,2024-03-04T09:35:00,5,22,10.000000\n",
        );
        let cli = Cli::parse_from([
            "churnwatch",
            "summarize",
            "--eval-log",
            log.path().to_str().unwrap(),
            "--window",
            "30",
            "--now",
            "2024-03-04T10:00:00",
        ]);
        assert!(is_success(cli::run(cli)));
    }

    #[test]
    fn summarize_rejects_out_of_range_window() {
        let log = write_temp_file("ts_scan,code,reason,score,price_at_scan,ts_eval,lookahead_min,price_eval,return_pct\n");
        let path = log.path().to_str().unwrap();
        for window in ["9223372036854775807", "0", "-5"] {
            let cli = Cli::parse_from([
                "churnwatch",
                "summarize",
                "--eval-log",
                path,
                "--window",
                window,
                "--now",
                "2024-03-04T10:00:00",
            ]);
            let code = cli::run(cli);
            assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(2)), "{window}");
        }
    }

    #[test]
    fn summarize_rejects_bad_timestamp() {
        let log = write_temp_file("ts_scan,code,reason,score,price_at_scan,ts_eval,lookahead_min,price_eval,return_pct\n");
        let cli = Cli::parse_from([
            "churnwatch",
            "summarize",
            "--eval-log",
            log.path().to_str().unwrap(),
            "--now",
            "noon",
        ]);
        assert!(!is_success(cli::run(cli)));
    }
}
