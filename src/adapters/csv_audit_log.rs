//! Append-only CSV audit logs for missed candidates and their evaluations.
//!
//! Each log gets its header on first write. The adapter assumes it is the
//! only writer to its directory.

use crate::domain::error::ChurnwatchError;
use crate::domain::opportunity::{MissedCandidate, OpportunityEval};
use crate::ports::audit_port::AuditLogPort;
use chrono::NaiveDateTime;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const MISSED_LOG_FILE: &str = "missed_candidates.csv";
pub const EVAL_LOG_FILE: &str = "missed_opportunity_eval.csv";

const MISSED_HEADER: [&str; 12] = [
    "ts_scan",
    "code",
    "desired_rank",
    "score",
    "trade_value",
    "change_rate",
    "event_score",
    "reason",
    "current_price_at_scan",
    "vwap_at_scan",
    "intraday_high_at_scan",
    "meta_json",
];

const EVAL_HEADER: [&str; 9] = [
    "ts_scan",
    "code",
    "reason",
    "score",
    "price_at_scan",
    "ts_eval",
    "lookahead_min",
    "price_eval",
    "return_pct",
];

pub struct CsvAuditLog {
    dir: PathBuf,
}

impl CsvAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn missed_path(&self) -> PathBuf {
        self.dir.join(MISSED_LOG_FILE)
    }

    pub fn eval_path(&self) -> PathBuf {
        self.dir.join(EVAL_LOG_FILE)
    }

    fn append(&self, path: &Path, header: &[&str], row: &[String]) -> Result<(), ChurnwatchError> {
        fs::create_dir_all(&self.dir).map_err(|e| audit_error(path, e))?;
        let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| audit_error(path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer
                .write_record(header)
                .map_err(|e| audit_error(path, e))?;
        }
        writer.write_record(row).map_err(|e| audit_error(path, e))?;
        writer.flush().map_err(|e| audit_error(path, e))?;
        Ok(())
    }

    /// Read an evaluation log back into memory.
    pub fn read_evals(path: &Path) -> Result<Vec<OpportunityEval>, ChurnwatchError> {
        let mut rdr = csv::Reader::from_path(path).map_err(|e| audit_error(path, e))?;
        let mut evals = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| audit_error(path, e))?;
            let get = |idx: usize| -> Result<&str, ChurnwatchError> {
                record.get(idx).ok_or_else(|| {
                    audit_error(path, format!("missing column {}", EVAL_HEADER[idx]))
                })
            };

            evals.push(OpportunityEval {
                ts_scan: parse_ts(path, get(0)?)?,
                symbol: get(1)?.to_string(),
                reason: parse_field(path, "reason", get(2)?)?,
                score: parse_field(path, "score", get(3)?)?,
                price_at_scan: parse_field(path, "price_at_scan", get(4)?)?,
                ts_eval: parse_ts(path, get(5)?)?,
                horizon_minutes: parse_field(path, "lookahead_min", get(6)?)?,
                price_at_eval: parse_field(path, "price_eval", get(7)?)?,
                return_pct: parse_field(path, "return_pct", get(8)?)?,
            });
        }

        Ok(evals)
    }
}

impl AuditLogPort for CsvAuditLog {
    fn append_missed(&self, record: &MissedCandidate) -> Result<(), ChurnwatchError> {
        let row = [
            format_ts(record.ts_scan),
            record.symbol.clone(),
            record.desired_rank.to_string(),
            format!("{:.6}", record.score),
            record.trade_value.to_string(),
            record.change_rate.to_string(),
            record.event_score.to_string(),
            record.reason.to_string(),
            optional(record.price_at_scan),
            optional(record.vwap_at_scan),
            optional(record.intraday_high_at_scan),
            record.meta_json.clone(),
        ];
        self.append(&self.missed_path(), &MISSED_HEADER, &row)
    }

    fn append_eval(&self, record: &OpportunityEval) -> Result<(), ChurnwatchError> {
        let row = [
            format_ts(record.ts_scan),
            record.symbol.clone(),
            record.reason.to_string(),
            format!("{:.6}", record.score),
            record.price_at_scan.to_string(),
            format_ts(record.ts_eval),
            record.horizon_minutes.to_string(),
            record.price_at_eval.to_string(),
            format!("{:.6}", record.return_pct),
        ];
        self.append(&self.eval_path(), &EVAL_HEADER, &row)
    }
}

pub fn format_ts(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_ts(path: &Path, value: &str) -> Result<NaiveDateTime, ChurnwatchError> {
    NaiveDateTime::from_str(value)
        .map_err(|e| audit_error(path, format!("invalid timestamp '{value}': {e}")))
}

fn parse_field<T>(path: &Path, name: &str, value: &str) -> Result<T, ChurnwatchError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| audit_error(path, format!("invalid {name} '{value}': {e}")))
}

fn audit_error(path: &Path, reason: impl std::fmt::Display) -> ChurnwatchError {
    ChurnwatchError::AuditLog {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}
