//! Missed-opportunity feedback loop.
//!
//! Strong candidates the churn limiter kept out are recorded with their
//! scan-time price. After each configured horizon the price is checked again
//! and the realized return is stored, so the cost of rate limiting can be
//! measured over a sliding window.

use crate::domain::error::ChurnwatchError;
use crate::domain::scan::{MissReason, ScanResult};
use crate::ports::audit_port::AuditLogPort;
use crate::ports::price_port::PricePort;
use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Upper bound on `max_age_days` (one hundred years).
pub const MAX_AGE_DAYS: u32 = 36_500;

/// Upper bound on a summary window (one year).
pub const MAX_WINDOW_MINUTES: i64 = 525_600;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Horizons, in minutes, at which each missed candidate is re-priced.
    pub lookahead_minutes: Vec<u32>,
    pub max_records: usize,
    pub max_age_days: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            lookahead_minutes: vec![5, 15, 30],
            max_records: 5000,
            max_age_days: 7,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ChurnwatchError> {
        if self.lookahead_minutes.is_empty() {
            return Err(ChurnwatchError::invalid(
                "tracker",
                "lookahead_minutes",
                "at least one horizon is required",
            ));
        }
        for (i, h) in self.lookahead_minutes.iter().enumerate() {
            if *h == 0 {
                return Err(ChurnwatchError::invalid(
                    "tracker",
                    "lookahead_minutes",
                    "horizons must be positive",
                ));
            }
            if self.lookahead_minutes[..i].contains(h) {
                return Err(ChurnwatchError::invalid(
                    "tracker",
                    "lookahead_minutes",
                    format!("duplicate horizon {h}"),
                ));
            }
        }
        if self.max_records == 0 {
            return Err(ChurnwatchError::invalid(
                "tracker",
                "max_records",
                "max_records must be at least 1",
            ));
        }
        if self.max_age_days == 0 || self.max_age_days > MAX_AGE_DAYS {
            return Err(ChurnwatchError::invalid(
                "tracker",
                "max_age_days",
                format!("max_age_days must be between 1 and {MAX_AGE_DAYS}"),
            ));
        }
        Ok(())
    }
}

/// Reject summary windows outside `1..=MAX_WINDOW_MINUTES`.
pub fn validate_window(window_minutes: i64) -> Result<(), ChurnwatchError> {
    if !(1..=MAX_WINDOW_MINUTES).contains(&window_minutes) {
        return Err(ChurnwatchError::invalid(
            "tracker",
            "summary_window_minutes",
            format!("window must be between 1 and {MAX_WINDOW_MINUTES} minutes"),
        ));
    }
    Ok(())
}

/// A strong candidate excluded by one scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissedCandidate {
    pub ts_scan: NaiveDateTime,
    pub symbol: String,
    pub desired_rank: usize,
    pub score: f64,
    pub trade_value: f64,
    pub change_rate: f64,
    pub event_score: f64,
    pub reason: MissReason,
    pub price_at_scan: Option<f64>,
    pub vwap_at_scan: Option<f64>,
    pub intraday_high_at_scan: Option<f64>,
    pub meta_json: String,
    pub(crate) pending_horizons: Vec<u32>,
}

impl MissedCandidate {
    /// Horizons not yet evaluated. Only ever shrinks.
    pub fn pending_horizons(&self) -> &[u32] {
        &self.pending_horizons
    }

    /// Saturates at `NaiveDateTime::MAX`, so an unreachable due time never matures.
    pub fn due_at(&self, horizon_minutes: u32) -> NaiveDateTime {
        self.ts_scan
            .checked_add_signed(TimeDelta::minutes(i64::from(horizon_minutes)))
            .unwrap_or(NaiveDateTime::MAX)
    }
}

/// Realized return of a missed candidate at one horizon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunityEval {
    pub ts_scan: NaiveDateTime,
    pub symbol: String,
    pub reason: MissReason,
    pub score: f64,
    pub price_at_scan: f64,
    pub ts_eval: NaiveDateTime,
    pub horizon_minutes: u32,
    pub price_at_eval: f64,
    pub return_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonStats {
    pub samples: usize,
    pub avg_return_pct: f64,
    /// Share of samples with a positive return, in percent.
    pub positive_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpportunitySummary {
    pub window_minutes: i64,
    pub missed_strong: usize,
    pub horizons: BTreeMap<u32, HorizonStats>,
}

impl OpportunitySummary {
    /// Flat view: `missed_strong`, then `avg_<h>m` and `pos_<h>m` per horizon.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        out.insert("missed_strong".to_string(), self.missed_strong as f64);
        for (h, stats) in &self.horizons {
            out.insert(format!("avg_{h}m"), stats.avg_return_pct);
            out.insert(format!("pos_{h}m"), stats.positive_pct);
        }
        out
    }
}

/// Summarize evaluations whose `ts_eval` falls within `window_minutes` of `now`.
/// A window reaching past the earliest representable time covers everything.
pub fn summarize_evals(
    evals: &[OpportunityEval],
    window_minutes: i64,
    now: NaiveDateTime,
) -> OpportunitySummary {
    let window_start = TimeDelta::try_minutes(window_minutes)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(NaiveDateTime::MIN);
    let mut by_horizon: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    let mut missed_strong = 0;
    for eval in evals.iter().filter(|e| e.ts_eval >= window_start) {
        missed_strong += 1;
        by_horizon
            .entry(eval.horizon_minutes)
            .or_default()
            .push(eval.return_pct);
    }

    let horizons = by_horizon
        .into_iter()
        .map(|(h, returns)| {
            let n = returns.len() as f64;
            let positive = returns.iter().filter(|r| **r > 0.0).count() as f64;
            let stats = HorizonStats {
                samples: returns.len(),
                avg_return_pct: returns.iter().sum::<f64>() / n,
                positive_pct: positive / n * 100.0,
            };
            (h, stats)
        })
        .collect();

    OpportunitySummary {
        window_minutes,
        missed_strong,
        horizons,
    }
}

pub struct MissedOpportunityTracker {
    config: TrackerConfig,
    audit: Box<dyn AuditLogPort>,
    records: Vec<MissedCandidate>,
    evals: Vec<OpportunityEval>,
}

impl MissedOpportunityTracker {
    pub fn new(config: TrackerConfig, audit: Box<dyn AuditLogPort>) -> Result<Self, ChurnwatchError> {
        config.validate()?;
        Ok(Self {
            config,
            audit,
            records: Vec::new(),
            evals: Vec::new(),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn records(&self) -> &[MissedCandidate] {
        &self.records
    }

    pub fn evals(&self) -> &[OpportunityEval] {
        &self.evals
    }

    /// Total horizons still awaiting evaluation across all records.
    pub fn pending_count(&self) -> usize {
        self.records.iter().map(|r| r.pending_horizons.len()).sum()
    }

    /// Record every strong missed candidate of `result`, priced from
    /// `price_snapshot`. Returns the number of records added.
    pub fn record_missed(
        &mut self,
        result: &ScanResult,
        price_snapshot: &HashMap<String, Option<f64>>,
        mut sink: Option<&mut dyn FnMut(&str)>,
    ) -> usize {
        if result.missed_new_strong.is_empty() {
            return 0;
        }

        let meta_json = serde_json::json!({ "source": "scanner" }).to_string();
        let batch: Vec<MissedCandidate> = result
            .missed_new_strong
            .iter()
            .map(|symbol| MissedCandidate {
                ts_scan: result.ts_scan,
                symbol: symbol.clone(),
                desired_rank: result.rank(symbol).unwrap_or(0),
                score: result.score(symbol),
                trade_value: lookup(&result.metrics.trade_value, symbol).unwrap_or(0.0),
                change_rate: lookup(&result.metrics.change_rate, symbol).unwrap_or(0.0),
                event_score: lookup(&result.metrics.event_score, symbol).unwrap_or(0.0),
                reason: result.reason(symbol),
                price_at_scan: price_snapshot
                    .get(symbol)
                    .copied()
                    .flatten()
                    .filter(|p| p.is_finite()),
                vwap_at_scan: lookup(&result.metrics.vwap, symbol),
                intraday_high_at_scan: lookup(&result.metrics.intraday_high, symbol),
                meta_json: meta_json.clone(),
                pending_horizons: self.config.lookahead_minutes.clone(),
            })
            .collect();

        for record in &batch {
            if let Err(e) = self.audit.append_missed(record) {
                warn!(symbol = %record.symbol, error = %e, "missed-candidate audit write failed");
                emit(&mut sink, &format!("[AUDIT] missed_log_failed code={} err={e}", record.symbol));
            }
            emit(
                &mut sink,
                &format!(
                    "[MISSED_DETAIL] code={} rank={} score={:.4} reason={} price={}",
                    record.symbol,
                    record.desired_rank,
                    record.score,
                    record.reason,
                    fmt_price(record.price_at_scan),
                ),
            );
        }

        let added = batch.len();
        let examples: Vec<&str> = result
            .missed_new_strong
            .iter()
            .take(5)
            .map(String::as_str)
            .collect();
        info!(
            strong_new = added,
            total_missed = result.missed_count(),
            examples = %examples.join(","),
            "recorded missed candidates"
        );
        emit(
            &mut sink,
            &format!(
                "[MISSED] strong_new={added} total_missed={} examples=[{}]",
                result.missed_count(),
                examples.join(",")
            ),
        );

        self.records.extend(batch);
        self.prune(result.ts_scan);
        added
    }

    /// Evaluate every horizon that has matured by `now`. A horizon whose price
    /// is unavailable stays pending for the next pass. Returns the number of
    /// evaluations created.
    pub fn evaluate_pending(
        &mut self,
        prices: &dyn PricePort,
        now: Option<NaiveDateTime>,
        mut sink: Option<&mut dyn FnMut(&str)>,
    ) -> usize {
        if self.records.is_empty() {
            return 0;
        }
        let now = now.unwrap_or_else(|| Local::now().naive_local());

        let mut matured: Vec<(usize, OpportunityEval)> = Vec::new();
        for (idx, record) in self.records.iter().enumerate() {
            for &horizon in &record.pending_horizons {
                if now < record.due_at(horizon) {
                    continue;
                }
                let price_now = match prices.current_price(&record.symbol) {
                    Ok(Some(p)) if p.is_finite() => Some(p),
                    Ok(_) => None,
                    Err(e) => {
                        debug!(symbol = %record.symbol, error = %e, "price lookup failed");
                        emit(
                            &mut sink,
                            &format!("[OPPORTUNITY] price_fetch_failed code={} err={e}", record.symbol),
                        );
                        continue;
                    }
                };
                let Some(price_now) = price_now else {
                    emit(
                        &mut sink,
                        &format!("[OPPORTUNITY] price_fetch_failed code={}", record.symbol),
                    );
                    continue;
                };
                let Some(price_at_scan) = record.price_at_scan.filter(|p| *p != 0.0) else {
                    emit(
                        &mut sink,
                        &format!("[OPPORTUNITY] no_scan_price code={}", record.symbol),
                    );
                    continue;
                };

                let return_pct = (price_now - price_at_scan) / price_at_scan * 100.0;
                matured.push((
                    idx,
                    OpportunityEval {
                        ts_scan: record.ts_scan,
                        symbol: record.symbol.clone(),
                        reason: record.reason,
                        score: record.score,
                        price_at_scan,
                        ts_eval: now,
                        horizon_minutes: horizon,
                        price_at_eval: price_now,
                        return_pct,
                    },
                ));
            }
        }

        let created = matured.len();
        for (idx, eval) in matured {
            self.records[idx]
                .pending_horizons
                .retain(|h| *h != eval.horizon_minutes);
            if let Err(e) = self.audit.append_eval(&eval) {
                warn!(symbol = %eval.symbol, error = %e, "opportunity-eval audit write failed");
                emit(&mut sink, &format!("[AUDIT] eval_log_failed code={} err={e}", eval.symbol));
            }
            emit(
                &mut sink,
                &format!(
                    "[OPPORTUNITY_EVAL] code={} lookahead={}m ret={:.2}% price0={} price1={}",
                    eval.symbol,
                    eval.horizon_minutes,
                    eval.return_pct,
                    eval.price_at_scan,
                    eval.price_at_eval
                ),
            );
            self.evals.push(eval);
        }
        if created > 0 {
            info!(evaluated = created, pending = self.pending_count(), "evaluated matured horizons");
        }

        self.prune(now);
        created
    }

    pub fn summarize(&self, window_minutes: i64, now: Option<NaiveDateTime>) -> OpportunitySummary {
        let now = now.unwrap_or_else(|| Local::now().naive_local());
        summarize_evals(&self.evals, window_minutes, now)
    }

    fn prune(&mut self, now: NaiveDateTime) {
        // No cutoff means nothing is old enough to prune.
        let cutoff = TimeDelta::try_days(i64::from(self.config.max_age_days))
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(NaiveDateTime::MIN);
        self.records.retain(|r| r.ts_scan >= cutoff);
        if self.records.len() > self.config.max_records {
            self.records.sort_by_key(|r| r.ts_scan);
            let excess = self.records.len() - self.config.max_records;
            self.records.drain(..excess);
        }
        self.evals.retain(|e| e.ts_eval >= cutoff);
    }
}

fn lookup(map: &HashMap<String, f64>, symbol: &str) -> Option<f64> {
    map.get(symbol).copied()
}

fn fmt_price(price: Option<f64>) -> String {
    price.map_or_else(|| "None".to_string(), |p| p.to_string())
}

fn emit(sink: &mut Option<&mut dyn FnMut(&str)>, line: &str) {
    if let Some(f) = sink.as_deref_mut() {
        f(line);
    }
}
