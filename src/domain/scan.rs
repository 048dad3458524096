//! Scan configuration and result records.

use crate::domain::error::ChurnwatchError;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Immutable tuning for one churn-control engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannerConfig {
    /// Capacity of the applied universe.
    pub max_watch: usize,
    /// Non-override swaps allowed per scan.
    pub max_replacements_per_scan: usize,
    /// Score advantage over the weakest incumbent needed to bypass the swap limit.
    pub override_margin: f64,
    /// Cap on override-driven swaps per scan.
    pub override_max_extra: usize,
    /// Added to the score of symbols already in the universe.
    pub incumbent_bonus: f64,
    pub strong_rank_cutoff: usize,
    pub strong_topk: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            max_watch: 100,
            max_replacements_per_scan: 20,
            override_margin: 0.2,
            override_max_extra: 10,
            incumbent_bonus: 0.1,
            strong_rank_cutoff: 30,
            strong_topk: 30,
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> Result<(), ChurnwatchError> {
        if self.max_watch == 0 {
            return Err(ChurnwatchError::invalid(
                "scanner",
                "max_watch",
                "max_watch must be at least 1",
            ));
        }
        check_non_negative("override_margin", self.override_margin)?;
        check_non_negative("incumbent_bonus", self.incumbent_bonus)?;
        Ok(())
    }
}

fn check_non_negative(key: &str, value: f64) -> Result<(), ChurnwatchError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ChurnwatchError::invalid(
            "scanner",
            key,
            format!("{key} must be a finite non-negative number"),
        ));
    }
    Ok(())
}

/// Per-symbol market metrics carried through a scan for downstream consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuxMetrics {
    pub trade_value: HashMap<String, f64>,
    pub change_rate: HashMap<String, f64>,
    pub event_score: HashMap<String, f64>,
    pub vwap: HashMap<String, f64>,
    pub intraday_high: HashMap<String, f64>,
}

/// Why a strong candidate was left out of the applied universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// Blocked by the per-scan replacement limit and not strong enough to override.
    ChurnLimited,
    /// Qualified for override but the override cap was exhausted.
    OverrideCap,
    Other,
}

impl MissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissReason::ChurnLimited => "churn_limited",
            MissReason::OverrideCap => "override_cap",
            MissReason::Other => "other",
        }
    }
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "churn_limited" => Ok(MissReason::ChurnLimited),
            "override_cap" => Ok(MissReason::OverrideCap),
            "other" => Ok(MissReason::Other),
            _ => Err(format!("unknown miss reason: {s}")),
        }
    }
}

/// Outcome of one scan. Sequences are ordered; maps are keyed by symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub ts_scan: NaiveDateTime,
    pub raw_count: usize,
    pub filtered_count: usize,
    /// Top `max_watch` candidates by desired score, best first.
    pub desired_universe: Vec<String>,
    /// Universe in force after churn limiting and override.
    pub applied_universe: Vec<String>,
    pub current_universe: Vec<String>,
    /// Desired score (raw score plus incumbent bonus) per candidate.
    pub scores: HashMap<String, f64>,
    /// 1-based rank within `desired_universe`.
    pub ranks: HashMap<String, usize>,
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub override_added: Vec<String>,
    pub override_removed: Vec<String>,
    pub desired_swaps: usize,
    pub allowed_swaps: usize,
    pub override_extra: usize,
    pub applied_swaps: usize,
    pub override_triggered: bool,
    pub worst_incumbent_score: Option<f64>,
    pub strong_threshold: Option<f64>,
    pub missed_new_strong: Vec<String>,
    pub reasons: HashMap<String, MissReason>,
    pub metrics: AuxMetrics,
}

impl ScanResult {
    pub fn score(&self, symbol: &str) -> f64 {
        self.scores.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn rank(&self, symbol: &str) -> Option<usize> {
        self.ranks.get(symbol).copied()
    }

    pub fn reason(&self, symbol: &str) -> MissReason {
        self.reasons.get(symbol).copied().unwrap_or(MissReason::Other)
    }

    /// Desired members that did not make it into the applied universe.
    pub fn missed_count(&self) -> usize {
        self.desired_universe
            .iter()
            .filter(|s| !self.applied_universe.contains(s))
            .count()
    }
}
