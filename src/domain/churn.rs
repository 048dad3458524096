//! Universe churn control.
//!
//! Each scan ranks the candidate pool, then reconciles the ranked "desired"
//! universe against the universe currently in force. Free capacity is filled
//! unconditionally, swaps beyond that are capped per scan, and a candidate
//! that beats the weakest surviving incumbent by `override_margin` may force
//! an extra swap up to `override_max_extra`. Strong candidates left out are
//! reported with the reason they were blocked.
//!
//! Every ordering is stable: ties keep first-seen candidate order (or current
//! universe order for removals).

use crate::domain::error::ChurnwatchError;
use crate::domain::scan::{AuxMetrics, MissReason, ScanResult, ScannerConfig};
use crate::domain::symbols::OrderedSymbols;
use crate::ports::scoring_port::ScoringPort;
use chrono::{Local, NaiveDateTime};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub struct ChurnControlEngine<S> {
    scorer: S,
    config: ScannerConfig,
}

impl<S: ScoringPort> ChurnControlEngine<S> {
    pub fn new(scorer: S, config: ScannerConfig) -> Result<Self, ChurnwatchError> {
        config.validate()?;
        Ok(Self { scorer, config })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Scan stamped with the local wall clock.
    pub fn scan(
        &self,
        candidates: &[String],
        current_universe: &[String],
        metrics: AuxMetrics,
    ) -> Result<ScanResult, ChurnwatchError> {
        self.scan_at(
            Local::now().naive_local(),
            candidates,
            current_universe,
            metrics,
        )
    }

    /// Run one scan. Fails only if the scoring oracle fails or returns a
    /// non-finite score, in which case no result is produced.
    pub fn scan_at(
        &self,
        ts_scan: NaiveDateTime,
        candidates: &[String],
        current_universe: &[String],
        metrics: AuxMetrics,
    ) -> Result<ScanResult, ChurnwatchError> {
        let cfg = &self.config;
        let filtered = OrderedSymbols::dedup(candidates);
        let current = OrderedSymbols::dedup(current_universe);

        let raw_scores = if filtered.is_empty() {
            HashMap::new()
        } else {
            self.scorer.score(filtered.as_slice())?
        };
        if let Some((symbol, value)) = raw_scores.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ChurnwatchError::NonFiniteScore {
                symbol: symbol.clone(),
                value: *value,
            });
        }

        let mut scores: HashMap<String, f64> = HashMap::with_capacity(filtered.len());
        let mut ranked: Vec<(&str, f64)> = Vec::with_capacity(filtered.len());
        for symbol in filtered.iter() {
            let mut score = raw_scores.get(symbol).copied().unwrap_or(0.0);
            if current.contains(symbol) {
                score += cfg.incumbent_bonus;
            }
            scores.insert(symbol.to_string(), score);
            ranked.push((symbol, score));
        }
        // Incumbents that are no longer candidates fall back to their raw score.
        let score_of = |symbol: &str| -> f64 {
            scores
                .get(symbol)
                .or_else(|| raw_scores.get(symbol))
                .copied()
                .unwrap_or(0.0)
        };

        ranked.sort_by(|a, b| descending(a.1, b.1));
        let desired: OrderedSymbols = ranked
            .iter()
            .take(cfg.max_watch)
            .map(|(symbol, _)| *symbol)
            .collect();
        let ranks: HashMap<String, usize> = desired
            .iter()
            .enumerate()
            .map(|(i, symbol)| (symbol.to_string(), i + 1))
            .collect();

        let to_add: Vec<&str> = desired.iter().filter(|s| !current.contains(s)).collect();
        let to_remove: Vec<&str> = current.iter().filter(|s| !desired.contains(s)).collect();

        let free_slots = cfg.max_watch.saturating_sub(current.len());
        let (free_adds, remaining_adds) = to_add.split_at(free_slots.min(to_add.len()));

        let allowed_swaps = cfg
            .max_replacements_per_scan
            .min(remaining_adds.len())
            .min(to_remove.len());

        let mut removal_candidates = to_remove.clone();
        removal_candidates.sort_by(|a, b| ascending(score_of(*a), score_of(*b)));
        let (removed, remaining_removals) = removal_candidates.split_at(allowed_swaps);

        let mut strongest_adds = remaining_adds.to_vec();
        strongest_adds.sort_by(|a, b| descending(score_of(*a), score_of(*b)));
        let mut added: Vec<&str> = free_adds.to_vec();
        added.extend_from_slice(&strongest_adds[..allowed_swaps]);

        let added_set: HashSet<&str> = added.iter().copied().collect();
        let removed_set: HashSet<&str> = removed.iter().copied().collect();
        let remaining_adds_after: Vec<&str> = remaining_adds
            .iter()
            .copied()
            .filter(|s| !added_set.contains(s))
            .collect();

        let worst_incumbent_score = min_score(
            current
                .iter()
                .filter(|s| !removed_set.contains(s))
                .map(score_of),
        );

        let mut override_candidates: Vec<&str> = match worst_incumbent_score {
            Some(worst) => remaining_adds_after
                .iter()
                .copied()
                .filter(|s| score_of(*s) >= worst + cfg.override_margin)
                .collect(),
            None => Vec::new(),
        };
        override_candidates.sort_by(|a, b| descending(score_of(*a), score_of(*b)));

        let override_extra = override_candidates
            .len()
            .min(cfg.override_max_extra)
            .min(remaining_removals.len());
        let override_added = &override_candidates[..override_extra];
        let override_removed = &remaining_removals[..override_extra];

        let mut applied_set: HashSet<&str> = current.iter().collect();
        for symbol in removed.iter().chain(override_removed) {
            applied_set.remove(symbol);
        }
        applied_set.extend(added.iter().copied());
        applied_set.extend(override_added.iter().copied());

        let mut applied: Vec<&str> = desired.iter().filter(|s| applied_set.contains(s)).collect();
        applied.extend(
            current
                .iter()
                .filter(|s| applied_set.contains(s) && !desired.contains(s)),
        );
        applied.truncate(cfg.max_watch);

        let applied_members: HashSet<&str> = applied.iter().copied().collect();
        let to_add_set: HashSet<&str> = to_add.iter().copied().collect();
        let applied_swaps = applied.iter().filter(|s| to_add_set.contains(*s)).count();

        let missed_new: Vec<&str> = desired
            .iter()
            .filter(|s| !applied_members.contains(s) && !current.contains(s))
            .collect();

        let strong_threshold = if desired.is_empty() {
            None
        } else {
            let topk = cfg.strong_topk.min(desired.len());
            let topk_worst = min_score(desired.iter().take(topk).map(score_of)).unwrap_or(0.0);
            let worst_applied =
                min_score(applied.iter().map(|s| score_of(*s))).unwrap_or(topk_worst);
            Some((worst_applied + cfg.override_margin).max(topk_worst))
        };

        let override_set: HashSet<&str> = override_candidates.iter().copied().collect();
        let override_added_set: HashSet<&str> = override_added.iter().copied().collect();
        let remaining_after_set: HashSet<&str> = remaining_adds_after.iter().copied().collect();

        let mut missed_new_strong = Vec::new();
        let mut reasons = HashMap::new();
        for symbol in missed_new {
            let above_threshold = strong_threshold.is_some_and(|t| score_of(symbol) >= t);
            let high_rank = ranks
                .get(symbol)
                .is_some_and(|&rank| rank <= cfg.strong_rank_cutoff);
            if !(above_threshold || high_rank) {
                continue;
            }
            let reason = if remaining_after_set.contains(symbol) && !override_set.contains(symbol)
            {
                MissReason::ChurnLimited
            } else if override_set.contains(symbol) && !override_added_set.contains(symbol) {
                MissReason::OverrideCap
            } else {
                MissReason::Other
            };
            missed_new_strong.push(symbol.to_string());
            reasons.insert(symbol.to_string(), reason);
        }

        debug!(
            candidates = filtered.len(),
            desired = desired.len(),
            applied = applied.len(),
            allowed_swaps,
            override_extra,
            missed_strong = missed_new_strong.len(),
            "scan reconciled"
        );

        Ok(ScanResult {
            ts_scan,
            raw_count: filtered.len(),
            filtered_count: filtered.len(),
            applied_universe: owned(&applied),
            current_universe: current.as_slice().to_vec(),
            to_add: owned(&to_add),
            to_remove: owned(&to_remove),
            added: owned(&added),
            removed: owned(removed),
            override_added: owned(override_added),
            override_removed: owned(override_removed),
            desired_swaps: to_add.len(),
            allowed_swaps,
            override_extra,
            applied_swaps,
            override_triggered: override_extra > 0,
            worst_incumbent_score,
            strong_threshold,
            missed_new_strong,
            reasons,
            desired_universe: desired.into_vec(),
            scores,
            ranks,
            metrics,
        })
    }
}

fn owned(symbols: &[&str]) -> Vec<String> {
    symbols.iter().map(|s| s.to_string()).collect()
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn ascending(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn min_score(scores: impl Iterator<Item = f64>) -> Option<f64> {
    scores.fold(None, |acc, v| match acc {
        Some(m) if m <= v => Some(m),
        _ => Some(v),
    })
}
