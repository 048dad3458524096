#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use churnwatch::domain::error::ChurnwatchError;
use churnwatch::domain::opportunity::{MissedCandidate, OpportunityEval};
use churnwatch::domain::scan::ScannerConfig;
use churnwatch::ports::audit_port::AuditLogPort;
use churnwatch::ports::price_port::PricePort;
use churnwatch::ports::scoring_port::ScoringPort;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Scoring oracle backed by a fixed table. Counts its invocations.
pub struct MockScoringPort {
    pub scores: HashMap<String, f64>,
    pub error: Option<String>,
    pub calls: Cell<usize>,
}

impl MockScoringPort {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            error: None,
            calls: Cell::new(0),
        }
    }

    pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        pairs
            .iter()
            .fold(Self::new(), |port, (symbol, score)| port.with_score(symbol, *score))
    }

    pub fn with_score(mut self, symbol: &str, score: f64) -> Self {
        self.scores.insert(symbol.to_string(), score);
        self
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            error: Some(reason.to_string()),
            ..Self::new()
        }
    }
}

impl ScoringPort for MockScoringPort {
    fn score(&self, symbols: &[String]) -> Result<HashMap<String, f64>, ChurnwatchError> {
        self.calls.set(self.calls.get() + 1);
        if let Some(reason) = &self.error {
            return Err(ChurnwatchError::Scoring {
                reason: reason.clone(),
            });
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.scores.get(s).map(|v| (s.clone(), *v)))
            .collect())
    }
}

/// Price lookup with per-symbol quotes and failures. Quotes can be changed
/// between tracker passes.
pub struct MockPricePort {
    pub prices: RefCell<HashMap<String, f64>>,
    pub errors: HashMap<String, String>,
    pub lookups: Cell<usize>,
}

impl MockPricePort {
    pub fn new() -> Self {
        Self {
            prices: RefCell::new(HashMap::new()),
            errors: HashMap::new(),
            lookups: Cell::new(0),
        }
    }

    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.borrow_mut().insert(symbol.to_string(), price);
    }
}

impl PricePort for MockPricePort {
    fn current_price(&self, symbol: &str) -> Result<Option<f64>, ChurnwatchError> {
        self.lookups.set(self.lookups.get() + 1);
        if let Some(reason) = self.errors.get(symbol) {
            return Err(ChurnwatchError::PriceLookup {
                symbol: symbol.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(self.prices.borrow().get(symbol).copied())
    }
}

/// In-memory audit log. Clones share storage so a test can keep a handle
/// after boxing one into a tracker.
#[derive(Clone, Default)]
pub struct MemoryAuditLog {
    pub missed: Rc<RefCell<Vec<MissedCandidate>>>,
    pub evals: Rc<RefCell<Vec<OpportunityEval>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missed_count(&self) -> usize {
        self.missed.borrow().len()
    }

    pub fn eval_count(&self) -> usize {
        self.evals.borrow().len()
    }
}

impl AuditLogPort for MemoryAuditLog {
    fn append_missed(&self, record: &MissedCandidate) -> Result<(), ChurnwatchError> {
        self.missed.borrow_mut().push(record.clone());
        Ok(())
    }

    fn append_eval(&self, record: &OpportunityEval) -> Result<(), ChurnwatchError> {
        self.evals.borrow_mut().push(record.clone());
        Ok(())
    }
}

pub fn syms(symbols: &[&str]) -> Vec<String> {
    symbols.iter().map(|s| s.to_string()).collect()
}

pub fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

pub fn scanner_config(
    max_watch: usize,
    max_replacements_per_scan: usize,
    override_max_extra: usize,
) -> ScannerConfig {
    ScannerConfig {
        max_watch,
        max_replacements_per_scan,
        override_max_extra,
        ..ScannerConfig::default()
    }
}
