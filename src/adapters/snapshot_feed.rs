//! CSV market-snapshot feed for offline replay.
//!
//! Rows are `ts,symbol,score,price,trade_value,change_rate,event_score,vwap,intraday_high`.
//! Consecutive rows sharing a timestamp form one tick. The feed serves scores
//! and prices for whichever tick the cursor points at.

use crate::domain::error::ChurnwatchError;
use crate::domain::scan::AuxMetrics;
use crate::ports::price_port::PricePort;
use crate::ports::scoring_port::ScoringPort;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::cell::Cell;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawRow {
    ts: String,
    symbol: String,
    score: f64,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    trade_value: Option<f64>,
    #[serde(default)]
    change_rate: Option<f64>,
    #[serde(default)]
    event_score: Option<f64>,
    #[serde(default)]
    vwap: Option<f64>,
    #[serde(default)]
    intraday_high: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub symbol: String,
    pub score: f64,
    pub price: Option<f64>,
    pub trade_value: Option<f64>,
    pub change_rate: Option<f64>,
    pub event_score: Option<f64>,
    pub vwap: Option<f64>,
    pub intraday_high: Option<f64>,
}

/// All rows observed at one timestamp, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketTick {
    pub ts: NaiveDateTime,
    pub rows: Vec<SnapshotRow>,
}

impl MarketTick {
    pub fn candidates(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.symbol.clone()).collect()
    }

    fn row(&self, symbol: &str) -> Option<&SnapshotRow> {
        self.rows.iter().find(|r| r.symbol == symbol)
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.row(symbol).and_then(|r| r.price)
    }

    pub fn metrics(&self) -> AuxMetrics {
        let mut metrics = AuxMetrics::default();
        for row in &self.rows {
            let fields = [
                (&mut metrics.trade_value, row.trade_value),
                (&mut metrics.change_rate, row.change_rate),
                (&mut metrics.event_score, row.event_score),
                (&mut metrics.vwap, row.vwap),
                (&mut metrics.intraday_high, row.intraday_high),
            ];
            for (map, value) in fields {
                if let Some(v) = value {
                    map.entry(row.symbol.clone()).or_insert(v);
                }
            }
        }
        metrics
    }

    /// Scan-time price per symbol; `None` when the tick has no price for it.
    pub fn price_snapshot(&self, symbols: &[String]) -> HashMap<String, Option<f64>> {
        symbols
            .iter()
            .map(|s| (s.clone(), self.price(s)))
            .collect()
    }
}

pub struct SnapshotFeed {
    ticks: Vec<MarketTick>,
    cursor: Cell<usize>,
}

impl SnapshotFeed {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ChurnwatchError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| ChurnwatchError::Feed {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ChurnwatchError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut ticks: Vec<MarketTick> = Vec::new();

        for (line, result) in rdr.deserialize::<RawRow>().enumerate() {
            let raw = result.map_err(|e| ChurnwatchError::Feed {
                reason: format!("row {}: {e}", line + 1),
            })?;
            let ts = parse_timestamp(&raw.ts).ok_or_else(|| ChurnwatchError::Feed {
                reason: format!("row {}: invalid timestamp '{}'", line + 1, raw.ts),
            })?;
            let row = SnapshotRow {
                symbol: raw.symbol,
                score: raw.score,
                price: raw.price,
                trade_value: raw.trade_value,
                change_rate: raw.change_rate,
                event_score: raw.event_score,
                vwap: raw.vwap,
                intraday_high: raw.intraday_high,
            };

            match ticks.last_mut() {
                Some(last) if last.ts == ts => last.rows.push(row),
                Some(last) if last.ts > ts => {
                    return Err(ChurnwatchError::Feed {
                        reason: format!(
                            "row {}: timestamp {ts} precedes {}",
                            line + 1,
                            last.ts
                        ),
                    });
                }
                _ => ticks.push(MarketTick {
                    ts,
                    rows: vec![row],
                }),
            }
        }

        Ok(Self {
            ticks,
            cursor: Cell::new(0),
        })
    }

    pub fn ticks(&self) -> &[MarketTick] {
        &self.ticks
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Point scoring and price lookups at tick `index`.
    pub fn seek(&self, index: usize) {
        self.cursor.set(index);
    }

    pub fn current(&self) -> Option<&MarketTick> {
        self.ticks.get(self.cursor.get())
    }
}

impl ScoringPort for SnapshotFeed {
    fn score(&self, symbols: &[String]) -> Result<HashMap<String, f64>, ChurnwatchError> {
        let tick = self.current().ok_or_else(|| ChurnwatchError::Scoring {
            reason: format!("no tick at position {}", self.cursor.get()),
        })?;
        let mut scores = HashMap::new();
        for symbol in symbols {
            if let Some(row) = tick.row(symbol) {
                scores.insert(symbol.clone(), row.score);
            }
        }
        Ok(scores)
    }
}

impl PricePort for SnapshotFeed {
    fn current_price(&self, symbol: &str) -> Result<Option<f64>, ChurnwatchError> {
        let tick = self.current().ok_or_else(|| ChurnwatchError::PriceLookup {
            symbol: symbol.to_string(),
            reason: format!("no tick at position {}", self.cursor.get()),
        })?;
        Ok(tick.price(symbol))
    }
}

/// Accepts ISO-8601 (`T` separator) or space-separated timestamps.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    value
        .parse::<NaiveDateTime>()
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").ok())
}
