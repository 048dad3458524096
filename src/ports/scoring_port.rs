//! Scoring oracle port trait.

use crate::domain::error::ChurnwatchError;
use std::collections::HashMap;

/// Maps candidate symbols to scores. Symbols absent from the returned map
/// score 0.0. Called at most once per scan.
pub trait ScoringPort {
    fn score(&self, symbols: &[String]) -> Result<HashMap<String, f64>, ChurnwatchError>;
}

impl<T: ScoringPort + ?Sized> ScoringPort for &T {
    fn score(&self, symbols: &[String]) -> Result<HashMap<String, f64>, ChurnwatchError> {
        (**self).score(symbols)
    }
}

impl<T: ScoringPort + ?Sized> ScoringPort for Box<T> {
    fn score(&self, symbols: &[String]) -> Result<HashMap<String, f64>, ChurnwatchError> {
        (**self).score(symbols)
    }
}
