//! Live price lookup port trait.

use crate::domain::error::ChurnwatchError;

/// Current price for a symbol. `Ok(None)` and `Err(_)` both mean the price is
/// unavailable right now.
pub trait PricePort {
    fn current_price(&self, symbol: &str) -> Result<Option<f64>, ChurnwatchError>;
}

impl<T: PricePort + ?Sized> PricePort for &T {
    fn current_price(&self, symbol: &str) -> Result<Option<f64>, ChurnwatchError> {
        (**self).current_price(symbol)
    }
}
