//! Configuration access port trait.
//!
//! Sections read by churnwatch: `[scanner]` and `[tracker]`.

/// Typed lookups over sectioned key/value settings. Numeric getters fall back
/// to `default` when the key is absent or unparsable; validation of ranges
/// happens in the domain.
pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
}
