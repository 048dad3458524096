//! Configuration validation.
//!
//! Validates the `[scanner]` and `[tracker]` sections before any engine or
//! tracker is built, so bad settings fail at startup rather than mid-scan.

use crate::domain::error::ChurnwatchError;
use crate::domain::opportunity::{MAX_AGE_DAYS, MAX_WINDOW_MINUTES};
use crate::ports::config_port::ConfigPort;

pub fn validate_scanner_config(config: &dyn ConfigPort) -> Result<(), ChurnwatchError> {
    validate_int(config, "scanner", "max_watch", 100, 1, i64::MAX)?;
    validate_int(config, "scanner", "max_replacements_per_scan", 20, 0, i64::MAX)?;
    validate_int(config, "scanner", "override_max_extra", 10, 0, i64::MAX)?;
    validate_int(config, "scanner", "strong_rank_cutoff", 30, 0, i64::MAX)?;
    validate_int(config, "scanner", "strong_topk", 30, 0, i64::MAX)?;
    validate_non_negative(config, "scanner", "override_margin", 0.2)?;
    validate_non_negative(config, "scanner", "incumbent_bonus", 0.1)?;
    Ok(())
}

pub fn validate_tracker_config(config: &dyn ConfigPort) -> Result<(), ChurnwatchError> {
    if let Some(raw) = config.get_string("tracker", "lookahead_minutes") {
        parse_horizons(&raw)?;
    }
    validate_int(config, "tracker", "max_records", 5000, 1, i64::MAX)?;
    validate_int(config, "tracker", "max_age_days", 7, 1, i64::from(MAX_AGE_DAYS))?;
    validate_int(
        config,
        "tracker",
        "summary_window_minutes",
        60,
        1,
        MAX_WINDOW_MINUTES,
    )?;
    Ok(())
}

/// Parse a comma-separated list of positive, distinct minute horizons.
pub fn parse_horizons(input: &str) -> Result<Vec<u32>, ChurnwatchError> {
    let mut horizons = Vec::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        let value: u32 = trimmed.parse().map_err(|_| {
            ChurnwatchError::invalid(
                "tracker",
                "lookahead_minutes",
                format!("invalid horizon '{trimmed}'"),
            )
        })?;
        if value == 0 {
            return Err(ChurnwatchError::invalid(
                "tracker",
                "lookahead_minutes",
                "horizons must be positive",
            ));
        }
        if horizons.contains(&value) {
            return Err(ChurnwatchError::invalid(
                "tracker",
                "lookahead_minutes",
                format!("duplicate horizon {value}"),
            ));
        }
        horizons.push(value);
    }
    Ok(horizons)
}

/// A key that is present must parse; an absent key takes `default`.
fn parsed_or<T: std::str::FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, ChurnwatchError> {
    match config.get_string(section, key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ChurnwatchError::invalid(section, key, format!("'{}' is not a number", raw.trim()))
        }),
        None => Ok(default),
    }
}

fn validate_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
    minimum: i64,
    maximum: i64,
) -> Result<(), ChurnwatchError> {
    let value: i64 = parsed_or(config, section, key, default)?;
    if value < minimum {
        return Err(ChurnwatchError::invalid(
            section,
            key,
            format!("{key} must be at least {minimum}"),
        ));
    }
    if value > maximum {
        return Err(ChurnwatchError::invalid(
            section,
            key,
            format!("{key} must be at most {maximum}"),
        ));
    }
    Ok(())
}

fn validate_non_negative(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<(), ChurnwatchError> {
    let value: f64 = parsed_or(config, section, key, default)?;
    if !value.is_finite() || value < 0.0 {
        return Err(ChurnwatchError::invalid(
            section,
            key,
            format!("{key} must be a finite non-negative number"),
        ));
    }
    Ok(())
}
