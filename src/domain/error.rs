//! Domain error types.

/// Top-level error type for churnwatch.
#[derive(Debug, thiserror::Error)]
pub enum ChurnwatchError {
    #[error("scoring failed: {reason}")]
    Scoring { reason: String },

    #[error("non-finite score for {symbol}: {value}")]
    NonFiniteScore { symbol: String, value: f64 },

    #[error("price lookup failed for {symbol}: {reason}")]
    PriceLookup { symbol: String, reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("audit log error at {path}: {reason}")]
    AuditLog { path: String, reason: String },

    #[error("feed error: {reason}")]
    Feed { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChurnwatchError {
    pub(crate) fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        ChurnwatchError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&ChurnwatchError> for std::process::ExitCode {
    fn from(err: &ChurnwatchError) -> Self {
        let code: u8 = match err {
            ChurnwatchError::Io(_) | ChurnwatchError::AuditLog { .. } => 1,
            ChurnwatchError::ConfigParse { .. } | ChurnwatchError::ConfigInvalid { .. } => 2,
            ChurnwatchError::Scoring { .. }
            | ChurnwatchError::NonFiniteScore { .. }
            | ChurnwatchError::PriceLookup { .. } => 3,
            ChurnwatchError::Feed { .. } => 4,
        };
        std::process::ExitCode::from(code)
    }
}
