//! Append-only audit log port trait.

use crate::domain::error::ChurnwatchError;
use crate::domain::opportunity::{MissedCandidate, OpportunityEval};

/// Sink for the tracker's decision records. Implementations append; they never
/// rewrite earlier rows.
pub trait AuditLogPort {
    fn append_missed(&self, record: &MissedCandidate) -> Result<(), ChurnwatchError>;
    fn append_eval(&self, record: &OpportunityEval) -> Result<(), ChurnwatchError>;
}
