use crate::calc::{AnnualStatus, Trimester};
use thiserror::Error;

/// Errors raised by the grading engine. Every variant is deterministic: the
/// same inputs always produce the same error, so callers never retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradeError {
    #[error("{field} must be between {min:.2} and {max:.2} (got {value})")]
    Validation {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("missing trimester grades: {}", format_trimesters(.missing))]
    IncompleteData { missing: Vec<Trimester> },

    #[error("a remedial score does not apply to annual status {status}")]
    NotEligible { status: AnnualStatus },

    #[error("trimester {trimester} is locked for editing")]
    Locked { trimester: Trimester },

    #[error("invalid grading policy: {0}")]
    InvalidPolicy(String),
}

impl GradeError {
    /// Stable wire code used by the daemon's error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::Validation { .. } => "validation_error",
            GradeError::IncompleteData { .. } => "incomplete_data",
            GradeError::NotEligible { .. } => "not_eligible",
            GradeError::Locked { .. } => "locked",
            GradeError::InvalidPolicy(_) => "invalid_policy",
        }
    }
}

fn format_trimesters(ts: &[Trimester]) -> String {
    ts.iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures while reading a student's rows out of the workspace database.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("corrupt grade row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Grade(#[from] GradeError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl LoadError {
    pub fn code(&self) -> &'static str {
        match self {
            LoadError::NotFound(_) => "not_found",
            LoadError::Corrupt(_) => "db_query_failed",
            LoadError::Grade(e) => e.code(),
            LoadError::Db(_) => "db_query_failed",
        }
    }
}
