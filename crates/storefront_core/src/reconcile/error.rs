use std::error::Error;
use std::fmt::{Display, Formatter};

/// Boxed storage error carried by reconcile failures.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Failure taxonomy surfaced unchanged to reconcile callers.
#[derive(Debug)]
pub enum ReconcileError {
    /// Storage rejected a read or write for reasons unrelated to concurrency,
    /// e.g. a join row pointing at an unknown tag.
    Persistence(BoxError),
    /// A concurrent writer for the same owner interfered.
    Conflict(String),
    /// Begin/commit/rollback infrastructure failure.
    Transaction(BoxError),
    /// The caller deadline expired; nothing was committed.
    Cancelled,
}

impl ReconcileError {
    /// Stable lowercase label used in logs and response envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Persistence(_) => "persistence",
            Self::Conflict(_) => "conflict",
            Self::Transaction(_) => "transaction",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistence(err) => write!(f, "association persistence failed: {err}"),
            Self::Conflict(details) => write!(f, "concurrent association update: {details}"),
            Self::Transaction(err) => write!(f, "association transaction failed: {err}"),
            Self::Cancelled => write!(f, "association reconciliation cancelled by deadline"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(&**err),
            Self::Transaction(err) => Some(&**err),
            Self::Conflict(_) => None,
            Self::Cancelled => None,
        }
    }
}
