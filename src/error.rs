use thiserror::Error;

use crate::model::ErrorKey;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A mandatory field is blank, zero or not a number.
    #[error("{key}: {message}")]
    Validation { key: ErrorKey, message: String },

    #[error("Maximum limit of {max} sites reached")]
    SiteLimit { max: usize },

    #[error("Maximum limit of {max} forms per site reached")]
    FormLimit { max: usize },

    #[error("The last remaining site cannot be deleted")]
    LastSite,

    #[error("No {what} at index {index}")]
    OutOfRange { what: &'static str, index: usize },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// An asynchronous result arrived after newer edits.
    #[error("Stale update rejected (ticket {ticket}, current {current})")]
    Stale { ticket: u64, current: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl LedgerError {
    /// Capacity errors abort an add operation without touching state.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::SiteLimit { .. } | Self::FormLimit { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
