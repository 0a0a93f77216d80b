use thiserror::Error;

use crate::table::TableError;

/// Failures that abort a whole sheet. Per-row and per-target problems are
/// recorded in the sheet instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source has no sheets")]
    NoSheets,

    #[error("source sheet is empty")]
    EmptySource,

    #[error("column {column} not found")]
    MissingColumn { column: String },

    #[error("column {column} appears more than once")]
    DuplicateColumn { column: String },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("workbook task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to restrict result file: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a data row could not be mapped to field names.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("row {row}: value in column {column} which has no header")]
    UnnamedColumn { row: u32, column: String },
}
