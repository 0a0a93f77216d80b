use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to open workbook {path}: {source}")]
    Open {
        path: PathBuf,
        source: calamine::Error,
    },

    #[error("failed to read sheet {sheet}: {source}")]
    Sheet {
        sheet: String,
        source: calamine::Error,
    },

    #[error("failed to edit workbook: {0}")]
    Edit(#[from] umya_spreadsheet::XlsxError),

    #[error("workbook was not read from a file")]
    NoSource,

    #[error("workbook has no sheet {0}")]
    NoSuchSheet(String),

    #[error("invalid cell reference {column}{row}")]
    InvalidCell { column: String, row: u32 },
}
