use std::io;

use thiserror::Error;

use crate::drive::StoreError;
use crate::telegram::GatewayError;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("invalid asset name {0:?}")]
    InvalidName(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("asset cache: {0}")]
    Io(#[from] io::Error),
}

/// Failure of one (row, target) insertion.
///
/// The `Display` text becomes the row's status cell, which settles the pair
/// for good, so messages are phrased for whoever reads the sheet.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("invalid row: no {0}")]
    MissingField(&'static str),

    #[error("failed to render template: {0}")]
    Template(#[from] minijinja::Error),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("catalog write failed: {0}")]
    Io(#[from] io::Error),

    #[error("catalog entry for {0:?} would contain the index placeholder")]
    PlaceholderCollision(String),

    #[error("updating published records is not supported yet")]
    UpdateUnsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_texts() {
        assert_eq!(
            TargetError::MissingField("title").to_string(),
            "invalid row: no title"
        );
        let e = TargetError::Asset(AssetError::Store(StoreError::Ambiguous {
            name: "a.mp3".into(),
            count: 3,
        }));
        assert_eq!(e.to_string(), "ambiguous file name a.mp3: 3 candidates");
    }
}
