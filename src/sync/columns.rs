use std::collections::HashMap;

use super::error::SyncError;
use crate::table::column_letter;
use crate::target::{record_id_column, status_column};

/// Positions of one target's reserved columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetColumns {
    pub status: usize,
    pub record_id: usize,
    pub status_letter: String,
    pub record_id_letter: String,
}

/// Reserved columns for every target, in target order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    columns: Vec<TargetColumns>,
}

impl ColumnMap {
    /// Locate `<id>_status` and `<id>_record_id` for each target id in the
    /// header row. Every reserved column must appear exactly once.
    pub fn resolve<S: AsRef<str>>(header: &[String], target_ids: &[S]) -> Result<Self, SyncError> {
        let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, name) in header.iter().enumerate() {
            if !name.is_empty() {
                positions.entry(name.as_str()).or_default().push(idx);
            }
        }
        let locate = |column: String| -> Result<usize, SyncError> {
            match positions.get(column.as_str()).map(Vec::as_slice) {
                None | Some([]) => Err(SyncError::MissingColumn { column }),
                Some([idx]) => Ok(*idx),
                Some(_) => Err(SyncError::DuplicateColumn { column }),
            }
        };

        let columns = target_ids
            .iter()
            .map(|id| {
                let status = locate(status_column(id.as_ref()))?;
                let record_id = locate(record_id_column(id.as_ref()))?;
                Ok(TargetColumns {
                    status,
                    record_id,
                    status_letter: column_letter(status),
                    record_id_letter: column_letter(record_id),
                })
            })
            .collect::<Result<Vec<_>, SyncError>>()?;
        Ok(Self { columns })
    }

    #[cfg(test)]
    pub fn get(&self, target: usize) -> Option<&TargetColumns> {
        self.columns.get(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetColumns> {
        self.columns.iter()
    }
}
