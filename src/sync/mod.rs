//! Row synchronizer: classify every data row against every target from the
//! reserved columns, insert pending rows, and write the outcome back into the
//! in-memory workbook.

pub mod columns;
pub mod error;

use std::io::IsTerminal;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};

use crate::drive::ObjectStore;
use crate::layout::Layout;
use crate::table::{column_letter, Workbook};
use crate::target::{Row, Target};

pub use columns::ColumnMap;
pub use error::{RowError, SyncError};

/// Status text of a successful insertion.
pub const STATUS_OK: &str = "ok";

/// Per-(row, target) state derived from the two reserved cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    PendingInsert,
    PendingUpdate { record_id: String },
    /// Status already written; never touched again.
    Settled,
}

pub fn classify(status: &str, record_id: &str) -> Classification {
    match (status.is_empty(), record_id.is_empty()) {
        (true, true) => Classification::PendingInsert,
        (true, false) => Classification::PendingUpdate {
            record_id: record_id.to_string(),
        },
        (false, _) => Classification::Settled,
    }
}

impl Classification {
    pub fn is_pending(&self) -> bool {
        !matches!(self, Classification::Settled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub stats: SyncStats,
    /// True once any status or record-id cell was written.
    pub mutated: bool,
}

/// Map a data row to header names. A value under an empty or missing header
/// makes the row malformed.
pub fn materialize(header: &[String], cells: &[String], row: u32) -> Result<Row, RowError> {
    let mut fields = Row::new();
    for (idx, value) in cells.iter().enumerate() {
        match header.get(idx).filter(|name| !name.is_empty()) {
            Some(name) => {
                fields.insert(name.clone(), value.clone());
            }
            None if value.is_empty() => {}
            None => {
                return Err(RowError::UnnamedColumn {
                    row,
                    column: column_letter(idx),
                })
            }
        }
    }
    Ok(fields)
}

fn cell_at(cells: &[String], idx: usize) -> &str {
    cells.get(idx).map_or("", String::as_str)
}

fn create_progress_bar(total: u64) -> ProgressBar {
    if !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Synchronize the first sheet of `book` against `targets`.
///
/// Data rows end at the first empty row. Missing reserved columns abort the
/// sheet before anything is published.
pub async fn sync_sheet(
    book: &mut Workbook,
    targets: &mut [Target],
    store: &dyn ObjectStore,
) -> Result<SyncOutcome, SyncError> {
    let sheet = book.first_sheet().ok_or(SyncError::NoSheets)?;
    let sheet_name = sheet.name.clone();
    let mut rows = sheet.rows().take_while(|r| !r.is_empty());
    let header = rows.next().ok_or(SyncError::EmptySource)?;
    let data: Vec<Vec<String>> = rows.collect();

    let ids: Vec<&str> = targets.iter().map(Target::id).collect();
    let columns = ColumnMap::resolve(&header, &ids)?;

    let mut outcome = SyncOutcome::default();
    let pb = create_progress_bar(data.len() as u64);
    pb.set_message(sheet_name.clone());

    for (idx, cells) in data.iter().enumerate() {
        pb.inc(1);
        // header is row 1
        let row_number = idx as u32 + 2;
        let classes: Vec<Classification> = columns
            .iter()
            .map(|c| classify(cell_at(cells, c.status), cell_at(cells, c.record_id)))
            .collect();
        if !classes.iter().any(Classification::is_pending) {
            continue;
        }

        let row = match materialize(&header, cells, row_number) {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(sheet = %sheet_name, "Skipping malformed row: {}", e);
                continue;
            }
        };

        outcome.stats.total += 1;
        let mut row_ok = true;
        for ((target, class), cols) in targets.iter_mut().zip(classes).zip(columns.iter()) {
            match class {
                Classification::Settled => {}
                Classification::PendingInsert => match target.insert(&row, store).await {
                    Ok(record_id) => {
                        book.set_cell(&sheet_name, &cols.status_letter, row_number, STATUS_OK)?;
                        book.set_cell(&sheet_name, &cols.record_id_letter, row_number, &record_id)?;
                        outcome.mutated = true;
                    }
                    Err(e) => {
                        row_ok = false;
                        tracing::warn!(
                            target_id = %target.id(),
                            row = row_number,
                            "Insert failed: {}",
                            e
                        );
                        let mut status = e.to_string();
                        if status.is_empty() {
                            status = "error".to_string();
                        }
                        book.set_cell(&sheet_name, &cols.status_letter, row_number, &status)?;
                        outcome.mutated = true;
                    }
                },
                Classification::PendingUpdate { record_id } => {
                    if let Err(e) = target.update(&row, &record_id, store).await {
                        row_ok = false;
                        tracing::warn!(
                            target_id = %target.id(),
                            row = row_number,
                            record_id = %record_id,
                            "Update skipped: {}",
                            e
                        );
                    }
                }
            }
        }
        if row_ok {
            outcome.stats.done += 1;
        } else {
            outcome.stats.failed += 1;
        }
    }
    pb.finish_and_clear();
    Ok(outcome)
}

/// Open `source`, synchronize it, and write the workbook to `result` if any
/// cell changed.
pub async fn sync_file(
    source: &Path,
    result: &Path,
    targets: &mut [Target],
    store: &dyn ObjectStore,
    layout: Layout,
) -> Result<SyncOutcome, SyncError> {
    let path = source.to_path_buf();
    let mut book = tokio::task::spawn_blocking(move || Workbook::open(&path)).await??;

    let outcome = sync_sheet(&mut book, targets, store).await?;
    tracing::info!(
        source = %source.display(),
        total = outcome.stats.total,
        done = outcome.stats.done,
        failed = outcome.stats.failed,
        "Synchronized rows"
    );

    if outcome.mutated {
        let path = result.to_path_buf();
        tokio::task::spawn_blocking(move || book.save_as(&path)).await??;
        layout.restrict(result).await?;
    }
    Ok(outcome)
}
