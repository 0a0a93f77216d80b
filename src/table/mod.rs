//! XLSX workbook: cell values are read into memory with calamine, and cell
//! edits are replayed onto the source file with umya-spreadsheet so that
//! formulas, styles and everything else not touched survive the save.

pub mod error;

use std::fmt;
use std::path::Path;

use std::path::PathBuf;

use calamine::{open_workbook_auto, Data, Reader};

pub use error::TableError;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Rendered date, `YYYY-MM-DD HH:MM:SS`.
    Date(String),
}

impl Cell {
    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => Cell::Date(
                dt.as_datetime()
                    .map(|ndt| ndt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| dt.as_f64().to_string()),
            ),
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Cell::Date(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    /// Dense grid anchored at A1, `cells[row][column]`.
    cells: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, cells: Vec<Vec<Cell>>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    /// Rows as string cells, header first, trailing empty cells dropped.
    pub fn rows(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.cells.iter().map(|row| {
            let end = row
                .iter()
                .rposition(|c| !c.is_empty())
                .map_or(0, |i| i + 1);
            row[..end].iter().map(|c| c.to_string()).collect()
        })
    }

    #[cfg(test)]
    pub fn cell(&self, column: usize, row: u32) -> Option<&Cell> {
        let row_idx = (row as usize).checked_sub(1)?;
        self.cells.get(row_idx)?.get(column)
    }

    fn set(&mut self, column: usize, row: u32, value: Cell) {
        let row_idx = row as usize - 1;
        if self.cells.len() <= row_idx {
            self.cells.resize_with(row_idx + 1, Vec::new);
        }
        let cells = &mut self.cells[row_idx];
        if cells.len() <= column {
            cells.resize(column + 1, Cell::Empty);
        }
        cells[column] = value;
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Edit {
    sheet: String,
    /// 0-based.
    column: usize,
    row: u32,
    value: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    /// File the sheets were read from; edits are applied on top of it.
    source: Option<PathBuf>,
    sheets: Vec<Sheet>,
    edits: Vec<Edit>,
}

impl Workbook {
    #[cfg(test)]
    pub fn from_sheets(sheets: Vec<Sheet>) -> Self {
        Self {
            source: None,
            sheets,
            edits: Vec::new(),
        }
    }

    /// Read every sheet of the workbook at `path` into memory.
    pub fn open(path: &Path) -> Result<Self, TableError> {
        let mut reader = open_workbook_auto(path).map_err(|source| TableError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut sheets = Vec::new();
        for name in reader.sheet_names() {
            let range = reader
                .worksheet_range(&name)
                .map_err(|source| TableError::Sheet {
                    sheet: name.clone(),
                    source,
                })?;
            let (row_offset, col_offset) = range
                .start()
                .map_or((0, 0), |(r, c)| (r as usize, c as usize));

            let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
            for row in range.rows() {
                let mut out = vec![Cell::Empty; col_offset];
                out.extend(row.iter().map(Cell::from_data));
                cells.push(out);
            }
            sheets.push(Sheet::new(name, cells));
        }
        Ok(Self {
            source: Some(path.to_path_buf()),
            sheets,
            edits: Vec::new(),
        })
    }

    pub fn first_sheet(&self) -> Option<&Sheet> {
        self.sheets.first()
    }

    #[cfg(test)]
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Set `column`+`row` (A1 notation, row 1-based) of `sheet` to a text value.
    pub fn set_cell(
        &mut self,
        sheet: &str,
        column: &str,
        row: u32,
        value: &str,
    ) -> Result<(), TableError> {
        let invalid = || TableError::InvalidCell {
            column: column.to_string(),
            row,
        };
        let col = column_index(column).ok_or_else(invalid)?;
        if row == 0 {
            return Err(invalid());
        }
        let target = self
            .sheets
            .iter_mut()
            .find(|s| s.name == sheet)
            .ok_or_else(|| TableError::NoSuchSheet(sheet.to_string()))?;
        let cell = if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        };
        target.set(col, row, cell);
        self.edits.push(Edit {
            sheet: sheet.to_string(),
            column: col,
            row,
            value: value.to_string(),
        });
        Ok(())
    }

    /// Write the source workbook with every edit applied to `path`. The
    /// source file itself is left as it was.
    pub fn save_as(&self, path: &Path) -> Result<(), TableError> {
        let source = self.source.as_deref().ok_or(TableError::NoSource)?;
        let mut book = umya_spreadsheet::reader::xlsx::read(source)?;
        for edit in &self.edits {
            let worksheet = book
                .get_sheet_by_name_mut(&edit.sheet)
                .ok_or_else(|| TableError::NoSuchSheet(edit.sheet.clone()))?;
            let column = u32::try_from(edit.column + 1).map_err(|_| TableError::InvalidCell {
                column: column_letter(edit.column),
                row: edit.row,
            })?;
            worksheet
                .get_cell_mut((column, edit.row))
                .set_value_string(edit.value.as_str());
        }
        umya_spreadsheet::writer::xlsx::write(&book, path)?;
        Ok(())
    }

    /// Write the in-memory grid as a brand-new workbook.
    #[cfg(test)]
    pub fn write_new(&self, path: &Path) -> Result<(), rust_xlsxwriter::XlsxError> {
        let mut book = rust_xlsxwriter::Workbook::new();
        for sheet in &self.sheets {
            let worksheet = book.add_worksheet();
            worksheet.set_name(sheet.name.as_str())?;
            for (r, row) in sheet.cells.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    let (r, c) = (r as u32, c as u16);
                    match cell {
                        Cell::Empty => {}
                        Cell::Text(s) | Cell::Date(s) => {
                            worksheet.write_string(r, c, s.as_str())?;
                        }
                        Cell::Number(n) => {
                            worksheet.write_number(r, c, *n)?;
                        }
                        Cell::Bool(b) => {
                            worksheet.write_boolean(r, c, *b)?;
                        }
                    }
                }
            }
        }
        book.save(path)
    }
}

/// 0-based column index to A1 letters: 0 → `A`, 25 → `Z`, 26 → `AA`.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Inverse of [`column_letter`]. `None` for anything but ASCII letters.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for b in letters.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        n = n
            .checked_mul(26)?
            .checked_add((b.to_ascii_uppercase() - b'A') as usize + 1)?;
    }
    Some(n - 1)
}
