//! Uploaded file → grid of cells
//!
//! Workbooks (xlsx, xlsm, xlsb, xls, ods) are read with calamine; anything
//! that is not a workbook but is valid UTF-8 is read as CSV. Only the first
//! worksheet is used.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use super::IngestError;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Single spreadsheet cell, reduced to what row parsing needs
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    /// Trimmed textual form. Whole numbers render without a fraction.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => n.to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(e) => Cell::Text(e.to_string()),
        }
    }
}

/// Decode an uploaded file into rows of cells (header row first).
pub fn decode_sheet(bytes: &[u8], file_name: Option<&str>) -> Result<Vec<Vec<Cell>>, IngestError> {
    if looks_like_csv(bytes, file_name) {
        decode_csv(bytes)
    } else {
        decode_workbook(bytes)
    }
}

/// Content wins over the file name: a workbook renamed to `.csv` is still a workbook.
fn looks_like_csv(bytes: &[u8], file_name: Option<&str>) -> bool {
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        return false;
    }
    if let Some(name) = file_name {
        let name = name.to_lowercase();
        if name.ends_with(".csv") || name.ends_with(".txt") {
            return true;
        }
    }
    std::str::from_utf8(bytes).is_ok()
}

fn decode_workbook(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| IngestError::InvalidFile(e.to_string()))?;

    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| IngestError::InvalidFile(e.to_string()))?,
        None => return Err(IngestError::InvalidFile("workbook has no worksheets".to_string())),
    };

    Ok(range
        .rows()
        .map(|row| row.iter().map(Cell::from).collect())
        .collect())
}

fn decode_csv(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, IngestError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::InvalidFile(e.to_string()))?;
        rows.push(
            record
                .iter()
                .map(|field| if field.is_empty() { Cell::Empty } else { Cell::text(field) })
                .collect(),
        );
    }
    Ok(rows)
}
