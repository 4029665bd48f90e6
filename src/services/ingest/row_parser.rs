//! Spreadsheet rows → typed task records
//!
//! Parsing is lenient: a missing column, an unreadable date or a
//! non-numeric percentage falls back to a per-field default instead of
//! rejecting the file. Only a sheet without any usable data row fails.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use super::sheet::Cell;
use super::IngestError;
use crate::types::{NewInfraTask, NewTask};

/// Days between the spreadsheet serial epoch (1899-12-30) and 1970-01-01.
const SERIAL_UNIX_EPOCH_OFFSET: f64 = 25569.0;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];

/// Logical column of a task sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    InfraPhase,
    TaskName,
    Workstream,
    Deliverable,
    Phase,
    Milestone,
    Status,
    Percent,
    StartDate,
    EndDate,
    Owner,
    Customer,
}

/// A record family that can be read from a spreadsheet and replaced per scope.
pub trait SheetRecord: Sized + Send + Sync + 'static {
    /// Entity name used in messages and audit entries
    const ENTITY: &'static str;

    /// Label used in the replace confirmation message
    const UPLOAD_LABEL: &'static str;

    /// Ordered (keyword, field) pairs. A header equal to a keyword claims its
    /// field first; every other column binds to the first pair whose keyword
    /// it contains and whose field is still unbound.
    const HEADER_KEYWORDS: &'static [(&'static str, Field)];

    fn from_row(row: &RowView<'_>, today: DateTime<Utc>) -> Self;

    #[cfg(test)]
    fn customer_name(&self) -> Option<&str>;

    fn set_customer_name(&mut self, customer_name: Option<String>);
}

impl SheetRecord for NewInfraTask {
    const ENTITY: &'static str = "InfraTask";
    const UPLOAD_LABEL: &'static str = "Infra Excel";

    const HEADER_KEYWORDS: &'static [(&'static str, Field)] = &[
        ("infra", Field::InfraPhase),
        ("status", Field::Status),
        ("complete", Field::Percent),
        ("percent", Field::Percent),
        ("%", Field::Percent),
        ("start date", Field::StartDate),
        ("end date", Field::EndDate),
        ("start", Field::StartDate),
        ("end", Field::EndDate),
        ("owner", Field::Owner),
        ("customer", Field::Customer),
        ("task", Field::TaskName),
    ];

    fn from_row(row: &RowView<'_>, today: DateTime<Utc>) -> Self {
        let start_date = row.date(Field::StartDate, today);
        Self {
            infra_phase: row.text(Field::InfraPhase, "General"),
            task_name: row.text(Field::TaskName, "TBD"),
            status: row.text(Field::Status, "Planned"),
            percent_complete: row.number(Field::Percent),
            start_date,
            end_date: row.date(Field::EndDate, start_date),
            owner: row.text(Field::Owner, ""),
            customer_name: None,
        }
    }

    #[cfg(test)]
    fn customer_name(&self) -> Option<&str> {
        self.customer_name.as_deref()
    }

    fn set_customer_name(&mut self, customer_name: Option<String>) {
        self.customer_name = customer_name;
    }
}

impl SheetRecord for NewTask {
    const ENTITY: &'static str = "Task";
    const UPLOAD_LABEL: &'static str = "Task Excel";

    const HEADER_KEYWORDS: &'static [(&'static str, Field)] = &[
        ("workstream", Field::Workstream),
        ("deliverable", Field::Deliverable),
        ("milestone", Field::Milestone),
        ("status", Field::Status),
        ("progress", Field::Percent),
        ("complete", Field::Percent),
        ("%", Field::Percent),
        ("phase", Field::Phase),
        ("start date", Field::StartDate),
        ("end date", Field::EndDate),
        ("start", Field::StartDate),
        ("end", Field::EndDate),
        ("owner", Field::Owner),
        ("customer", Field::Customer),
    ];

    fn from_row(row: &RowView<'_>, today: DateTime<Utc>) -> Self {
        let start_date = row.date(Field::StartDate, today);
        Self {
            workstream: row.text(Field::Workstream, "General"),
            deliverable: row.text(Field::Deliverable, "TBD"),
            status: row.text(Field::Status, "Planned"),
            progress: row.number(Field::Percent),
            phase: row.text(Field::Phase, "General"),
            milestone: row.text(Field::Milestone, ""),
            owner: row.text(Field::Owner, ""),
            start_date,
            end_date: row.date(Field::EndDate, start_date),
            customer_name: None,
        }
    }

    #[cfg(test)]
    fn customer_name(&self) -> Option<&str> {
        self.customer_name.as_deref()
    }

    fn set_customer_name(&mut self, customer_name: Option<String>) {
        self.customer_name = customer_name;
    }
}

/// Column positions inferred from the header row
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    columns: HashMap<Field, usize>,
}

impl ColumnMap {
    pub fn infer(headers: &[Cell], keywords: &[(&str, Field)]) -> Self {
        let headers: Vec<String> = headers.iter().map(|cell| normalize_header(&cell.to_text())).collect();
        let mut columns = HashMap::new();
        let mut claimed = vec![false; headers.len()];

        // Exact headers first, so "Dependency" cannot take End Date from "End Date".
        for (idx, header) in headers.iter().enumerate() {
            let exact = keywords
                .iter()
                .find(|(keyword, field)| header == keyword && !columns.contains_key(field));
            if let Some((_, field)) = exact {
                columns.insert(*field, idx);
                claimed[idx] = true;
            }
        }

        for (idx, header) in headers.iter().enumerate() {
            if claimed[idx] || header.is_empty() {
                continue;
            }
            let bound = keywords
                .iter()
                .find(|(keyword, field)| header.contains(keyword) && !columns.contains_key(field));
            if let Some((_, field)) = bound {
                columns.insert(*field, idx);
            }
        }
        Self { columns }
    }

    pub fn get(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }
}

/// One data row seen through the inferred columns
pub struct RowView<'a> {
    cells: &'a [Cell],
    columns: &'a ColumnMap,
}

impl<'a> RowView<'a> {
    pub fn new(cells: &'a [Cell], columns: &'a ColumnMap) -> Self {
        Self { cells, columns }
    }

    fn cell(&self, field: Field) -> Option<&'a Cell> {
        self.columns.get(field).and_then(|idx| self.cells.get(idx))
    }

    /// Trimmed text, or `default` when the cell is missing or blank.
    pub fn text(&self, field: Field, default: &str) -> String {
        match self.cell(field).map(Cell::to_text) {
            Some(text) if !text.is_empty() => text,
            _ => default.to_string(),
        }
    }

    pub fn number(&self, field: Field) -> f64 {
        self.cell(field).map(coerce_number).unwrap_or(0.0)
    }

    pub fn date(&self, field: Field, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.cell(field).and_then(coerce_date).unwrap_or(fallback)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_blank)
    }
}

/// Records read from one sheet
#[derive(Debug, Clone)]
pub struct ParsedSheet<R> {
    pub records: Vec<R>,
    /// Distinct non-empty values of the Customer column, if there is one
    pub customers: BTreeSet<String>,
    /// Data rows in the sheet, blank rows included
    pub rows_read: usize,
}

/// Parse a sheet whose first row holds the headers.
pub fn parse_sheet<R: SheetRecord>(
    rows: &[Vec<Cell>],
    today: DateTime<Utc>,
) -> Result<ParsedSheet<R>, IngestError> {
    let (header_row, data_rows) = match rows.split_first() {
        Some((header, data)) if !data.is_empty() => (header, data),
        _ => return Err(IngestError::NoDataRows),
    };

    let columns = ColumnMap::infer(header_row, R::HEADER_KEYWORDS);
    let mut records = Vec::new();
    let mut customers = BTreeSet::new();

    for cells in data_rows {
        let row = RowView::new(cells, &columns);
        if row.is_blank() {
            continue;
        }

        let customer = row.text(Field::Customer, "");
        if !customer.is_empty() {
            customers.insert(customer);
        }

        records.push(R::from_row(&row, today));
    }

    if records.is_empty() {
        return Err(IngestError::NoValidRows { entity: R::ENTITY });
    }

    Ok(ParsedSheet {
        records,
        customers,
        rows_read: data_rows.len(),
    })
}

/// Lowercase, collapse whitespace runs to one space, trim.
pub fn normalize_header(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Numeric cell value; anything non-numeric is 0. Values are not clamped.
pub fn coerce_number(cell: &Cell) -> f64 {
    let value = match cell {
        Cell::Number(n) => *n,
        Cell::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Cell::Empty => 0.0,
    };
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Spreadsheet serial or date text → UTC date-time.
pub fn coerce_date(cell: &Cell) -> Option<DateTime<Utc>> {
    match cell {
        Cell::Number(serial) => serial_to_date(*serial),
        Cell::Text(s) => {
            let s = s.trim();
            parse_date_text(s).or_else(|| s.parse::<f64>().ok().and_then(serial_to_date))
        }
        Cell::Empty => None,
    }
}

/// Spreadsheet serial date (1900 convention) → UTC midnight of that day.
pub fn serial_to_date(serial: f64) -> Option<DateTime<Utc>> {
    if !serial.is_finite() {
        return None;
    }
    let days = (serial - SERIAL_UNIX_EPOCH_OFFSET).floor();
    if days.abs() > 3_000_000.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let date = epoch.checked_add_signed(Duration::days(days as i64))?;
    Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

/// Parse a free-text date. Date-only values are taken as UTC midnight.
pub fn parse_date_text(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s).or_else(|_| DateTime::parse_from_rfc2822(s)) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
        }
    }

    None
}

/// UTC midnight of the given instant's day.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}
