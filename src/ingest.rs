//! Turns an uploaded spreadsheet into a [`Dataset`].
//!
//! The first row is the header. Headers are matched loosely so that exports
//! from different ad networks (`Ad Format` vs `Ad format`, `Publisher
//! Impressions` vs `Impressions`) land on the same column.

use crate::models::{Column, Dataset, RevenueRecord};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file type '{0}', upload an .xlsx or .csv file")]
    UnsupportedType(String),
    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("the sheet has no data rows")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn from_data(data: &Data) -> Self {
        match data {
            Data::String(value) | Data::DateTimeIso(value) => Cell::text(value),
            Data::Float(value) => Cell::Number(*value),
            Data::Int(value) => Cell::Number(*value as f64),
            Data::Bool(value) => Cell::Text(value.to_string()),
            Data::DateTime(value) => Cell::Number(value.as_f64()),
            _ => Cell::Empty,
        }
    }

    fn text(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    fn as_label(&self) -> Option<String> {
        match self {
            Cell::Text(value) => Some(value.clone()),
            Cell::Number(value) if value.fract() == 0.0 => Some(format!("{}", *value as i64)),
            Cell::Number(value) => Some(value.to_string()),
            Cell::Empty => None,
        }
    }
}

pub fn parse_upload(file_name: &str, bytes: &[u8]) -> Result<Dataset, IngestError> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let rows = match extension.as_str() {
        "xlsx" | "xlsm" | "xls" | "ods" => read_workbook(bytes)?,
        "csv" => read_csv(bytes)?,
        _ => return Err(IngestError::UnsupportedType(extension)),
    };

    let dataset = build_dataset(file_name, rows)?;
    info!(
        source = %dataset.source,
        rows = dataset.records.len(),
        columns = dataset.columns.len(),
        "ingested upload"
    );
    Ok(dataset)
}

fn read_workbook(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(IngestError::NoWorksheet)??;

    Ok(range
        .rows()
        .map(|row| row.iter().map(Cell::from_data).collect())
        .collect())
}

fn read_csv(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, IngestError> {
    let bytes = bytes.strip_prefix("\u{feff}".as_bytes()).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(Cell::text).collect());
    }
    Ok(rows)
}

fn build_dataset(source: &str, rows: Vec<Vec<Cell>>) -> Result<Dataset, IngestError> {
    let mut rows = rows.into_iter();
    let header = rows.next().ok_or(IngestError::Empty)?;

    let mut columns = BTreeSet::new();
    let mut layout: Vec<Option<Column>> = Vec::with_capacity(header.len());
    for cell in &header {
        let column = cell
            .as_label()
            .and_then(|label| resolve_header(&label))
            .filter(|column| columns.insert(*column));
        layout.push(column);
    }

    let mut records = Vec::new();
    let mut bad_dates = 0usize;
    let mut bad_numbers = 0usize;

    for row in rows {
        if row.iter().all(|cell| *cell == Cell::Empty) {
            continue;
        }

        let mut record = RevenueRecord::default();
        for (cell, column) in row.iter().zip(&layout) {
            let Some(column) = column else { continue };
            match column {
                Column::Date => {
                    record.date = parse_date(cell);
                    if record.date.is_none() && *cell != Cell::Empty {
                        bad_dates += 1;
                    }
                }
                Column::Package => record.package = cell.as_label(),
                Column::Advertiser => record.advertiser = cell.as_label(),
                Column::Channel => record.channel = cell.as_label(),
                Column::AdFormat => record.ad_format = cell.as_label(),
                metric => {
                    let value = match coerce_number(cell, metric.is_rate()) {
                        Some(value) => value,
                        None => {
                            if *cell != Cell::Empty {
                                bad_numbers += 1;
                            }
                            0.0
                        }
                    };
                    set_metric(&mut record, *metric, value);
                }
            }
        }
        records.push(record);
    }

    if records.is_empty() {
        return Err(IngestError::Empty);
    }

    let mut warnings = Vec::new();
    for column in [Column::Date, Column::Package, Column::GrossRevenue] {
        if !columns.contains(&column) {
            warnings.push(format!("{} column missing.", column.label()));
        }
    }
    if bad_dates > 0 {
        warnings.push(format!("{bad_dates} row(s) have an unreadable Date and are left out of date windows."));
    }
    if bad_numbers > 0 {
        warnings.push(format!("{bad_numbers} numeric cell(s) could not be read and count as 0."));
    }
    debug!(bad_dates, bad_numbers, "coercion summary");

    Ok(Dataset {
        source: source.to_string(),
        columns,
        records,
        warnings,
    })
}

fn set_metric(record: &mut RevenueRecord, column: Column, value: f64) {
    match column {
        Column::GrossRevenue => record.gross_revenue = value,
        Column::Cost => record.cost = value,
        Column::Margin => record.margin = value,
        Column::Impressions => record.impressions = value,
        Column::Ecpm => record.ecpm = value,
        Column::FillRate => record.fill_rate = value,
        Column::Ivt => record.ivt = value,
        _ => {}
    }
}

pub fn resolve_header(label: &str) -> Option<Column> {
    let key: String = label
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();

    let column = match key.as_str() {
        "date" | "day" => Column::Date,
        "package" | "packagename" | "app" | "bundle" => Column::Package,
        "advertiser" => Column::Advertiser,
        "channel" => Column::Channel,
        "adformat" | "format" => Column::AdFormat,
        "grossrevenue" | "revenue" | "grossrev" => Column::GrossRevenue,
        "cost" => Column::Cost,
        "margin" => Column::Margin,
        "impressions" | "publisherimpressions" | "imps" => Column::Impressions,
        "ecpm" => Column::Ecpm,
        "fillrate" => Column::FillRate,
        "ivt" | "ivtrate" => Column::Ivt,
        _ => return None,
    };
    Some(column)
}

fn coerce_number(cell: &Cell, rate: bool) -> Option<f64> {
    let (value, explicit_percent) = match cell {
        Cell::Number(value) if value.is_finite() => (*value, false),
        Cell::Number(_) | Cell::Empty => return None,
        Cell::Text(text) => (parse_number(text)?, text.trim_end().ends_with('%')),
    };
    // A bare 95 in a rate column means 95%, not 9500%.
    if rate && !explicit_percent && value > 1.0 {
        Some(value / 100.0)
    } else {
        Some(value)
    }
}

/// Parses spreadsheet-formatted numbers such as `$1,234.50`, `(12)` or `95%`.
pub fn parse_number(text: &str) -> Option<f64> {
    let mut text = text.trim();
    if text.is_empty() {
        return None;
    }

    let mut negative = false;
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        negative = true;
        text = inner;
    }

    let percent = text.ends_with('%');
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | '%' | ' ' | '\u{a0}'))
        .collect();

    let mut value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    if percent {
        value /= 100.0;
    }
    if negative {
        value = -value;
    }
    Some(value)
}

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%Y%m%d"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
];

fn parse_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Number(serial) => excel_serial_to_date(*serial),
        Cell::Text(text) => parse_date_text(text),
        Cell::Empty => None,
    }
}

pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.date());
        }
    }
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(datetime.date_naive());
    }
    text.parse::<f64>().ok().and_then(excel_serial_to_date)
}

/// Excel's 1900 date system, counted from 1899-12-30 so that serials after
/// February 1900 line up with the calendar.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}
