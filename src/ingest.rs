// Record ingester - turns every extracted tabular file into ExpenseRecords
//
// Files arrive in whatever shape the publisher used that quarter: semicolon
// CSVs in Latin-1, comma CSVs in UTF-8, or xlsx. Everything is read as text,
// headers are canonicalized through the alias table, and only expense-class
// rows (account codes starting with '4') survive. A file that cannot be
// parsed or that lacks a value column is skipped with a warning; it never
// aborts the period.

use std::fs;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use encoding_rs::mem::decode_latin1;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, Result};
use crate::fetcher::ExtractedArchive;
use crate::schema::{
    canonicalize_headers, find_column, COL_ACCOUNT, COL_LEGAL_NAME, COL_REGISTRY_ID, COL_TAX_ID,
    COL_VALUE,
};

/// Account codes starting with this digit are expense accounts in the
/// ANS chart of accounts.
const EXPENSE_ACCOUNT_PREFIX: char = '4';

/// File-name markers for statement types that are out of scope
/// (revenue and asset reports).
const SKIP_MARKERS: &[&str] = &["receita", "ativo"];

/// One row of the consolidated ledger. Defaults are "N/A" until the
/// registry join fills them in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseRecord {
    #[serde(rename = "RegistroANS")]
    pub registry_id: String,
    #[serde(rename = "CNPJ")]
    pub tax_id: String,
    #[serde(rename = "RazaoSocial")]
    pub legal_name: String,
    #[serde(rename = "Ano")]
    pub year: i32,
    #[serde(rename = "Trimestre")]
    pub quarter: u8,
    #[serde(rename = "ValorDespesas")]
    pub expense_value: f64,
}

/// A tabular file decoded to raw text cells, before schema resolution.
#[derive(Debug)]
pub struct RawTable {
    /// Header row exactly as the file claims it
    pub headers: Vec<String>,
    /// Data rows, one Vec<String> per row
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    pub files_read: usize,
    pub files_skipped: usize,
    pub rows_dropped: usize,
    pub records_emitted: usize,
}

impl IngestStats {
    pub fn merge(&mut self, other: &IngestStats) {
        self.files_read += other.files_read;
        self.files_skipped += other.files_skipped;
        self.rows_dropped += other.rows_dropped;
        self.records_emitted += other.records_emitted;
    }

    pub fn summary(&self) -> String {
        format!(
            "{} file(s) read, {} skipped, {} record(s) emitted, {} row(s) filtered",
            self.files_read, self.files_skipped, self.records_emitted, self.rows_dropped
        )
    }
}

/// Walk one extracted period and emit its expense records.
pub fn ingest(archive: &ExtractedArchive) -> (Vec<ExpenseRecord>, IngestStats) {
    let mut records = Vec::new();
    let mut stats = IngestStats::default();

    for entry in WalkDir::new(&archive.local_path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if !is_ingestible(path) {
            continue;
        }
        let table = match read_table(path) {
            Ok(table) => table,
            Err(e) => {
                warn!("{}", e);
                stats.files_skipped += 1;
                continue;
            }
        };
        match extract_records(
            &table,
            archive.period.year,
            archive.period.quarter,
            &mut stats,
        ) {
            Ok(mut file_records) => {
                debug!(
                    "{}: {} record(s)",
                    path.display(),
                    file_records.len()
                );
                stats.files_read += 1;
                records.append(&mut file_records);
            }
            Err(e) => {
                // No resolvable value column: the file contributes nothing
                warn!("{} ({})", e, path.display());
                stats.files_skipped += 1;
            }
        }
    }

    stats.records_emitted = records.len();
    (records, stats)
}

/// Tabular files only, minus the out-of-scope statement types.
fn is_ingestible(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
    let tabular = name.ends_with(".csv") || name.ends_with(".xlsx");
    tabular && !SKIP_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Read any supported tabular file into raw text cells.
pub fn read_table(path: &Path) -> Result<RawTable> {
    let name = path.to_string_lossy().to_lowercase();
    if name.ends_with(".xlsx") {
        read_spreadsheet(path)
    } else {
        read_delimited(path)
    }
}

/// Delimited read policy: semicolon + Latin-1 first, comma + UTF-8 on
/// failure. An attempt that yields a single-column header has hit the
/// wrong delimiter and counts as a failure too.
fn read_delimited(path: &Path) -> Result<RawTable> {
    let display = path.display().to_string();
    let bytes = fs::read(path).map_err(|e| PipelineError::io(display.clone(), e))?;

    let latin1 = decode_latin1(&bytes).into_owned();
    if let Some(table) = parse_delimited(&latin1, b';') {
        return Ok(table);
    }
    if let Ok(utf8) = std::str::from_utf8(&bytes) {
        if let Some(table) = parse_delimited(utf8, b',') {
            return Ok(table);
        }
    }
    Err(PipelineError::parse(
        display,
        "not parseable as ';'+latin-1 nor ','+utf-8",
    ))
}

fn parse_delimited(text: &str, delimiter: u8) -> Option<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.ok()?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    let headers = rows.first()?.clone();
    if headers.len() < 2 {
        return None;
    }
    Some(RawTable {
        headers,
        rows: rows.split_off(1),
    })
}

/// Spreadsheet read policy: first worksheet, every cell stringified.
fn read_spreadsheet(path: &Path) -> Result<RawTable> {
    let display = path.display().to_string();
    let mut workbook =
        open_workbook_auto(path).map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| PipelineError::parse(display.clone(), "workbook has no sheets"))?
        .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;

    let mut rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();
    if rows.is_empty() {
        return Err(PipelineError::parse(display, "empty sheet"));
    }
    let headers = rows.remove(0);
    Ok(RawTable { headers, rows })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve the canonical columns of one table and emit stamped records.
fn extract_records(
    table: &RawTable,
    year: i32,
    quarter: u8,
    stats: &mut IngestStats,
) -> Result<Vec<ExpenseRecord>> {
    let headers = canonicalize_headers(&table.headers);
    let value_idx = find_column(&headers, COL_VALUE)
        .ok_or_else(|| PipelineError::schema("statement file", COL_VALUE))?;
    let account_idx = find_column(&headers, COL_ACCOUNT);
    let registry_idx = find_column(&headers, COL_REGISTRY_ID);
    let tax_idx = find_column(&headers, COL_TAX_ID);
    let name_idx = find_column(&headers, COL_LEGAL_NAME);

    let mut records = Vec::new();
    for row in &table.rows {
        // Domain filter: only expense-class accounts when a code is present
        if let Some(idx) = account_idx {
            let account = cell(row, idx);
            if !account.trim_start().starts_with(EXPENSE_ACCOUNT_PREFIX) {
                stats.rows_dropped += 1;
                continue;
            }
        }
        records.push(ExpenseRecord {
            registry_id: field_or_default(row, registry_idx),
            tax_id: field_or_default(row, tax_idx),
            legal_name: field_or_default(row, name_idx),
            year,
            quarter,
            expense_value: parse_expense_value(cell(row, value_idx)),
        });
    }
    Ok(records)
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn field_or_default(row: &[String], idx: Option<usize>) -> String {
    match idx {
        Some(i) => {
            let value = cell(row, i).trim();
            if value.is_empty() {
                "N/A".to_string()
            } else {
                value.to_string()
            }
        }
        None => "N/A".to_string(),
    }
}

/// Brazilian number format: periods are thousands separators, comma is the
/// decimal mark. Unparseable values coerce to 0 rather than failing the row.
pub fn parse_expense_value(raw: &str) -> f64 {
    raw.trim()
        .replace('.', "")
        .replace(',', ".")
        .parse()
        .unwrap_or(0.0)
}
