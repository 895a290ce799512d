// Consolidated ledger - cross-period concatenation + name canonicalization
//
// The same operator reports under slightly different name strings across
// quarters (mergers, formatting drift). The chronologically latest filing is
// treated as authoritative: records are sorted ascending by (year, quarter),
// a CNPJ -> last-seen-name map is built, and every record is rewritten from
// that map. The "N/A" bucket is left alone on both sides: a default is not a
// name, and unidentified operators are not one operator.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::error::{PipelineError, Result};
use crate::ingest::ExpenseRecord;

/// Concatenate all per-period batches into one dataset. Order is preserved
/// but irrelevant; canonicalization re-sorts.
pub fn consolidate(batches: Vec<Vec<ExpenseRecord>>) -> Vec<ExpenseRecord> {
    batches.into_iter().flatten().collect()
}

/// Rewrite every record's legal name to the latest one filed under its CNPJ.
pub fn canonicalize_names(records: &mut [ExpenseRecord]) {
    records.sort_by(|a, b| (a.year, a.quarter).cmp(&(b.year, b.quarter)));

    let mut latest_name: HashMap<String, String> = HashMap::new();
    for record in records.iter() {
        if record.tax_id != "N/A" && record.legal_name != "N/A" {
            latest_name.insert(record.tax_id.clone(), record.legal_name.clone());
        }
    }

    for record in records.iter_mut() {
        if let Some(name) = latest_name.get(&record.tax_id) {
            record.legal_name = name.clone();
        }
    }
}

/// Zero and negative balances are not meaningful expenses for this dataset.
pub fn filter_positive(records: Vec<ExpenseRecord>) -> Vec<ExpenseRecord> {
    records
        .into_iter()
        .filter(|r| r.expense_value > 0.0)
        .collect()
}

/// Persist the ledger contract file: `CNPJ;RazaoSocial;Trimestre;Ano;
/// ValorDespesas`, semicolon-separated, UTF-8. Column names and order are
/// a compatibility contract with the enrichment stage; changing them is a
/// breaking change.
pub fn write_ledger_csv(records: &[ExpenseRecord], path: &Path) -> Result<()> {
    let display = path.display().to_string();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;

    writer
        .write_record(["CNPJ", "RazaoSocial", "Trimestre", "Ano", "ValorDespesas"])
        .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;
    for record in records {
        writer
            .write_record([
                record.tax_id.as_str(),
                record.legal_name.as_str(),
                &record.quarter.to_string(),
                &record.year.to_string(),
                &record.expense_value.to_string(),
            ])
            .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| PipelineError::io(display, e))?;

    info!("ledger written: {} ({} records)", path.display(), records.len());
    Ok(())
}
