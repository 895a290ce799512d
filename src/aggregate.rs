// Aggregation engine - per-operator/region expense statistics
//
// Groups enriched records by (registry id, CNPJ, legal name, region) and
// computes total, mean, sample standard deviation and count. Grouping is
// insertion-ordered and the final sort is stable, so two runs over the same
// input produce byte-identical output.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::error::{PipelineError, Result};
use crate::registry::EnrichedRecord;

/// Terminal output row, one per distinct group, sorted by total descending.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub registry_id: String,
    pub tax_id: String,
    pub legal_name: String,
    pub region: String,
    pub total_value: f64,
    pub mean_value: f64,
    pub std_dev: f64,
    pub record_count: usize,
}

pub fn aggregate(records: &[EnrichedRecord]) -> Vec<AggregateRow> {
    type GroupKey = (String, String, String, String);
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<(GroupKey, Vec<f64>)> = Vec::new();

    for record in records {
        let key = (
            record.registry_id.clone(),
            record.tax_id.clone(),
            record.legal_name.clone(),
            record.region.clone(),
        );
        match index.get(&key) {
            Some(&i) => groups[i].1.push(record.expense_value),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![record.expense_value]));
            }
        }
    }

    let mut rows: Vec<AggregateRow> = groups
        .into_iter()
        .map(|((registry_id, tax_id, legal_name, region), values)| {
            let count = values.len();
            let total: f64 = values.iter().sum();
            let mean = total / count as f64;
            AggregateRow {
                registry_id,
                tax_id,
                legal_name,
                region,
                total_value: total,
                mean_value: mean,
                std_dev: sample_std_dev(&values, mean),
                record_count: count,
            }
        })
        .collect();

    // Stable: ties keep group-construction order
    rows.sort_by(|a, b| {
        b.total_value
            .partial_cmp(&a.total_value)
            .unwrap_or(Ordering::Equal)
    });
    rows
}

/// Sample standard deviation (n-1 denominator); 0 for groups of fewer than
/// two members, where it is undefined.
fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Persist the statistics file: `RegistroANS;CNPJ;RazaoSocial;UF;ValorTotal;
/// MediaTrimestral;DesvioPadrao;QtdRegistros`, 2-decimal fixed floats.
pub fn write_aggregates_csv(rows: &[AggregateRow], path: &Path) -> Result<()> {
    let display = path.display().to_string();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;

    writer
        .write_record([
            "RegistroANS",
            "CNPJ",
            "RazaoSocial",
            "UF",
            "ValorTotal",
            "MediaTrimestral",
            "DesvioPadrao",
            "QtdRegistros",
        ])
        .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;
    for row in rows {
        writer
            .write_record([
                row.registry_id.as_str(),
                row.tax_id.as_str(),
                row.legal_name.as_str(),
                row.region.as_str(),
                &format!("{:.2}", row.total_value),
                &format!("{:.2}", row.mean_value),
                &format!("{:.2}", row.std_dev),
                &row.record_count.to_string(),
            ])
            .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;
    }
    writer.flush().map_err(|e| PipelineError::io(display, e))?;

    info!("aggregates written: {} ({} groups)", path.display(), rows.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(registry_id: &str, region: &str, value: f64) -> EnrichedRecord {
        EnrichedRecord {
            registry_id: registry_id.to_string(),
            tax_id: "11444777000161".to_string(),
            legal_name: format!("Operadora {}", registry_id),
            region: region.to_string(),
            year: 2024,
            quarter: 1,
            expense_value: value,
            tax_id_valid: true,
        }
    }

    #[test]
    fn test_aggregation_arithmetic() {
        let records = vec![
            record("1", "SP", 100.0),
            record("1", "SP", 200.0),
            record("1", "SP", 300.0),
        ];
        let rows = aggregate(&records);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_value, 600.0);
        assert_eq!(rows[0].mean_value, 200.0);
        assert_eq!(rows[0].std_dev, 100.0);
        assert_eq!(rows[0].record_count, 3);
    }

    #[test]
    fn test_singleton_group_has_zero_std_dev() {
        let rows = aggregate(&[record("1", "SP", 50.0)]);
        assert_eq!(rows[0].std_dev, 0.0);
        assert_eq!(rows[0].total_value, 50.0);
        assert_eq!(rows[0].record_count, 1);
    }

    #[test]
    fn test_sorted_by_total_descending() {
        let records = vec![
            record("small", "SP", 10.0),
            record("big", "RJ", 900.0),
            record("mid", "MG", 100.0),
        ];
        let rows = aggregate(&records);
        let ids: Vec<&str> = rows.iter().map(|r| r.registry_id.as_str()).collect();
        assert_eq!(ids, vec!["big", "mid", "small"]);
    }

    #[test]
    fn test_ties_keep_construction_order() {
        let records = vec![
            record("first", "SP", 100.0),
            record("second", "RJ", 100.0),
        ];
        let rows = aggregate(&records);
        assert_eq!(rows[0].registry_id, "first");
        assert_eq!(rows[1].registry_id, "second");
    }

    #[test]
    fn test_distinct_regions_are_distinct_groups() {
        let records = vec![record("1", "SP", 10.0), record("1", "RJ", 20.0)];
        assert_eq!(aggregate(&records).len(), 2);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let records = vec![
            record("1", "SP", 123.45),
            record("2", "RJ", 123.45),
            record("1", "SP", 10.0),
        ];
        let first = aggregate(&records);
        let second = aggregate(&records);
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_aggregates_two_decimal_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("despesas_agregadas.csv");
        let rows = aggregate(&[
            record("1", "SP", 100.0),
            record("1", "SP", 200.0),
            record("1", "SP", 300.0),
        ]);
        write_aggregates_csv(&rows, &path).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let mut lines = body.lines();
        assert_eq!(
            lines.next().unwrap(),
            "RegistroANS;CNPJ;RazaoSocial;UF;ValorTotal;MediaTrimestral;DesvioPadrao;QtdRegistros"
        );
        assert_eq!(
            lines.next().unwrap(),
            "1;11444777000161;Operadora 1;SP;600.00;200.00;100.00;3"
        );
    }
}
