// Registry enricher - CADOP load, left join, CNPJ flagging
//
// The registry publication URL is not fixed: it is discovered from the
// portal root (the folder naming both "operadoras" and "ativas", then the
// csv named "relatorio"/"cadop" inside it), with a hardcoded last-known URL
// as fallback. The join is a left outer join on the registry id; every
// ledger record yields exactly one enriched record. Duplicate registry ids
// in the snapshot are resolved first-entry-wins, loudly (counted + warned),
// never silently.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::cnpj::validate_cnpj;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::http::{decode_body, join_url, HttpClient};
use crate::ingest::ExpenseRecord;
use crate::schema::{
    canonicalize_headers, find_column, COL_LEGAL_NAME, COL_MODALITY, COL_REGION, COL_REGISTRY_ID,
    COL_TAX_ID,
};

/// One operator in the active-operator registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorRegistryEntry {
    #[serde(rename = "RegistroANS")]
    pub registry_id: String,
    #[serde(rename = "CNPJ")]
    pub tax_id: String,
    #[serde(rename = "RazaoSocial")]
    pub legal_name: String,
    #[serde(rename = "Modalidade")]
    pub modality: String,
    #[serde(rename = "UF")]
    pub region: String,
}

/// Ledger record after the registry join.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub registry_id: String,
    pub tax_id: String,
    pub legal_name: String,
    pub region: String,
    pub year: i32,
    pub quarter: u8,
    pub expense_value: f64,
    pub tax_id_valid: bool,
}

/// Data-quality counters surfaced in the run report; never block processing.
#[derive(Debug, Default, Clone)]
pub struct EnrichmentStats {
    pub unmatched_records: usize,
    pub invalid_tax_ids: usize,
    pub duplicate_registry_ids: usize,
}

/// Locate the current CADOP URL on the portal; fall back to the last-known
/// URL when discovery fails at any step.
pub fn discover_registry_url(http: &HttpClient, config: &PipelineConfig) -> String {
    let discovered = try_discover_registry_url(http, config);
    match discovered {
        Some(url) => url,
        None => {
            warn!(
                "registry discovery failed; falling back to {}",
                config.registry_fallback_url
            );
            config.registry_fallback_url.clone()
        }
    }
}

fn try_discover_registry_url(http: &HttpClient, config: &PipelineConfig) -> Option<String> {
    let root_links = http.list_links(&config.base_url).ok()?;
    let folder = root_links.iter().find(|link| {
        let lower = link.to_lowercase();
        lower.contains("operadoras") && lower.contains("ativas")
    })?;
    let folder_url = join_url(&config.base_url, folder);

    let files = http.list_links(&folder_url).ok()?;
    let file = files.iter().find(|link| {
        let lower = link.to_lowercase();
        lower.ends_with(".csv") && (lower.contains("relatorio") || lower.contains("cadop"))
    })?;
    Some(join_url(&folder_url, file))
}

/// Download and parse the registry snapshot. A snapshot without a
/// resolvable registry-id column is fatal: there is only one registry file.
pub fn load_registry(
    http: &HttpClient,
    config: &PipelineConfig,
) -> Result<Vec<OperatorRegistryEntry>> {
    let url = discover_registry_url(http, config);
    info!("downloading operator registry from {}", url);
    let bytes = http.get_bytes(&url)?;
    let (body, encoding) = decode_body(&bytes);
    info!("registry decoded as {} ({} bytes)", encoding, bytes.len());
    parse_registry(&body, &url)
}

pub fn parse_registry(body: &str, source: &str) -> Result<Vec<OperatorRegistryEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows = reader.records();
    let header_row: Vec<String> = match rows.next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        _ => return Err(PipelineError::parse(source, "registry body is empty")),
    };
    let headers = canonicalize_headers(&header_row);

    let registry_idx = find_column(&headers, COL_REGISTRY_ID)
        .ok_or_else(|| PipelineError::schema(source, COL_REGISTRY_ID))?;
    let tax_idx = find_column(&headers, COL_TAX_ID);
    let name_idx = find_column(&headers, COL_LEGAL_NAME);
    let modality_idx = find_column(&headers, COL_MODALITY);
    let region_idx = find_column(&headers, COL_REGION);

    let field = |row: &csv::StringRecord, idx: Option<usize>| -> String {
        idx.and_then(|i| row.get(i))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let mut entries = Vec::new();
    for row in rows {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!("skipping malformed registry row: {}", e);
                continue;
            }
        };
        let registry_id = normalize_registry_id(row.get(registry_idx).unwrap_or(""));
        if registry_id.is_empty() {
            continue;
        }
        entries.push(OperatorRegistryEntry {
            registry_id,
            tax_id: field(&row, tax_idx),
            legal_name: field(&row, name_idx),
            modality: field(&row, modality_idx),
            region: field(&row, region_idx),
        });
    }
    info!("registry loaded: {} operator(s)", entries.len());
    Ok(entries)
}

/// Stringify, trim, and strip the trailing `.0` artifact produced when a
/// registry id was read as a float somewhere upstream.
pub fn normalize_registry_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}

/// Left outer join of the ledger onto the registry, plus CNPJ validation.
/// Every ledger record is retained; unmatched rows get the documented
/// defaults.
pub fn enrich(
    ledger: &[ExpenseRecord],
    registry: &[OperatorRegistryEntry],
) -> (Vec<EnrichedRecord>, EnrichmentStats) {
    let mut stats = EnrichmentStats::default();

    let mut by_id = std::collections::HashMap::new();
    for entry in registry {
        if by_id.insert(entry.registry_id.as_str(), entry).is_some() {
            stats.duplicate_registry_ids += 1;
        }
    }
    // First entry wins for duplicates; re-insert in reverse to restore that
    if stats.duplicate_registry_ids > 0 {
        warn!(
            "registry contains {} duplicate id(s); keeping the first entry of each",
            stats.duplicate_registry_ids
        );
        by_id.clear();
        for entry in registry.iter().rev() {
            by_id.insert(entry.registry_id.as_str(), entry);
        }
    }

    let mut enriched = Vec::with_capacity(ledger.len());
    for record in ledger {
        let key = normalize_registry_id(&record.registry_id);
        let (tax_id, legal_name, region) = match by_id.get(key.as_str()) {
            Some(entry) => (
                entry.tax_id.clone(),
                entry.legal_name.clone(),
                entry.region.clone(),
            ),
            None => {
                stats.unmatched_records += 1;
                (
                    "N/A".to_string(),
                    format!("Operadora {} Desconhecida", key),
                    "N/A".to_string(),
                )
            }
        };
        let tax_id_valid = validate_cnpj(&tax_id);
        if !tax_id_valid {
            stats.invalid_tax_ids += 1;
        }
        enriched.push(EnrichedRecord {
            registry_id: key,
            tax_id,
            legal_name,
            region,
            year: record.year,
            quarter: record.quarter,
            expense_value: record.expense_value,
            tax_id_valid,
        });
    }
    (enriched, stats)
}

/// Persist the snapshot copy so the loading stage needs no network access:
/// `RegistroANS;CNPJ;RazaoSocial;Modalidade;UF`.
pub fn write_registry_csv(entries: &[OperatorRegistryEntry], path: &Path) -> Result<()> {
    let display = path.display().to_string();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;

    writer
        .write_record(["RegistroANS", "CNPJ", "RazaoSocial", "Modalidade", "UF"])
        .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;
    for entry in entries {
        writer
            .write_record([
                entry.registry_id.as_str(),
                entry.tax_id.as_str(),
                entry.legal_name.as_str(),
                entry.modality.as_str(),
                entry.region.as_str(),
            ])
            .map_err(|e| PipelineError::parse(display.clone(), e.to_string()))?;
    }
    writer.flush().map_err(|e| PipelineError::io(display, e))?;

    info!(
        "registry snapshot written: {} ({} operators)",
        path.display(),
        entries.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, tax_id: &str, name: &str, region: &str) -> OperatorRegistryEntry {
        OperatorRegistryEntry {
            registry_id: id.to_string(),
            tax_id: tax_id.to_string(),
            legal_name: name.to_string(),
            modality: "Medicina de Grupo".to_string(),
            region: region.to_string(),
        }
    }

    fn ledger_record(registry_id: &str, value: f64) -> ExpenseRecord {
        ExpenseRecord {
            registry_id: registry_id.to_string(),
            tax_id: "N/A".to_string(),
            legal_name: "N/A".to_string(),
            year: 2024,
            quarter: 1,
            expense_value: value,
        }
    }

    #[test]
    fn test_normalize_registry_id_strips_float_artifact() {
        assert_eq!(normalize_registry_id("123456.0"), "123456");
        assert_eq!(normalize_registry_id("  123456  "), "123456");
        assert_eq!(normalize_registry_id("123456"), "123456");
        // Only the artifact suffix is stripped, not interior periods
        assert_eq!(normalize_registry_id("12.30"), "12.30");
    }

    #[test]
    fn test_parse_registry_aliases_columns() {
        let body = "Registro_ANS;CNPJ;Razão Social;Modalidade;UF\n\
                    123456;11444777000161;OPERADORA EXEMPLO S.A.;Cooperativa Médica;SP\n";
        let entries = parse_registry(body, "cadop.csv").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].registry_id, "123456");
        assert_eq!(entries[0].tax_id, "11444777000161");
        assert_eq!(entries[0].legal_name, "OPERADORA EXEMPLO S.A.");
        assert_eq!(entries[0].region, "SP");
    }

    #[test]
    fn test_parse_registry_without_id_column_is_schema_error() {
        let body = "CNPJ;Razao_Social\n11444777000161;FOO\n";
        let result = parse_registry(body, "cadop.csv");
        assert!(matches!(result, Err(PipelineError::Schema { .. })));
    }

    #[test]
    fn test_enrich_is_total_over_the_ledger() {
        let registry = vec![entry("123", "11444777000161", "FOO SAUDE", "SP")];
        let ledger = vec![
            ledger_record("123", 100.0),
            ledger_record("999", 50.0),
            ledger_record("123.0", 25.0),
        ];
        let (enriched, stats) = enrich(&ledger, &registry);

        // Exactly one output row per ledger record
        assert_eq!(enriched.len(), ledger.len());
        assert_eq!(stats.unmatched_records, 1);

        assert_eq!(enriched[0].legal_name, "FOO SAUDE");
        assert_eq!(enriched[0].region, "SP");
        // Float artifact stripped before matching
        assert_eq!(enriched[2].legal_name, "FOO SAUDE");
        assert_eq!(enriched[2].registry_id, "123");
    }

    #[test]
    fn test_enrich_unmatched_defaults() {
        let (enriched, _) = enrich(&[ledger_record("777", 10.0)], &[]);
        assert_eq!(enriched[0].tax_id, "N/A");
        assert_eq!(enriched[0].legal_name, "Operadora 777 Desconhecida");
        assert_eq!(enriched[0].region, "N/A");
        assert!(!enriched[0].tax_id_valid);
    }

    #[test]
    fn test_enrich_flags_invalid_cnpj_without_dropping() {
        let registry = vec![
            entry("1", "11444777000161", "VALIDA", "RJ"),
            entry("2", "11111111111111", "REPETIDA", "MG"),
        ];
        let ledger = vec![ledger_record("1", 5.0), ledger_record("2", 6.0)];
        let (enriched, stats) = enrich(&ledger, &registry);

        assert_eq!(enriched.len(), 2);
        assert!(enriched[0].tax_id_valid);
        assert!(!enriched[1].tax_id_valid);
        assert_eq!(stats.invalid_tax_ids, 1);
    }

    #[test]
    fn test_enrich_duplicate_registry_ids_first_wins_loudly() {
        let registry = vec![
            entry("123", "11444777000161", "PRIMEIRA", "SP"),
            entry("123", "11444777000161", "SEGUNDA", "RJ"),
        ];
        let (enriched, stats) = enrich(&[ledger_record("123", 1.0)], &registry);
        assert_eq!(stats.duplicate_registry_ids, 1);
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].legal_name, "PRIMEIRA");
    }

    #[test]
    fn test_write_registry_csv_contract_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadop_operadoras.csv");
        write_registry_csv(&[entry("123", "11444777000161", "FOO", "SP")], &path).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let mut lines = body.lines();
        assert_eq!(lines.next().unwrap(), "RegistroANS;CNPJ;RazaoSocial;Modalidade;UF");
        assert_eq!(
            lines.next().unwrap(),
            "123;11444777000161;FOO;Medicina de Grupo;SP"
        );
    }
}
