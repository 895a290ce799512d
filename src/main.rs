// ANS expense pipeline - batch entry point
//
// Linear, single-threaded run: catalog -> fetch -> ingest -> consolidate ->
// enrich -> aggregate -> persist. Item-level failures are logged and
// skipped; the run only aborts when a whole stage produced nothing usable.

use std::fs;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ans_despesas::output::{bundle_zip, sha256_file};
use ans_despesas::{
    aggregate, canonicalize_names, consolidate, discover_recent_periods, enrich, fetch,
    filter_positive, ingest, load_registry, write_aggregates_csv, write_ledger_csv,
    write_registry_csv, HttpClient, IngestStats, PipelineConfig, PipelineError,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfig::parse();
    if let Err(e) = run(&config) {
        error!("fatal pipeline error: {:#}", e);
        return Err(e);
    }
    Ok(())
}

fn run(config: &PipelineConfig) -> Result<()> {
    let started_at = Utc::now();
    let timer = std::time::Instant::now();
    info!(
        "ans-despesas v{} starting at {}",
        ans_despesas::VERSION,
        started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating output dir {}", config.output_dir.display()))?;

    let http = HttpClient::new(config)?;

    // 1. Catalog: the N most recent reporting periods
    let periods = discover_recent_periods(&http, config)?;

    // 2. Fetch: download + extract each period's archives
    let mut archives = Vec::new();
    for period in &periods {
        match fetch(&http, config, period) {
            Ok(Some(archive)) => archives.push(archive),
            Ok(None) => {}
            Err(e) => warn!("skipping period {}: {}", period.label(), e),
        }
    }

    // 3. Ingest: every extracted tabular file to uniform expense records
    let mut batches = Vec::new();
    let mut ingest_stats = IngestStats::default();
    for archive in &archives {
        info!("processing {}", archive.period.label());
        let (records, stats) = ingest(archive);
        ingest_stats.merge(&stats);
        batches.push(records);
    }

    // 4. Consolidate: one cross-period ledger, canonical names, positive only
    let mut ledger = consolidate(batches);
    if ledger.is_empty() {
        return Err(PipelineError::Fatal(
            "no records ingested from any downloaded period".to_string(),
        )
        .into());
    }
    info!("standardizing legal names by CNPJ");
    canonicalize_names(&mut ledger);
    let ledger = filter_positive(ledger);

    let ledger_csv = config.output_dir.join("consolidado_despesas.csv");
    write_ledger_csv(&ledger, &ledger_csv)?;
    bundle_zip(&ledger_csv)?;

    // 5. Registry: CADOP snapshot; entirely unavailable means abort
    let registry =
        load_registry(&http, config).context("registry load failed; cannot enrich the ledger")?;
    let registry_csv = config.output_dir.join("cadop_operadoras.csv");
    write_registry_csv(&registry, &registry_csv)?;
    bundle_zip(&registry_csv)?;

    // 6. Enrich + validate
    let (enriched, quality) = enrich(&ledger, &registry);
    if quality.invalid_tax_ids > 0 {
        warn!(
            "{} record(s) carry invalid or unknown CNPJs",
            quality.invalid_tax_ids
        );
    }
    if quality.unmatched_records > 0 {
        warn!(
            "{} record(s) had no registry match and kept default fields",
            quality.unmatched_records
        );
    }

    // 7. Aggregate statistics
    let rows = aggregate(&enriched);
    let aggregates_csv = config.output_dir.join("despesas_agregadas.csv");
    write_aggregates_csv(&rows, &aggregates_csv)?;
    bundle_zip(&aggregates_csv)?;

    // Scratch space is never persisted across runs
    if config.keep_downloads {
        info!("keeping work dir {} as requested", config.work_dir.display());
    } else if let Err(e) = fs::remove_dir_all(&config.work_dir) {
        warn!("could not remove work dir: {}", e);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Pipeline complete in {:.1?}", timer.elapsed());
    println!("  Periods processed:  {}", archives.len());
    println!("  Ingestion:          {}", ingest_stats.summary());
    println!("  Ledger records:     {}", ledger.len());
    println!("  Registry operators: {}", registry.len());
    println!("  Aggregate groups:   {}", rows.len());
    println!(
        "  Invalid CNPJs: {} | Unmatched joins: {} | Duplicate registry ids: {}",
        quality.invalid_tax_ids, quality.unmatched_records, quality.duplicate_registry_ids
    );
    for path in [&ledger_csv, &registry_csv, &aggregates_csv] {
        println!("  {} sha256={}", path.display(), sha256_file(path)?);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    Ok(())
}
