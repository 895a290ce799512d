// ANS Expense Consolidation Pipeline - Core Library
// Exposes all pipeline stages for use in the CLI and tests

pub mod aggregate;
pub mod catalog;
pub mod cnpj;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod ingest;
pub mod ledger;
pub mod output;
pub mod registry;
pub mod schema;

// Re-export commonly used types
pub use aggregate::{aggregate, write_aggregates_csv, AggregateRow};
pub use catalog::{discover_recent_periods, ReportingPeriod};
pub use cnpj::validate_cnpj;
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use fetcher::{fetch, ExtractedArchive};
pub use http::HttpClient;
pub use ingest::{ingest, ExpenseRecord, IngestStats};
pub use ledger::{canonicalize_names, consolidate, filter_positive, write_ledger_csv};
pub use registry::{
    enrich, load_registry, write_registry_csv, EnrichedRecord, EnrichmentStats,
    OperatorRegistryEntry,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
