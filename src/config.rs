// Pipeline configuration - explicit value object, built once in main
//
// Every component receives this by reference; nothing reads ambient state.

use clap::Parser;
use std::path::PathBuf;

/// Root of the ANS open-data portal (directory listing pages).
pub const DEFAULT_BASE_URL: &str = "https://dadosabertos.ans.gov.br/FTP/PDA/";

/// Last-known location of the active-operator registry (CADOP), used when
/// discovery against the portal listing fails.
pub const DEFAULT_REGISTRY_FALLBACK_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/operadoras_de_planos_de_saude_ativas/Relatorio_cadop.csv";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "ans-despesas",
    about = "Consolidates quarterly ANS accounting statements into expense aggregates"
)]
pub struct PipelineConfig {
    /// Portal root holding the directory listings
    #[arg(long, env = "ANS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Fallback URL for the CADOP registry snapshot
    #[arg(long, env = "ANS_CADOP_URL", default_value = DEFAULT_REGISTRY_FALLBACK_URL)]
    pub registry_fallback_url: String,

    /// How many of the most recent quarters to process
    #[arg(long, short = 'n', default_value_t = 3)]
    pub periods: usize,

    /// Scratch directory for downloads and extraction (removed at end of run)
    #[arg(long, default_value = "downloads")]
    pub work_dir: PathBuf,

    /// Directory receiving the three CSV outputs and their zip bundles
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Timeout for directory listings and metadata, in seconds
    #[arg(long, default_value_t = 30)]
    pub listing_timeout_secs: u64,

    /// Timeout for bulk downloads (archives, registry), in seconds
    #[arg(long, default_value_t = 60)]
    pub download_timeout_secs: u64,

    /// Keep the work directory after the run (debugging aid)
    #[arg(long, default_value_t = false)]
    pub keep_downloads: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            registry_fallback_url: DEFAULT_REGISTRY_FALLBACK_URL.to_string(),
            periods: 3,
            work_dir: PathBuf::from("downloads"),
            output_dir: PathBuf::from("output"),
            listing_timeout_secs: 30,
            download_timeout_secs: 60,
            keep_downloads: false,
        }
    }
}
