// Source catalog - discovers the reporting periods published on the portal
//
// The accounting statements live two levels below the portal root:
// a "demonstracoes_contabeis" folder, year folders under it, and quarter
// entries (folders or zips) named like "1T2024" inside each year.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::http::{join_url, HttpClient};

/// One (year, quarter) unit of published filings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportingPeriod {
    pub year: i32,
    pub quarter: u8,
    pub source_url: String,
}

impl ReportingPeriod {
    /// Folder-name label, e.g. `2024_T1`.
    pub fn label(&self) -> String {
        format!("{}_T{}", self.year, self.quarter)
    }
}

/// Discover all published periods and keep the `config.periods` most recent.
///
/// Fatal when the statements folder cannot be located or when no
/// (year, quarter) pair is found at all.
pub fn discover_recent_periods(
    http: &HttpClient,
    config: &PipelineConfig,
) -> Result<Vec<ReportingPeriod>> {
    info!("mapping available quarters under {}", config.base_url);
    let root_links = http.list_links(&config.base_url)?;

    let statements_folder = root_links
        .iter()
        .find(|link| link.to_lowercase().contains("demonstracoes_contabeis"))
        .ok_or_else(|| {
            PipelineError::Fatal(
                "'demonstracoes_contabeis' folder not found in portal root listing".to_string(),
            )
        })?;
    let statements_url = join_url(&config.base_url, statements_folder);

    let mut periods = Vec::new();
    for year_link in http.list_links(&statements_url)? {
        let Some(year) = parse_year(&year_link) else {
            continue;
        };
        let year_url = join_url(&statements_url, &year_link);

        let quarter_links = match http.list_links(&year_url) {
            Ok(links) => links,
            Err(e) => {
                // One unreadable year folder does not sink the catalog
                warn!("skipping year listing {}: {}", year_url, e);
                continue;
            }
        };
        for quarter_link in quarter_links {
            if let Some(quarter) = parse_quarter(&quarter_link) {
                periods.push(ReportingPeriod {
                    year,
                    quarter,
                    source_url: join_url(&year_url, &quarter_link),
                });
            }
        }
    }

    let selected = select_recent(periods, config.periods);
    if selected.is_empty() {
        return Err(PipelineError::Fatal(
            "no reporting periods discovered on the portal".to_string(),
        ));
    }

    info!("selected periods:");
    for period in &selected {
        info!(" -> {} / quarter {}", period.year, period.quarter);
    }
    Ok(selected)
}

/// Sort descending by (year, quarter) and truncate to `count`.
pub fn select_recent(mut periods: Vec<ReportingPeriod>, count: usize) -> Vec<ReportingPeriod> {
    periods.sort_by(|a, b| (b.year, b.quarter).cmp(&(a.year, a.quarter)));
    periods.truncate(count);
    periods
}

/// First run of exactly 4 digits embedded in a folder name.
pub fn parse_year(name: &str) -> Option<i32> {
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4 {
                return name[start..i].parse().ok();
            }
        } else {
            i += 1;
        }
    }
    None
}

/// `<digit>T` pattern, case-insensitive, e.g. "1T2024.zip" -> 1.
pub fn parse_quarter(name: &str) -> Option<u8> {
    let bytes = name.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i].is_ascii_digit() && (bytes[i + 1] == b'T' || bytes[i + 1] == b't') {
            let quarter = bytes[i] - b'0';
            if (1..=4).contains(&quarter) {
                return Some(quarter);
            }
        }
    }
    None
}
