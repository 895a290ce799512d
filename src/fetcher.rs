// Archive fetcher - downloads each period's zip(s) and extracts them
//
// The transient download file is owned by a guard and removed when the
// guard drops, success or failure, so repeated runs never leak disk space.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::catalog::ReportingPeriod;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::http::{join_url, HttpClient};

/// A period's statements, extracted to local per-period storage.
#[derive(Debug, Clone)]
pub struct ExtractedArchive {
    pub period: ReportingPeriod,
    pub local_path: PathBuf,
}

/// Scoped transient file: removed on drop regardless of outcome.
struct TempDownload {
    path: PathBuf,
}

impl TempDownload {
    fn write(path: PathBuf, bytes: &[u8]) -> Result<Self> {
        fs::write(&path, bytes).map_err(|e| PipelineError::io(path.display().to_string(), e))?;
        Ok(TempDownload { path })
    }
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Download and extract one period. `None` means the period had no
/// discoverable archive or every archive failed; siblings keep going.
pub fn fetch(
    http: &HttpClient,
    config: &PipelineConfig,
    period: &ReportingPeriod,
) -> Result<Option<ExtractedArchive>> {
    let zip_urls = locate_archive_urls(http, period)?;
    if zip_urls.is_empty() {
        warn!("no zip found for {}; skipping period", period.label());
        return Ok(None);
    }

    let destination = config.work_dir.join(period.label());
    fs::create_dir_all(&destination)
        .map_err(|e| PipelineError::io(destination.display().to_string(), e))?;

    let mut extracted_any = false;
    for (index, url) in zip_urls.iter().enumerate() {
        // Per-archive failures are logged and do not abort sibling downloads
        match download_and_extract(http, config, url, index, &destination) {
            Ok(count) => {
                info!("extracted {} file(s) from {}", count, url);
                extracted_any = true;
            }
            Err(e) => warn!("download/extract failed for {}: {}", url, e),
        }
    }

    if !extracted_any {
        return Ok(None);
    }
    Ok(Some(ExtractedArchive {
        period: period.clone(),
        local_path: destination,
    }))
}

/// The period URL either names the archive itself or lists archive links.
fn locate_archive_urls(http: &HttpClient, period: &ReportingPeriod) -> Result<Vec<String>> {
    if period.source_url.to_lowercase().ends_with(".zip") {
        return Ok(vec![period.source_url.clone()]);
    }
    let links = match http.list_links(&period.source_url) {
        Ok(links) => links,
        Err(e) => {
            warn!("listing failed for {}: {}", period.source_url, e);
            return Ok(Vec::new());
        }
    };
    Ok(links
        .iter()
        .filter(|link| link.to_lowercase().ends_with(".zip"))
        .map(|link| join_url(&period.source_url, link))
        .collect())
}

fn download_and_extract(
    http: &HttpClient,
    config: &PipelineConfig,
    url: &str,
    index: usize,
    destination: &Path,
) -> Result<usize> {
    info!("downloading {}", url);
    let bytes = http.get_bytes(url)?;
    let temp_path = config.work_dir.join(format!("download_{}.tmp", index));
    let temp = TempDownload::write(temp_path, &bytes)?;
    extract_zip(&temp.path, destination)
}

/// Unpack a zip into `destination`, returning the extracted file count.
pub fn extract_zip(zip_path: &Path, destination: &Path) -> Result<usize> {
    let zip_display = zip_path.display().to_string();
    let file = File::open(zip_path).map_err(|e| PipelineError::io(zip_display.clone(), e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| PipelineError::parse(zip_display.clone(), e.to_string()))?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| PipelineError::parse(zip_display.clone(), e.to_string()))?;
        // enclosed_name rejects entries that would escape the destination
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!("skipping unsafe zip entry in {}", zip_display);
            continue;
        };
        let out_path = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| PipelineError::io(out_path.display().to_string(), e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::io(parent.display().to_string(), e))?;
        }
        let mut out = File::create(&out_path)
            .map_err(|e| PipelineError::io(out_path.display().to_string(), e))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| PipelineError::io(out_path.display().to_string(), e))?;
        extracted += 1;
    }
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn make_zip(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let zip_path = dir.join("fixture.zip");
        let file = File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        zip_path
    }

    #[test]
    fn test_extract_zip_unpacks_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = make_zip(
            dir.path(),
            &[
                ("1T2024.csv", "REG_ANS;VALOR\n123;10,00\n"),
                ("nested/2T2024.csv", "REG_ANS;VALOR\n456;20,00\n"),
            ],
        );
        let dest = dir.path().join("extracted");
        fs::create_dir_all(&dest).unwrap();

        let count = extract_zip(&zip_path, &dest).unwrap();
        assert_eq!(count, 2);
        assert!(dest.join("1T2024.csv").exists());
        assert!(dest.join("nested/2T2024.csv").exists());
        let body = fs::read_to_string(dest.join("1T2024.csv")).unwrap();
        assert!(body.contains("123;10,00"));
    }

    #[test]
    fn test_extract_zip_rejects_non_zip() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("not_a.zip");
        fs::write(&bogus, "plain text").unwrap();
        let result = extract_zip(&bogus, dir.path());
        assert!(matches!(result, Err(PipelineError::Parse { .. })));
    }

    #[test]
    fn test_temp_download_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.tmp");
        {
            let _temp = TempDownload::write(path.clone(), b"payload").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
