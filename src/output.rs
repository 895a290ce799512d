// Output bundling - zip each CSV next to itself + content digests
//
// Every CSV artifact ships alongside a compressed copy, matching what the
// downstream loader expects. The SHA-256 digest of each CSV goes into the
// run report so identical re-runs are verifiable at a glance.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;
use zip::write::FileOptions;

use crate::error::{PipelineError, Result};

/// Write `<name>.zip` next to `<name>.csv`, containing the CSV under its
/// bare file name. Returns the bundle path.
pub fn bundle_zip(csv_path: &Path) -> Result<PathBuf> {
    let display = csv_path.display().to_string();
    let file_name = csv_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::parse(display.clone(), "path has no file name"))?;
    let zip_path = csv_path.with_extension("zip");

    let body = std::fs::read(csv_path).map_err(|e| PipelineError::io(display.clone(), e))?;
    let out = File::create(&zip_path)
        .map_err(|e| PipelineError::io(zip_path.display().to_string(), e))?;
    let mut writer = zip::ZipWriter::new(out);
    writer
        .start_file(file_name, FileOptions::default())
        .and_then(|_| writer.write_all(&body).map_err(zip::result::ZipError::Io))
        .map_err(|e| PipelineError::parse(zip_path.display().to_string(), e.to_string()))?;
    writer
        .finish()
        .map_err(|e| PipelineError::parse(zip_path.display().to_string(), e.to_string()))?;

    info!("bundled {}", zip_path.display());
    Ok(zip_path)
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let display = path.display().to_string();
    let mut file = File::open(path).map_err(|e| PipelineError::io(display.clone(), e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| PipelineError::io(display.clone(), e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::extract_zip;
    use std::fs;

    #[test]
    fn test_bundle_zip_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("consolidado_despesas.csv");
        fs::write(&csv_path, "CNPJ;RazaoSocial\n123;FOO\n").unwrap();

        let zip_path = bundle_zip(&csv_path).unwrap();
        assert_eq!(zip_path, dir.path().join("consolidado_despesas.zip"));

        let extracted_dir = dir.path().join("unpacked");
        fs::create_dir_all(&extracted_dir).unwrap();
        let count = extract_zip(&zip_path, &extracted_dir).unwrap();
        assert_eq!(count, 1);
        let body = fs::read_to_string(extracted_dir.join("consolidado_despesas.csv")).unwrap();
        assert_eq!(body, "CNPJ;RazaoSocial\n123;FOO\n");
    }

    #[test]
    fn test_sha256_is_stable_across_identical_writes() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "same;content\n").unwrap();
        fs::write(&b, "same;content\n").unwrap();
        assert_eq!(sha256_file(&a).unwrap(), sha256_file(&b).unwrap());

        fs::write(&b, "other;content\n").unwrap();
        assert_ne!(sha256_file(&a).unwrap(), sha256_file(&b).unwrap());
    }
}
