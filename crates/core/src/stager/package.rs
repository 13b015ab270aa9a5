//! Upload package building and the local upload receipt.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::layout::UploadPlan;
use super::StageError;

/// Receipt file written next to a night's artifact after upload.
pub const RECEIPT_FILE_NAME: &str = "CamsFTPupload.txt";

/// A built package on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// Build the zip described by `plan`.
///
/// The archive is written under a temporary name and renamed when complete,
/// so a stale half-written package is never picked up.
pub fn build_package(plan: &UploadPlan) -> Result<PackageInfo, StageError> {
    let path = &plan.package_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StageError::io(parent, e))?;
    }

    let tmp = path.with_extension("zip.tmp");
    write_zip(&tmp, &plan.members).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })?;
    std::fs::rename(&tmp, path).map_err(|e| StageError::io(path, e))?;

    let (size, sha256) = sha256_file(path).map_err(|e| StageError::io(path, e))?;
    debug!("Built package {} ({} bytes)", path.display(), size);

    Ok(PackageInfo {
        path: path.clone(),
        size,
        sha256,
    })
}

fn write_zip(dest: &Path, members: &[PathBuf]) -> Result<(), StageError> {
    let file = File::create(dest).map_err(|e| StageError::io(dest, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for member in members {
        let name = member
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StageError::io(member, std::io::ErrorKind::InvalidInput.into()))?;
        let mut source = File::open(member).map_err(|e| StageError::io(member, e))?;
        zip.start_file(name, options)
            .map_err(|e| StageError::package(dest, e))?;
        std::io::copy(&mut source, &mut zip).map_err(|e| StageError::io(member, e))?;
    }

    let mut writer = zip.finish().map_err(|e| StageError::package(dest, e))?;
    writer.flush().map_err(|e| StageError::io(dest, e))?;
    Ok(())
}

fn sha256_file(path: &Path) -> std::io::Result<(u64, String)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Write `CamsFTPupload.txt` into `dir`.
pub fn write_receipt(
    dir: &Path,
    uploaded_at: DateTime<Utc>,
    remote_path: &str,
    package: &PackageInfo,
) -> Result<PathBuf, StageError> {
    let path = dir.join(RECEIPT_FILE_NAME);
    let content = format!(
        "UTC: {}\nRemote: {}\nBytes: {}\nSHA256: {}\n",
        uploaded_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        remote_path,
        package.size,
        package.sha256
    );
    std::fs::write(&path, content).map_err(|e| StageError::io(&path, e))?;
    Ok(path)
}
