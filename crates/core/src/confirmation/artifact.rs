//! Locating and validating confirmation artifacts.

use std::path::{Path, PathBuf};

use super::error::ConfirmationError;
use crate::night::{
    find_detect_file, parse_detectinfo, read_detectinfo, ConfirmationResult, DetectInfoError,
    Night, ResultSource,
};

/// Build a validated result from the FTPdetectinfo file in `output_dir`.
///
/// The artifact must exist, be non-empty, parse, and contain as many
/// detection blocks as it declares.
pub fn load_result(
    night: &Night,
    output_dir: &Path,
    source: ResultSource,
) -> Result<ConfirmationResult, ConfirmationError> {
    let artifact = find_detect_file(output_dir).map_err(ConfirmationError::ArtifactMissing)?;

    let text = std::fs::read_to_string(&artifact)
        .map_err(|e| ConfirmationError::malformed(artifact.clone(), e.to_string()))?;
    if text.trim().is_empty() {
        return Err(ConfirmationError::malformed(artifact, "artifact is empty"));
    }

    let info = parse_detectinfo(&text)
        .map_err(|e| ConfirmationError::malformed(artifact.clone(), e.to_string()))?;
    if !info.is_complete() {
        return Err(ConfirmationError::malformed(
            artifact,
            DetectInfoError::CountMismatch {
                declared: info.declared_count,
                found: info.detections.len() as u32,
            }
            .to_string(),
        ));
    }

    let calibration = find_calibration(output_dir).or_else(|| find_calibration(&night.path));

    Ok(ConfirmationResult {
        night_id: night.id.clone(),
        artifact,
        calibration,
        output_dir: output_dir.to_path_buf(),
        detections: info.detections,
        complete: true,
        source,
    })
}

/// Result taken straight from the archive, for nights that need no human
/// review.
pub fn archive_result(night: &Night) -> Result<ConfirmationResult, ConfirmationError> {
    load_result(night, &night.path, ResultSource::Archive)
}

/// Number of detections the capture pipeline declared for a night.
pub fn archive_detection_count(night: &Night) -> Result<u32, DetectInfoError> {
    let path = find_detect_file(&night.path)?;
    Ok(read_detectinfo(&path)?.declared_count)
}

/// First `CAL_*` file in a directory, by name.
pub fn find_calibration(dir: &Path) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("CAL_"))
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    found.sort();
    found.into_iter().next()
}
