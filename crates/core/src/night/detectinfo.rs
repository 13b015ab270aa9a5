//! FTPdetectinfo parsing.
//!
//! The file starts with a `Meteor Count = N` line, followed by a free-form
//! header and one block per detection:
//!
//! ```text
//! -------------------------------------------------------
//! FF_NL0001_20240101_203012_345_0123456.fits
//! Recalibrated with RMS on: 2024-01-02 06:12:33.123456 UTC
//! NL0001 0001 0012 0025.00 000.0 000.0  00.0 001.2 0123.4 0045.6
//! 0012.0000 0123.45 0456.78 ...
//! ```

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

use super::Detection;

const DETECT_PREFIX: &str = "FTPdetectinfo_";
const EXCLUDED_MARKERS: &[&str] = &["uncalibrated", "unfiltered", "pre-confirmation", "backup"];

/// Errors raised while locating or parsing an FTPdetectinfo file.
#[derive(Debug, Error)]
pub enum DetectInfoError {
    #[error("no FTPdetectinfo file in {dir}")]
    NotFound { dir: PathBuf },

    #[error("{count} candidate FTPdetectinfo files in {dir}")]
    Ambiguous { dir: PathBuf, count: usize },

    #[error("FTPdetectinfo file is empty")]
    Empty,

    #[error("missing 'Meteor Count' line, found: {line}")]
    MissingCount { line: String },

    #[error("declared {declared} detections but found {found}")]
    CountMismatch { declared: u32, found: u32 },

    #[error("malformed detection block at line {line_no}: {reason}")]
    MalformedBlock { line_no: usize, reason: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parsed contents of an FTPdetectinfo file.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectInfo {
    pub declared_count: u32,
    pub detections: Vec<Detection>,
}

impl DetectInfo {
    /// Declared count agrees with the detection blocks actually present.
    pub fn is_complete(&self) -> bool {
        self.declared_count as usize == self.detections.len()
    }
}

/// Locate the single FTPdetectinfo file in a directory.
///
/// Intermediate variants written by the capture pipeline (uncalibrated,
/// unfiltered, backups) are ignored.
pub fn find_detect_file(dir: &Path) -> Result<PathBuf, DetectInfoError> {
    let entries = std::fs::read_dir(dir).map_err(|e| DetectInfoError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(DETECT_PREFIX) || !name.ends_with(".txt") {
            continue;
        }
        if EXCLUDED_MARKERS.iter().any(|m| name.contains(m)) {
            continue;
        }
        candidates.push(entry.path());
    }

    match candidates.len() {
        0 => Err(DetectInfoError::NotFound {
            dir: dir.to_path_buf(),
        }),
        1 => Ok(candidates.remove(0)),
        count => Err(DetectInfoError::Ambiguous {
            dir: dir.to_path_buf(),
            count,
        }),
    }
}

/// Read and parse an FTPdetectinfo file.
pub fn read_detectinfo(path: &Path) -> Result<DetectInfo, DetectInfoError> {
    let text = std::fs::read_to_string(path).map_err(|e| DetectInfoError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_detectinfo(&text)
}

/// Parse FTPdetectinfo text.
pub fn parse_detectinfo(text: &str) -> Result<DetectInfo, DetectInfoError> {
    let lines: Vec<&str> = text.lines().collect();

    let first = lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .ok_or(DetectInfoError::Empty)?;
    let declared_count = parse_count_line(first).ok_or_else(|| DetectInfoError::MissingCount {
        line: first.to_string(),
    })?;

    let mut detections = Vec::new();
    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if !is_ff_line(line) {
            continue;
        }
        detections.push(parse_block(line, &lines[idx + 1..], idx + 1)?);
    }

    Ok(DetectInfo {
        declared_count,
        detections,
    })
}

fn parse_count_line(line: &str) -> Option<u32> {
    let (key, value) = line.split_once('=')?;
    if !key.trim().eq_ignore_ascii_case("meteor count") {
        return None;
    }
    value.trim().parse().ok()
}

fn is_ff_line(line: &str) -> bool {
    line.starts_with("FF") && (line.ends_with(".fits") || line.ends_with(".bin"))
}

/// Parse one detection block. The header line (`camera meteor segments fps
/// ...`) follows the FF name, optionally after a calibration note.
fn parse_block(ff_file: &str, rest: &[&str], line_no: usize) -> Result<Detection, DetectInfoError> {
    for candidate in rest.iter().take(2) {
        let tokens: Vec<&str> = candidate.split_whitespace().collect();
        if tokens.len() < 4 {
            continue;
        }
        if let (Ok(meteor_no), Ok(segments)) = (tokens[1].parse::<u32>(), tokens[2].parse::<u32>())
        {
            return Ok(Detection {
                ff_file: ff_file.to_string(),
                meteor_no,
                segments,
                captured_at: ff_timestamp(ff_file),
            });
        }
    }

    Err(DetectInfoError::MalformedBlock {
        line_no,
        reason: format!("no detection header after {}", ff_file),
    })
}

/// Decode `FF_<station>_<YYYYMMDD>_<HHMMSS>_<mmm>_<frame>.fits`.
fn ff_timestamp(ff_file: &str) -> Option<NaiveDateTime> {
    let parts: Vec<&str> = ff_file.split('_').collect();
    if parts.len() < 5 {
        return None;
    }
    let date = NaiveDate::parse_from_str(parts[2], "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(parts[3], "%H%M%S").ok()?;
    let millis: i64 = parts[4].parse().ok()?;
    Some(date.and_time(time) + chrono::Duration::milliseconds(millis))
}
