//! Core night data types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

static NIGHT_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]+)_(\d{8})_(\d{6})(?:_(\d{1,6}))?$").expect("valid night regex")
});

// ============================================================================
// Night identifier
// ============================================================================

/// Identifier of one observing night: the station code plus the capture start.
///
/// Ordering is chronological first and by station second, so sorting a set of
/// ids yields the order in which nights must be processed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NightId {
    start: NaiveDateTime,
    station: String,
}

impl NightId {
    /// Create an id from its parts. The station code is upper-cased.
    pub fn new(station: impl Into<String>, start: NaiveDateTime) -> Self {
        Self {
            start,
            station: station.into().to_ascii_uppercase(),
        }
    }

    /// Parse an archive directory name such as `NL0001_20240101_170512_123456`.
    ///
    /// Returns `None` for names that do not follow the convention.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let caps = NIGHT_DIR_RE.captures(name)?;
        let date = NaiveDate::parse_from_str(&caps[2], "%Y%m%d").ok()?;
        let time = chrono::NaiveTime::parse_from_str(&caps[3], "%H%M%S").ok()?;
        Some(Self::new(&caps[1], date.and_time(time)))
    }

    /// Station code (e.g. `NL0001`).
    pub fn station(&self) -> &str {
        &self.station
    }

    /// Capture start time (UTC, as written by the capture pipeline).
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Calendar date of the capture start.
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }
}

impl fmt::Display for NightId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.station, self.start.format("%Y%m%d_%H%M%S"))
    }
}

impl FromStr for NightId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_dir_name(s.trim()).ok_or_else(|| format!("invalid night id: {}", s))
    }
}

impl From<NightId> for String {
    fn from(id: NightId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for NightId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle state of a night.
///
/// `Discovered` is derived from a scan and never persisted; every other state
/// is recorded in the progress ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NightState {
    Discovered,
    Confirming,
    Confirmed,
    Uploading,
    Uploaded,
    Skipped,
    Failed,
}

impl NightState {
    /// Stable lowercase name used in the ledger and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            NightState::Discovered => "discovered",
            NightState::Confirming => "confirming",
            NightState::Confirmed => "confirmed",
            NightState::Uploading => "uploading",
            NightState::Uploaded => "uploaded",
            NightState::Skipped => "skipped",
            NightState::Failed => "failed",
        }
    }

    /// Terminal for a run: no further automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NightState::Uploaded | NightState::Skipped | NightState::Failed
        )
    }

    /// States that only exist while a step is in flight. Finding one at
    /// startup means the previous run was interrupted.
    pub fn is_transient(&self) -> bool {
        matches!(self, NightState::Confirming | NightState::Uploading)
    }

    /// Nights in these states are never scanned again.
    pub fn is_completed(&self) -> bool {
        matches!(self, NightState::Uploaded | NightState::Skipped)
    }
}

impl fmt::Display for NightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NightState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(NightState::Discovered),
            "confirming" => Ok(NightState::Confirming),
            "confirmed" => Ok(NightState::Confirmed),
            "uploading" => Ok(NightState::Uploading),
            "uploaded" => Ok(NightState::Uploaded),
            "skipped" => Ok(NightState::Skipped),
            "failed" => Ok(NightState::Failed),
            other => Err(format!("unknown night state: {}", other)),
        }
    }
}

// ============================================================================
// Night
// ============================================================================

/// One night discovered in the archive.
#[derive(Debug, Clone)]
pub struct Night {
    pub id: NightId,
    /// Archive directory written by the capture pipeline.
    pub path: PathBuf,
    /// Directory name as found on disk (includes the microsecond suffix).
    pub dir_name: String,
    /// 1-based index among the directories of the same station and date.
    pub sequence: u32,
    /// CAMS station code, from configuration or the night's `.config`.
    pub cams_id: Option<u32>,
    pub state: NightState,
}

// ============================================================================
// Confirmation results
// ============================================================================

/// A single accepted detection, referencing a frame file in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// FF file the detection was found in.
    pub ff_file: String,
    pub meteor_no: u32,
    /// Number of per-frame measurements.
    pub segments: u32,
    /// Frame timestamp decoded from the FF file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<NaiveDateTime>,
}

/// Where a confirmation result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Written by the confirmation tool after a human reviewed the night.
    Confirmed,
    /// Taken directly from the archive (zero-detection night or skipped
    /// confirmation).
    Archive,
}

/// Outcome of confirming one night. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub night_id: NightId,
    /// FTPdetectinfo file enumerating the accepted detections.
    pub artifact: PathBuf,
    /// Calibration file shipped alongside the detections, if found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<PathBuf>,
    /// Directory the artifact lives in; the upload package is built here.
    pub output_dir: PathBuf,
    pub detections: Vec<Detection>,
    /// Declared count matched the parsed detection blocks.
    pub complete: bool,
    pub source: ResultSource,
}

impl ConfirmationResult {
    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }
}
