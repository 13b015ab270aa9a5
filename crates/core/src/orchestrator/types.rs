//! Types for the night orchestrator.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::night::NightId;
use crate::scanner::ScanError;
use crate::transfer::TransferError;

/// Errors that abort a whole run. Anything scoped to one night is recorded
/// in the ledger instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Archive root could not be read.
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),

    /// Progress could not be recorded.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The remote could not be listed.
    #[error("remote error: {0}")]
    Remote(#[from] TransferError),

    /// A night named by the operator is not in the archive.
    #[error("night not found in archive: {0}")]
    NightNotFound(String),
}

/// What a run will do, or did, with one night.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "detail", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Launch the confirmation tool.
    Confirm,
    /// Use the archive's detection file as the result (zero detections or
    /// confirmation skipped).
    AcceptArchive,
    /// Confirmation already succeeded; only the upload is left.
    ResumeUpload,
    /// Record as skipped without doing anything.
    Skip(String),
    /// Failed in an earlier run; waits for an operator reset.
    AwaitReset(String),
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirm => write!(f, "confirm"),
            Self::AcceptArchive => write!(f, "upload archive result"),
            Self::ResumeUpload => write!(f, "resume upload"),
            Self::Skip(reason) => write!(f, "skip ({})", reason),
            Self::AwaitReset(reason) => write!(f, "failed earlier ({})", reason),
        }
    }
}

/// One night a run would process.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedNight {
    pub night_id: NightId,
    pub dir_name: String,
    #[serde(flatten)]
    pub action: PlannedAction,
}

/// A night and why it ended where it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NightNote {
    pub night_id: NightId,
    pub reason: String,
}

/// What happened during one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub uploaded: Vec<NightId>,
    pub skipped: Vec<NightNote>,
    /// Nights that failed during this run.
    pub failed: Vec<NightNote>,
    /// Nights that were already failed and were left alone.
    pub previously_failed: Vec<NightNote>,
    /// Nights found mid-confirmation or mid-upload from a killed run.
    pub recovered: Vec<NightId>,
    /// The operator asked the run to stop before every night was processed.
    pub interrupted: bool,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    /// Whether any night needs operator attention.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.previously_failed.is_empty()
    }

    pub(crate) fn fail(&mut self, night_id: &NightId, reason: impl Into<String>) {
        self.failed.push(NightNote {
            night_id: night_id.clone(),
            reason: reason.into(),
        });
    }

    pub(crate) fn skip(&mut self, night_id: &NightId, reason: impl Into<String>) {
        self.skipped.push(NightNote {
            night_id: night_id.clone(),
            reason: reason.into(),
        });
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {}: {} uploaded, {} skipped, {} failed",
            self.run_id,
            self.uploaded.len(),
            self.skipped.len(),
            self.failed.len() + self.previously_failed.len()
        )?;
        for night in &self.uploaded {
            writeln!(f, "  uploaded  {}", night)?;
        }
        for note in &self.skipped {
            writeln!(f, "  skipped   {}: {}", note.night_id, note.reason)?;
        }
        for note in &self.failed {
            writeln!(f, "  FAILED    {}: {}", note.night_id, note.reason)?;
        }
        for note in &self.previously_failed {
            writeln!(
                f,
                "  FAILED    {}: {} (earlier run; `nightrelay reset {}` to retry)",
                note.night_id, note.reason, note.night_id
            )?;
        }
        if self.interrupted {
            writeln!(f, "  run interrupted; remaining nights left for the next run")?;
        }
        Ok(())
    }
}

/// Outcome of comparing the ledger with the remote.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Nights checked against the remote.
    pub checked: usize,
    /// Nights found on the remote and recorded as uploaded, with the path.
    pub marked: Vec<NightNote>,
    /// Nights whose remote name could not be determined.
    pub unresolved: Vec<NightNote>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn night(s: &str) -> NightId {
        s.parse().unwrap()
    }

    #[test]
    fn test_summary_display() {
        let mut summary = RunSummary::new("run-1");
        summary.uploaded.push(night("NL0001_20240101_170000"));
        summary.skip(&night("NL0001_20240102_170000"), "no detection file");
        summary.fail(&night("NL0001_20240103_170000"), "confirmation failed: crashed");

        let text = summary.to_string();
        assert!(text.starts_with("Run run-1: 1 uploaded, 1 skipped, 1 failed\n"));
        assert!(text.contains("FAILED    NL0001_20240103_170000: confirmation failed: crashed"));
        assert!(summary.has_failures());
    }

    #[test]
    fn test_previously_failed_counts_as_failure() {
        let mut summary = RunSummary::new("run-2");
        assert!(!summary.has_failures());
        summary.previously_failed.push(NightNote {
            night_id: night("NL0001_20240101_170000"),
            reason: "interrupted during upload".to_string(),
        });
        assert!(summary.has_failures());
        assert!(summary.to_string().contains("nightrelay reset NL0001_20240101_170000"));
    }

    #[test]
    fn test_planned_action_serialization() {
        let json = serde_json::to_string(&PlannedAction::Skip("no detections".into())).unwrap();
        assert_eq!(json, r#"{"action":"skip","detail":"no detections"}"#);
        assert_eq!(PlannedAction::ResumeUpload.to_string(), "resume upload");
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::NightNotFound("NL0001_20240101_170000".to_string());
        assert_eq!(
            err.to_string(),
            "night not found in archive: NL0001_20240101_170000"
        );
    }
}
