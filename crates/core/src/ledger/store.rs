//! Progress ledger trait and types.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::night::{NightId, NightState};

/// Error type for ledger operations. Every variant is fatal for a run.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Night has no ledger entry.
    #[error("night not in ledger: {0}")]
    NotFound(String),

    /// Attempt to move a night out of `uploaded`.
    #[error("night {night_id} is already uploaded, refusing transition to {to}")]
    Regression { night_id: String, to: NightState },

    /// Operation not allowed in the night's current state.
    #[error("cannot {operation} night {night_id}: current state is {current}")]
    InvalidState {
        night_id: String,
        current: NightState,
        operation: String,
    },

    /// Storage failure.
    #[error("ledger database error: {0}")]
    Database(String),

    /// Stored data could not be decoded.
    #[error("corrupt ledger entry: {0}")]
    Corrupt(String),
}

/// Current durable state of one night.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub night_id: NightId,
    pub state: NightState,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
    /// Failure or skip reason, or a note on how the state was reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Run that recorded the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Result of an operator reset.
#[derive(Debug, Clone, PartialEq)]
pub enum ResetOutcome {
    /// Confirmation had already succeeded; the night resumes at upload.
    Confirmed(LedgerEntry),
    /// Entry removed; the night will be rediscovered and confirmed again.
    Cleared,
}

/// Reject transitions the lifecycle forbids.
pub(crate) fn check_transition(
    night_id: &NightId,
    current: Option<NightState>,
    next: NightState,
) -> Result<(), LedgerError> {
    if next == NightState::Discovered {
        return Err(LedgerError::InvalidState {
            night_id: night_id.to_string(),
            current: current.unwrap_or(NightState::Discovered),
            operation: "persist discovered state for".to_string(),
        });
    }
    if current == Some(NightState::Uploaded) && next != NightState::Uploaded {
        return Err(LedgerError::Regression {
            night_id: night_id.to_string(),
            to: next,
        });
    }
    Ok(())
}

/// Durable per-night progress store.
///
/// `set` is atomic: a concurrent reader sees either the previous entry or the
/// new one, and the write is durable when `set` returns. Every transition is
/// also appended to a history that is never pruned.
pub trait ProgressLedger: Send + Sync {
    /// Current entry for a night, if any.
    fn get(&self, night_id: &NightId) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Record a transition.
    fn set(
        &self,
        night_id: &NightId,
        state: NightState,
        reason: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Nights that never need processing again (`uploaded` or `skipped`).
    fn all_completed(&self) -> Result<HashSet<NightId>, LedgerError>;

    /// All current entries in chronological night order.
    fn list(&self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Every recorded transition of a night, oldest first.
    fn history(&self, night_id: &NightId) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Remove the current entry (history is kept, with a `discovered` record).
    fn clear(&self, night_id: &NightId, reason: &str) -> Result<(), LedgerError>;

    /// Mark nights left in a transient state by an interrupted run as failed.
    fn recover_interrupted(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut recovered = Vec::new();
        for entry in self.list()? {
            let reason = match entry.state {
                NightState::Confirming => "interrupted during confirmation",
                NightState::Uploading => "interrupted during upload",
                _ => continue,
            };
            warn!("Night {} was left {}; marking failed", entry.night_id, entry.state);
            recovered.push(self.set(&entry.night_id, NightState::Failed, Some(reason))?);
        }
        Ok(recovered)
    }

    /// Operator reset of a failed or skipped night so the next run retries it.
    ///
    /// A night whose confirmation already succeeded goes back to `confirmed`,
    /// so the human step is not repeated.
    fn reset(&self, night_id: &NightId) -> Result<ResetOutcome, LedgerError> {
        let current = self
            .get(night_id)?
            .ok_or_else(|| LedgerError::NotFound(night_id.to_string()))?;

        if !matches!(current.state, NightState::Failed | NightState::Skipped) {
            return Err(LedgerError::InvalidState {
                night_id: night_id.to_string(),
                current: current.state,
                operation: "reset".to_string(),
            });
        }

        // The note recorded with the original `confirmed` transition says
        // where the result came from; keep it so resumption finds it again.
        let mut confirmed_note = None;
        if current.state == NightState::Failed {
            for past in self.history(night_id)?.iter().rev().skip(1) {
                match past.state {
                    NightState::Uploading => continue,
                    NightState::Confirmed => {
                        confirmed_note = Some(past.reason.clone());
                        break;
                    }
                    _ => break,
                }
            }
        }

        match confirmed_note {
            Some(note) => {
                let reason = note.as_deref().unwrap_or("reset by operator");
                let entry = self.set(night_id, NightState::Confirmed, Some(reason))?;
                info!("Night {} reset to confirmed", night_id);
                Ok(ResetOutcome::Confirmed(entry))
            }
            None => {
                self.clear(night_id, "reset by operator")?;
                info!("Night {} cleared from ledger", night_id);
                Ok(ResetOutcome::Cleared)
            }
        }
    }
}
