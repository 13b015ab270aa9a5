//! In-memory progress ledger for testing.

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::ledger::{check_transition, LedgerEntry, LedgerError, ProgressLedger};
use crate::night::{NightId, NightState};

#[derive(Debug, Default)]
struct LedgerState {
    current: BTreeMap<NightId, LedgerEntry>,
    history: Vec<LedgerEntry>,
}

/// Ledger held in memory, with the same transition rules as the SQLite one.
///
/// Clones share state, so a test can keep a handle while the orchestrator
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, as a broken disk would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Shortcut for the current state of a night.
    pub fn state_of(&self, night_id: &NightId) -> Option<NightState> {
        self.lock().current.get(night_id).map(|e| e.state)
    }

    /// Every recorded state of a night, oldest first.
    pub fn states_of(&self, night_id: &NightId) -> Vec<NightState> {
        self.lock()
            .history
            .iter()
            .filter(|e| &e.night_id == night_id)
            .map(|e| e.state)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> Result<(), LedgerError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Database("simulated write failure".to_string()));
        }
        Ok(())
    }
}

impl ProgressLedger for MemoryLedger {
    fn get(&self, night_id: &NightId) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.lock().current.get(night_id).cloned())
    }

    fn set(
        &self,
        night_id: &NightId,
        state: NightState,
        reason: Option<&str>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.check_writable()?;
        let mut guard = self.lock();
        check_transition(night_id, guard.current.get(night_id).map(|e| e.state), state)?;

        let entry = LedgerEntry {
            night_id: night_id.clone(),
            state,
            updated_at: Utc::now(),
            reason: reason.map(str::to_string),
            run_id: None,
        };
        guard.current.insert(night_id.clone(), entry.clone());
        guard.history.push(entry.clone());
        Ok(entry)
    }

    fn all_completed(&self) -> Result<HashSet<NightId>, LedgerError> {
        Ok(self
            .lock()
            .current
            .values()
            .filter(|e| e.state.is_completed())
            .map(|e| e.night_id.clone())
            .collect())
    }

    fn list(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.lock().current.values().cloned().collect())
    }

    fn history(&self, night_id: &NightId) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|e| &e.night_id == night_id)
            .cloned()
            .collect())
    }

    fn clear(&self, night_id: &NightId, reason: &str) -> Result<(), LedgerError> {
        self.check_writable()?;
        let mut guard = self.lock();
        let current = guard
            .current
            .get(night_id)
            .map(|e| e.state)
            .ok_or_else(|| LedgerError::NotFound(night_id.to_string()))?;
        if current == NightState::Uploaded {
            return Err(LedgerError::Regression {
                night_id: night_id.to_string(),
                to: NightState::Discovered,
            });
        }
        guard.current.remove(night_id);
        guard.history.push(LedgerEntry {
            night_id: night_id.clone(),
            state: NightState::Discovered,
            updated_at: Utc::now(),
            reason: Some(reason.to_string()),
            run_id: None,
        });
        Ok(())
    }
}
