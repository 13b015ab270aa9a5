//! Night orchestrator: drives each pending night through confirmation and
//! upload, one night at a time.
//!
//! - **Confirmation**: sequential, human-paced, never concurrent
//! - **Upload**: sequential, one transfer in flight
//! - **Ledger**: every transition is persisted before the next step starts,
//!   so a killed run resumes from the ledger alone

mod config;
mod runner;
mod types;

pub use config::{OrchestratorConfig, RunOptions};
pub use runner::{NightOrchestrator, CONFIRMED_FROM_ARCHIVE};
pub use types::{
    NightNote, OrchestratorError, PlannedAction, PlannedNight, ReconcileReport, RunSummary,
};
