//! Progress ledger: the durable record of which nights were confirmed and
//! uploaded. It is the only source of truth for deciding what is already done.

mod sqlite;
mod store;

pub use sqlite::SqliteLedger;
pub(crate) use store::check_transition;
pub use store::{LedgerEntry, LedgerError, ProgressLedger, ResetOutcome};
