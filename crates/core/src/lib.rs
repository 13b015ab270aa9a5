pub mod config;
pub mod confirmation;
pub mod ledger;
pub mod night;
pub mod orchestrator;
pub mod scanner;
pub mod stager;
pub mod testing;
pub mod transfer;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use confirmation::{ConfirmationError, Confirmer, ExternalConfirmer};
pub use ledger::{LedgerEntry, LedgerError, ProgressLedger, ResetOutcome, SqliteLedger};
pub use night::{ConfirmationResult, Night, NightId, NightState};
pub use orchestrator::{
    NightOrchestrator, OrchestratorError, PlannedAction, PlannedNight, ReconcileReport, RunOptions,
    RunSummary,
};
pub use scanner::{ArchiveScanner, ScanError};
pub use stager::{StageError, UploadStager};
pub use transfer::{create_connector, RemoteConnector, TransferEngine, TransferError};
