//! Night lifecycle integration tests.
//!
//! These tests drive whole runs through the orchestrator:
//! discovered -> confirming -> confirmed -> uploading -> uploaded

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::TempDir;

use nightrelay_core::{
    night::ResultSource,
    orchestrator::{OrchestratorConfig, CONFIRMED_FROM_ARCHIVE},
    stager::RECEIPT_FILE_NAME,
    testing::{fixtures, MockConfirmer, MockRemote, RecordingSleeper},
    transfer::{RemoteLayout, RetryConfig, VerifyMode},
    ArchiveScanner, Night, NightId, NightOrchestrator, NightState, OrchestratorError,
    ProgressLedger, RunOptions, SqliteLedger, TransferEngine, UploadStager,
};

const NIGHT_1: &str = "NL0001_20240101_170000_000001";
const NIGHT_2: &str = "NL0001_20240102_170000_000001";
const NIGHT_3: &str = "NL0001_20240103_170000_000001";

/// Test helper holding every dependency of a run.
struct TestHarness {
    archive: TempDir,
    _state: TempDir,
    ledger_path: PathBuf,
    ledger: Arc<SqliteLedger>,
    confirmer: MockConfirmer,
    remote: MockRemote,
    sleeper: RecordingSleeper,
    config: OrchestratorConfig,
}

impl TestHarness {
    fn new() -> Self {
        let archive = TempDir::new().expect("Failed to create archive dir");
        let state = TempDir::new().expect("Failed to create state dir");
        let ledger_path = state.path().join("ledger.db");
        let ledger = Arc::new(SqliteLedger::new(&ledger_path).expect("Failed to open ledger"));

        Self {
            archive,
            _state: state,
            ledger_path,
            ledger,
            confirmer: MockConfirmer::new(),
            remote: MockRemote::new(),
            sleeper: RecordingSleeper::new(),
            config: OrchestratorConfig::default(),
        }
    }

    fn night(&self, name: &str, detections: u32) -> Night {
        fixtures::night_dir(self.archive.path(), name, detections)
    }

    fn orchestrator(&self) -> NightOrchestrator {
        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay_secs: 5,
            max_delay_secs: 300,
            backoff_multiplier: 2.0,
        };
        let transfer = TransferEngine::new(Arc::new(self.remote.clone()), &retry, VerifyMode::Md5)
            .with_sleeper(Arc::new(self.sleeper.clone()));

        NightOrchestrator::new(
            self.config.clone(),
            ArchiveScanner::new(self.archive.path()),
            self.ledger.clone(),
            Arc::new(self.confirmer.clone()),
            UploadStager::new("/upload", RemoteLayout::YearMonth),
            transfer,
        )
    }

    /// Drop the ledger handle and open the database again, as a new process
    /// would.
    fn reopen_ledger(&mut self) {
        self.ledger = Arc::new(SqliteLedger::new(&self.ledger_path).expect("Failed to reopen"));
    }

    fn state(&self, name: &str) -> Option<NightState> {
        self.ledger
            .get(&id(name))
            .expect("ledger read")
            .map(|e| e.state)
    }
}

fn id(dir_name: &str) -> NightId {
    NightId::from_dir_name(dir_name).expect("night name")
}

fn remote_path(date: &str, month_dir: &str) -> String {
    format!("/upload/2024/{}/{}_000351_17_00_00_01.zip", month_dir, date)
}

#[tokio::test]
async fn test_run_processes_pending_nights_chronologically() {
    let h = TestHarness::new();
    h.night(NIGHT_3, 1);
    h.night(NIGHT_1, 1);
    h.night(NIGHT_2, 2);
    h.ledger
        .set(&id(NIGHT_1), NightState::Uploaded, None)
        .unwrap();

    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.uploaded, vec![id(NIGHT_2), id(NIGHT_3)]);
    assert!(!summary.has_failures());
    assert_eq!(
        h.confirmer.confirmed_nights().await,
        vec![id(NIGHT_2), id(NIGHT_3)]
    );
    assert_eq!(
        h.remote.files(),
        vec![
            remote_path("2024_01_02", "2024_01"),
            remote_path("2024_01_03", "2024_01"),
        ]
    );
    assert_eq!(h.state(NIGHT_2), Some(NightState::Uploaded));
    assert_eq!(h.state(NIGHT_3), Some(NightState::Uploaded));
}

#[tokio::test]
async fn test_rerun_never_touches_uploaded_nights() {
    let mut h = TestHarness::new();
    h.night(NIGHT_1, 1);
    h.night(NIGHT_2, 1);

    h.orchestrator().run(&RunOptions::default()).await.unwrap();
    let confirms = h.confirmer.confirm_count().await;
    let connects = h.remote.connect_count();

    h.reopen_ledger();
    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();

    assert!(summary.uploaded.is_empty());
    assert_eq!(h.confirmer.confirm_count().await, confirms);
    assert_eq!(h.remote.connect_count(), connects);
}

#[tokio::test]
async fn test_uploaded_night_stays_uploaded_after_archive_removal() {
    let mut h = TestHarness::new();
    let night = h.night(NIGHT_1, 1);
    h.orchestrator().run(&RunOptions::default()).await.unwrap();

    std::fs::remove_dir_all(&night.path).unwrap();
    h.reopen_ledger();

    assert_eq!(h.state(NIGHT_1), Some(NightState::Uploaded));
    assert!(h.ledger.all_completed().unwrap().contains(&id(NIGHT_1)));
}

#[tokio::test]
async fn test_malformed_artifact_fails_night_and_run_continues() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 1);
    h.night(NIGHT_2, 1);
    h.night(NIGHT_3, 1);
    h.confirmer
        .malform_night(&id(NIGHT_2), "empty artifact")
        .await;

    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.uploaded, vec![id(NIGHT_1), id(NIGHT_3)]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].night_id, id(NIGHT_2));
    assert!(summary.failed[0].reason.contains("empty artifact"));
    assert_eq!(h.state(NIGHT_2), Some(NightState::Failed));

    // Failed nights wait for an operator reset.
    let again = h.orchestrator().run(&RunOptions::default()).await.unwrap();
    assert_eq!(again.previously_failed.len(), 1);
    assert_eq!(h.confirmer.confirm_count().await, 3);
}

#[tokio::test]
async fn test_tool_crash_fails_night() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 1);
    h.confirmer.fail_night(&id(NIGHT_1), "signal: 9").await;

    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();

    assert!(summary.has_failures());
    assert!(summary.failed[0].reason.starts_with("confirmation failed"));
    assert_eq!(h.remote.connect_count(), 0);
}

#[tokio::test]
async fn test_transfer_retry_then_success() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 1);
    h.remote.fail_next_connects(2);

    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.uploaded, vec![id(NIGHT_1)]);
    assert_eq!(h.remote.connect_count(), 3);
    assert_eq!(h.sleeper.delays().len(), 2);
    assert_eq!(h.state(NIGHT_1), Some(NightState::Uploaded));
}

#[tokio::test]
async fn test_transfer_retries_exhausted_fails_night() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 1);
    h.night(NIGHT_2, 1);
    h.remote.fail_next_connects(3);

    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].night_id, id(NIGHT_1));
    assert!(summary.failed[0].reason.contains("after 3 attempts"));
    assert_eq!(summary.uploaded, vec![id(NIGHT_2)]);

    let entry = h.ledger.get(&id(NIGHT_1)).unwrap().unwrap();
    assert_eq!(entry.state, NightState::Failed);
    assert!(entry.reason.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_zero_detection_night_skips_confirmation() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 0);

    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.uploaded, vec![id(NIGHT_1)]);
    assert_eq!(h.confirmer.confirm_count().await, 0);
    let history = h.ledger.history(&id(NIGHT_1)).unwrap();
    let confirmed = history
        .iter()
        .find(|e| e.state == NightState::Confirmed)
        .unwrap();
    assert_eq!(confirmed.reason.as_deref(), Some(CONFIRMED_FROM_ARCHIVE));
}

#[tokio::test]
async fn test_zero_detection_night_skipped_when_not_uploading_zero_nights() {
    let mut h = TestHarness::new();
    h.config.upload_zero_nights = false;
    h.night(NIGHT_1, 0);

    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(h.state(NIGHT_1), Some(NightState::Skipped));
    assert!(h.remote.files().is_empty());
}

#[tokio::test]
async fn test_night_without_detection_file_is_skipped() {
    let h = TestHarness::new();
    fixtures::empty_night_dir(h.archive.path(), NIGHT_1);
    h.night(NIGHT_2, 1);

    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();

    assert_eq!(summary.skipped[0].night_id, id(NIGHT_1));
    assert_eq!(summary.skipped[0].reason, "no detection file");
    assert_eq!(summary.uploaded, vec![id(NIGHT_2)]);

    let again = h.orchestrator().run(&RunOptions::default()).await.unwrap();
    assert!(again.skipped.is_empty());
}

#[tokio::test]
async fn test_skip_confirmation_uses_archive_result() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 3);

    let options = RunOptions {
        skip_confirmation: true,
        ..Default::default()
    };
    let summary = h.orchestrator().run(&options).await.unwrap();

    assert_eq!(summary.uploaded, vec![id(NIGHT_1)]);
    assert_eq!(h.confirmer.confirm_count().await, 0);
}

#[tokio::test]
async fn test_only_night_option() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 1);
    h.night(NIGHT_2, 1);

    let options = RunOptions {
        only_night: Some(id(NIGHT_2)),
        ..Default::default()
    };
    let summary = h.orchestrator().run(&options).await.unwrap();
    assert_eq!(summary.uploaded, vec![id(NIGHT_2)]);
    assert_eq!(h.state(NIGHT_1), None);

    let missing = RunOptions {
        only_night: Some(id("NL0001_20230101_170000")),
        ..Default::default()
    };
    let err = h.orchestrator().run(&missing).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NightNotFound(_)));
}

#[tokio::test]
async fn test_stop_flag_halts_before_next_night() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 1);

    let orchestrator = h.orchestrator();
    orchestrator.stop_handle().store(true, Ordering::SeqCst);
    let summary = orchestrator.run(&RunOptions::default()).await.unwrap();

    assert!(summary.interrupted);
    assert!(summary.uploaded.is_empty());
    assert_eq!(h.state(NIGHT_1), None);
}

#[tokio::test]
async fn test_receipt_written_after_upload() {
    let h = TestHarness::new();
    let night = h.night(NIGHT_1, 1);

    h.orchestrator().run(&RunOptions::default()).await.unwrap();

    let receipt = std::fs::read_to_string(night.path.join(RECEIPT_FILE_NAME)).unwrap();
    assert!(receipt.contains(&format!(
        "Remote: {}",
        remote_path("2024_01_01", "2024_01")
    )));
}

#[tokio::test]
async fn test_dry_run_plan() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 0);
    h.night(NIGHT_2, 2);
    fixtures::empty_night_dir(h.archive.path(), NIGHT_3);

    let plan = h.orchestrator().plan(&RunOptions::default()).unwrap();
    let actions: Vec<String> = plan.iter().map(|p| p.action.to_string()).collect();
    assert_eq!(
        actions,
        vec!["upload archive result", "confirm", "skip (no detection file)"]
    );

    // Planning changes nothing.
    assert!(h.ledger.list().unwrap().is_empty());
    assert_eq!(h.confirmer.confirm_count().await, 0);
}

#[tokio::test]
async fn test_reconcile_marks_nights_found_on_remote() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 1);
    h.night(NIGHT_2, 1);
    // Uploaded long ago into the year-only layout.
    h.remote
        .put_file("/upload/2024/2024_01_01_000351_17_00_00_01.zip", b"old");

    let report = h.orchestrator().reconcile().await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.marked.len(), 1);
    assert_eq!(report.marked[0].night_id, id(NIGHT_1));
    assert_eq!(h.state(NIGHT_1), Some(NightState::Uploaded));

    let summary = h.orchestrator().run(&RunOptions::default()).await.unwrap();
    assert_eq!(summary.uploaded, vec![id(NIGHT_2)]);
    assert_eq!(h.confirmer.confirmed_nights().await, vec![id(NIGHT_2)]);
}

#[tokio::test]
async fn test_ledger_failure_is_fatal() {
    let h = TestHarness::new();
    h.night(NIGHT_1, 1);
    let ledger = nightrelay_core::testing::MemoryLedger::new();
    ledger.fail_writes(true);

    let orchestrator = NightOrchestrator::new(
        OrchestratorConfig::default(),
        ArchiveScanner::new(h.archive.path()),
        Arc::new(ledger),
        Arc::new(h.confirmer.clone()),
        UploadStager::new("/upload", RemoteLayout::YearMonth),
        TransferEngine::new(
            Arc::new(h.remote.clone()),
            &RetryConfig::default(),
            VerifyMode::Md5,
        ),
    );

    let err = orchestrator.run(&RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Ledger(_)));
    assert_eq!(h.confirmer.confirm_count().await, 0);
}

#[tokio::test]
async fn test_mock_confirmer_results_are_marked_confirmed() {
    let h = TestHarness::new();
    let night = h.night(NIGHT_1, 2);
    let result = nightrelay_core::Confirmer::confirm(&h.confirmer, &night)
        .await
        .unwrap();
    assert_eq!(result.source, ResultSource::Confirmed);
    assert_eq!(result.detection_count(), 2);
}
