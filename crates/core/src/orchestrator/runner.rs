//! Night orchestrator implementation.
//!
//! Per night the states go `discovered → confirming → confirmed → uploading
//! → uploaded`, with `skipped` and `failed` as the other ends. Each
//! transition is written to the ledger before the next step begins.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::confirmation::{archive_detection_count, archive_result, Confirmer};
use crate::ledger::{LedgerEntry, ProgressLedger};
use crate::night::{
    find_detect_file, ConfirmationResult, DetectInfoError, Night, NightId, NightState,
};
use crate::scanner::ArchiveScanner;
use crate::stager::{build_package, write_receipt, UploadStager};
use crate::transfer::{RemoteConnector, TransferEngine};

use super::config::{OrchestratorConfig, RunOptions};
use super::types::{
    NightNote, OrchestratorError, PlannedAction, PlannedNight, ReconcileReport, RunSummary,
};

/// Ledger note on a `confirmed` transition whose result is the archive's own
/// detection file rather than the confirmation tool's output.
pub const CONFIRMED_FROM_ARCHIVE: &str = "accepted from archive";

/// Drives nights from the archive to the remote.
pub struct NightOrchestrator {
    config: OrchestratorConfig,
    scanner: ArchiveScanner,
    ledger: Arc<dyn ProgressLedger>,
    confirmer: Arc<dyn Confirmer>,
    stager: UploadStager,
    transfer: TransferEngine,
    run_id: String,
    stop: Arc<AtomicBool>,
}

impl NightOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        scanner: ArchiveScanner,
        ledger: Arc<dyn ProgressLedger>,
        confirmer: Arc<dyn Confirmer>,
        stager: UploadStager,
        transfer: TransferEngine,
    ) -> Self {
        Self {
            config,
            scanner,
            ledger,
            confirmer,
            stager,
            transfer,
            run_id: uuid::Uuid::new_v4().to_string(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire up scanner, stager and transfer engine from the loaded config.
    pub fn from_config(
        config: &Config,
        ledger: Arc<dyn ProgressLedger>,
        confirmer: Arc<dyn Confirmer>,
        connector: Arc<dyn RemoteConnector>,
    ) -> Self {
        let scanner = ArchiveScanner::new(&config.archive.root)
            .with_stations(&config.archive.stations)
            .with_cams_id(config.station.cams_id);
        let stager = UploadStager::new(config.remote.base_path.clone(), config.remote.layout)
            .with_staging_dir(config.upload.staging_dir.clone());
        let transfer = TransferEngine::new(connector, &config.retry, config.remote.verify);

        Self::new(
            OrchestratorConfig::from(config),
            scanner,
            ledger,
            confirmer,
            stager,
            transfer,
        )
    }

    /// Use a caller-chosen run id (shared with the ledger handle).
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Flag that stops the run before the next night when set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Process every pending night, oldest first.
    ///
    /// Errors scoped to one night are recorded in the ledger and the summary;
    /// only scan and ledger failures end the run early.
    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary, OrchestratorError> {
        let span = info_span!("run", run_id = %self.run_id);
        self.run_inner(options).instrument(span).await
    }

    async fn run_inner(&self, options: &RunOptions) -> Result<RunSummary, OrchestratorError> {
        let mut summary = RunSummary::new(&self.run_id);

        for entry in self.ledger.recover_interrupted()? {
            summary.recovered.push(entry.night_id);
        }

        let nights = self.pending_nights(options)?;
        info!("{} night(s) pending", nights.len());

        for night in nights {
            if self.stop.load(Ordering::SeqCst) {
                info!("Stop requested, leaving remaining nights for the next run");
                summary.interrupted = true;
                break;
            }

            let span = info_span!("night", night = %night.id);
            self.process_night(night, options, &mut summary)
                .instrument(span)
                .await?;
        }

        info!(
            uploaded = summary.uploaded.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            previously_failed = summary.previously_failed.len(),
            "Run finished"
        );
        Ok(summary)
    }

    /// What a run with these options would do, without doing it.
    pub fn plan(&self, options: &RunOptions) -> Result<Vec<PlannedNight>, OrchestratorError> {
        let mut planned = Vec::new();
        for night in self.pending_nights(options)? {
            let entry = self.ledger.get(&night.id)?;
            planned.push(PlannedNight {
                action: self.decide(&night, entry.as_ref(), options),
                night_id: night.id,
                dir_name: night.dir_name,
            });
        }
        Ok(planned)
    }

    /// Nights the scanner reports as not yet completed, narrowed to
    /// `options.only_night` when set.
    fn pending_nights(&self, options: &RunOptions) -> Result<Vec<Night>, OrchestratorError> {
        let completed = self.ledger.all_completed()?;
        let recorded = self.recorded_nights()?;

        let Some(only) = &options.only_night else {
            let nights = self.scanner.scan_with(&completed, &recorded)?.collect();
            return Ok(nights);
        };

        if self.scanner.find(only)?.is_none() {
            return Err(OrchestratorError::NightNotFound(only.to_string()));
        }
        if completed.contains(only) {
            info!("Night {} is already completed", only);
            return Ok(Vec::new());
        }
        let nights = self
            .scanner
            .scan_with(&completed, &recorded)?
            .filter(|n| &n.id == only)
            .collect();
        Ok(nights)
    }

    /// Every night the ledger knows, including ones whose directories have
    /// since been pruned from the archive.
    fn recorded_nights(&self) -> Result<HashSet<NightId>, OrchestratorError> {
        Ok(self
            .ledger
            .list()?
            .into_iter()
            .map(|entry| entry.night_id)
            .collect())
    }

    /// Decide what to do with a night from its ledger entry and archive.
    fn decide(
        &self,
        night: &Night,
        entry: Option<&LedgerEntry>,
        options: &RunOptions,
    ) -> PlannedAction {
        match entry.map(|e| e.state) {
            Some(NightState::Confirmed) => return PlannedAction::ResumeUpload,
            Some(NightState::Failed) => {
                let reason = entry
                    .and_then(|e| e.reason.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                return PlannedAction::AwaitReset(reason);
            }
            _ => {}
        }

        match find_detect_file(&night.path) {
            Ok(_) => {}
            Err(DetectInfoError::NotFound { .. }) => {
                return PlannedAction::Skip("no detection file".to_string())
            }
            // Ambiguous input is left for the tool to report.
            Err(_) => return PlannedAction::Confirm,
        }

        match archive_detection_count(night) {
            Ok(0) if self.config.upload_zero_nights => PlannedAction::AcceptArchive,
            Ok(0) => PlannedAction::Skip("no detections".to_string()),
            _ if options.skip_confirmation => PlannedAction::AcceptArchive,
            _ => PlannedAction::Confirm,
        }
    }

    async fn process_night(
        &self,
        night: Night,
        options: &RunOptions,
        summary: &mut RunSummary,
    ) -> Result<(), OrchestratorError> {
        let entry = self.ledger.get(&night.id)?;
        let action = self.decide(&night, entry.as_ref(), options);
        debug!("Action: {}", action);

        let result = match action {
            PlannedAction::AwaitReset(reason) => {
                warn!("Night failed in an earlier run: {}", reason);
                summary.previously_failed.push(NightNote {
                    night_id: night.id.clone(),
                    reason,
                });
                return Ok(());
            }
            PlannedAction::Skip(reason) => {
                info!("Skipping: {}", reason);
                self.ledger
                    .set(&night.id, NightState::Skipped, Some(&reason))?;
                summary.skip(&night.id, reason);
                return Ok(());
            }
            PlannedAction::ResumeUpload => {
                info!("Confirmation already done, resuming at upload");
                let from_archive = entry
                    .as_ref()
                    .and_then(|e| e.reason.as_deref())
                    .is_some_and(|r| r == CONFIRMED_FROM_ARCHIVE);
                let collected = if from_archive {
                    archive_result(&night)
                } else {
                    self.confirmer.collect(&night).await
                };
                match collected {
                    Ok(result) => result,
                    Err(e) => {
                        let reason = format!("confirmed result unavailable: {}", e);
                        return self.fail(&night, reason, summary);
                    }
                }
            }
            PlannedAction::AcceptArchive => match archive_result(&night) {
                Ok(result) => {
                    info!(
                        "Accepting archive detections without confirmation ({})",
                        result.detection_count()
                    );
                    self.ledger.set(
                        &night.id,
                        NightState::Confirmed,
                        Some(CONFIRMED_FROM_ARCHIVE),
                    )?;
                    result
                }
                Err(e) => {
                    return self.fail(&night, format!("archive result invalid: {}", e), summary)
                }
            },
            PlannedAction::Confirm => match self.confirm(&night).await? {
                Some(result) => result,
                None => return self.fail_recorded(&night, summary),
            },
        };

        self.upload(&night, &result, summary).await
    }

    /// Run the confirmation tool. Returns `None` when the night was marked
    /// failed.
    async fn confirm(&self, night: &Night) -> Result<Option<ConfirmationResult>, OrchestratorError> {
        self.ledger.set(&night.id, NightState::Confirming, None)?;
        info!("Waiting for confirmation via {}", self.confirmer.name());

        match self.confirmer.confirm(night).await {
            Ok(result) => {
                info!("Confirmed {} detection(s)", result.detection_count());
                self.ledger.set(&night.id, NightState::Confirmed, None)?;
                Ok(Some(result))
            }
            Err(e) => {
                let reason = format!("confirmation failed: {}", e);
                error!("{}", reason);
                self.ledger
                    .set(&night.id, NightState::Failed, Some(&reason))?;
                Ok(None)
            }
        }
    }

    async fn upload(
        &self,
        night: &Night,
        result: &ConfirmationResult,
        summary: &mut RunSummary,
    ) -> Result<(), OrchestratorError> {
        let plan = match self.stager.plan(night, result) {
            Ok(plan) => plan,
            Err(e) => return self.fail(night, format!("staging failed: {}", e), summary),
        };

        let package = {
            let plan = plan.clone();
            tokio::task::spawn_blocking(move || build_package(&plan)).await
        };
        let package = match package {
            Ok(Ok(package)) => package,
            Ok(Err(e)) => return self.fail(night, format!("packaging failed: {}", e), summary),
            Err(e) => return self.fail(night, format!("packaging aborted: {}", e), summary),
        };

        self.ledger.set(&night.id, NightState::Uploading, None)?;
        info!("Uploading {} to {}", plan.target.name, self.transfer.describe());

        match self.transfer.transfer(&plan.transfer_request()).await {
            Ok(receipt) => {
                self.ledger.set(&night.id, NightState::Uploaded, None)?;
                summary.uploaded.push(night.id.clone());

                if self.config.write_receipt {
                    if let Err(e) =
                        write_receipt(&result.output_dir, Utc::now(), &receipt.remote_path, &package)
                    {
                        warn!("Uploaded, but could not write receipt: {}", e);
                    }
                }
                Ok(())
            }
            Err(e) => self.fail(night, format!("upload failed: {}", e), summary),
        }
    }

    fn fail(
        &self,
        night: &Night,
        reason: String,
        summary: &mut RunSummary,
    ) -> Result<(), OrchestratorError> {
        error!("{}", reason);
        self.ledger.set(&night.id, NightState::Failed, Some(&reason))?;
        summary.fail(&night.id, reason);
        Ok(())
    }

    /// Add a night the ledger already records as failed to the summary.
    fn fail_recorded(&self, night: &Night, summary: &mut RunSummary) -> Result<(), OrchestratorError> {
        let reason = self
            .ledger
            .get(&night.id)?
            .and_then(|e| e.reason)
            .unwrap_or_else(|| "failed".to_string());
        summary.fail(&night.id, reason);
        Ok(())
    }

    /// Record nights whose package is already on the remote as uploaded.
    ///
    /// Every layout is searched, so packages uploaded before a layout change
    /// are found too.
    pub async fn reconcile(&self) -> Result<ReconcileReport, OrchestratorError> {
        let span = info_span!("reconcile", run_id = %self.run_id);
        self.reconcile_inner().instrument(span).await
    }

    async fn reconcile_inner(&self) -> Result<ReconcileReport, OrchestratorError> {
        let completed = self.ledger.all_completed()?;
        let recorded = self.recorded_nights()?;
        let nights: Vec<Night> = self.scanner.scan_with(&completed, &recorded)?.collect();
        let mut report = ReconcileReport::default();
        let mut listings: HashMap<String, HashSet<String>> = HashMap::new();

        for night in nights {
            report.checked += 1;
            let targets = match self.stager.candidate_targets(&night) {
                Ok(targets) => targets,
                Err(e) => {
                    report.unresolved.push(NightNote {
                        night_id: night.id.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for target in targets {
                if !listings.contains_key(&target.dir) {
                    let names = self.transfer.list(&target.dir).await?;
                    listings.insert(target.dir.clone(), names.into_iter().collect());
                }
                let present = listings
                    .get(&target.dir)
                    .is_some_and(|names| names.contains(&target.name));
                if present {
                    info!("Night {} already on remote at {}", night.id, target.path());
                    self.ledger.set(
                        &night.id,
                        NightState::Uploaded,
                        Some("found on remote"),
                    )?;
                    report.marked.push(NightNote {
                        night_id: night.id.clone(),
                        reason: target.path(),
                    });
                    break;
                }
            }
        }

        Ok(report)
    }
}
