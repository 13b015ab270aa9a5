//! Subcommand handlers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{info, warn};

use nightrelay_core::{
    create_connector, ledger::ResetOutcome, Config, ExternalConfirmer, NightId, NightOrchestrator,
    NightState, ProgressLedger, RunOptions, SanitizedConfig, SqliteLedger,
};

/// Process exit code for a run that recorded failed nights.
pub const EXIT_NIGHTS_FAILED: i32 = 2;

fn parse_night(raw: &str) -> Result<NightId> {
    raw.parse::<NightId>()
        .map_err(|e| anyhow::anyhow!("Invalid night id {:?}: {}", raw, e))
}

fn open_ledger(config: &Config, run_id: &str) -> Result<Arc<SqliteLedger>> {
    let ledger = SqliteLedger::new(&config.ledger.path)
        .with_context(|| format!("Failed to open ledger at {:?}", config.ledger.path))?
        .with_run_id(run_id);
    Ok(Arc::new(ledger))
}

fn build_orchestrator(config: &Config, ledger: Arc<SqliteLedger>, run_id: &str) -> NightOrchestrator {
    let confirmer = ExternalConfirmer::new(
        config.confirmation.clone(),
        config.archive.confirmed_root.clone(),
    );
    NightOrchestrator::from_config(
        config,
        ledger,
        Arc::new(confirmer),
        create_connector(&config.remote),
    )
    .with_run_id(run_id)
}

/// `run`: returns the process exit code.
pub async fn run(
    config: &Config,
    night: Option<String>,
    skip_confirmation: bool,
    dry_run: bool,
) -> Result<i32> {
    let options = RunOptions {
        only_night: night.as_deref().map(parse_night).transpose()?,
        skip_confirmation,
    };
    if !skip_confirmation && config.confirmation.command.is_none() {
        warn!("No confirmation command configured; nights needing review will fail");
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let ledger = open_ledger(config, &run_id)?;
    let orchestrator = build_orchestrator(config, ledger, &run_id);

    if dry_run {
        let planned = orchestrator.plan(&options).context("Failed to plan run")?;
        if planned.is_empty() {
            println!("Nothing to do.");
        }
        for night in planned {
            println!("{:<24} {}", night.night_id, night.action);
        }
        return Ok(0);
    }

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current night");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let summary = orchestrator.run(&options).await.context("Run aborted")?;
    println!("{}", summary);

    Ok(if summary.has_failures() {
        EXIT_NIGHTS_FAILED
    } else {
        0
    })
}

/// `status`: one line per ledger entry.
pub fn status(config: &Config, json: bool) -> Result<()> {
    let ledger = open_ledger(config, "status")?;
    let entries = ledger.list().context("Failed to read ledger")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("Ledger is empty.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:<24} {:<10} {}  {}",
            entry.night_id,
            entry.state,
            entry.updated_at.format("%Y-%m-%d %H:%M:%S"),
            entry.reason.unwrap_or_default()
        );
    }
    Ok(())
}

pub fn history(config: &Config, night: &str) -> Result<()> {
    let night_id = parse_night(night)?;
    let ledger = open_ledger(config, "history")?;
    let history = ledger.history(&night_id).context("Failed to read ledger")?;
    if history.is_empty() {
        bail!("No history recorded for {}", night_id);
    }
    for entry in history {
        println!(
            "{}  {:<10} {:<38} {}",
            entry.updated_at.to_rfc3339(),
            entry.state,
            entry.run_id.unwrap_or_default(),
            entry.reason.unwrap_or_default()
        );
    }
    Ok(())
}

pub fn reset(config: &Config, night: &str) -> Result<()> {
    let night_id = parse_night(night)?;
    let ledger = open_ledger(config, "operator")?;
    match ledger
        .reset(&night_id)
        .with_context(|| format!("Failed to reset {}", night_id))?
    {
        ResetOutcome::Confirmed(_) => {
            info!(night = %night_id, "Reset to confirmed");
            println!("{}: confirmed, the next run resumes at upload", night_id);
        }
        ResetOutcome::Cleared => {
            info!(night = %night_id, "Ledger entry cleared");
            println!("{}: cleared, the next run confirms it again", night_id);
        }
    }
    Ok(())
}

pub fn skip(config: &Config, night: &str, reason: &str) -> Result<()> {
    let night_id = parse_night(night)?;
    let ledger = open_ledger(config, "operator")?;
    ledger
        .set(&night_id, NightState::Skipped, Some(reason))
        .with_context(|| format!("Failed to skip {}", night_id))?;
    println!("{}: skipped ({})", night_id, reason);
    Ok(())
}

pub async fn reconcile(config: &Config) -> Result<()> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let ledger = open_ledger(config, &run_id)?;
    let orchestrator = build_orchestrator(config, ledger, &run_id);
    let report = orchestrator
        .reconcile()
        .await
        .context("Reconcile failed")?;

    for note in &report.marked {
        println!("{:<24} uploaded  {}", note.night_id, note.reason);
    }
    for note in &report.unresolved {
        println!("{:<24} unknown   {}", note.night_id, note.reason);
    }
    println!(
        "Checked {} nights, {} already on the remote",
        report.checked,
        report.marked.len()
    );
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    let sanitized = SanitizedConfig::from(config);
    println!("{}", serde_json::to_string_pretty(&sanitized)?);
    Ok(())
}
