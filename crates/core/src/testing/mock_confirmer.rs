//! Mock confirmation driver for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::confirmation::{archive_result, ConfirmationError, Confirmer};
use crate::night::{ConfirmationResult, Night, NightId, ResultSource};

/// Scripted outcome for one night.
#[derive(Debug, Clone)]
enum Scripted {
    /// Tool exits abnormally with this status text.
    Crash(String),
    /// Tool exits cleanly but the artifact does not parse.
    Malformed(String),
}

/// Mock implementation of the Confirmer trait.
///
/// By default every night is "confirmed" by accepting the archive's own
/// detection file unchanged. Individual nights can be scripted to crash or
/// to produce a malformed artifact, and every call is recorded.
#[derive(Debug, Clone, Default)]
pub struct MockConfirmer {
    confirm_calls: Arc<RwLock<Vec<NightId>>>,
    collect_calls: Arc<RwLock<Vec<NightId>>>,
    scripted: Arc<RwLock<HashMap<NightId, Scripted>>>,
}

impl MockConfirmer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the tool crash on this night.
    pub async fn fail_night(&self, night_id: &NightId, status: &str) {
        self.scripted
            .write()
            .await
            .insert(night_id.clone(), Scripted::Crash(status.to_string()));
    }

    /// Make the tool leave a malformed artifact for this night.
    pub async fn malform_night(&self, night_id: &NightId, reason: &str) {
        self.scripted
            .write()
            .await
            .insert(night_id.clone(), Scripted::Malformed(reason.to_string()));
    }

    /// Nights the tool was launched for, in order.
    pub async fn confirmed_nights(&self) -> Vec<NightId> {
        self.confirm_calls.read().await.clone()
    }

    /// Nights whose earlier result was collected, in order.
    pub async fn collected_nights(&self) -> Vec<NightId> {
        self.collect_calls.read().await.clone()
    }

    /// Number of tool launches.
    pub async fn confirm_count(&self) -> usize {
        self.confirm_calls.read().await.len()
    }

    async fn result_for(&self, night: &Night) -> Result<ConfirmationResult, ConfirmationError> {
        match self.scripted.read().await.get(&night.id) {
            Some(Scripted::Crash(status)) => {
                return Err(ConfirmationError::abnormal_exit(status.clone(), None))
            }
            Some(Scripted::Malformed(reason)) => {
                return Err(ConfirmationError::malformed(night.path.clone(), reason.clone()))
            }
            None => {}
        }
        let mut result = archive_result(night)?;
        result.source = ResultSource::Confirmed;
        Ok(result)
    }
}

#[async_trait]
impl Confirmer for MockConfirmer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn confirm(&self, night: &Night) -> Result<ConfirmationResult, ConfirmationError> {
        self.confirm_calls.write().await.push(night.id.clone());
        self.result_for(night).await
    }

    async fn collect(&self, night: &Night) -> Result<ConfirmationResult, ConfirmationError> {
        self.collect_calls.write().await.push(night.id.clone());
        self.result_for(night).await
    }
}
