//! Trait definitions for the confirmation module.

use async_trait::async_trait;

use super::error::ConfirmationError;
use crate::night::{ConfirmationResult, Night};

/// Drives the human confirmation step for one night at a time.
///
/// `confirm` blocks for as long as the human needs; implementations impose no
/// timeout on it.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Returns the name of this confirmer implementation.
    fn name(&self) -> &str;

    /// Run the confirmation tool against the night and return its validated
    /// result.
    async fn confirm(&self, night: &Night) -> Result<ConfirmationResult, ConfirmationError>;

    /// Locate and validate a result produced by an earlier run, without
    /// launching the tool.
    async fn collect(&self, night: &Night) -> Result<ConfirmationResult, ConfirmationError>;
}
