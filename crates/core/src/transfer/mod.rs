//! Transfer engine: delivers upload packages to the collection server.
//!
//! Every attempt opens its own session, uploads under a temporary `.part`
//! name, verifies the result and renames it into place, so the final name
//! only ever refers to a complete file.

mod backoff;
mod config;
mod engine;
mod error;
mod local;
mod sftp;
mod traits;

pub use backoff::{BackoffPolicy, ExponentialBackoff, Sleeper, TokioSleeper};
pub use config::{RemoteConfig, RemoteLayout, RemoteProtocol, RetryConfig, VerifyMode};
pub use engine::{md5_file, TransferEngine, TransferReceipt, TransferRequest, PART_SUFFIX};
pub use error::TransferError;
pub use local::LocalConnector;
pub use sftp::SftpConnector;
pub use traits::{join_remote, RemoteConnector, RemoteSession};

use std::sync::Arc;

/// Builds the connector for the configured protocol.
pub fn create_connector(config: &RemoteConfig) -> Arc<dyn RemoteConnector> {
    match config.protocol {
        RemoteProtocol::Sftp => Arc::new(SftpConnector::new(config.clone())),
        RemoteProtocol::Local => Arc::new(LocalConnector),
    }
}
