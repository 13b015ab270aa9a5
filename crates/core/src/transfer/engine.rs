//! Transfer engine: bounded retries around upload, verify, rename.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::backoff::{BackoffPolicy, ExponentialBackoff, Sleeper, TokioSleeper};
use super::config::{RetryConfig, VerifyMode};
use super::error::TransferError;
use super::traits::{join_remote, RemoteConnector};

/// Suffix of the temporary name a file is uploaded under.
pub const PART_SUFFIX: &str = ".part";

/// One file to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub local: PathBuf,
    pub remote_dir: String,
    pub remote_name: String,
}

impl TransferRequest {
    /// Final remote path.
    pub fn remote_path(&self) -> String {
        join_remote(&self.remote_dir, &self.remote_name)
    }

    /// Temporary remote path used while the upload is in flight.
    pub fn part_path(&self) -> String {
        format!("{}{}", self.remote_path(), PART_SUFFIX)
    }
}

/// Outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub remote_path: String,
    pub bytes: u64,
    pub attempts: u32,
    /// Local MD5, when verification used it.
    pub md5: Option<String>,
}

/// Local facts every attempt is checked against.
#[derive(Debug, Clone)]
struct LocalFile {
    size: u64,
    md5: Option<String>,
}

/// Delivers files to the remote with retry and atomic visibility.
pub struct TransferEngine {
    connector: Arc<dyn RemoteConnector>,
    backoff: Arc<dyn BackoffPolicy>,
    sleeper: Arc<dyn Sleeper>,
    verify: VerifyMode,
}

impl TransferEngine {
    /// Creates an engine with exponential backoff and real sleeping.
    pub fn new(connector: Arc<dyn RemoteConnector>, retry: &RetryConfig, verify: VerifyMode) -> Self {
        Self {
            connector,
            backoff: Arc::new(ExponentialBackoff::from(retry)),
            sleeper: Arc::new(TokioSleeper),
            verify,
        }
    }

    /// Replace the backoff policy.
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replace the clock.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Upload `request.local` to its remote path.
    ///
    /// The data is written to `<name>.part`, checked against the local file,
    /// and only then renamed to its final name. Calling this again for the
    /// same request overwrites the earlier upload.
    pub async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        let start = Instant::now();
        let local = {
            let path = request.local.clone();
            let verify = self.verify;
            tokio::task::spawn_blocking(move || inspect_local(&path, verify))
                .await
                .map_err(|e| TransferError::Aborted(e.to_string()))??
        };

        let connector = Arc::clone(&self.connector);
        let req = request.clone();
        let facts = local.clone();
        let verify = self.verify;
        let attempts = self
            .with_retry("upload", request.remote_path(), move || {
                upload_once(connector.as_ref(), &req, &facts, verify)
            })
            .await?
            .1;

        info!(
            "Uploaded {} to {} ({} bytes, {} attempt(s), {}ms)",
            request.local.display(),
            request.remote_path(),
            local.size,
            attempts,
            start.elapsed().as_millis()
        );

        Ok(TransferReceipt {
            remote_path: request.remote_path(),
            bytes: local.size,
            attempts,
            md5: local.md5,
        })
    }

    /// Names in a remote directory, with the same retry policy as uploads.
    pub async fn list(&self, dir: &str) -> Result<Vec<String>, TransferError> {
        let connector = Arc::clone(&self.connector);
        let owned = dir.to_string();
        let (names, _) = self
            .with_retry("list", dir.to_string(), move || {
                let mut session = connector.connect()?;
                session.list(&owned)
            })
            .await?;
        Ok(names)
    }

    /// Run `op` on the blocking pool until it succeeds, fails permanently, or
    /// runs out of attempts. Returns the value and the attempts used.
    async fn with_retry<T, F>(
        &self,
        what: &str,
        target: String,
        op: F,
    ) -> Result<(T, u32), TransferError>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, TransferError> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let max_attempts = self.backoff.max_attempts();
        let mut attempt = 1;

        loop {
            let task = Arc::clone(&op);
            let result = tokio::task::spawn_blocking(move || task())
                .await
                .map_err(|e| TransferError::Aborted(e.to_string()))?;

            let err = match result {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!("{} of {} failed after {} attempts: {}", what, target, attempt, err);
                return Err(TransferError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.backoff.delay(attempt);
            warn!(
                "{} of {} failed (attempt {}/{}), retrying in {:?}: {}",
                what, target, attempt, max_attempts, delay, err
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}

/// One attempt: connect, upload under the temporary name, verify, rename.
/// The session is dropped (and the connection closed) on every return path.
fn upload_once(
    connector: &dyn RemoteConnector,
    request: &TransferRequest,
    local: &LocalFile,
    verify: VerifyMode,
) -> Result<(), TransferError> {
    let mut session = connector.connect()?;
    let part = request.part_path();
    let target = request.remote_path();

    session.mkdir_all(&request.remote_dir)?;
    let sent = session.upload(&request.local, &part)?;
    debug!("Sent {} bytes to {}", sent, part);

    let remote_size = session.size(&part)?.unwrap_or(0);
    if remote_size != local.size {
        return Err(TransferError::VerifyFailed {
            path: part,
            expected: format!("{} bytes", local.size),
            actual: format!("{} bytes", remote_size),
        });
    }

    if let (VerifyMode::Md5, Some(expected)) = (verify, &local.md5) {
        let actual = session.md5(&part)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(TransferError::VerifyFailed {
                path: part,
                expected: expected.clone(),
                actual,
            });
        }
    }

    session.rename(&part, &target)?;
    Ok(())
}

fn inspect_local(path: &Path, verify: VerifyMode) -> Result<LocalFile, TransferError> {
    let read_err = |source| TransferError::LocalRead {
        path: path.to_path_buf(),
        source,
    };
    let size = std::fs::metadata(path).map_err(read_err)?.len();
    let md5 = match verify {
        VerifyMode::Size => None,
        VerifyMode::Md5 => Some(md5_file(path).map_err(read_err)?),
    };
    Ok(LocalFile { size, md5 })
}

/// Hex MD5 of a local file.
pub fn md5_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    md5_reader(&mut reader)
}

/// Hex MD5 of everything a reader yields.
pub fn md5_reader(reader: &mut impl Read) -> std::io::Result<String> {
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRemote, RecordingSleeper};
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(dir: &TempDir, contents: &[u8]) -> TransferRequest {
        let local = dir.path().join("night.zip");
        std::fs::write(&local, contents).unwrap();
        TransferRequest {
            local,
            remote_dir: "/upload/2024/2024_01".to_string(),
            remote_name: "night.zip".to_string(),
        }
    }

    fn engine(remote: &MockRemote, sleeper: &RecordingSleeper, attempts: u32) -> TransferEngine {
        let retry = RetryConfig {
            max_attempts: attempts,
            initial_delay_secs: 5,
            max_delay_secs: 300,
            backoff_multiplier: 2.0,
        };
        TransferEngine::new(Arc::new(remote.clone()), &retry, VerifyMode::Md5)
            .with_sleeper(Arc::new(sleeper.clone()))
    }

    #[tokio::test]
    async fn test_transfer_places_file_at_final_name() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let sleeper = RecordingSleeper::new();
        let req = request(&dir, b"meteor data");

        let receipt = engine(&remote, &sleeper, 3).transfer(&req).await.unwrap();
        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.bytes, 11);
        assert_eq!(
            remote.file("/upload/2024/2024_01/night.zip").as_deref(),
            Some(&b"meteor data"[..])
        );
        assert!(remote.file(&req.part_path()).is_none());
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_retries_with_backoff_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        remote.fail_next_connects(2);
        let sleeper = RecordingSleeper::new();
        let req = request(&dir, b"meteor data");

        let receipt = engine(&remote, &sleeper, 3).transfer(&req).await.unwrap();
        assert_eq!(receipt.attempts, 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
        assert!(remote.file(&req.remote_path()).is_some());
    }

    #[tokio::test]
    async fn test_exhausted_attempts() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        remote.fail_next_connects(5);
        let sleeper = RecordingSleeper::new();
        let req = request(&dir, b"meteor data");

        let err = engine(&remote, &sleeper, 3).transfer(&req).await.unwrap_err();
        assert!(matches!(err, TransferError::Exhausted { attempts: 3, .. }));
        assert_eq!(remote.connect_count(), 3);
        assert!(remote.file(&req.remote_path()).is_none());
    }

    #[tokio::test]
    async fn test_interrupted_upload_leaves_only_part_file() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        remote.truncate_next_uploads(1, 4);
        let sleeper = RecordingSleeper::new();
        let req = request(&dir, b"meteor data");

        let err = engine(&remote, &sleeper, 1).transfer(&req).await.unwrap_err();
        assert!(matches!(err, TransferError::Exhausted { .. }));
        assert_eq!(remote.file(&req.part_path()).as_deref(), Some(&b"mete"[..]));
        assert!(remote.file(&req.remote_path()).is_none());
    }

    #[tokio::test]
    async fn test_corrupted_upload_is_not_renamed() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        remote.corrupt_next_uploads(1);
        let sleeper = RecordingSleeper::new();
        let req = request(&dir, b"meteor data");

        let receipt = engine(&remote, &sleeper, 2).transfer(&req).await.unwrap();
        assert_eq!(receipt.attempts, 2);
        assert_eq!(
            remote.file(&req.remote_path()).as_deref(),
            Some(&b"meteor data"[..])
        );
    }

    #[tokio::test]
    async fn test_transfer_twice_overwrites() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let sleeper = RecordingSleeper::new();
        let engine = engine(&remote, &sleeper, 1);

        let req = request(&dir, b"first");
        engine.transfer(&req).await.unwrap();
        std::fs::write(&req.local, b"second").unwrap();
        engine.transfer(&req).await.unwrap();

        assert_eq!(
            remote.file(&req.remote_path()).as_deref(),
            Some(&b"second"[..])
        );
    }

    #[tokio::test]
    async fn test_missing_local_file_is_not_retried() {
        let remote = MockRemote::new();
        let sleeper = RecordingSleeper::new();
        let req = TransferRequest {
            local: PathBuf::from("/nonexistent/night.zip"),
            remote_dir: "/upload".to_string(),
            remote_name: "night.zip".to_string(),
        };

        let err = engine(&remote, &sleeper, 3).transfer(&req).await.unwrap_err();
        assert!(matches!(err, TransferError::LocalRead { .. }));
        assert_eq!(remote.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_list_directory() {
        let dir = TempDir::new().unwrap();
        let remote = MockRemote::new();
        let sleeper = RecordingSleeper::new();
        let engine = engine(&remote, &sleeper, 1);
        engine.transfer(&request(&dir, b"x")).await.unwrap();

        let names = engine.list("/upload/2024/2024_01").await.unwrap();
        assert_eq!(names, vec!["night.zip".to_string()]);
        assert!(engine.list("/upload/1999").await.unwrap().is_empty());
    }

    #[test]
    fn test_md5_reader() {
        let digest = md5_reader(&mut &b"hello"[..]).unwrap();
        assert_eq!(digest, "5d41402abc4b2a76b9719d911017c592");
    }
}
