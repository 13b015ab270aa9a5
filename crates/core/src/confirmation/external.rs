//! External confirmation tool driver (CMN_binViewer or compatible).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Instant, SystemTime};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::artifact::load_result;
use super::config::ConfirmationConfig;
use super::error::ConfirmationError;
use super::traits::Confirmer;
use crate::night::{find_detect_file, ConfirmationResult, Night, ResultSource};
use crate::transfer::md5_file;

/// Lines of tool stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Identity of a file on disk, compared before and after the tool runs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
    md5: String,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            path: path.to_path_buf(),
            len: meta.len(),
            modified: meta.modified().ok(),
            md5: md5_file(path).ok()?,
        })
    }
}

/// Fingerprint of the artifact already sitting in `output_dir`, if any.
fn existing_artifact(output_dir: &Path) -> Option<Fingerprint> {
    find_detect_file(output_dir)
        .ok()
        .and_then(|path| Fingerprint::of(&path))
}

/// Launches the configured tool once per night and waits for the human to
/// finish.
pub struct ExternalConfirmer {
    config: ConfirmationConfig,
    confirmed_root: Option<PathBuf>,
}

impl ExternalConfirmer {
    /// Creates a driver. `confirmed_root` is where the tool writes confirmed
    /// nights; `None` means it writes into the night directory itself.
    pub fn new(config: ConfirmationConfig, confirmed_root: Option<PathBuf>) -> Self {
        Self {
            config,
            confirmed_root,
        }
    }

    /// Directory the tool leaves the result artifact in.
    pub fn output_dir(&self, night: &Night) -> PathBuf {
        match &self.confirmed_root {
            Some(root) => root.join(&night.dir_name),
            None => night.path.clone(),
        }
    }

    /// Substitutes per-night placeholders into the argument template.
    fn build_args(&self, night_dir: &Path, detect_file: &Path, output_dir: &Path) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{night_dir}", &night_dir.to_string_lossy())
                    .replace("{detect_file}", &detect_file.to_string_lossy())
                    .replace("{output_dir}", &output_dir.to_string_lossy())
            })
            .collect()
    }

    /// Runs the tool to completion. Returns the fingerprint of the artifact
    /// that was in the output directory before launch.
    async fn run_tool(&self, night: &Night) -> Result<Option<Fingerprint>, ConfirmationError> {
        let command = self
            .config
            .command
            .clone()
            .ok_or_else(|| ConfirmationError::ToolNotFound {
                path: PathBuf::new(),
            })?;

        let detect_file = find_detect_file(&night.path).map_err(ConfirmationError::MissingInput)?;
        let output_dir = self.output_dir(night);
        let args = self.build_args(&night.path, &detect_file, &output_dir);

        let before = {
            let dir = output_dir.clone();
            tokio::task::spawn_blocking(move || existing_artifact(&dir))
                .await
                .ok()
                .flatten()
        };

        info!(night = %night.id, "Launching confirmation tool {}", command.display());
        debug!("Confirmation args: {:?}", args);

        let start = Instant::now();
        let mut child = Command::new(&command)
            .args(&args)
            .current_dir(&night.path)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConfirmationError::ToolNotFound {
                        path: command.clone(),
                    }
                } else {
                    ConfirmationError::LaunchFailed(e)
                }
            })?;

        // Drain stderr concurrently so a chatty tool never blocks on a full pipe.
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "nightrelay::tool", "{}", line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let status = child.wait().await.map_err(ConfirmationError::LaunchFailed)?;
        let stderr = match stderr_task {
            Some(task) => task.await.ok().filter(|s| !s.is_empty()),
            None => None,
        };

        info!(
            night = %night.id,
            "Confirmation tool finished after {}s ({})",
            start.elapsed().as_secs(),
            status
        );

        if !status.success() {
            warn!(night = %night.id, "Confirmation tool exited abnormally: {}", status);
            return Err(ConfirmationError::abnormal_exit(status.to_string(), stderr));
        }

        Ok(before)
    }
}

#[async_trait]
impl Confirmer for ExternalConfirmer {
    fn name(&self) -> &str {
        "external"
    }

    async fn confirm(&self, night: &Night) -> Result<ConfirmationResult, ConfirmationError> {
        let before = self.run_tool(night).await?;
        let result = self.collect(night).await?;

        if let Some(before) = before {
            let after = {
                let path = result.artifact.clone();
                tokio::task::spawn_blocking(move || Fingerprint::of(&path))
                    .await
                    .ok()
                    .flatten()
            };
            if after.as_ref() == Some(&before) {
                warn!(night = %night.id, "Confirmation tool did not write a result");
                return Err(ConfirmationError::ArtifactUnchanged {
                    path: result.artifact,
                });
            }
        }
        Ok(result)
    }

    async fn collect(&self, night: &Night) -> Result<ConfirmationResult, ConfirmationError> {
        let output_dir = self.output_dir(night);
        let night = night.clone();
        tokio::task::spawn_blocking(move || load_result(&night, &output_dir, ResultSource::Confirmed))
            .await
            .map_err(|e| {
                ConfirmationError::LaunchFailed(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use tempfile::TempDir;

    fn shell_confirmer(script: &str, confirmed_root: Option<PathBuf>) -> ExternalConfirmer {
        ExternalConfirmer::new(
            ConfirmationConfig {
                command: Some(PathBuf::from("/bin/sh")),
                args: vec![
                    "-c".to_string(),
                    script.to_string(),
                    "confirm".to_string(),
                    "{night_dir}".to_string(),
                    "{detect_file}".to_string(),
                    "{output_dir}".to_string(),
                ],
                upload_zero_nights: true,
            },
            confirmed_root,
        )
    }

    #[test]
    fn test_build_args_substitutes_placeholders() {
        let confirmer = ExternalConfirmer::new(ConfirmationConfig::default(), None);
        let args = confirmer.build_args(
            Path::new("/a/NL0001_20240101_170512_123456"),
            Path::new("/a/NL0001_20240101_170512_123456/FTPdetectinfo_x.txt"),
            Path::new("/b"),
        );
        assert_eq!(
            args,
            vec![
                "--confirmation",
                "/a/NL0001_20240101_170512_123456",
                "--ftpdetectfile",
                "/a/NL0001_20240101_170512_123456/FTPdetectinfo_x.txt",
            ]
        );
    }

    #[test]
    fn test_output_dir_uses_confirmed_root() {
        let root = TempDir::new().unwrap();
        let night = fixtures::night_dir(root.path(), "NL0001_20240101_170512_123456", 1);

        let in_place = ExternalConfirmer::new(ConfirmationConfig::default(), None);
        assert_eq!(in_place.output_dir(&night), night.path);

        let separate =
            ExternalConfirmer::new(ConfirmationConfig::default(), Some(PathBuf::from("/c")));
        assert_eq!(
            separate.output_dir(&night),
            PathBuf::from("/c/NL0001_20240101_170512_123456")
        );
    }

    #[tokio::test]
    async fn test_confirm_copies_artifact_to_confirmed_root() {
        let archive = TempDir::new().unwrap();
        let confirmed = TempDir::new().unwrap();
        let night = fixtures::night_dir(archive.path(), "NL0001_20240101_170512_123456", 2);

        // Stand-in for the human: accept everything by copying the night.
        let confirmer = shell_confirmer(
            r#"mkdir -p "$3" && cp "$2" "$3"/ && cp "$1"/CAL_* "$3"/"#,
            Some(confirmed.path().to_path_buf()),
        );

        let result = confirmer.confirm(&night).await.unwrap();
        assert_eq!(result.detection_count(), 2);
        assert_eq!(result.source, ResultSource::Confirmed);
        assert!(result.artifact.starts_with(confirmed.path()));
    }

    #[tokio::test]
    async fn test_abnormal_exit_is_reported() {
        let archive = TempDir::new().unwrap();
        let night = fixtures::night_dir(archive.path(), "NL0001_20240101_170512_123456", 1);
        let confirmer = shell_confirmer("echo 'display not found' >&2; exit 3", None);

        let err = confirmer.confirm(&night).await.unwrap_err();
        match err {
            ConfirmationError::AbnormalExit { stderr, .. } => {
                assert_eq!(stderr.as_deref(), Some("display not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_after_clean_exit() {
        let archive = TempDir::new().unwrap();
        let confirmed = TempDir::new().unwrap();
        let night = fixtures::night_dir(archive.path(), "NL0001_20240101_170512_123456", 1);
        let confirmer = shell_confirmer("exit 0", Some(confirmed.path().to_path_buf()));

        let err = confirmer.confirm(&night).await.unwrap_err();
        assert!(matches!(err, ConfirmationError::ArtifactMissing(_)));
    }

    #[tokio::test]
    async fn test_in_place_clean_exit_without_result_is_rejected() {
        let archive = TempDir::new().unwrap();
        let night = fixtures::night_dir(archive.path(), "NL0001_20240101_170512_123456", 3);
        let confirmer = shell_confirmer("exit 0", None);

        let err = confirmer.confirm(&night).await.unwrap_err();
        assert!(matches!(err, ConfirmationError::ArtifactUnchanged { .. }));
    }

    #[tokio::test]
    async fn test_in_place_rewritten_result_is_accepted() {
        let archive = TempDir::new().unwrap();
        let night = fixtures::night_dir(archive.path(), "NL0001_20240101_170512_123456", 3);

        // Keep only the first detection, the way a reviewer rejecting two
        // meteors would.
        let reviewed = archive.path().join("reviewed.txt");
        std::fs::write(&reviewed, fixtures::detectinfo_text("NL0001", 1)).unwrap();
        let script = format!("cp '{}' \"$2\"", reviewed.display());
        let confirmer = shell_confirmer(&script, None);

        let result = confirmer.confirm(&night).await.unwrap();
        assert_eq!(result.detection_count(), 1);
        assert_eq!(result.artifact.parent(), Some(night.path.as_path()));
    }

    #[tokio::test]
    async fn test_stale_result_in_confirmed_root_is_rejected() {
        let archive = TempDir::new().unwrap();
        let confirmed = TempDir::new().unwrap();
        let night = fixtures::night_dir(archive.path(), "NL0001_20240101_170512_123456", 2);
        let out = confirmed.path().join(&night.dir_name);
        std::fs::create_dir_all(&out).unwrap();
        let detect = find_detect_file(&night.path).unwrap();
        std::fs::copy(&detect, out.join(detect.file_name().unwrap())).unwrap();

        let confirmer = shell_confirmer("exit 0", Some(confirmed.path().to_path_buf()));
        let err = confirmer.confirm(&night).await.unwrap_err();
        assert!(matches!(err, ConfirmationError::ArtifactUnchanged { .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_tool() {
        let archive = TempDir::new().unwrap();
        let night = fixtures::night_dir(archive.path(), "NL0001_20240101_170512_123456", 1);
        let confirmer = ExternalConfirmer::new(ConfirmationConfig::default(), None);

        let err = confirmer.confirm(&night).await.unwrap_err();
        assert!(matches!(err, ConfirmationError::ToolNotFound { .. }));
    }
}
