//! External preparation/training worker protocol.
//!
//! Model preparation (reference preprocessing, optional fine-tuning) runs in
//! an opaque subprocess. The worker receives its job as CLI arguments and
//! reports through stdout, one JSON object per line, each with a `type` field
//! of `progress`, `error` or `complete`. The child's exit code is
//! authoritative only when no terminal message was seen.

use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SynthError};

/// Preparation mode forwarded to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    /// Build reference clips and the descriptor sidecar only.
    ReferenceOnly,
    /// Full fine-tuning run.
    Finetune,
}

impl PrepareMode {
    fn as_arg(self) -> &'static str {
        match self {
            Self::ReferenceOnly => "reference",
            Self::Finetune => "finetune",
        }
    }
}

/// One preparation job.
#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub char_id: String,
    pub char_name: String,
    /// Extracted raw clips for the character.
    pub audio_dir: PathBuf,
    /// Model directory to populate.
    pub output_dir: PathBuf,
    pub gamedata_path: PathBuf,
    /// Installation directory of the synthesis engine.
    pub engine_path: PathBuf,
    pub language: String,
    pub epochs: u32,
    pub mode: PrepareMode,
}

/// One line of worker output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Progress {
        #[serde(default)]
        stage: String,
        #[serde(default)]
        percent: f64,
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Complete {
        #[serde(default)]
        message: String,
    },
}

/// Callback for streamed worker progress.
pub type ProgressFn = Box<dyn Fn(&WorkerMessage) + Send + Sync>;

/// Runs preparation jobs through the external worker executable.
///
/// Clones share the cancellation token, so a held clone can cancel a run in
/// flight elsewhere.
#[derive(Clone)]
pub struct PreparationWorker {
    worker_exe: PathBuf,
    cancel: CancellationToken,
}

impl PreparationWorker {
    pub fn new(worker_exe: impl Into<PathBuf>) -> Self {
        Self {
            worker_exe: worker_exe.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Request cancellation of the in-flight job. The child is killed and the
    /// run reports failure without an error event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run one job to completion. Returns `true` on success.
    pub async fn run(&self, request: &PrepareRequest, on_progress: Option<ProgressFn>) -> Result<bool> {
        if !self.worker_exe.exists() {
            return Err(SynthError::Training(format!(
                "preparation worker not found: {}",
                self.worker_exe.display()
            )));
        }

        info!(
            "preparing voice model: {} ({:?})",
            request.char_id, request.mode
        );
        let mut child = tokio::process::Command::new(&self.worker_exe)
            .arg("--char-id")
            .arg(&request.char_id)
            .arg("--char-name")
            .arg(&request.char_name)
            .arg("--audio-dir")
            .arg(&request.audio_dir)
            .arg("--output-dir")
            .arg(&request.output_dir)
            .arg("--gamedata-path")
            .arg(&request.gamedata_path)
            .arg("--engine-path")
            .arg(&request.engine_path)
            .arg("--language")
            .arg(&request.language)
            .arg("--epochs")
            .arg(request.epochs.to_string())
            .arg("--mode")
            .arg(request.mode.as_arg())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SynthError::Training(format!("failed to spawn worker: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SynthError::Training("worker stdout unavailable".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        // Terminal messages beat the exit code; the exit code only matters
        // when the worker died without saying anything.
        let mut terminal: Option<bool> = None;
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = self.cancel.cancelled() => {
                    warn!("preparation cancelled: {}", request.char_id);
                    let _ = child.kill().await;
                    return Ok(false);
                }
            };
            let Some(line) = line.map_err(|e| SynthError::Training(format!("worker read: {e}")))?
            else {
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<WorkerMessage>(trimmed) {
                Ok(message) => {
                    match &message {
                        WorkerMessage::Progress {
                            stage,
                            percent,
                            message,
                        } => debug!("worker {stage} {percent:.0}%: {message}"),
                        WorkerMessage::Error { message } => {
                            warn!("worker error: {message}");
                            terminal = Some(false);
                        }
                        WorkerMessage::Complete { message } => {
                            info!("worker complete: {message}");
                            terminal = Some(true);
                        }
                    }
                    if let Some(cb) = &on_progress {
                        cb(&message);
                    }
                }
                Err(e) => debug!("ignoring non-protocol worker output ({e}): {trimmed}"),
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SynthError::Training(format!("worker wait: {e}")))?;
        Ok(terminal.unwrap_or_else(|| status.success()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request(dir: &Path) -> PrepareRequest {
        PrepareRequest {
            char_id: "char_002_amiya".into(),
            char_name: "아미야".into(),
            audio_dir: dir.join("audio"),
            output_dir: dir.join("model"),
            gamedata_path: dir.join("gamedata"),
            engine_path: dir.join("engine"),
            language: "ko".into(),
            epochs: 8,
            mode: PrepareMode::ReferenceOnly,
        }
    }

    fn script_worker(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("worker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn complete_message_wins_over_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script_worker(
            dir.path(),
            r#"echo '{"type": "progress", "stage": "slice", "percent": 50.0}'
echo '{"type": "complete", "message": "done"}'
exit 3"#,
        );
        let worker = PreparationWorker::new(exe);
        assert!(worker.run(&request(dir.path()), None).await.unwrap());
    }

    #[tokio::test]
    async fn error_message_fails_despite_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script_worker(
            dir.path(),
            r#"echo '{"type": "error", "message": "no clips"}'
exit 0"#,
        );
        let worker = PreparationWorker::new(exe);
        assert!(!worker.run(&request(dir.path()), None).await.unwrap());
    }

    #[tokio::test]
    async fn exit_code_authoritative_without_terminal_message() {
        let dir = tempfile::tempdir().unwrap();
        let ok = script_worker(dir.path(), "exit 0");
        assert!(PreparationWorker::new(ok)
            .run(&request(dir.path()), None)
            .await
            .unwrap());

        let bad = script_worker(dir.path(), "exit 1");
        assert!(!PreparationWorker::new(bad)
            .run(&request(dir.path()), None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn progress_messages_reach_the_callback() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script_worker(
            dir.path(),
            r#"echo '{"type": "progress", "stage": "slice", "percent": 10.0, "message": "a"}'
echo 'not json noise'
echo '{"type": "progress", "stage": "score", "percent": 90.0, "message": "b"}'
echo '{"type": "complete"}'"#,
        );
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let worker = PreparationWorker::new(exe);
        let ok = worker
            .run(
                &request(dir.path()),
                Some(Box::new(move |msg| {
                    if matches!(msg, WorkerMessage::Progress { .. }) {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                })),
            )
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_worker_is_a_training_error() {
        let dir = tempfile::tempdir().unwrap();
        let worker = PreparationWorker::new(dir.path().join("absent"));
        assert!(matches!(
            worker.run(&request(dir.path()), None).await,
            Err(SynthError::Training(_))
        ));
    }
}
