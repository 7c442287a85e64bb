//! Scratch directory removal.

use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::PipelineError;
use crate::prepare::PreparedArtifact;
use crate::task::TaskId;

#[derive(Debug)]
pub enum CleanupOutcome {
    /// The artifact never staged anything locally.
    NothingToClean,
    Removed(PathBuf),
    Failed(PipelineError),
}

impl CleanupOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, CleanupOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupManager;

impl CleanupManager {
    /// Consume the artifact and remove its scratch directory, if any.
    pub async fn cleanup(&self, task_id: TaskId, mut artifact: PreparedArtifact) -> CleanupOutcome {
        match artifact.take_scratch() {
            None => CleanupOutcome::NothingToClean,
            Some(scratch) => self.remove(task_id, scratch.into_path()).await,
        }
    }

    /// Recursively remove `path`. A directory that is already gone counts as
    /// removed.
    pub async fn remove(&self, task_id: TaskId, path: PathBuf) -> CleanupOutcome {
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                tracing::info!(task_id = %task_id, path = %path.display(), "Removed scratch directory");
                CleanupOutcome::Removed(path)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(task_id = %task_id, path = %path.display(), "Scratch directory already gone");
                CleanupOutcome::Removed(path)
            }
            Err(source) => {
                tracing::error!(
                    task_id = %task_id,
                    path = %path.display(),
                    error = %source,
                    "Failed to remove scratch directory"
                );
                CleanupOutcome::Failed(PipelineError::Cleanup { path, source })
            }
        }
    }
}
