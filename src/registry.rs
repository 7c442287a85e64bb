//! Registry import.
//!
//! Registers the prepared artifact with the image registry client:
//!
//! ```text
//! glance image-create --name=<name>-<version>-<type> --is-public=True
//!        --disk-format=<fmt> --container-format=bare
//!        [--property key=value]... (--copy-from <url> | --file <path>)
//! ```

use std::sync::Arc;

use serde::Serialize;

use crate::command::{run_checked, CommandRunner, Invocation};
use crate::error::PipelineError;
use crate::notification::BuildNotification;
use crate::prepare::{ArtifactSource, PreparedArtifact};
use crate::strategy::ImportStrategy;
use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Succeeded,
    Failed,
    /// Not attempted because the pipeline policy stopped after preparation.
    Skipped,
}

/// What happened when the registry client ran. Observational only.
#[derive(Debug)]
pub struct ImportOutcome {
    pub image_name: String,
    pub status: ImportStatus,
    /// Combined stdout and stderr of the registry client.
    pub output: String,
    pub error: Option<PipelineError>,
}

impl ImportOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ImportStatus::Succeeded
    }

    pub fn skipped(image_name: String) -> Self {
        Self {
            image_name,
            status: ImportStatus::Skipped,
            output: String::new(),
            error: None,
        }
    }
}

pub struct RegistryImporter {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl RegistryImporter {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Build the registry command for one artifact.
    pub fn invocation(
        &self,
        notification: &BuildNotification,
        strategy: &ImportStrategy,
        artifact: &PreparedArtifact,
    ) -> Invocation {
        let mut inv = Invocation::new(&self.program)
            .arg("image-create")
            .arg(format!("--name={}", notification.image_name()))
            .arg("--is-public=True")
            .arg(format!("--disk-format={}", strategy.disk_format))
            .arg(format!("--container-format={}", strategy.container_format));

        for (key, value) in strategy.registry_properties {
            inv = inv.arg("--property").arg(format!("{key}={value}"));
        }

        match &artifact.source {
            ArtifactSource::RemoteUrl(url) => inv.arg("--copy-from").arg(url),
            ArtifactSource::LocalFile(path) => {
                inv.arg("--file").arg(path.to_string_lossy().into_owned())
            }
        }
    }

    /// Run the registry client. Never fails; the outcome says what happened.
    pub async fn import(
        &self,
        task_id: TaskId,
        notification: &BuildNotification,
        strategy: &ImportStrategy,
        artifact: &PreparedArtifact,
    ) -> ImportOutcome {
        let image_name = notification.image_name();
        let invocation = self.invocation(notification, strategy, artifact);

        match run_checked(self.runner.as_ref(), &invocation).await {
            Ok(out) => {
                tracing::info!(task_id = %task_id, image = %image_name, output = %out.output, "Import succeeded");
                ImportOutcome {
                    image_name,
                    status: ImportStatus::Succeeded,
                    output: out.output,
                    error: None,
                }
            }
            Err(err) => {
                let output = err.output().unwrap_or_default().to_string();
                tracing::error!(
                    task_id = %task_id,
                    image = %image_name,
                    command = %invocation,
                    output = %output,
                    error = %err,
                    "Import failed"
                );
                ImportOutcome {
                    image_name,
                    status: ImportStatus::Failed,
                    output,
                    error: Some(PipelineError::Import(err)),
                }
            }
        }
    }
}
