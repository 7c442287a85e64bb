//! Artifact preparation.
//!
//! Turns a build's download URL into something the registry client can read.
//! For `kvm` that is the URL itself. For archive formats the build is
//! downloaded into a per-task scratch directory and extracted; `vmx` payloads
//! are additionally converted to a preallocated, monolithic disk.
//!
//! Appliance archives are named `<Name>.<arch>-<version>.<type>.tar.gz` and
//! unpack into `<Name>-<version>/`, so for
//! `Webserver.x86_64-0.0.1.xen.tar.gz` the payload is
//! `<scratch>/Webserver-0.0.1/Webserver.x86_64-0.0.1.raw`.
//!
//! Preparation is best effort: a failed step is logged and recorded in the
//! [`PreparationReport`], and the remaining steps still run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::command::{run_checked, CommandRunner, Invocation};
use crate::config::ImportConfig;
use crate::error::{PipelineError, StepError};
use crate::notification::BuildNotification;
use crate::strategy::{DiskConversion, ImportStrategy, Preparation, PreparationStep};
use crate::task::TaskId;

const ARCHIVE_SUFFIXES: &[&str] = &[
    ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tar.xz", ".txz", ".tar",
];

/// Where the registry reads the image from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    RemoteUrl(String),
    LocalFile(PathBuf),
}

/// Ownership of a per-task scratch directory.
///
/// Not `Clone`: the handle moves from the preparer to the cleanup manager,
/// which consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn into_path(self) -> PathBuf {
        self.path
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct PreparedArtifact {
    pub source: ArtifactSource,
    scratch: Option<ScratchDir>,
}

impl PreparedArtifact {
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            source: ArtifactSource::RemoteUrl(url.into()),
            scratch: None,
        }
    }

    pub fn staged(path: PathBuf, scratch: ScratchDir) -> Self {
        Self {
            source: ArtifactSource::LocalFile(path),
            scratch: Some(scratch),
        }
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchDir::path)
    }

    pub(crate) fn take_scratch(&mut self) -> Option<ScratchDir> {
        self.scratch.take()
    }
}

/// The artifact plus every step that failed while producing it.
#[derive(Debug)]
pub struct PreparationReport {
    pub artifact: PreparedArtifact,
    pub failures: Vec<PipelineError>,
}

impl PreparationReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ArtifactPreparer {
    runner: Arc<dyn CommandRunner>,
    config: Arc<ImportConfig>,
}

impl ArtifactPreparer {
    pub fn new(runner: Arc<dyn CommandRunner>, config: Arc<ImportConfig>) -> Self {
        Self { runner, config }
    }

    /// Scratch directory a task uses for `notification`.
    pub fn scratch_dir_for(&self, task_id: TaskId, notification: &BuildNotification) -> PathBuf {
        self.config.scratch_root.join(format!(
            "{}-{}-{}",
            sanitize_component(&notification.name),
            sanitize_component(&notification.version),
            task_id
        ))
    }

    pub async fn prepare(
        &self,
        task_id: TaskId,
        notification: &BuildNotification,
        strategy: &ImportStrategy,
    ) -> PreparationReport {
        match strategy.preparation {
            Preparation::None => PreparationReport {
                artifact: PreparedArtifact::remote(notification.download_url.clone()),
                failures: Vec::new(),
            },
            Preparation::DownloadExtract { payload_extension } => {
                self.stage(task_id, notification, strategy, payload_extension, None)
                    .await
            }
            Preparation::DownloadExtractConvert {
                payload_extension,
                conversion,
            } => {
                self.stage(
                    task_id,
                    notification,
                    strategy,
                    payload_extension,
                    Some(conversion),
                )
                .await
            }
        }
    }

    async fn stage(
        &self,
        task_id: TaskId,
        notification: &BuildNotification,
        strategy: &ImportStrategy,
        extension: &str,
        conversion: Option<DiskConversion>,
    ) -> PreparationReport {
        let scratch_path = self.scratch_dir_for(task_id, notification);
        let mut failures = Vec::new();

        tracing::info!(
            task_id = %task_id,
            scratch = %scratch_path.display(),
            steps = ?strategy.preparation.steps(),
            "Staging build artifact"
        );

        // Synchronous: no mkdir may outlive an aborted task.
        if let Err(source) = std::fs::create_dir_all(&scratch_path) {
            record(
                task_id,
                &mut failures,
                PreparationStep::Download,
                StepError::Io {
                    path: scratch_path.clone(),
                    source,
                },
            );
        }

        let archive_name = match archive_file_name(&notification.download_url) {
            Some(name) => sanitize_component(name),
            None => {
                record(
                    task_id,
                    &mut failures,
                    PreparationStep::Download,
                    StepError::ArchiveName(notification.download_url.clone()),
                );
                "download".to_string()
            }
        };
        let archive_path = scratch_path.join(&archive_name);

        let download = Invocation::new(&self.config.download_program)
            .args(["--fail", "--silent", "--show-error", "--location", "--output"])
            .arg(path_arg(&archive_path))
            .arg(&notification.download_url);
        self.step(task_id, PreparationStep::Download, &download, &mut failures)
            .await;

        let extract = Invocation::new(&self.config.extract_program)
            .args(["-x", "-f"])
            .arg(path_arg(&archive_path))
            .arg("-C")
            .arg(path_arg(&scratch_path));
        self.step(task_id, PreparationStep::Extract, &extract, &mut failures)
            .await;

        let layout = PayloadLayout::new(
            &scratch_path,
            &archive_name,
            &notification.version,
            strategy.image_type.as_str(),
        );
        let payload = layout.file(extension, "");

        let source = match conversion {
            None => payload,
            Some(conversion) => {
                let converted = layout.file(extension, conversion.output_suffix);
                let convert = Invocation::new(&self.config.convert_program)
                    .arg("-r")
                    .arg(path_arg(&payload))
                    .arg("-t")
                    .arg(conversion.disk_type.to_string())
                    .arg(path_arg(&converted));
                self.step(task_id, PreparationStep::Convert, &convert, &mut failures)
                    .await;

                let flat_suffix = format!("{}{}", conversion.output_suffix, conversion.flat_suffix);
                layout.file(extension, &flat_suffix)
            }
        };

        tracing::info!(
            task_id = %task_id,
            artifact = %source.display(),
            failed_steps = failures.len(),
            "Preparation finished"
        );

        PreparationReport {
            artifact: PreparedArtifact::staged(source, ScratchDir::new(scratch_path)),
            failures,
        }
    }

    async fn step(
        &self,
        task_id: TaskId,
        step: PreparationStep,
        invocation: &Invocation,
        failures: &mut Vec<PipelineError>,
    ) {
        if let Err(err) = run_checked(self.runner.as_ref(), invocation).await {
            record(task_id, failures, step, err);
        }
    }
}

fn record(
    task_id: TaskId,
    failures: &mut Vec<PipelineError>,
    step: PreparationStep,
    source: StepError,
) {
    tracing::error!(
        task_id = %task_id,
        step = %step,
        output = source.output().unwrap_or_default(),
        error = %source,
        "Preparation step failed, continuing"
    );
    failures.push(PipelineError::Preparation { step, source });
}

/// Extracted file names derived from the archive name.
struct PayloadLayout {
    dir: PathBuf,
    stem: String,
}

impl PayloadLayout {
    fn new(scratch: &Path, archive_name: &str, version: &str, image_type: &str) -> Self {
        let base = archive_name.split('.').next().unwrap_or(archive_name);
        let dir = scratch.join(format!("{base}-{}", sanitize_component(version)));

        let without_archive = ARCHIVE_SUFFIXES
            .iter()
            .find_map(|suffix| archive_name.strip_suffix(suffix))
            .unwrap_or(archive_name);
        let stem = without_archive
            .strip_suffix(&format!(".{image_type}"))
            .unwrap_or(without_archive)
            .to_string();

        Self { dir, stem }
    }

    fn file(&self, extension: &str, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{suffix}.{extension}", self.stem))
    }
}

/// Last path segment of an http(s) URL, without query or fragment.
///
/// Returns `None` when the URL has no path, ends in `/`, or names a hidden
/// file.
pub fn archive_file_name(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    let (_host, path) = rest.split_once('/')?;
    let name = path.rsplit('/').next()?;
    if name.is_empty() || name.starts_with('.') {
        None
    } else {
        Some(name)
    }
}

/// Make an untrusted value safe to use as one path component.
pub fn sanitize_component(value: &str) -> String {
    let mut out: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with('.') {
        out.insert(0, '_');
    }
    out
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
