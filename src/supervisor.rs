//! Background execution of imports.
//!
//! [`ImportPipeline`] runs the three stages for one notification and returns
//! an [`ImportReport`]. [`ImportSupervisor`] spawns one tokio task per
//! accepted notification and keeps a bounded registry of the tasks still in
//! flight so they can be listed or cancelled. The bound limits tracking
//! only; imports are never refused or queued.
//!
//! Stage order is fixed: prepare, import, cleanup. Each stage returns an
//! outcome value and [`PipelinePolicy`] decides whether a failed preparation
//! still proceeds to the import. Cleanup always runs once the preparation
//! has produced an artifact.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::Instrument;

use crate::cleanup::{CleanupManager, CleanupOutcome};
use crate::command::CommandRunner;
use crate::config::ImportConfig;
use crate::error::PipelineError;
use crate::notification::BuildNotification;
use crate::prepare::{ArtifactPreparer, PreparationReport};
use crate::registry::{ImportOutcome, RegistryImporter};
use crate::strategy::ImportStrategy;
use crate::task::{TaskId, TaskSnapshot};

/// Continuation rules between stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelinePolicy {
    /// When false, the registry import is attempted even after a failed
    /// preparation step.
    pub abort_on_preparation_failure: bool,
}

impl PipelinePolicy {
    pub fn proceed_to_import(&self, preparation: &PreparationReport) -> bool {
        preparation.is_success() || !self.abort_on_preparation_failure
    }
}

/// Everything a finished task did.
#[derive(Debug)]
pub struct ImportReport {
    pub task_id: TaskId,
    pub image_name: String,
    pub preparation_failures: Vec<PipelineError>,
    pub import: ImportOutcome,
    pub cleanup: CleanupOutcome,
}

impl ImportReport {
    pub fn is_success(&self) -> bool {
        self.preparation_failures.is_empty() && self.import.is_success() && self.cleanup.is_success()
    }

    fn log(&self) {
        if self.is_success() {
            tracing::info!(task_id = %self.task_id, image = %self.image_name, "Import task finished");
        } else {
            tracing::warn!(
                task_id = %self.task_id,
                image = %self.image_name,
                preparation_failures = self.preparation_failures.len(),
                import = ?self.import.status,
                cleanup_ok = self.cleanup.is_success(),
                "Import task finished with failures"
            );
        }
    }
}

pub struct ImportPipeline {
    preparer: ArtifactPreparer,
    importer: RegistryImporter,
    cleanup: CleanupManager,
    policy: PipelinePolicy,
}

impl ImportPipeline {
    pub fn new(config: ImportConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let policy = PipelinePolicy {
            abort_on_preparation_failure: config.abort_on_preparation_failure,
        };
        let importer = RegistryImporter::new(runner.clone(), config.registry_program.clone());
        let preparer = ArtifactPreparer::new(runner, Arc::new(config));
        Self {
            preparer,
            importer,
            cleanup: CleanupManager,
            policy,
        }
    }

    /// Prepare, import and clean up one notification.
    pub async fn run(
        &self,
        task_id: TaskId,
        notification: &BuildNotification,
        strategy: &ImportStrategy,
    ) -> ImportReport {
        let image_name = notification.image_name();
        let preparation = self.preparer.prepare(task_id, notification, strategy).await;

        let import = if self.policy.proceed_to_import(&preparation) {
            self.importer
                .import(task_id, notification, strategy, &preparation.artifact)
                .await
        } else {
            tracing::warn!(
                task_id = %task_id,
                image = %image_name,
                failed_steps = preparation.failures.len(),
                "Skipping import after failed preparation"
            );
            ImportOutcome::skipped(image_name.clone())
        };

        let PreparationReport { artifact, failures } = preparation;
        let cleanup = self.cleanup.cleanup(task_id, artifact).await;

        ImportReport {
            task_id,
            image_name,
            preparation_failures: failures,
            import,
            cleanup,
        }
    }
}

struct TaskEntry {
    snapshot: TaskSnapshot,
    scratch: Option<PathBuf>,
    abort: Option<AbortHandle>,
    stopped: oneshot::Receiver<()>,
}

/// Owned by the spawned future. Dropping it, on completion, panic or abort,
/// removes the registry entry and frees the slot.
struct TrackedSlot {
    task_id: TaskId,
    tasks: Arc<DashMap<TaskId, TaskEntry>>,
    tracked: Arc<AtomicUsize>,
    _stopped: oneshot::Sender<()>,
}

impl Drop for TrackedSlot {
    fn drop(&mut self) {
        self.tasks.remove(&self.task_id);
        self.tracked.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A freshly spawned import.
///
/// Dropping `handle` detaches the task; it keeps running.
pub struct ScheduledImport {
    pub task_id: TaskId,
    /// False when the registry was full and the task runs without being
    /// listed or cancellable.
    pub tracked: bool,
    pub handle: JoinHandle<ImportReport>,
}

#[derive(Clone)]
pub struct ImportSupervisor {
    pipeline: Arc<ImportPipeline>,
    tasks: Arc<DashMap<TaskId, TaskEntry>>,
    tracked: Arc<AtomicUsize>,
    capacity: usize,
}

impl ImportSupervisor {
    pub fn new(pipeline: ImportPipeline, capacity: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            tasks: Arc::new(DashMap::new()),
            tracked: Arc::new(AtomicUsize::new(0)),
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: ImportConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let capacity = config.max_tracked_imports;
        Self::new(ImportPipeline::new(config, runner), capacity)
    }

    fn reserve_slot(&self) -> bool {
        self.tracked
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// Spawn the import for `notification` and return immediately.
    ///
    /// Every call spawns a task. Once `capacity` tasks are tracked, further
    /// tasks still run but are not registered.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(
        &self,
        notification: BuildNotification,
        strategy: &'static ImportStrategy,
    ) -> ScheduledImport {
        let task_id = TaskId::new();
        let image_name = notification.image_name();

        let slot = if self.reserve_slot() {
            let (stopped_tx, stopped_rx) = oneshot::channel();
            let scratch = strategy
                .preparation
                .stages_locally()
                .then(|| self.pipeline.preparer.scratch_dir_for(task_id, &notification));
            self.tasks.insert(
                task_id,
                TaskEntry {
                    snapshot: TaskSnapshot {
                        task_id,
                        image_name: image_name.clone(),
                        image_type: strategy.image_type,
                        started_at: Utc::now(),
                    },
                    scratch,
                    abort: None,
                    stopped: stopped_rx,
                },
            );
            Some(TrackedSlot {
                task_id,
                tasks: self.tasks.clone(),
                tracked: self.tracked.clone(),
                _stopped: stopped_tx,
            })
        } else {
            tracing::warn!(
                task_id = %task_id,
                image = %image_name,
                capacity = self.capacity,
                "Import registry full, running task untracked"
            );
            None
        };
        let tracked = slot.is_some();

        let pipeline = self.pipeline.clone();
        let span = tracing::info_span!("import", task_id = %task_id, image = %image_name);
        let handle = tokio::spawn(
            async move {
                let _slot = slot;
                let report = pipeline.run(task_id, &notification, strategy).await;
                report.log();
                report
            }
            .instrument(span),
        );

        if let Some(mut entry) = self.tasks.get_mut(&task_id) {
            entry.abort = Some(handle.abort_handle());
        }

        tracing::info!(task_id = %task_id, image = %image_name, tracked, "Scheduled import");
        ScheduledImport {
            task_id,
            tracked,
            handle,
        }
    }

    /// Abort an in-flight import and remove its scratch directory.
    ///
    /// Waits for the task to stop before removing the directory. Returns
    /// false if no such task is tracked.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let Some((_, entry)) = self.tasks.remove(&task_id) else {
            return false;
        };
        if let Some(abort) = entry.abort {
            abort.abort();
        }
        // resolves once the task's slot is dropped
        let _ = entry.stopped.await;
        if let Some(scratch) = entry.scratch {
            self.pipeline.cleanup.remove(task_id, scratch).await;
        }
        tracing::warn!(task_id = %task_id, image = %entry.snapshot.image_name, "Import cancelled");
        true
    }

    /// Tracked in-flight imports, oldest first.
    pub fn active(&self) -> Vec<TaskSnapshot> {
        let mut active: Vec<TaskSnapshot> =
            self.tasks.iter().map(|e| e.snapshot.clone()).collect();
        active.sort_by_key(|s| s.started_at);
        active
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingRunner;
    use crate::registry::ImportStatus;
    use crate::strategy::ImageType;
    use std::path::Path;
    use std::time::Duration;

    fn notification(image_type: ImageType) -> BuildNotification {
        BuildNotification {
            event: "build_finished".into(),
            image_type,
            name: "Webserver".into(),
            version: "0.0.1".into(),
            download_url: format!("https://h/dl/Webserver.x86_64-0.0.1.{image_type}.tar.gz"),
        }
    }

    struct PanickingRunner;

    #[async_trait::async_trait]
    impl CommandRunner for PanickingRunner {
        async fn run(
            &self,
            _: &crate::command::Invocation,
        ) -> Result<crate::command::CommandOutput, crate::error::StepError> {
            panic!("runner blew up")
        }
    }

    fn supervisor(root: &Path, runner: Arc<dyn CommandRunner>, config: ImportConfig) -> ImportSupervisor {
        let config = ImportConfig {
            scratch_root: root.to_path_buf(),
            ..config
        };
        ImportSupervisor::from_config(config, runner)
    }

    #[test]
    fn default_policy_proceeds_after_failed_preparation() {
        let report = PreparationReport {
            artifact: crate::prepare::PreparedArtifact::remote("https://h/x"),
            failures: vec![PipelineError::Preparation {
                step: crate::strategy::PreparationStep::Download,
                source: crate::error::StepError::ArchiveName("x".into()),
            }],
        };
        assert!(PipelinePolicy::default().proceed_to_import(&report));
        let strict = PipelinePolicy {
            abort_on_preparation_failure: true,
        };
        assert!(!strict.proceed_to_import(&report));
    }

    #[tokio::test]
    async fn kvm_task_imports_and_leaves_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let sup = supervisor(tmp.path(), runner.clone(), ImportConfig::default());
        let n = notification(ImageType::Kvm);
        let strategy = n.strategy();

        let scheduled = sup.schedule(n, strategy);
        let report = scheduled.handle.await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.image_name, "Webserver-0.0.1-kvm");
        assert!(matches!(report.cleanup, CleanupOutcome::NothingToClean));
        assert_eq!(runner.programs(), vec!["glance"]);
        assert!(sup.is_empty());
    }

    #[tokio::test]
    async fn strict_policy_skips_import_but_still_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new().failing("tar"));
        let sup = supervisor(
            tmp.path(),
            runner.clone(),
            ImportConfig {
                abort_on_preparation_failure: true,
                ..Default::default()
            },
        );
        let n = notification(ImageType::Xen);
        let strategy = n.strategy();

        let report = sup.schedule(n, strategy).handle.await.unwrap();

        assert_eq!(report.import.status, ImportStatus::Skipped);
        assert_eq!(runner.programs(), vec!["curl", "tar"]);
        match report.cleanup {
            CleanupOutcome::Removed(path) => assert!(!path.exists()),
            other => panic!("unexpected cleanup outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_registry_still_runs_untracked_imports() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new().with_delay(Duration::from_millis(200)));
        let sup = supervisor(
            tmp.path(),
            runner.clone(),
            ImportConfig {
                max_tracked_imports: 1,
                ..Default::default()
            },
        );

        let n = notification(ImageType::Kvm);
        let first = sup.schedule(n.clone(), n.strategy());
        let second = sup.schedule(n.clone(), n.strategy());
        assert!(first.tracked);
        assert!(!second.tracked);
        assert_eq!(sup.active().len(), 1);
        assert_eq!(sup.active()[0].task_id, first.task_id);

        assert!(first.handle.await.unwrap().is_success());
        assert!(second.handle.await.unwrap().is_success());
        assert_eq!(runner.programs(), vec!["glance", "glance"]);

        assert!(sup.schedule(n.clone(), n.strategy()).tracked);
    }

    #[tokio::test]
    async fn panicking_task_releases_its_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let sup = supervisor(
            tmp.path(),
            Arc::new(PanickingRunner),
            ImportConfig {
                max_tracked_imports: 1,
                ..Default::default()
            },
        );
        let n = notification(ImageType::Kvm);

        let scheduled = sup.schedule(n.clone(), n.strategy());
        assert!(scheduled.tracked);
        assert!(scheduled.handle.await.unwrap_err().is_panic());

        assert!(sup.is_empty());
        assert!(sup.schedule(n.clone(), n.strategy()).tracked);
    }

    #[tokio::test]
    async fn cancel_aborts_task_and_removes_scratch() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new().with_delay(Duration::from_secs(30)));
        let sup = supervisor(tmp.path(), runner, ImportConfig::default());
        let n = notification(ImageType::Xen);

        let scheduled = sup.schedule(n.clone(), n.strategy());
        // let the task create its scratch directory and block in the download
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);

        assert!(sup.cancel(scheduled.task_id).await);
        assert!(!sup.cancel(scheduled.task_id).await);

        let joined = scheduled.handle.await;
        assert!(joined.unwrap_err().is_cancelled());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        assert!(sup.is_empty());
    }

    #[tokio::test]
    async fn cancel_before_first_poll_leaves_no_scratch() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::new().with_delay(Duration::from_secs(30)));
        let sup = supervisor(tmp.path(), runner.clone(), ImportConfig::default());
        let n = notification(ImageType::Vmx);

        let scheduled = sup.schedule(n.clone(), n.strategy());
        assert!(sup.cancel(scheduled.task_id).await);

        assert!(scheduled.handle.await.unwrap_err().is_cancelled());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        assert!(runner.calls().is_empty());
        assert!(sup.is_empty());
    }
}
