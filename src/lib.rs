//! Image import pipeline for appliance build notifications.
//!
//! An image-building service posts a "build finished" webhook for every
//! completed appliance build. This crate decides whether such a notification
//! is actionable, picks the format-specific [`ImportStrategy`], and runs the
//! import as one background task per notification:
//!
//! ```text
//! validate → resolve → schedule ─┬─ prepare  (download / extract / convert)
//!                                ├─ import   (registry client)
//!                                └─ cleanup  (scratch directory)
//! ```
//!
//! Only validation happens on the caller's thread. Everything that touches
//! the network, the disk, or an external process runs inside the task
//! spawned by [`ImportSupervisor::schedule`], and its outcome is reported
//! through `tracing` and the task's [`ImportReport`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use studio_import::{parse_payload, validate, ImportConfig, ImportSupervisor, ProcessRunner};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let supervisor = ImportSupervisor::from_config(ImportConfig::default(), Arc::new(ProcessRunner));
//!
//! let raw = parse_payload(r#"{
//!     "event": "build_finished",
//!     "name": "Webserver",
//!     "build": {
//!         "image_type": "kvm",
//!         "version": "0.0.1",
//!         "download_url": "https://builds.example.com/Webserver.x86_64-0.0.1.qcow2"
//!     }
//! }"#)?;
//!
//! let notification = validate(&raw)?;
//! let strategy = notification.strategy();
//! supervisor.schedule(notification, strategy);
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod command;
pub mod config;
pub mod error;
pub mod notification;
pub mod prepare;
pub mod registry;
pub mod strategy;
pub mod supervisor;
pub mod task;

pub use cleanup::{CleanupManager, CleanupOutcome};
pub use command::{CommandOutput, CommandRunner, Invocation, ProcessRunner, RecordingRunner};
pub use config::{ConfigError, ImportConfig};
pub use error::{PipelineError, Rejection, StepError};
pub use notification::{parse_payload, validate, BuildNotification, RawBuild, RawNotification};
pub use prepare::{ArtifactPreparer, ArtifactSource, PreparationReport, PreparedArtifact, ScratchDir};
pub use registry::{ImportOutcome, ImportStatus, RegistryImporter};
pub use strategy::{resolve, ImageType, ImportStrategy, Preparation, PreparationStep};
pub use supervisor::{ImportPipeline, ImportReport, ImportSupervisor, PipelinePolicy, ScheduledImport};
pub use task::{TaskId, TaskSnapshot};
