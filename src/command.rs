//! External process invocation.
//!
//! Every tool the pipeline drives (downloader, archiver, disk converter,
//! registry client) is described as an [`Invocation`]: a program name plus an
//! argument vector. Nothing is ever passed through a shell, so values taken
//! from a notification cannot inject extra commands.

use std::collections::HashSet;
use std::fmt;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StepError;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// True if `arg` appears verbatim in the argument list.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// The argument following `flag`, if any.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Result of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// stdout followed by stderr, lossily decoded.
    pub output: String,
}

impl CommandOutput {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            output: output.into(),
        }
    }

    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            output: output.into(),
        }
    }

    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit status: {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs external commands for the pipeline.
///
/// Returns `Err` only when the process could not be started; a process that
/// ran and exited non-zero is an `Ok` with `success == false`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, StepError>;
}

/// Spawns real processes with `tokio::process`.
///
/// stdin is closed and the child is killed if the owning task is aborted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, StepError> {
        let output = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| StepError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: combined,
        })
    }
}

/// Run `invocation` and turn a non-zero exit into [`StepError::NonZeroExit`].
pub(crate) async fn run_checked(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
) -> Result<CommandOutput, StepError> {
    tracing::info!(program = %invocation.program, command = %invocation, "Running command");
    let output = runner.run(invocation).await?;
    if output.success {
        tracing::debug!(program = %invocation.program, output = %output.output, "Command succeeded");
        Ok(output)
    } else {
        Err(StepError::NonZeroExit {
            command: invocation.to_string(),
            status: output.status_text(),
            output: output.output,
        })
    }
}

/// Records invocations instead of spawning processes.
///
/// Every program succeeds with empty output unless registered through
/// [`RecordingRunner::failing`]. Useful for dry runs and for exercising the
/// pipeline without the real tools installed.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invocation of `program` exit with status 1.
    pub fn failing(mut self, program: impl Into<String>) -> Self {
        self.failing.insert(program.into());
        self
    }

    /// Sleep before answering each invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.program).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, StepError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(invocation.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(&invocation.program) {
            Ok(CommandOutput::failed(
                1,
                format!("{}: simulated failure\n", invocation.program),
            ))
        } else {
            Ok(CommandOutput::succeeded(""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_whitespace() {
        let inv = Invocation::new("glance")
            .arg("image-create")
            .arg("--name=My Appliance-1.0-kvm");
        assert_eq!(
            inv.to_string(),
            r#"glance image-create "--name=My Appliance-1.0-kvm""#
        );
    }

    #[test]
    fn value_of_returns_following_argument() {
        let inv = Invocation::new("tar").args(["-x", "-f", "a.tar.gz", "-C", "/tmp/x"]);
        assert_eq!(inv.value_of("-C"), Some("/tmp/x"));
        assert_eq!(inv.value_of("-z"), None);
        assert!(inv.has_arg("-x"));
    }

    #[tokio::test]
    async fn recording_runner_records_and_fails_on_request() {
        let runner = RecordingRunner::new().failing("glance");

        let ok = runner.run(&Invocation::new("curl")).await.unwrap();
        assert!(ok.success);

        let failed = runner.run(&Invocation::new("glance")).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.code, Some(1));

        assert_eq!(runner.programs(), vec!["curl", "glance"]);
    }

    #[tokio::test]
    async fn run_checked_maps_non_zero_exit() {
        let runner = RecordingRunner::new().failing("tar");
        let err = run_checked(&runner, &Invocation::new("tar").arg("-x"))
            .await
            .unwrap_err();
        match err {
            StepError::NonZeroExit { command, status, output } => {
                assert_eq!(command, "tar -x");
                assert_eq!(status, "exit status: 1");
                assert!(output.contains("simulated failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn process_runner_reports_missing_program() {
        let err = ProcessRunner
            .run(&Invocation::new("studio-import-no-such-program"))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Spawn { .. }));
    }
}
