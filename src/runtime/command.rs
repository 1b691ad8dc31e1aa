//! Shell command executor for the local batch system.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use crate::core::executor::{JobExecutor, JobOutcome, LocalJob};

/// Runs each job's command line through `sh -c`.
///
/// The job environment is layered over the leader's own environment, and
/// standard output and error go to the job's stream paths. Dropping the
/// execution future kills the child process.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
}

impl CommandExecutor {
    /// Executor using `/bin/sh`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shell("/bin/sh")
    }

    /// Executor using another POSIX shell.
    #[must_use]
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    async fn run(&self, job: &LocalJob) -> io::Result<ExitStatus> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&job.description.command)
            .envs(&job.environment)
            .stdin(Stdio::null())
            .stdout(open_stream(&job.stdout_path)?)
            .stderr(open_stream(&job.stderr_path)?)
            .kill_on_drop(true);
        cmd.spawn()?.wait().await
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn open_stream(path: &Path) -> io::Result<Stdio> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(Stdio::from(File::create(path)?))
}

fn outcome_of(status: ExitStatus) -> JobOutcome {
    if let Some(code) = status.code() {
        return JobOutcome::from_exit_status(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal().is_some() {
            return JobOutcome::killed();
        }
    }
    JobOutcome::error()
}

#[async_trait]
impl JobExecutor for CommandExecutor {
    async fn execute(&self, job: LocalJob) -> JobOutcome {
        debug!(
            job_id = job.batch_job_id,
            command = %job.description.command,
            "running job command"
        );
        match self.run(&job).await {
            Ok(status) => outcome_of(status),
            Err(e) => {
                error!(job_id = job.batch_job_id, error = %e, "could not run job command");
                JobOutcome::error()
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::batch_system::{BatchJobExitReason, JobDescription};
    use std::collections::HashMap;

    fn job(dir: &Path, command: &str) -> LocalJob {
        LocalJob {
            batch_job_id: 1,
            description: JobDescription::new("j", "cmd", command),
            environment: HashMap::from([("GREETING".to_string(), "hello".to_string())]),
            stdout_path: dir.join("logs/out.log"),
            stderr_path: dir.join("logs/err.log"),
        }
    }

    #[tokio::test]
    async fn test_exit_code_and_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = CommandExecutor::new()
            .execute(job(dir.path(), "echo $GREETING; exit 3"))
            .await;
        assert_eq!(outcome.exit_status, 3);
        assert_eq!(outcome.exit_reason, BatchJobExitReason::Failed);
        let out = fs::read_to_string(dir.path().join("logs/out.log")).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_signal_maps_to_killed() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = CommandExecutor::new()
            .execute(job(dir.path(), "kill -9 $$"))
            .await;
        assert_eq!(outcome.exit_reason, BatchJobExitReason::Killed);
    }

    #[tokio::test]
    async fn test_missing_shell_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = CommandExecutor::with_shell("/nonexistent/shell")
            .execute(job(dir.path(), "true"))
            .await;
        assert_eq!(outcome.exit_reason, BatchJobExitReason::Error);
    }
}
