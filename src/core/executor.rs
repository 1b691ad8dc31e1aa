//! Job execution trait for the local batch system.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::batch_system::{
    BatchJobExitReason, BatchJobId, JobDescription, EXIT_STATUS_UNAVAILABLE_VALUE,
};

/// A job handed to a [`JobExecutor`] by a worker thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalJob {
    /// Handle the job was issued under.
    pub batch_job_id: BatchJobId,
    /// What to run.
    pub description: JobDescription,
    /// Environment snapshot taken at issue time.
    pub environment: HashMap<String, String>,
    /// Where to write standard output.
    pub stdout_path: PathBuf,
    /// Where to write standard error.
    pub stderr_path: PathBuf,
}

/// How a job ended, as seen by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// Exit status; 0 means success.
    pub exit_status: i32,
    /// Why the job stopped.
    pub exit_reason: BatchJobExitReason,
}

impl JobOutcome {
    /// Outcome of a process that exited with `exit_status`.
    #[must_use]
    pub const fn from_exit_status(exit_status: i32) -> Self {
        let exit_reason = if exit_status == 0 {
            BatchJobExitReason::Finished
        } else {
            BatchJobExitReason::Failed
        };
        Self {
            exit_status,
            exit_reason,
        }
    }

    /// The job could not be run at all.
    #[must_use]
    pub const fn error() -> Self {
        Self {
            exit_status: EXIT_STATUS_UNAVAILABLE_VALUE,
            exit_reason: BatchJobExitReason::Error,
        }
    }

    /// The job was stopped from outside.
    #[must_use]
    pub const fn killed() -> Self {
        Self {
            exit_status: EXIT_STATUS_UNAVAILABLE_VALUE,
            exit_reason: BatchJobExitReason::Killed,
        }
    }

    /// Whether the job succeeded.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_status == 0
    }
}

/// Runs jobs for the local batch system.
///
/// Called on a dedicated worker thread inside that thread's single-threaded
/// tokio runtime, so blocking or CPU-heavy work does not stall the caller's
/// runtime.
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use workflow_leader::core::{JobExecutor, JobOutcome, LocalJob};
///
/// #[derive(Clone)]
/// struct AlwaysSucceeds;
///
/// #[async_trait]
/// impl JobExecutor for AlwaysSucceeds {
///     async fn execute(&self, _job: LocalJob) -> JobOutcome {
///         JobOutcome::from_exit_status(0)
///     }
/// }
/// ```
#[async_trait]
pub trait JobExecutor: Send + Sync + Clone + 'static {
    /// Run `job` to completion and report how it ended.
    async fn execute(&self, job: LocalJob) -> JobOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_exit_status() {
        assert_eq!(
            JobOutcome::from_exit_status(0).exit_reason,
            BatchJobExitReason::Finished
        );
        let failed = JobOutcome::from_exit_status(3);
        assert_eq!(failed.exit_reason, BatchJobExitReason::Failed);
        assert!(!failed.succeeded());
        assert_eq!(JobOutcome::error().exit_status, EXIT_STATUS_UNAVAILABLE_VALUE);
    }
}
