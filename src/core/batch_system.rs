//! The contract every job-execution backend implements.
//!
//! Backends range from grid schedulers to cloud fleets to local process
//! pools. The scheduler depends only on [`BatchSystem`]; backends that manage
//! their own elastic node fleet also implement [`ScalableBatchSystem`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bus::MessageBus;
use crate::core::error::BatchSystemError;
use crate::core::requirer::{AcceleratorRequirement, NodeInfo, Requirements, Requirer};

/// Backend-unique handle for an issued job.
pub type BatchJobId = u64;

/// Exit status reported when the real status cannot be obtained.
pub const EXIT_STATUS_UNAVAILABLE_VALUE: i32 = 255;

/// Why a job stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BatchJobExitReason {
    /// Finished successfully.
    Finished = 1,
    /// Finished, but failed.
    Failed = 2,
    /// The executing host went away, typically preemptible capacity.
    Lost = 3,
    /// Killed before finishing.
    Killed = 4,
    /// Internal error.
    Error = 5,
    /// Hit a memory limit imposed by the batch system.
    MemLimit = 6,
}

impl BatchJobExitReason {
    /// Every exit reason, in code order.
    pub const ALL: [Self; 6] = [
        Self::Finished,
        Self::Failed,
        Self::Lost,
        Self::Killed,
        Self::Error,
        Self::MemLimit,
    ];

    /// Stable identifier for statistics and reporting.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Lost => "lost",
            Self::Killed => "killed",
            Self::Error => "error",
            Self::MemLimit => "mem_limit",
        }
    }

    /// Stable numeric code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Reason for a numeric code, if it is one.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.code() == code)
    }
}

impl fmt::Display for BatchJobExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job that stopped running, as reported by [`BatchSystem::get_updated_batch_job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedBatchJobInfo {
    /// Handle returned when the job was issued.
    pub job_id: BatchJobId,
    /// Exit status; 0 means success. [`EXIT_STATUS_UNAVAILABLE_VALUE`] when
    /// the status is unknown, e.g. the job was lost.
    pub exit_status: i32,
    /// Why the job stopped, if the backend can tell.
    pub exit_reason: Option<BatchJobExitReason>,
    /// Wall-clock seconds the job ran for, if tracked.
    pub wall_time: Option<f64>,
}

/// A unit of work to hand to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    /// The job store ID of the job.
    pub job_store_id: String,
    /// The kind of job, for statistics and diagnostics.
    pub job_name: String,
    /// Command line the worker runs.
    pub command: String,
    /// Resources the job needs.
    pub requirements: Requirer,
}

impl JobDescription {
    /// Describe a job with no resource requirements.
    pub fn new(
        job_store_id: impl Into<String>,
        job_name: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            job_store_id: job_store_id.into(),
            job_name: job_name.into(),
            command: command.into(),
            requirements: Requirer::default(),
        }
    }

    /// Set the resources the job needs.
    #[must_use]
    pub fn with_requirements(mut self, requirements: Requirer) -> Self {
        self.requirements = requirements;
        self
    }
}

impl Requirements for JobDescription {
    fn cores(&self) -> f64 {
        self.requirements.cores
    }

    fn memory(&self) -> u64 {
        self.requirements.memory
    }

    fn disk(&self) -> u64 {
        self.requirements.disk
    }

    fn accelerators(&self) -> &[AcceleratorRequirement] {
        &self.requirements.accelerators
    }

    fn job_name(&self) -> Option<&str> {
        Some(&self.job_name)
    }
}

/// Interface a job-execution backend provides to the leader.
///
/// Methods take `&self`: submission, polling and kills may come from
/// different threads, so implementations synchronize internally.
pub trait BatchSystem: Send + Sync {
    /// Whether the backend can deploy the user's workflow code itself.
    fn supports_auto_deployment(&self) -> bool;

    /// Whether the backend runs worker cleanup after the last job of a
    /// workflow finishes on a node.
    fn supports_worker_cleanup(&self) -> bool;

    /// Let the backend publish informational messages onto the bus.
    fn set_message_bus(&self, _bus: &MessageBus) {}

    /// Submit one job and return its handle.
    ///
    /// `job_environment` holds job-specific variables layered over those set
    /// with [`Self::set_env`].
    ///
    /// # Errors
    ///
    /// [`BatchSystemError::InsufficientResources`] if the job is over budget
    /// for this backend, or a backend failure.
    fn issue_batch_job(
        &self,
        job: &JobDescription,
        job_environment: Option<&HashMap<String, String>>,
    ) -> Result<BatchJobId, BatchSystemError>;

    /// Best-effort cancellation. Once this returns, none of `job_ids` is
    /// reported as running or updated again.
    ///
    /// # Errors
    ///
    /// Backend failures talking to the underlying system.
    fn kill_batch_jobs(&self, job_ids: &[BatchJobId]) -> Result<(), BatchSystemError>;

    /// Jobs issued and not yet finished, waiting or running.
    fn get_issued_batch_job_ids(&self) -> HashSet<BatchJobId>;

    /// Jobs executing right now, with seconds they have been running.
    fn get_running_batch_job_ids(&self) -> HashMap<BatchJobId, f64>;

    /// Wait up to `max_wait` for a job to stop running.
    ///
    /// Each finished job is returned exactly once; killed jobs never are.
    /// Returns `None` on timeout, and promptly after shutdown.
    fn get_updated_batch_job(&self, max_wait: Duration) -> Option<UpdatedBatchJobInfo>;

    /// User-directed hint about why scheduling may be stalled.
    fn get_scheduling_status_message(&self) -> Option<String> {
        None
    }

    /// Stop worker threads and connections. Already issued jobs need not be
    /// killed.
    fn shutdown(&self);

    /// Set an environment variable for jobs issued after this call.
    ///
    /// Without `value`, the caller's current value of `name` is copied.
    ///
    /// # Errors
    ///
    /// [`BatchSystemError::MissingEnvironment`] if `value` is `None` and the
    /// caller's environment does not define `name`.
    fn set_env(&self, name: &str, value: Option<&str>) -> Result<(), BatchSystemError>;
}

/// A batch system with a variable number of worker nodes, driven by the
/// cluster autoscaler.
pub trait ScalableBatchSystem: BatchSystem {
    /// Nodes by address. `Some(true)` / `Some(false)` restrict to preemptible
    /// / non-preemptible nodes; `None` returns all.
    fn get_nodes(&self, preemptable: Option<bool>, timeout: Duration) -> HashMap<String, NodeInfo>;

    /// Whether the node at `node_address` is running any jobs. False for
    /// unknown nodes.
    fn node_in_use(&self, node_address: &str) -> bool;

    /// Stop sending new work to a node so it can drain before termination.
    fn ignore_node(&self, node_address: &str);

    /// Stop ignoring an address, e.g. after the node behind it was
    /// terminated and a new node may reuse it.
    fn unignore_node(&self, node_address: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_codes_are_stable() {
        let codes: Vec<u8> = BatchJobExitReason::ALL.iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(BatchJobExitReason::from_code(6), Some(BatchJobExitReason::MemLimit));
        assert_eq!(BatchJobExitReason::from_code(0), None);
    }

    #[test]
    fn test_exit_reason_serializes_as_identifier() {
        for reason in BatchJobExitReason::ALL {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_job_description_exposes_requirements() {
        let job = JobDescription::new("j1", "sort", "true")
            .with_requirements(Requirer::new(2.0, 100, 200));
        assert_eq!(Requirements::job_name(&job), Some("sort"));
        assert_eq!(job.memory(), 100);
        assert_eq!(job.disk(), 200);
    }
}
