//! Worker threads of the local batch system.
//!
//! Each worker is a dedicated OS thread with its own single-threaded tokio
//! runtime. Workers block on the task channel; dropping the sender ends them.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::core::batch_system::{BatchJobId, UpdatedBatchJobInfo};
use crate::core::executor::{JobExecutor, JobOutcome, LocalJob};
use crate::core::message::JobUpdated;

use super::{JobState, Shared};

/// Everything one worker thread owns.
pub(super) struct Worker<E: JobExecutor> {
    pub(super) worker_id: usize,
    pub(super) task_rx: Receiver<LocalJob>,
    pub(super) updated_tx: Sender<BatchJobId>,
    pub(super) shared: Arc<Shared>,
    pub(super) executor: E,
}

impl<E: JobExecutor> Worker<E> {
    /// Start the worker on a thread of its own.
    pub(super) fn spawn(self, stack_size: usize) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("leader-worker-{}", self.worker_id))
            .stack_size(stack_size)
            .spawn(move || self.run())
    }

    fn run(self) {
        let worker_id = self.worker_id;
        debug!(worker_id, "worker thread started");

        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(worker_id, error = %e, "failed to create worker runtime");
                return;
            }
        };

        while let Ok(job) = self.task_rx.recv() {
            if !self.shared.wait_until_schedulable() {
                debug!(worker_id, "shutdown while waiting for node, exiting");
                break;
            }

            let job_id = job.batch_job_id;
            let job_store_id = job.description.job_store_id.clone();
            let Some(cancelled) = self.claim(job_id) else {
                debug!(worker_id, job_id, "job was killed before it started");
                continue;
            };

            debug!(worker_id, job_id, "worker running job");
            let started = Instant::now();
            let executor = &self.executor;
            let run = panic::catch_unwind(AssertUnwindSafe(|| {
                rt.block_on(async {
                    tokio::select! {
                        outcome = executor.execute(job) => Some(outcome),
                        _ = cancelled => None,
                    }
                })
            }));
            let wall_time = started.elapsed().as_secs_f64();

            let outcome = match run {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    debug!(worker_id, job_id, "job killed while running");
                    continue;
                }
                Err(_) => {
                    error!(worker_id, job_id, "executor panicked");
                    JobOutcome::error()
                }
            };

            let info = UpdatedBatchJobInfo {
                job_id,
                exit_status: outcome.exit_status,
                exit_reason: Some(outcome.exit_reason),
                wall_time: Some(wall_time),
            };
            if !self.finish(info) {
                debug!(worker_id, job_id, "job killed after it finished, not reporting");
                continue;
            }

            self.shared.publish(JobUpdated {
                job_id: job_store_id,
                result_status: outcome.exit_status,
            });
            if self.updated_tx.send(job_id).is_err() {
                warn!(worker_id, "update channel closed, exiting");
                break;
            }
        }

        debug!(worker_id, "worker thread exiting");
    }

    /// Mark a queued job running. Returns the receiver that fires when the
    /// job is killed, or `None` if it already was.
    fn claim(&self, job_id: BatchJobId) -> Option<oneshot::Receiver<()>> {
        let mut jobs = self.shared.jobs.lock();
        let record = jobs.get_mut(&job_id)?;
        let (cancel, cancelled) = oneshot::channel();
        record.state = JobState::Running {
            started: Instant::now(),
            _cancel: cancel,
        };
        Some(cancelled)
    }

    /// Record a finished job. False if the job was killed meanwhile.
    fn finish(&self, info: UpdatedBatchJobInfo) -> bool {
        let mut jobs = self.shared.jobs.lock();
        let Some(record) = jobs.get_mut(&info.job_id) else {
            return false;
        };
        record.state = JobState::Finished(info);
        true
    }
}
