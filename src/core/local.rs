//! Single-machine batch system backed by dedicated worker threads.
//!
//! Jobs are admission-checked against the configured ceilings, queued on a
//! crossbeam channel and run by a fixed set of OS threads, each with its own
//! single-threaded tokio runtime. The machine is reported to the autoscaler
//! as one non-preemptible node.

mod worker;

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{BatchSystemConfig, LocalBatchSystemConfig};
use crate::core::batch_system::{
    BatchJobId, BatchSystem, JobDescription, ScalableBatchSystem, UpdatedBatchJobInfo,
};
use crate::core::bus::MessageBus;
use crate::core::error::BatchSystemError;
use crate::core::executor::{JobExecutor, LocalJob};
use crate::core::inbox::MessageOutbox;
use crate::core::message::{JobIssued, Message};
use crate::core::requirer::NodeInfo;
use crate::core::support::BatchSystemSupport;

use worker::Worker;

/// Name the local backend reports in diagnostics.
pub const LOCAL_BATCH_SYSTEM_NAME: &str = "single_machine";

/// How long shutdown waits for each worker thread before detaching it.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

enum JobState {
    Queued,
    Running {
        started: Instant,
        /// Dropping this cancels the running job.
        _cancel: oneshot::Sender<()>,
    },
    Finished(UpdatedBatchJobInfo),
}

struct JobRecord {
    description: JobDescription,
    state: JobState,
}

/// State shared between the batch system handle and its workers.
struct Shared {
    /// Every issued job not yet collected or killed.
    jobs: Mutex<HashMap<BatchJobId, JobRecord>>,
    /// Whether the local node is ignored.
    ignored: Mutex<bool>,
    node_changed: Condvar,
    shutdown: AtomicBool,
    outbox: RwLock<Option<MessageOutbox>>,
}

impl Shared {
    /// Block while the node is ignored. False once shutdown has begun.
    fn wait_until_schedulable(&self) -> bool {
        let mut ignored = self.ignored.lock();
        while *ignored && !self.shutdown.load(Ordering::Acquire) {
            self.node_changed.wait(&mut ignored);
        }
        !self.shutdown.load(Ordering::Acquire)
    }

    fn set_ignored(&self, ignored: bool) {
        *self.ignored.lock() = ignored;
        self.node_changed.notify_all();
    }

    fn wake_all(&self) {
        let _ignored = self.ignored.lock();
        self.node_changed.notify_all();
    }

    /// Publish an informational message if a bus is attached. Listener
    /// panics are logged and swallowed.
    fn publish(&self, message: impl Into<Message>) {
        let Some(outbox) = self.outbox.read().clone() else {
            return;
        };
        let message = message.into();
        let kind = message.kind();
        match panic::catch_unwind(AssertUnwindSafe(|| outbox.publish(message))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(kind = %kind, error = %e, "could not publish message"),
            Err(_) => warn!(kind = %kind, "message listener panicked"),
        }
    }
}

/// Batch system that runs jobs on this machine.
///
/// `E` decides what running a job means; see
/// [`CommandExecutor`](crate::runtime::CommandExecutor) for shell commands.
pub struct LocalBatchSystem<E: JobExecutor> {
    support: BatchSystemSupport,
    config: LocalBatchSystemConfig,
    shared: Arc<Shared>,
    /// Task sender. `None` once shut down.
    task_tx: Mutex<Option<Sender<LocalJob>>>,
    updated_rx: Receiver<BatchJobId>,
    /// Dropped at shutdown to wake pollers.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_job_id: AtomicU64,
    _executor: PhantomData<fn() -> E>,
}

impl<E: JobExecutor> LocalBatchSystem<E> {
    /// Start a local batch system with `config.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// [`BatchSystemError::InvalidConfig`] for an invalid configuration, or
    /// [`BatchSystemError::Io`] if a worker thread cannot be spawned.
    pub fn new(
        support: BatchSystemSupport,
        config: LocalBatchSystemConfig,
        executor: E,
    ) -> Result<Self, BatchSystemError> {
        config.validate().map_err(BatchSystemError::InvalidConfig)?;

        let (task_tx, task_rx) = unbounded::<LocalJob>();
        let (updated_tx, updated_rx) = unbounded::<BatchJobId>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let shared = Arc::new(Shared {
            jobs: Mutex::new(HashMap::new()),
            ignored: Mutex::new(false),
            node_changed: Condvar::new(),
            shutdown: AtomicBool::new(false),
            outbox: RwLock::new(None),
        });

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker = Worker {
                worker_id,
                task_rx: task_rx.clone(),
                updated_tx: updated_tx.clone(),
                shared: Arc::clone(&shared),
                executor: executor.clone(),
            };
            match worker.spawn(config.thread_stack_size) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shared.shutdown.store(true, Ordering::Release);
                    return Err(e.into());
                }
            }
        }

        info!(
            backend = support.name(),
            workflow_id = %support.config().workflow_id,
            worker_count = config.worker_count,
            max_cores = support.limits().max_cores,
            "local batch system started"
        );

        Ok(Self {
            support,
            config,
            shared,
            task_tx: Mutex::new(Some(task_tx)),
            updated_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            workers: Mutex::new(workers),
            next_job_id: AtomicU64::new(0),
            _executor: PhantomData,
        })
    }

    /// Start a local batch system from its two configuration halves.
    ///
    /// # Errors
    ///
    /// As [`BatchSystemSupport::new`] and [`Self::new`].
    pub fn from_config(
        config: BatchSystemConfig,
        local: LocalBatchSystemConfig,
        executor: E,
    ) -> Result<Self, BatchSystemError> {
        let support = BatchSystemSupport::new(LOCAL_BATCH_SYSTEM_NAME, config)?;
        Self::new(support, local, executor)
    }

    /// Shared support state: limits, environment and paths.
    #[must_use]
    pub const fn support(&self) -> &BatchSystemSupport {
        &self.support
    }

    /// Local backend configuration.
    #[must_use]
    pub const fn local_config(&self) -> &LocalBatchSystemConfig {
        &self.config
    }

    fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    fn queued_count(&self) -> usize {
        self.shared
            .jobs
            .lock()
            .values()
            .filter(|record| matches!(record.state, JobState::Queued))
            .count()
    }

    /// Take a finished job's report, unless it was killed meanwhile.
    fn collect(&self, job_id: BatchJobId) -> Option<UpdatedBatchJobInfo> {
        let mut jobs = self.shared.jobs.lock();
        if !matches!(jobs.get(&job_id)?.state, JobState::Finished(_)) {
            return None;
        }
        match jobs.remove(&job_id)?.state {
            JobState::Finished(info) => Some(info),
            _ => None,
        }
    }

    /// Stop accepting work and wake every blocked thread. Does not join.
    fn signal_shutdown(&self) -> bool {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.task_tx.lock() = None;
        *self.shutdown_tx.lock() = None;
        self.shared.wake_all();
        true
    }
}

impl<E: JobExecutor> BatchSystem for LocalBatchSystem<E> {
    fn supports_auto_deployment(&self) -> bool {
        false
    }

    fn supports_worker_cleanup(&self) -> bool {
        true
    }

    fn set_message_bus(&self, bus: &MessageBus) {
        *self.shared.outbox.write() = Some(bus.outbox());
        debug!(backend = self.support.name(), "attached to message bus");
    }

    fn issue_batch_job(
        &self,
        job: &JobDescription,
        job_environment: Option<&HashMap<String, String>>,
    ) -> Result<BatchJobId, BatchSystemError> {
        if self.is_shut_down() {
            return Err(BatchSystemError::Shutdown);
        }
        self.support.check_resource_request(job)?;

        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let mut environment = self.support.environment();
        if let Some(extra) = job_environment {
            environment.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let cluster_job_id = job_id.to_string();
        let local_job = LocalJob {
            batch_job_id: job_id,
            description: job.clone(),
            environment,
            stdout_path: self
                .support
                .format_std_out_err_path(job_id, &cluster_job_id, "out"),
            stderr_path: self
                .support
                .format_std_out_err_path(job_id, &cluster_job_id, "err"),
        };

        self.shared.jobs.lock().insert(
            job_id,
            JobRecord {
                description: job.clone(),
                state: JobState::Queued,
            },
        );
        let sent = self
            .task_tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(local_job).is_ok());
        if !sent {
            self.shared.jobs.lock().remove(&job_id);
            return Err(BatchSystemError::Shutdown);
        }

        debug!(
            job_id,
            job_name = %job.job_name,
            cores = job.requirements.cores,
            memory = job.requirements.memory,
            "issued job"
        );
        self.shared.publish(JobIssued {
            job_type: job.job_name.clone(),
            job_id: job.job_store_id.clone(),
        });
        Ok(job_id)
    }

    fn kill_batch_jobs(&self, job_ids: &[BatchJobId]) -> Result<(), BatchSystemError> {
        let mut jobs = self.shared.jobs.lock();
        for job_id in job_ids {
            if jobs.remove(job_id).is_some() {
                debug!(job_id, "killed job");
            }
        }
        Ok(())
    }

    fn get_issued_batch_job_ids(&self) -> HashSet<BatchJobId> {
        self.shared
            .jobs
            .lock()
            .iter()
            .filter(|(_, record)| !matches!(record.state, JobState::Finished(_)))
            .map(|(id, _)| *id)
            .collect()
    }

    fn get_running_batch_job_ids(&self) -> HashMap<BatchJobId, f64> {
        self.shared
            .jobs
            .lock()
            .iter()
            .filter_map(|(id, record)| match &record.state {
                JobState::Running { started, .. } => Some((*id, started.elapsed().as_secs_f64())),
                _ => None,
            })
            .collect()
    }

    fn get_updated_batch_job(&self, max_wait: Duration) -> Option<UpdatedBatchJobInfo> {
        // None means the wait is too long to represent; treat it as unbounded.
        let deadline = Instant::now().checked_add(max_wait);
        loop {
            if self.is_shut_down() {
                return None;
            }
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    select! {
                        recv(self.updated_rx) -> job_id => job_id.ok(),
                        recv(self.shutdown_rx) -> _ => None,
                        default(remaining) => None,
                    }
                }
                None => select! {
                    recv(self.updated_rx) -> job_id => job_id.ok(),
                    recv(self.shutdown_rx) -> _ => None,
                },
            };
            let job_id = received?;
            if let Some(info) = self.collect(job_id) {
                return Some(info);
            }
        }
    }

    fn get_scheduling_status_message(&self) -> Option<String> {
        let queued = self.queued_count();
        if queued == 0 {
            return None;
        }
        if *self.shared.ignored.lock() {
            return Some(format!(
                "{queued} jobs are waiting because node {} is being ignored",
                self.config.node_address
            ));
        }
        Some(format!(
            "{queued} jobs are waiting for one of {} local workers",
            self.config.worker_count
        ))
    }

    fn shutdown(&self) {
        if !self.signal_shutdown() {
            return;
        }
        info!(backend = self.support.name(), "shutting down local batch system");

        // Dropping the records cancels whatever is still running.
        self.shared.jobs.lock().clear();

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(WORKER_JOIN_TIMEOUT) {
                Ok(true) => {
                    debug!(worker_id = idx, "worker joined");
                    let _ = joiner.join();
                }
                Ok(false) => {
                    warn!(worker_id = idx, "worker panicked");
                    let _ = joiner.join();
                }
                Err(_) => warn!(worker_id = idx, "worker did not exit within timeout, detaching"),
            }
        }

        let _ = self.support.cleanup();
        info!(worker_count, "local batch system shut down");
    }

    fn set_env(&self, name: &str, value: Option<&str>) -> Result<(), BatchSystemError> {
        self.support.set_env(name, value)
    }
}

impl<E: JobExecutor> ScalableBatchSystem for LocalBatchSystem<E> {
    #[allow(clippy::cast_precision_loss)]
    fn get_nodes(&self, preemptable: Option<bool>, _timeout: Duration) -> HashMap<String, NodeInfo> {
        let mut nodes = HashMap::new();
        if preemptable == Some(true) {
            return nodes;
        }

        let limits = self.support.limits();
        let cores_total = limits.max_cores.min(num_cpus::get() as f64);
        let (requested_cores, requested_memory, workers) = self
            .shared
            .jobs
            .lock()
            .values()
            .filter(|record| matches!(record.state, JobState::Running { .. }))
            .fold((0.0, 0_u64, 0_usize), |(cores, memory, count), record| {
                (
                    cores + record.description.requirements.cores,
                    memory.saturating_add(record.description.requirements.memory),
                    count + 1,
                )
            });

        nodes.insert(
            self.config.node_address.clone(),
            NodeInfo {
                cores_used: (requested_cores / cores_total).min(1.0),
                memory_used: (requested_memory as f64 / limits.max_memory as f64).min(1.0),
                cores_total,
                memory_total: limits.max_memory,
                requested_cores,
                requested_memory,
                workers,
            },
        );
        nodes
    }

    fn node_in_use(&self, node_address: &str) -> bool {
        node_address == self.config.node_address
            && self
                .shared
                .jobs
                .lock()
                .values()
                .any(|record| matches!(record.state, JobState::Running { .. }))
    }

    fn ignore_node(&self, node_address: &str) {
        if node_address == self.config.node_address {
            info!(node_address, "ignoring node");
            self.shared.set_ignored(true);
        }
    }

    fn unignore_node(&self, node_address: &str) {
        if node_address == self.config.node_address {
            info!(node_address, "no longer ignoring node");
            self.shared.set_ignored(false);
        }
    }
}

impl<E: JobExecutor> Drop for LocalBatchSystem<E> {
    fn drop(&mut self) {
        // Signal only; an explicit shutdown() joins workers and cleans up.
        if self.signal_shutdown() {
            self.shared.jobs.lock().clear();
            debug!("local batch system dropped without shutdown, workers detached");
        }
    }
}

impl<E: JobExecutor> std::fmt::Debug for LocalBatchSystem<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBatchSystem")
            .field("support", &self.support)
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::JobOutcome;
    use crate::core::requirer::Requirer;
    use async_trait::async_trait;

    #[derive(Clone)]
    struct ExitWith(i32);

    #[async_trait]
    impl JobExecutor for ExitWith {
        async fn execute(&self, _job: LocalJob) -> JobOutcome {
            JobOutcome::from_exit_status(self.0)
        }
    }

    fn system(workers: usize) -> LocalBatchSystem<ExitWith> {
        let config = BatchSystemConfig::new()
            .with_workflow_id(format!("local-unit-{}", uuid::Uuid::new_v4()))
            .with_max_cores(2.0)
            .with_no_std_out_err(true);
        let local = LocalBatchSystemConfig::new().with_worker_count(workers);
        LocalBatchSystem::from_config(config, local, ExitWith(0)).unwrap()
    }

    #[test]
    fn test_finished_job_reported_once() {
        let bs = system(1);
        let id = bs
            .issue_batch_job(&JobDescription::new("j", "noop", "true"), None)
            .unwrap();

        let info = bs.get_updated_batch_job(Duration::from_secs(5)).unwrap();
        assert_eq!(info.job_id, id);
        assert_eq!(info.exit_status, 0);
        assert!(bs.get_updated_batch_job(Duration::from_millis(50)).is_none());
        assert!(bs.get_issued_batch_job_ids().is_empty());
        bs.shutdown();
    }

    #[test]
    fn test_over_budget_job_rejected() {
        let bs = system(1);
        let job = JobDescription::new("j", "big", "true")
            .with_requirements(Requirer::new(3.0, 0, 0));
        let err = bs.issue_batch_job(&job, None).unwrap_err();
        assert!(matches!(err, BatchSystemError::InsufficientResources(_)));
        assert!(bs.get_issued_batch_job_ids().is_empty());
        bs.shutdown();
    }

    #[test]
    fn test_issue_after_shutdown_fails() {
        let bs = system(1);
        bs.shutdown();
        let err = bs
            .issue_batch_job(&JobDescription::new("j", "late", "true"), None)
            .unwrap_err();
        assert!(matches!(err, BatchSystemError::Shutdown));
        assert!(bs.get_updated_batch_job(Duration::from_secs(5)).is_none());
    }
}
