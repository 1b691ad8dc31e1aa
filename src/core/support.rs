//! Shared machinery for batch system backends: admission control, the job
//! environment, standard stream paths and worker cleanup.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{BatchSystemConfig, CleanWorkDir, ResourceLimits};
use crate::core::admission::{
    AcceleratorCheck, InsufficientSystemResources, NoAccelerators, ResourceAmount, ResourceKind,
};
use crate::core::batch_system::BatchJobId;
use crate::core::error::BatchSystemError;
use crate::core::requirer::Requirements;

/// Name of the per-workflow cache directory inside the workflow directory.
#[must_use]
pub fn cache_dir_name(workflow_id: &str) -> String {
    format!("cache-{workflow_id}")
}

/// Directory holding a workflow's local files on this machine.
#[must_use]
pub fn local_workflow_dir(workflow_id: &str, work_dir: Option<&Path>) -> PathBuf {
    work_dir
        .map_or_else(env::temp_dir, Path::to_path_buf)
        .join(workflow_id)
}

/// Directory holding a workflow's coordination files on this machine.
#[must_use]
pub fn local_coordination_dir(
    workflow_id: &str,
    work_dir: Option<&Path>,
    coordination_dir: Option<&Path>,
) -> PathBuf {
    coordination_dir.map_or_else(
        || local_workflow_dir(workflow_id, work_dir),
        |dir| dir.join(workflow_id),
    )
}

/// What a node needs to know to clean up after a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCleanupInfo {
    /// Base work directory, if not the system temp dir.
    pub work_dir: Option<PathBuf>,
    /// Coordination directory, if not under the work directory.
    pub coordination_dir: Option<PathBuf>,
    /// Workflow being cleaned up.
    pub workflow_id: String,
    /// Cleanup policy.
    pub clean_work_dir: CleanWorkDir,
}

impl WorkerCleanupInfo {
    /// Cleanup information for the workflow a backend is configured with.
    #[must_use]
    pub fn from_config(config: &BatchSystemConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            coordination_dir: config.coordination_dir.clone(),
            workflow_id: config.workflow_id.clone(),
            clean_work_dir: config.clean_work_dir,
        }
    }

    /// The local workflow directory this info refers to.
    #[must_use]
    pub fn workflow_dir(&self) -> PathBuf {
        local_workflow_dir(&self.workflow_id, self.work_dir.as_deref())
    }

    /// The coordination directory this info refers to.
    #[must_use]
    pub fn coordination_dir(&self) -> PathBuf {
        local_coordination_dir(
            &self.workflow_id,
            self.work_dir.as_deref(),
            self.coordination_dir.as_deref(),
        )
    }
}

/// Clean up a node after the last job of a workflow has run on it.
///
/// The workflow directory is removed only when it is empty or holds nothing
/// but the workflow's cache directory. A separate coordination directory is
/// removed unconditionally. Nothing is removed under [`CleanWorkDir::Never`].
/// Missing directories are not an error, so repeated calls are harmless.
///
/// # Errors
///
/// Filesystem failures other than a directory being absent.
pub fn worker_cleanup(info: &WorkerCleanupInfo) -> Result<(), BatchSystemError> {
    let workflow_dir = info.workflow_dir();
    let coordination_dir = info.coordination_dir();

    if !info.clean_work_dir.removes() {
        debug!(workflow_dir = %workflow_dir.display(), "keeping workflow directory");
        return Ok(());
    }

    let contents = match fs::read_dir(&workflow_dir) {
        Ok(entries) => entries
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<io::Result<Vec<_>>>()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let cache = cache_dir_name(&info.workflow_id);
    if contents.is_empty() || (contents.len() == 1 && contents[0] == cache.as_str()) {
        remove_dir_all_if_present(&workflow_dir)?;
        info!(workflow_dir = %workflow_dir.display(), "removed workflow directory");
    } else {
        debug!(
            workflow_dir = %workflow_dir.display(),
            entries = contents.len(),
            "workflow directory still in use"
        );
    }

    if coordination_dir != workflow_dir {
        remove_dir_all_if_present(&coordination_dir)?;
    }
    Ok(())
}

fn remove_dir_all_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Partial batch system implementation that concrete backends build on.
pub struct BatchSystemSupport {
    name: String,
    config: BatchSystemConfig,
    environment: RwLock<HashMap<String, String>>,
    accelerators: Box<dyn AcceleratorCheck>,
}

impl BatchSystemSupport {
    /// Support for a backend called `name`.
    ///
    /// # Errors
    ///
    /// [`BatchSystemError::InvalidConfig`] if the configuration does not validate.
    pub fn new(name: impl Into<String>, config: BatchSystemConfig) -> Result<Self, BatchSystemError> {
        config.validate().map_err(BatchSystemError::InvalidConfig)?;
        Ok(Self {
            name: name.into(),
            config,
            environment: RwLock::new(HashMap::new()),
            accelerators: Box::new(NoAccelerators),
        })
    }

    /// Replace the accelerator admission hook.
    #[must_use]
    pub fn with_accelerator_check(self, check: impl AcceleratorCheck + 'static) -> Self {
        self.with_boxed_accelerator_check(Box::new(check))
    }

    /// Replace the accelerator admission hook with an already boxed one.
    #[must_use]
    pub fn with_boxed_accelerator_check(mut self, check: Box<dyn AcceleratorCheck>) -> Self {
        self.accelerators = check;
        self
    }

    /// Name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration this backend was built with.
    #[must_use]
    pub const fn config(&self) -> &BatchSystemConfig {
        &self.config
    }

    /// Per-job resource ceilings.
    #[must_use]
    pub const fn limits(&self) -> &ResourceLimits {
        &self.config.limits
    }

    /// Reject a request that exceeds a configured ceiling.
    ///
    /// Cores, memory and disk are checked in that order, then accelerators.
    /// A request exactly at a ceiling is accepted.
    ///
    /// # Errors
    ///
    /// The first shortfall found, annotated with this backend's name and, for
    /// disk, the work directory.
    pub fn check_resource_request<R: Requirements + ?Sized>(
        &self,
        requirer: &R,
    ) -> Result<(), InsufficientSystemResources> {
        self.check_limits(requirer).map_err(|e| self.annotate(e))
    }

    fn check_limits<R: Requirements + ?Sized>(
        &self,
        requirer: &R,
    ) -> Result<(), InsufficientSystemResources> {
        let limits = self.limits();
        if requirer.cores() > limits.max_cores {
            return Err(InsufficientSystemResources::new(
                requirer,
                ResourceKind::Cores,
                Some(ResourceAmount::Cores(requirer.cores())),
                Some(ResourceAmount::Cores(limits.max_cores)),
            ));
        }
        for (resource, requested, available) in [
            (ResourceKind::Memory, requirer.memory(), limits.max_memory),
            (ResourceKind::Disk, requirer.disk(), limits.max_disk),
        ] {
            if requested > available {
                return Err(InsufficientSystemResources::new(
                    requirer,
                    resource,
                    Some(ResourceAmount::Bytes(requested)),
                    Some(ResourceAmount::Bytes(available)),
                ));
            }
        }
        self.accelerators.check_accelerator_request(&AsDyn(requirer))
    }

    fn annotate(&self, mut err: InsufficientSystemResources) -> InsufficientSystemResources {
        err.batch_system = Some(self.name.clone());
        err.source = match err.resource {
            ResourceKind::Disk => Some(
                self.config.work_dir.as_ref().map_or_else(
                    || env::temp_dir().display().to_string(),
                    |dir| dir.display().to_string(),
                ),
            ),
            _ => None,
        };
        err
    }

    /// Record an environment variable for jobs issued from now on.
    ///
    /// # Errors
    ///
    /// [`BatchSystemError::MissingEnvironment`] if `value` is `None` and the
    /// current process environment lacks `name`.
    pub fn set_env(&self, name: &str, value: Option<&str>) -> Result<(), BatchSystemError> {
        let value = match value {
            Some(value) => value.to_owned(),
            None => env::var(name)
                .map_err(|_| BatchSystemError::MissingEnvironment(name.to_owned()))?,
        };
        debug!(name, "setting job environment variable");
        self.environment.write().insert(name.to_owned(), value);
        Ok(())
    }

    /// Snapshot of the job environment, to copy into a job at issue time.
    #[must_use]
    pub fn environment(&self) -> HashMap<String, String> {
        self.environment.read().clone()
    }

    /// Path for a standard stream or other file the backend writes for a job.
    ///
    /// Lands in the base work directory, beside the workflow directory rather
    /// than in it, named after the workflow, the leader's job id and the
    /// backend's own job id. When the configuration discards standard
    /// streams, the null device is returned instead.
    #[must_use]
    pub fn format_std_out_err_path(
        &self,
        job_id: BatchJobId,
        cluster_job_id: &str,
        std: &str,
    ) -> PathBuf {
        if self.config.no_std_out_err {
            return PathBuf::from(null_device());
        }
        let file_name = format!(
            "workflow_{}.{job_id}.{cluster_job_id}.{std}.log",
            self.config.workflow_id
        );
        self.config
            .work_dir
            .clone()
            .unwrap_or_else(env::temp_dir)
            .join(file_name)
    }

    /// Clean up this backend's workflow directories.
    ///
    /// # Errors
    ///
    /// See [`worker_cleanup`].
    pub fn cleanup(&self) -> Result<(), BatchSystemError> {
        let info = WorkerCleanupInfo::from_config(&self.config);
        worker_cleanup(&info).inspect_err(|e| {
            warn!(backend = %self.name, error = %e, "worker cleanup failed");
        })
    }
}

impl std::fmt::Debug for BatchSystemSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSystemSupport")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

const fn null_device() -> &'static str {
    if cfg!(windows) {
        "NUL"
    } else {
        "/dev/null"
    }
}

/// Lets a possibly unsized requirer be passed where `&dyn Requirements` is
/// expected.
struct AsDyn<'a, R: ?Sized>(&'a R);

impl<R: Requirements + ?Sized> Requirements for AsDyn<'_, R> {
    fn cores(&self) -> f64 {
        self.0.cores()
    }

    fn memory(&self) -> u64 {
        self.0.memory()
    }

    fn disk(&self) -> u64 {
        self.0.disk()
    }

    fn accelerators(&self) -> &[crate::core::requirer::AcceleratorRequirement] {
        self.0.accelerators()
    }

    fn job_name(&self) -> Option<&str> {
        self.0.job_name()
    }
}
