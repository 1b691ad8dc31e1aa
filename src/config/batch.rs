//! Batch system and local backend configuration.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::error::AppResult;

/// When the per-workflow local directory is removed after the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanWorkDir {
    /// Always remove it.
    #[default]
    Always,
    /// Remove it when the workflow succeeded.
    OnSuccess,
    /// Remove it when the workflow failed.
    OnError,
    /// Keep it.
    Never,
}

impl CleanWorkDir {
    /// Whether this policy may remove anything at all.
    #[must_use]
    pub const fn removes(self) -> bool {
        !matches!(self, Self::Never)
    }
}

impl fmt::Display for CleanWorkDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Always => "always",
            Self::OnSuccess => "onSuccess",
            Self::OnError => "onError",
            Self::Never => "never",
        })
    }
}

impl FromStr for CleanWorkDir {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(Self::Always),
            "onSuccess" | "on_success" => Ok(Self::OnSuccess),
            "onError" | "on_error" => Ok(Self::OnError),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown clean_work_dir policy: {other}")),
        }
    }
}

/// Per-job resource ceilings a backend is configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Largest number of cores one job may request.
    pub max_cores: f64,
    /// Largest memory one job may request, in bytes.
    pub max_memory: u64,
    /// Largest disk one job may request, in bytes.
    pub max_disk: u64,
}

impl Default for ResourceLimits {
    #[allow(clippy::cast_precision_loss)]
    fn default() -> Self {
        Self {
            max_cores: num_cpus::get() as f64,
            max_memory: u64::MAX,
            max_disk: u64::MAX,
        }
    }
}

impl ResourceLimits {
    /// Validate limit values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if !self.max_cores.is_finite() || self.max_cores <= 0.0 {
            return Err("max_cores must be a positive number".into());
        }
        if self.max_memory == 0 {
            return Err("max_memory must be greater than 0".into());
        }
        if self.max_disk == 0 {
            return Err("max_disk must be greater than 0".into());
        }
        Ok(())
    }
}

/// Configuration shared by every batch system backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSystemConfig {
    /// Identifier of the running workflow.
    pub workflow_id: String,
    /// Base directory for per-workflow local files. System temp dir if unset.
    pub work_dir: Option<PathBuf>,
    /// Directory for coordination files. The workflow directory if unset.
    pub coordination_dir: Option<PathBuf>,
    /// When to remove the local workflow directory.
    pub clean_work_dir: CleanWorkDir,
    /// Send job stdout/stderr to the null device instead of log files.
    pub no_std_out_err: bool,
    /// Per-job resource ceilings.
    pub limits: ResourceLimits,
}

impl Default for BatchSystemConfig {
    fn default() -> Self {
        Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            work_dir: None,
            coordination_dir: None,
            clean_work_dir: CleanWorkDir::default(),
            no_std_out_err: false,
            limits: ResourceLimits::default(),
        }
    }
}

impl BatchSystemConfig {
    /// Default configuration with a fresh workflow id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the workflow id.
    #[must_use]
    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = workflow_id.into();
        self
    }

    /// Set the base work directory.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Set the coordination directory.
    #[must_use]
    pub fn with_coordination_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.coordination_dir = Some(dir.into());
        self
    }

    /// Set the work directory cleanup policy.
    #[must_use]
    pub const fn with_clean_work_dir(mut self, policy: CleanWorkDir) -> Self {
        self.clean_work_dir = policy;
        self
    }

    /// Discard job stdout/stderr.
    #[must_use]
    pub const fn with_no_std_out_err(mut self, no_std_out_err: bool) -> Self {
        self.no_std_out_err = no_std_out_err;
        self
    }

    /// Set the core ceiling.
    #[must_use]
    pub const fn with_max_cores(mut self, max_cores: f64) -> Self {
        self.limits.max_cores = max_cores;
        self
    }

    /// Set the memory ceiling in bytes.
    #[must_use]
    pub const fn with_max_memory(mut self, max_memory: u64) -> Self {
        self.limits.max_memory = max_memory;
        self
    }

    /// Set the disk ceiling in bytes.
    #[must_use]
    pub const fn with_max_disk(mut self, max_disk: u64) -> Self {
        self.limits.max_disk = max_disk;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.workflow_id.trim().is_empty() {
            return Err("workflow_id must not be empty".into());
        }
        if self.workflow_id.contains(std::path::is_separator) {
            return Err("workflow_id must not contain path separators".into());
        }
        self.limits.validate()
    }

    /// Parse a JSON configuration document. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns the decoder error for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Build configuration from `LEADER_*` environment variables, loading a
    /// `.env` file first if one is present.
    ///
    /// Recognized: `LEADER_WORKFLOW_ID`, `LEADER_WORK_DIR`,
    /// `LEADER_COORDINATION_DIR`, `LEADER_CLEAN_WORK_DIR`,
    /// `LEADER_NO_STD_OUT_ERR`, `LEADER_MAX_CORES`, `LEADER_MAX_MEMORY`,
    /// `LEADER_MAX_DISK`.
    ///
    /// # Errors
    ///
    /// Fails when a variable is present but cannot be parsed, or the result
    /// does not validate.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        if let Some(id) = var("LEADER_WORKFLOW_ID") {
            config.workflow_id = id;
        }
        if let Some(dir) = var("LEADER_WORK_DIR") {
            config.work_dir = Some(dir.into());
        }
        if let Some(dir) = var("LEADER_COORDINATION_DIR") {
            config.coordination_dir = Some(dir.into());
        }
        if let Some(policy) = var("LEADER_CLEAN_WORK_DIR") {
            config.clean_work_dir = policy.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(flag) = var("LEADER_NO_STD_OUT_ERR") {
            config.no_std_out_err = flag
                .parse()
                .with_context(|| format!("LEADER_NO_STD_OUT_ERR={flag}"))?;
        }
        if let Some(cores) = var("LEADER_MAX_CORES") {
            config.limits.max_cores = cores
                .parse()
                .with_context(|| format!("LEADER_MAX_CORES={cores}"))?;
        }
        if let Some(memory) = var("LEADER_MAX_MEMORY") {
            config.limits.max_memory = memory
                .parse()
                .with_context(|| format!("LEADER_MAX_MEMORY={memory}"))?;
        }
        if let Some(disk) = var("LEADER_MAX_DISK") {
            config.limits.max_disk = disk
                .parse()
                .with_context(|| format!("LEADER_MAX_DISK={disk}"))?;
        }

        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Configuration of the local, thread-backed batch system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalBatchSystemConfig {
    /// Number of worker threads, i.e. jobs run concurrently.
    pub worker_count: usize,
    /// Stack size for each worker thread, in bytes.
    pub thread_stack_size: usize,
    /// Address the single local node is reported under.
    pub node_address: String,
}

impl Default for LocalBatchSystemConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            thread_stack_size: 2 * 1024 * 1024,
            node_address: "127.0.0.1".into(),
        }
    }
}

impl LocalBatchSystemConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Set the address the local node is reported under.
    #[must_use]
    pub fn with_node_address(mut self, address: impl Into<String>) -> Self {
        self.node_address = address.into();
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64KB".into());
        }
        if self.node_address.is_empty() {
            return Err("node_address must not be empty".into());
        }
        Ok(())
    }
}
