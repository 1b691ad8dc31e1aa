//! Builder that assembles a local batch system from configuration.

use crate::config::{BatchSystemConfig, LocalBatchSystemConfig};
use crate::core::admission::AcceleratorCheck;
use crate::core::batch_system::BatchSystem;
use crate::core::bus::MessageBus;
use crate::core::error::BatchSystemError;
use crate::core::executor::JobExecutor;
use crate::core::local::{LocalBatchSystem, LOCAL_BATCH_SYSTEM_NAME};
use crate::core::support::BatchSystemSupport;

/// Assembles a [`LocalBatchSystem`].
///
/// ```rust,ignore
/// use workflow_leader::builders::LocalBatchSystemBuilder;
/// use workflow_leader::config::BatchSystemConfig;
/// use workflow_leader::runtime::CommandExecutor;
///
/// let batch_system = LocalBatchSystemBuilder::new(CommandExecutor::new())
///     .with_config(BatchSystemConfig::from_env()?)
///     .with_worker_count(4)
///     .with_message_bus(&bus)
///     .build()?;
/// ```
pub struct LocalBatchSystemBuilder<E: JobExecutor> {
    executor: E,
    name: String,
    config: BatchSystemConfig,
    local: LocalBatchSystemConfig,
    accelerators: Option<Box<dyn AcceleratorCheck>>,
    bus: Option<MessageBus>,
}

impl<E: JobExecutor> LocalBatchSystemBuilder<E> {
    /// Builder with default configuration running jobs through `executor`.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            name: LOCAL_BATCH_SYSTEM_NAME.to_owned(),
            config: BatchSystemConfig::default(),
            local: LocalBatchSystemConfig::default(),
            accelerators: None,
            bus: None,
        }
    }

    /// Name the backend reports in diagnostics.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Shared batch system configuration.
    #[must_use]
    pub fn with_config(mut self, config: BatchSystemConfig) -> Self {
        self.config = config;
        self
    }

    /// Local backend configuration.
    #[must_use]
    pub fn with_local_config(mut self, local: LocalBatchSystemConfig) -> Self {
        self.local = local;
        self
    }

    /// Number of worker threads.
    #[must_use]
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.local.worker_count = count;
        self
    }

    /// Accept accelerator requests this hook approves.
    #[must_use]
    pub fn with_accelerator_check(mut self, check: impl AcceleratorCheck + 'static) -> Self {
        self.accelerators = Some(Box::new(check));
        self
    }

    /// Publish job lifecycle messages on `bus`.
    #[must_use]
    pub fn with_message_bus(mut self, bus: &MessageBus) -> Self {
        self.bus = Some(bus.clone());
        self
    }

    /// Validate the configuration and start the backend.
    ///
    /// # Errors
    ///
    /// [`BatchSystemError::InvalidConfig`] if either configuration is
    /// invalid, or [`BatchSystemError::Io`] if worker threads cannot start.
    pub fn build(self) -> Result<LocalBatchSystem<E>, BatchSystemError> {
        let mut support = BatchSystemSupport::new(self.name, self.config)?;
        if let Some(check) = self.accelerators {
            support = support.with_boxed_accelerator_check(check);
        }
        let batch_system = LocalBatchSystem::new(support, self.local, self.executor)?;
        if let Some(bus) = &self.bus {
            batch_system.set_message_bus(bus);
        }
        Ok(batch_system)
    }
}

impl<E: JobExecutor> std::fmt::Debug for LocalBatchSystemBuilder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBatchSystemBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("local", &self.local)
            .field("accelerators", &self.accelerators.is_some())
            .field("bus", &self.bus.is_some())
            .finish_non_exhaustive()
    }
}
