//! Configuration models for batch system backends.

pub mod batch;

pub use batch::{BatchSystemConfig, CleanWorkDir, LocalBatchSystemConfig, ResourceLimits};
