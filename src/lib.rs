//! # Workflow Leader
//!
//! Coordination core for the leader of a distributed workflow engine.
//!
//! The leader issues jobs to a pluggable batch system, waits for them to
//! finish, and tells its other components (statistics, autoscaler, user
//! reporting) what is happening. This crate provides the two pieces that
//! tie that together.
//!
//! ## Message Bus
//!
//! A typed, in-process publish/subscribe hub. Components subscribe by
//! message kind and receive every later message of that kind, synchronously
//! and in publish order. Buffered inboxes let a consumer drain at its own
//! pace, and a failed drain puts the unhandled messages back.
//!
//! ```rust,ignore
//! use workflow_leader::core::{JobCompleted, MessageBus, MessageKind};
//!
//! let bus = MessageBus::new();
//! let conn = bus.connect(&[MessageKind::JobCompleted]);
//! bus.publish(JobCompleted { job_type: "sort".into(), job_id: "j1".into() });
//!
//! for done in conn.for_each::<JobCompleted>()? {
//!     println!("{} finished", done.job_id);
//! }
//! ```
//!
//! ## Batch Systems
//!
//! [`core::BatchSystem`] is the contract every execution backend meets:
//! issue, kill, poll for finished jobs, set the job environment, shut down.
//! [`core::BatchSystemSupport`] supplies admission control against the
//! configured resource ceilings, along with the environment, log paths and
//! worker cleanup. The local backend runs jobs on dedicated worker threads.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use workflow_leader::builders::LocalBatchSystemBuilder;
//! use workflow_leader::core::{BatchSystem, JobDescription};
//! use workflow_leader::runtime::CommandExecutor;
//!
//! let batch_system = LocalBatchSystemBuilder::new(CommandExecutor::new())
//!     .with_worker_count(4)
//!     .build()?;
//! let id = batch_system.issue_batch_job(&JobDescription::new("j1", "hello", "echo hi"), None)?;
//! let update = batch_system.get_updated_batch_job(Duration::from_secs(30));
//! batch_system.shutdown();
//! ```
//!
//! For complete examples, see:
//! - `tests/bus_test.rs` - Bus and inbox integration tests
//! - `tests/local_batch_system_test.rs` - Local backend integration tests

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core leader abstractions: message bus and batch system contract.
pub mod core;
/// Configuration models for batch system backends.
pub mod config;
/// Builders to construct batch system backends from configuration.
#[cfg(all(feature = "tokio-runtime", not(target_arch = "wasm32")))]
pub mod builders;
/// Infrastructure adapters such as the persisted message log.
pub mod infra;
/// Runtime adapters that execute jobs.
#[cfg(all(feature = "tokio-runtime", not(target_arch = "wasm32")))]
pub mod runtime;
/// Shared utilities.
pub mod util;
