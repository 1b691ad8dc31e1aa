//! Builders to construct batch system backends from configuration.

pub mod batch_builder;

pub use batch_builder::LocalBatchSystemBuilder;
