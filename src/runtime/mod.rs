//! Runtime adapters that execute jobs for the local batch system.

pub mod command;

pub use command::CommandExecutor;
