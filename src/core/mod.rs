//! Core leader abstractions: the message bus and the batch system contract.

pub mod admission;
pub mod batch_system;
pub mod bus;
pub mod error;
pub mod executor;
pub mod inbox;
pub mod message;
pub mod requirer;
pub mod support;

#[cfg(all(feature = "tokio-runtime", not(target_arch = "wasm32")))]
pub mod local;

pub use admission::{
    AcceleratorCheck, AcceleratorInventory, InsufficientSystemResources, NoAccelerators,
    ResourceAmount, ResourceKind,
};
pub use batch_system::{
    BatchJobExitReason, BatchJobId, BatchSystem, JobDescription, ScalableBatchSystem,
    UpdatedBatchJobInfo, EXIT_STATUS_UNAVAILABLE_VALUE,
};
pub use bus::{Handler, MessageBus, Subscription};
pub use error::{AppResult, BatchSystemError, BusError, MessageLogError};
pub use executor::{JobExecutor, JobOutcome, LocalJob};
pub use inbox::{Drain, MessageBusConnection, MessageInbox, MessageOutbox};
pub use message::{
    BusMessage, ClusterDesiredSize, ClusterSize, JobCompleted, JobFailed, JobIssued, JobMissing,
    JobUpdated, Message, MessageKind, QueueSize,
};
pub use requirer::{AcceleratorRequirement, NodeInfo, Requirements, Requirer};
pub use support::{worker_cleanup, BatchSystemSupport, WorkerCleanupInfo};

#[cfg(all(feature = "tokio-runtime", not(target_arch = "wasm32")))]
pub use local::{LocalBatchSystem, LOCAL_BATCH_SYSTEM_NAME};
