//! Tests for error types

use workflow_leader::core::{
    BatchSystemError, BusError, InsufficientSystemResources, MessageKind, Requirer,
    ResourceAmount, ResourceKind,
};

#[test]
fn test_not_connected_error() {
    assert_eq!(
        BusError::NotConnected.to_string(),
        "cannot send message when not connected to a bus"
    );
}

#[test]
fn test_unsubscribed_type_error() {
    let err = BusError::UnsubscribedType(MessageKind::ClusterSize);
    assert_eq!(err.to_string(), "inbox is not subscribed to cluster_size messages");
}

#[test]
fn test_missing_environment_error() {
    let err = BatchSystemError::MissingEnvironment("HOME_DIR".into());
    assert_eq!(err.to_string(), "HOME_DIR does not exist in current environment");
}

#[test]
fn test_insufficient_resources_is_transparent() {
    let diag = InsufficientSystemResources::new(
        &Requirer::new(0.0, 2048, 0).with_job_name("merge"),
        ResourceKind::Memory,
        Some(ResourceAmount::Bytes(2048)),
        Some(ResourceAmount::Bytes(1024)),
    )
    .with_batch_system("slurm");
    let err = BatchSystemError::from(diag.clone());
    assert_eq!(err.to_string(), diag.to_string());
    assert_eq!(
        err.to_string(),
        "The job merge is requesting 2048 bytes of memory, more than the maximum of \
         1024 bytes of memory that slurm was configured with, or enforced by --maxMemory."
    );
}

#[test]
fn test_accelerator_diagnostic_has_no_flag() {
    let diag = InsufficientSystemResources::new(
        &Requirer::default(),
        ResourceKind::Accelerators,
        Some(ResourceAmount::Accelerators(vec![
            workflow_leader::core::AcceleratorRequirement::new(1, "gpu"),
        ])),
        Some(ResourceAmount::Accelerators(Vec::new())),
    );
    assert_eq!(
        diag.to_string(),
        "Requesting [1 gpu] accelerators, more than the maximum of [] accelerators that \
         this batch system was configured with."
    );
}

#[test]
fn test_io_error_wraps() {
    let err = BatchSystemError::from(std::io::Error::other("disk gone"));
    assert_eq!(err.to_string(), "i/o error: disk gone");
}

#[test]
fn test_every_batch_system_error_has_message() {
    let errors = [
        BatchSystemError::MissingEnvironment("X".into()),
        BatchSystemError::Shutdown,
        BatchSystemError::InvalidConfig("worker_count must be greater than 0".into()),
        BatchSystemError::Io(std::io::Error::other("gone")),
    ];
    for err in &errors {
        let described = match err {
            BatchSystemError::InsufficientResources(_) => "admission",
            BatchSystemError::MissingEnvironment(_) => "environment",
            BatchSystemError::Shutdown => "shutdown",
            BatchSystemError::InvalidConfig(_) => "config",
            BatchSystemError::Io(_) => "io",
        };
        assert!(!described.is_empty());
        assert!(!err.to_string().is_empty());
    }
    assert_eq!(
        BatchSystemError::Shutdown.to_string(),
        "batch system has been shut down"
    );
}
