//! Tests for builders

use workflow_leader::builders::LocalBatchSystemBuilder;
use workflow_leader::config::BatchSystemConfig;
use workflow_leader::core::{BatchSystem, BatchSystemError};
use workflow_leader::runtime::CommandExecutor;

#[test]
fn test_build_rejects_zero_workers() {
    let result = LocalBatchSystemBuilder::new(CommandExecutor::new())
        .with_worker_count(0)
        .build();
    assert!(matches!(result, Err(BatchSystemError::InvalidConfig(_))));
}

#[test]
fn test_build_rejects_invalid_config() {
    let result = LocalBatchSystemBuilder::new(CommandExecutor::new())
        .with_config(BatchSystemConfig::new().with_workflow_id(""))
        .build();
    assert!(matches!(result, Err(BatchSystemError::InvalidConfig(_))));
}

#[test]
fn test_build_with_custom_name() {
    let bs = LocalBatchSystemBuilder::new(CommandExecutor::new())
        .with_name("workstation")
        .with_config(BatchSystemConfig::new().with_no_std_out_err(true))
        .with_worker_count(1)
        .build()
        .unwrap();
    assert_eq!(bs.support().name(), "workstation");
    assert!(bs.supports_worker_cleanup());
    assert!(!bs.supports_auto_deployment());
    bs.shutdown();
}
