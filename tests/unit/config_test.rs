//! Tests for configuration validation

use workflow_leader::config::{BatchSystemConfig, CleanWorkDir, LocalBatchSystemConfig, ResourceLimits};

#[test]
fn test_default_limits_use_cpu_count() {
    let limits = ResourceLimits::default();
    assert!(limits.max_cores >= 1.0);
    assert_eq!(limits.max_memory, u64::MAX);
    assert_eq!(limits.max_disk, u64::MAX);
    assert!(limits.validate().is_ok());
}

#[test]
fn test_limits_invalid_values() {
    let mut limits = ResourceLimits::default();
    limits.max_cores = f64::NAN;
    assert!(limits.validate().is_err());

    let mut limits = ResourceLimits::default();
    limits.max_memory = 0;
    assert!(limits.validate().is_err());
}

#[test]
fn test_workflow_ids_are_unique() {
    assert_ne!(
        BatchSystemConfig::new().workflow_id,
        BatchSystemConfig::new().workflow_id
    );
}

#[test]
fn test_builder_methods() {
    let config = BatchSystemConfig::new()
        .with_workflow_id("wf")
        .with_work_dir("/scratch")
        .with_coordination_dir("/run/leader")
        .with_clean_work_dir(CleanWorkDir::OnError)
        .with_max_cores(8.0)
        .with_max_memory(16)
        .with_max_disk(32);
    assert_eq!(config.work_dir.as_deref(), Some(std::path::Path::new("/scratch")));
    assert_eq!(config.clean_work_dir, CleanWorkDir::OnError);
    assert_eq!(config.limits.max_memory, 16);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_json_round_trip() {
    let config = BatchSystemConfig::new().with_workflow_id("wf").with_max_cores(2.5);
    let json = serde_json::to_string(&config).unwrap();
    let parsed = BatchSystemConfig::from_json_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_config_json_rejects_bad_policy() {
    assert!(BatchSystemConfig::from_json_str(r#"{"clean_work_dir":"sometimes"}"#).is_err());
}

#[test]
fn test_from_env_reads_leader_variables() {
    std::env::set_var("LEADER_WORKFLOW_ID", "wf-from-env");
    std::env::set_var("LEADER_MAX_CORES", "3");
    std::env::set_var("LEADER_CLEAN_WORK_DIR", "onSuccess");
    let config = BatchSystemConfig::from_env();
    std::env::remove_var("LEADER_WORKFLOW_ID");
    std::env::remove_var("LEADER_MAX_CORES");
    std::env::remove_var("LEADER_CLEAN_WORK_DIR");

    let config = config.unwrap();
    assert_eq!(config.workflow_id, "wf-from-env");
    assert!((config.limits.max_cores - 3.0).abs() < f64::EPSILON);
    assert_eq!(config.clean_work_dir, CleanWorkDir::OnSuccess);
}

#[test]
fn test_local_config_defaults() {
    let local = LocalBatchSystemConfig::new();
    assert!(local.worker_count >= 1);
    assert_eq!(local.node_address, "127.0.0.1");
    assert!(local.with_node_address("").validate().is_err());
}
