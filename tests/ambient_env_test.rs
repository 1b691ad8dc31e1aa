//! Tests that read and change the leader's own process environment.
//!
//! Kept in a binary of their own so no job process is spawned while the
//! environment is being modified.

use async_trait::async_trait;
use workflow_leader::builders::LocalBatchSystemBuilder;
use workflow_leader::config::BatchSystemConfig;
use workflow_leader::core::{BatchSystem, BatchSystemError, JobExecutor, JobOutcome, LocalJob};

#[derive(Clone)]
struct Succeed;

#[async_trait]
impl JobExecutor for Succeed {
    async fn execute(&self, _job: LocalJob) -> JobOutcome {
        JobOutcome::from_exit_status(0)
    }
}

#[test]
fn test_set_env_from_ambient_environment() {
    let bs = LocalBatchSystemBuilder::new(Succeed)
        .with_config(BatchSystemConfig::new().with_no_std_out_err(true))
        .with_worker_count(1)
        .build()
        .unwrap();
    let name = "LEADER_LOCAL_TEST_AMBIENT";

    bs.set_env(name, Some("1")).unwrap();
    std::env::remove_var(name);
    assert!(matches!(
        bs.set_env(name, None),
        Err(BatchSystemError::MissingEnvironment(_))
    ));
    assert_eq!(bs.support().environment()[name], "1");

    std::env::set_var(name, "2");
    bs.set_env(name, None).unwrap();
    assert_eq!(bs.support().environment()[name], "2");
    std::env::remove_var(name);
    bs.shutdown();
}
