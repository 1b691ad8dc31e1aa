//! Tests for worker cleanup

use std::fs;

use workflow_leader::config::CleanWorkDir;
use workflow_leader::core::{worker_cleanup, WorkerCleanupInfo};

fn info(work_dir: &std::path::Path, policy: CleanWorkDir) -> WorkerCleanupInfo {
    WorkerCleanupInfo {
        work_dir: Some(work_dir.to_path_buf()),
        coordination_dir: None,
        workflow_id: "wf".into(),
        clean_work_dir: policy,
    }
}

#[test]
fn test_cache_only_dir_removed() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("wf/cache-wf")).unwrap();

    worker_cleanup(&info(tmp.path(), CleanWorkDir::Always)).unwrap();
    assert!(!tmp.path().join("wf").exists());
}

#[test]
fn test_dir_with_other_files_kept() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("wf")).unwrap();
    fs::write(tmp.path().join("wf/job.log"), "still here").unwrap();

    worker_cleanup(&info(tmp.path(), CleanWorkDir::OnSuccess)).unwrap();
    assert!(tmp.path().join("wf/job.log").exists());
}

#[test]
fn test_never_policy_keeps_everything() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("wf")).unwrap();

    worker_cleanup(&info(tmp.path(), CleanWorkDir::Never)).unwrap();
    assert!(tmp.path().join("wf").exists());
}

#[test]
fn test_cleanup_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("wf")).unwrap();
    let info = info(tmp.path(), CleanWorkDir::Always);

    worker_cleanup(&info).unwrap();
    worker_cleanup(&info).unwrap();
    assert!(!tmp.path().join("wf").exists());
}

#[test]
fn test_separate_coordination_dir_removed() {
    let tmp = tempfile::tempdir().unwrap();
    let coordination = tmp.path().join("coord");
    fs::create_dir_all(coordination.join("wf")).unwrap();
    fs::create_dir_all(tmp.path().join("work/wf")).unwrap();
    fs::write(tmp.path().join("work/wf/keep.txt"), "x").unwrap();

    let info = WorkerCleanupInfo {
        work_dir: Some(tmp.path().join("work")),
        coordination_dir: Some(coordination.clone()),
        workflow_id: "wf".into(),
        clean_work_dir: CleanWorkDir::OnError,
    };
    worker_cleanup(&info).unwrap();
    assert!(!coordination.join("wf").exists());
    assert!(tmp.path().join("work/wf/keep.txt").exists());
}
