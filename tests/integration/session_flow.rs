//! End-to-end session lifecycle tests
//!
//! Drive every session variant against a real temporary git repository and
//! the in-memory recording backend.

use std::fs;

use easy_experiment::snapshot::{SnapshotError, HASH_FILE, PARAMS_FILE, RUN_COMMAND_FILE};
use easy_experiment::tracking::mock::{BackendCall, RecordingBackend};
use easy_experiment::tracking::{TrackingError, TAG_EXPERIMENT_ID, TAG_GIT_HASH, TAG_SAVE_DIR};
use easy_experiment::{
    ExperimentSession, MetricSet, ParameterSet, RunState, SessionError, SessionOptions,
    SessionVariant, TrackingConfig, UNKNOWN_REVISION,
};
use serde_json::json;
use tempfile::tempdir;

use super::common::git_fixtures::{make_writable, TestRepo};
use super::common::sessions::{
    ops, test_config, test_run_command, tracked_session, tracked_session_with, untracked_session,
};

fn params(value: serde_json::Value) -> ParameterSet {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_local_only_end_to_end() {
    let repo = TestRepo::new();
    let readme = repo.path.join("README.md");

    let mut session = untracked_session(&repo.path, SessionVariant::Local);
    let id = session.start(&[readme.clone()], None).unwrap();
    session.end().unwrap();

    assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());

    let save_dir = repo.path.join("experiments").join(id.as_str());
    let hash = fs::read_to_string(save_dir.join(HASH_FILE)).unwrap();
    assert!(!hash.is_empty());
    assert_eq!(hash, repo.head_sha());
    assert_eq!(
        fs::read(save_dir.join("README.md")).unwrap(),
        fs::read(&readme).unwrap()
    );
    assert_eq!(
        fs::read_to_string(save_dir.join(RUN_COMMAND_FILE)).unwrap(),
        "python train.py --epochs 3"
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for entry in walkdir::WalkDir::new(&save_dir) {
            let entry = entry.unwrap();
            let mode = entry.metadata().unwrap().permissions().mode() & 0o777;
            let expected = if entry.file_type().is_dir() { 0o555 } else { 0o444 };
            assert_eq!(mode, expected, "{}", entry.path().display());
        }
    }
    assert!(fs::metadata(save_dir.join(HASH_FILE))
        .unwrap()
        .permissions()
        .readonly());
}

#[test]
fn test_sealed_directory_rejects_writes() {
    let repo = TestRepo::new();
    let mut session = untracked_session(&repo.path, SessionVariant::Local);
    let id = session.start(&[], None).unwrap();
    let save_dir = repo.path.join("experiments").join(id.as_str());

    #[cfg(unix)]
    {
        let is_root = unsafe { libc::geteuid() == 0 };
        if !is_root {
            assert!(fs::write(save_dir.join("late.txt"), "x").is_err());
            assert!(fs::write(save_dir.join(HASH_FILE), "x").is_err());
        }
    }

    // With no tracking run to receive them, late parameters are an error
    let err = session
        .write_params(&params(json!({"late": true})))
        .unwrap_err();
    assert!(matches!(err, SessionError::Snapshot(SnapshotError::Sealed(_))));
    assert!(!save_dir.join(PARAMS_FILE).exists());
}

#[test]
fn test_parameters_round_trip() {
    let repo = TestRepo::new();
    let mut session = untracked_session(&repo.path, SessionVariant::Local);
    session.write_params(&params(json!({"lr": 0.0}))).unwrap();
    session.write_params(&params(json!({"lr": 0.001}))).unwrap();
    let id = session.start(&[], None).unwrap();

    let path = repo.path.join("experiments").join(id.as_str()).join(PARAMS_FILE);
    let read: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(read, json!({"lr": 0.001}));
}

#[test]
fn test_revision_outside_repository_is_unknown() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("train.py");
    fs::write(&source, "print('x')\n").unwrap();

    let mut session = untracked_session(dir.path(), SessionVariant::Local);
    let id = session.start(&[source], None).unwrap();

    let save_dir = dir.path().join("experiments").join(id.as_str());
    assert_eq!(
        fs::read_to_string(save_dir.join(HASH_FILE)).unwrap(),
        UNKNOWN_REVISION
    );
    make_writable(dir.path());
}

#[test]
fn test_autocommit_outside_repository_records_unknown_revision() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("train.py");
    fs::write(&source, "print('x')\n").unwrap();

    let mut session = untracked_session(dir.path(), SessionVariant::LocalAutoCommit);
    let id = session.start(&[source.clone()], None).unwrap();

    let save_dir = dir.path().join("experiments").join(id.as_str());
    assert_eq!(
        fs::read_to_string(save_dir.join(HASH_FILE)).unwrap(),
        UNKNOWN_REVISION
    );
    assert_eq!(fs::read(save_dir.join("train.py")).unwrap(), fs::read(&source).unwrap());
    make_writable(dir.path());
}

#[test]
fn test_autocommit_on_clean_tree_is_noop() {
    let repo = TestRepo::new();
    let branch = repo.current_branch();
    let head = repo.head_sha();

    let mut session = untracked_session(&repo.path, SessionVariant::LocalAutoCommit);
    session.start(&[], None).unwrap();

    assert_eq!(repo.head_sha(), head);
    assert_eq!(repo.current_branch(), branch);
    assert!(!repo.branches().iter().any(|b| b == "experiments"));
}

#[test]
fn test_autocommit_moves_experiments_branch() {
    let repo = TestRepo::with_uncommitted_changes();
    let original_branch = repo.current_branch();

    let mut session = untracked_session(&repo.path, SessionVariant::LocalAutoCommit);
    let id = session.start(&[repo.path.join("dirty.txt")], None).unwrap();

    assert_eq!(repo.current_branch(), "experiments");
    assert_eq!(repo.last_commit_message(), id.as_str());
    // The commit lands on the original branch, experiments is only repointed
    assert_eq!(repo.branch_sha(&original_branch), repo.head_sha());
    assert_eq!(repo.commit_count(), 2);

    let hash = fs::read_to_string(
        repo.path
            .join("experiments")
            .join(id.as_str())
            .join(HASH_FILE),
    )
    .unwrap();
    assert_eq!(hash, repo.head_sha());
}

#[test]
fn test_autocommit_already_on_experiments_branch() {
    let repo = TestRepo::with_branches(&["experiments"]);
    repo.checkout("experiments");
    repo.create_file("model.py", "x = 1\n");

    let mut session = untracked_session(&repo.path, SessionVariant::LocalAutoCommit);
    session.start(&[], Some("tune")).unwrap();

    assert_eq!(repo.current_branch(), "experiments");
    assert_eq!(repo.last_commit_message(), "tune");
    assert_eq!(repo.commit_count(), 2);
}

#[test]
fn test_cloud_only_end_to_end() {
    let repo = TestRepo::with_uncommitted_changes();

    let (mut session, calls) = tracked_session(&repo.path, SessionVariant::CloudOnly);
    let id = session.start(&[], None).unwrap();
    session.end().unwrap();

    // Auto-commit ran before anything reached the backend
    assert_eq!(repo.last_commit_message(), id.as_str());
    assert!(!repo.is_dirty());
    assert!(!repo.path.join("experiments").exists());
    assert_eq!(session.save_dir(), None);

    let calls = calls.lock();
    let start = calls
        .iter()
        .position(|c| matches!(c, BackendCall::StartRun { .. }))
        .unwrap();
    let git_hash = calls
        .iter()
        .position(|c| {
            matches!(c, BackendCall::LogArtifact { path, .. } if path.ends_with("git_hash.txt"))
        })
        .unwrap();
    assert!(start < git_hash);

    let BackendCall::LogArtifact { contents, .. } = &calls[git_hash] else {
        unreachable!();
    };
    assert_eq!(contents.as_deref(), Some(repo.head_sha().as_bytes()));

    let BackendCall::SetTags(tags) = &calls[start + 1] else {
        panic!("expected tags after run start");
    };
    assert_eq!(tags[TAG_EXPERIMENT_ID], id.as_str());
    assert_eq!(tags[TAG_GIT_HASH], repo.head_sha());
    assert!(!tags.contains_key(TAG_SAVE_DIR));
}

#[test]
fn test_cloud_only_params_never_touch_disk() {
    let repo = TestRepo::new();
    let (mut session, calls) = tracked_session(&repo.path, SessionVariant::CloudOnly);
    let before = params(json!({"batch": 32}));
    session.write_params(&before).unwrap();
    session.start(&[], None).unwrap();
    let after = params(json!({"epochs": 10}));
    session.write_params(&after).unwrap();
    session.end().unwrap();

    assert!(!repo.path.join("experiments").exists());
    let calls = calls.lock();
    assert!(calls.contains(&BackendCall::LogParams(before)));
    assert!(calls.contains(&BackendCall::LogParams(after)));
}

#[test]
fn test_local_tracking_mirrors_snapshot() {
    let repo = TestRepo::new();
    let source = repo.create_file("train.py", "print('train')\n");

    let options = SessionOptions::new(SessionVariant::LocalTracking).with_experiment_id("run-a");
    let (mut session, calls) =
        tracked_session_with(&repo.path, options, RecordingBackend::new());
    session.write_params(&params(json!({"lr": 0.01}))).unwrap();
    session.start(&[source], None).unwrap();
    assert_eq!(session.tracking_state(), RunState::Active);

    let mut metrics = MetricSet::new();
    metrics.insert("loss".into(), 0.25);
    session.log_metrics(&metrics, Some(1)).unwrap();
    session
        .log_artifact(b"confusion".as_slice(), Some("plots"), Some("cm.txt"))
        .unwrap();
    session.end().unwrap();
    session.end().unwrap();
    assert_eq!(session.tracking_state(), RunState::Inactive);

    assert_eq!(
        ops(&calls),
        vec![
            "start_run",
            "set_tags",
            "log_artifacts",
            "log_params",
            "log_params",
            "log_artifact",
            "log_metrics",
            "log_artifact",
            "end_run",
        ]
    );

    let calls = calls.lock();
    let BackendCall::SetTags(tags) = &calls[1] else {
        panic!("expected tags");
    };
    let save_dir = repo.path.join("experiments").join("run-a");
    assert_eq!(tags[TAG_SAVE_DIR], save_dir.display().to_string());

    let BackendCall::LogArtifacts { files, .. } = &calls[2] else {
        panic!("expected snapshot upload");
    };
    assert_eq!(
        files,
        &vec![
            HASH_FILE.to_string(),
            PARAMS_FILE.to_string(),
            RUN_COMMAND_FILE.to_string(),
            "train.py".to_string(),
        ]
    );
}

#[test]
fn test_tracking_without_uri_is_rejected() {
    let repo = TestRepo::new();
    for variant in [SessionVariant::LocalTracking, SessionVariant::CloudOnly] {
        let err = ExperimentSession::new(test_config(&repo.path), SessionOptions::new(variant))
            .unwrap_err();
        assert!(
            matches!(err, SessionError::Tracking(TrackingError::MissingTrackingUri)),
            "{}: {:?}",
            variant,
            err
        );
    }
    assert!(!repo.path.join("experiments").exists());
}

#[test]
fn test_tracking_turned_off_runs_untracked() {
    let repo = TestRepo::new();
    let config = test_config(&repo.path).with_tracking(TrackingConfig::disabled());
    let options = SessionOptions::new(SessionVariant::LocalTracking)
        .with_run_command(test_run_command());
    let mut session = ExperimentSession::new(config, options).unwrap();
    assert_eq!(session.tracking_state(), RunState::Disabled);

    let id = session.start(&[], None).unwrap();
    assert_eq!(session.tracking_run_id(), None);
    session.end().unwrap();
    assert!(repo
        .path
        .join("experiments")
        .join(id.as_str())
        .join(HASH_FILE)
        .exists());
}

#[test]
fn test_second_session_with_same_id_fails() {
    let repo = TestRepo::new();
    let options = SessionOptions::new(SessionVariant::Local).with_experiment_id("fixed");
    let (mut first, _) = tracked_session_with(&repo.path, options, RecordingBackend::new());
    first.start(&[], None).unwrap();

    let options = SessionOptions::new(SessionVariant::Local).with_experiment_id("fixed");
    let err = ExperimentSession::new(test_config(&repo.path), options).unwrap_err();
    assert!(matches!(err, SessionError::Snapshot(_)));
}
