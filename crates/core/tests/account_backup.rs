use std::cell::Cell;
use std::sync::Mutex;
use std::sync::atomic::Ordering;

use streamsnap_core::model::{ConsumerConfig, ConsumerSnapshot, StorageType, StreamConfig};
use streamsnap_core::{
    AccountBackupConfig, AccountBackupOptions, AssumeNo, AssumeYes, BackupStatus, Confirm, Error,
    ErrorKind, InMemoryService, MANIFEST_FILE, Outcome, ProgressSink, RunEvent, load_manifest,
    run_account_backup, run_account_backup_with,
};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<RunEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, event: &RunEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
struct CountingGate {
    calls: Cell<usize>,
}

impl Confirm for CountingGate {
    fn confirm(&self, _prompt: &str, _default: bool) -> streamsnap_core::Result<bool> {
        self.calls.set(self.calls.get() + 1);
        Ok(true)
    }
}

struct BrokenGate;

impl Confirm for BrokenGate {
    fn confirm(&self, _prompt: &str, _default: bool) -> streamsnap_core::Result<bool> {
        Err(Error::Confirmation {
            message: "not a terminal".to_string(),
        })
    }
}

async fn seeded_service(streams: &[(&str, StorageType)]) -> InMemoryService {
    let svc = InMemoryService::new();
    for (name, storage) in streams {
        let subject = format!("{}.>", name.to_lowercase());
        svc.add_stream(StreamConfig::new(*name, *storage).with_subjects([subject]))
            .await
            .unwrap();
        for i in 0..3 {
            svc.publish(name, &format!("{}.evt", name.to_lowercase()), format!("m{i}").as_bytes())
                .await
                .unwrap();
        }
        svc.add_consumer(
            name,
            ConsumerSnapshot {
                config: ConsumerConfig::durable(format!("{name}_WORKER")),
                delivered_stream_seq: 2,
                ack_floor_stream_seq: 1,
            },
        )
        .await
        .unwrap();
    }
    svc
}

fn dir_names(root: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn backup_writes_one_artifact_per_stream() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("nested").join("backup");
    let svc = seeded_service(&[
        ("ORDERS", StorageType::File),
        ("BILLING", StorageType::File),
        ("AUDIT", StorageType::File),
    ])
    .await;

    let res = run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(&target))
        .await
        .unwrap();

    assert_eq!(res.status, BackupStatus::Completed);
    assert_eq!(res.plan.streams, 3);
    assert_eq!(res.plan.total_consumers, 3);
    assert!(res.plan.total_bytes > 0);
    assert_eq!(res.outcomes.succeeded, 3);
    assert!(res.outcomes.warnings.is_empty());
    assert!(res.outcomes.failures.is_empty());
    assert_eq!(res.artifacts.len(), 3);

    assert_eq!(dir_names(&target), vec!["AUDIT", "BILLING", "ORDERS"]);
    for name in ["AUDIT", "BILLING", "ORDERS"] {
        let dir = target.join(name);
        assert!(dir.join(MANIFEST_FILE).is_file(), "{name} has no manifest");
        let manifest = load_manifest(&dir).unwrap();
        assert_eq!(manifest.stream, name);
        assert_eq!(manifest.state.messages, 3);
        assert!(manifest.consumers_included);
        assert_eq!(manifest.subject_filters, None);
    }
    assert_eq!(svc.snapshots.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn backup_without_streams_aborts_and_creates_nothing() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("backup");
    let svc = InMemoryService::new();

    let err = run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(&target))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoStreams));
    assert_eq!(err.to_string(), "no streams found");
    assert!(!target.exists());
}

#[tokio::test]
async fn memory_stream_is_a_warning_and_the_run_succeeds() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("backup");
    let svc = seeded_service(&[("CACHE", StorageType::Memory), ("ORDERS", StorageType::File)])
        .await;

    let res = run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(&target))
        .await
        .unwrap();

    assert_eq!(res.outcomes.succeeded, 1);
    assert_eq!(res.outcomes.warnings.len(), 1);
    assert_eq!(res.outcomes.warnings[0].stream, "CACHE");
    assert!(res.outcomes.failures.is_empty());
    assert!(!target.join("CACHE").exists());
    assert!(target.join("ORDERS").join(MANIFEST_FILE).is_file());
}

#[tokio::test]
async fn memory_stream_fails_the_run_when_warnings_are_critical() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("backup");
    let svc = seeded_service(&[("CACHE", StorageType::Memory), ("ORDERS", StorageType::File)])
        .await;

    let mut config = AccountBackupConfig::new(&target);
    config.fail_on_warning = true;
    let err = run_account_backup(&svc, &AssumeYes, config).await.unwrap_err();

    assert!(matches!(
        err,
        Error::BackupFailed {
            failures: 0,
            warnings: 1
        }
    ));
    assert!(target.join("ORDERS").join(MANIFEST_FILE).is_file());
    assert!(!target.join("CACHE").exists());
}

#[tokio::test]
async fn a_failing_stream_does_not_stop_the_others() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("backup");
    let svc = seeded_service(&[
        ("A", StorageType::File),
        ("B", StorageType::File),
        ("C", StorageType::File),
    ])
    .await;
    svc.fail_snapshot("B", "snapshot timed out").await;

    let sink = RecordingSink::default();
    let err = run_account_backup_with(
        &svc,
        &AssumeYes,
        AccountBackupConfig::new(&target),
        AccountBackupOptions {
            progress: Some(&sink),
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackupFailed);
    assert!(matches!(
        err,
        Error::BackupFailed {
            failures: 1,
            warnings: 0
        }
    ));
    assert!(target.join("A").join(MANIFEST_FILE).is_file());
    assert!(target.join("C").join(MANIFEST_FILE).is_file());
    assert!(!target.join("B").exists());

    let summary = sink
        .take()
        .into_iter()
        .find_map(|e| match e {
            RunEvent::BackupSummary { outcomes, failed } => Some((outcomes, failed)),
            _ => None,
        })
        .expect("summary event");
    assert!(summary.1);
    assert_eq!(summary.0.succeeded, 2);
    assert_eq!(summary.0.failures[0].stream, "B");
    assert_eq!(
        summary.0.failures[0].outcome,
        Outcome::Failure("service error: snapshot timed out".to_string())
    );
}

#[tokio::test]
async fn outcomes_are_reported_as_each_stream_finishes() {
    let temp = TempDir::new().unwrap();
    let svc = seeded_service(&[("A", StorageType::File), ("M", StorageType::Memory)]).await;

    let sink = RecordingSink::default();
    run_account_backup_with(
        &svc,
        &AssumeYes,
        AccountBackupConfig::new(temp.path().join("bk")),
        AccountBackupOptions {
            progress: Some(&sink),
        },
    )
    .await
    .unwrap();

    let kinds: Vec<String> = sink
        .take()
        .iter()
        .map(|e| match e {
            RunEvent::BackupPlanned { .. } => "plan".to_string(),
            RunEvent::StreamStarted { stream } => format!("start:{stream}"),
            RunEvent::StreamFinished { outcome } => {
                format!("finish:{}:{}", outcome.stream, outcome.outcome.label())
            }
            RunEvent::BackupSummary { failed, .. } => format!("summary:{failed}"),
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "plan",
            "start:A",
            "finish:A:success",
            "start:M",
            "finish:M:warning",
            "summary:false",
        ]
    );
}

#[tokio::test]
async fn declined_confirmation_has_no_side_effects() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("backup");
    let svc = seeded_service(&[("ORDERS", StorageType::File)]).await;

    let res = run_account_backup(&svc, &AssumeNo, AccountBackupConfig::new(&target))
        .await
        .unwrap();

    assert_eq!(res.status, BackupStatus::Declined);
    assert_eq!(res.plan.streams, 1);
    assert!(res.artifacts.is_empty());
    assert!(!target.exists());
    assert_eq!(svc.snapshots.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn force_skips_the_prompt() {
    let temp = TempDir::new().unwrap();
    let svc = seeded_service(&[("ORDERS", StorageType::File)]).await;
    let gate = CountingGate::default();

    let mut config = AccountBackupConfig::new(temp.path().join("bk"));
    config.force = true;
    let res = run_account_backup(&svc, &gate, config).await.unwrap();
    assert_eq!(res.status, BackupStatus::Completed);
    assert_eq!(gate.calls.get(), 0);

    let res = run_account_backup(&svc, &gate, AccountBackupConfig::new(temp.path().join("bk2")))
        .await
        .unwrap();
    assert_eq!(res.status, BackupStatus::Completed);
    assert_eq!(gate.calls.get(), 1);
}

#[tokio::test]
async fn prompt_failure_aborts_the_run() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("backup");
    let svc = seeded_service(&[("ORDERS", StorageType::File)]).await;

    let err = run_account_backup(&svc, &BrokenGate, AccountBackupConfig::new(&target))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Confirmation);
    assert!(!target.exists());
    assert_eq!(svc.snapshots.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn unreadable_state_counts_as_empty_in_the_plan() {
    let temp = TempDir::new().unwrap();
    let svc = seeded_service(&[("A", StorageType::File), ("B", StorageType::File)]).await;
    let full = run_account_backup(&svc, &AssumeNo, AccountBackupConfig::new(temp.path()))
        .await
        .unwrap()
        .plan;

    svc.fail_state("A").await;
    let res = run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(temp.path().join("bk")))
        .await
        .unwrap();

    assert_eq!(res.plan.streams, 2);
    assert_eq!(res.plan.total_consumers, full.total_consumers - 1);
    assert!(res.plan.total_bytes < full.total_bytes);
    assert_eq!(res.outcomes.succeeded, 2);
}

#[tokio::test]
async fn health_check_failure_is_a_stream_failure() {
    let temp = TempDir::new().unwrap();
    let svc = seeded_service(&[("A", StorageType::File), ("SICK", StorageType::File)]).await;
    svc.mark_unhealthy("SICK").await;

    let res = run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(temp.path().join("nocheck")))
        .await
        .unwrap();
    assert_eq!(res.outcomes.succeeded, 2);

    let target = temp.path().join("check");
    let mut config = AccountBackupConfig::new(&target);
    config.check_health = true;
    let err = run_account_backup(&svc, &AssumeYes, config).await.unwrap_err();
    assert!(matches!(err, Error::BackupFailed { failures: 1, .. }));
    assert!(target.join("A").join(MANIFEST_FILE).is_file());
    assert!(!target.join("SICK").exists());
    assert!(load_manifest(&target.join("A")).unwrap().health_checked);
}

#[tokio::test]
async fn consumers_can_be_left_out() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("backup");
    let svc = seeded_service(&[("ORDERS", StorageType::File)]).await;

    let mut config = AccountBackupConfig::new(&target);
    config.include_consumers = false;
    let res = run_account_backup(&svc, &AssumeYes, config).await.unwrap();

    assert_eq!(res.artifacts[0].consumers, 0);
    let manifest = load_manifest(&target.join("ORDERS")).unwrap();
    assert!(!manifest.consumers_included);
    assert!(!target.join("ORDERS").join("consumers.json").exists());
}

#[tokio::test]
async fn rerun_into_an_existing_root_succeeds() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("backup");
    std::fs::create_dir_all(target.join("unrelated")).unwrap();
    std::fs::write(target.join("unrelated").join("notes.txt"), b"keep").unwrap();
    let svc = seeded_service(&[("ORDERS", StorageType::File)]).await;

    run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(&target))
        .await
        .unwrap();
    svc.publish("ORDERS", "orders.evt", b"late").await.unwrap();
    run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(&target))
        .await
        .unwrap();

    let manifest = load_manifest(&target.join("ORDERS")).unwrap();
    assert_eq!(manifest.state.messages, 4);
    assert_eq!(
        std::fs::read(target.join("unrelated").join("notes.txt")).unwrap(),
        b"keep"
    );
}

#[tokio::test]
async fn failed_rerun_does_not_keep_the_earlier_manifest() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("backup");
    let svc = seeded_service(&[("ORDERS", StorageType::File), ("AUDIT", StorageType::File)])
        .await;

    run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(&target))
        .await
        .unwrap();
    assert_eq!(load_manifest(&target.join("ORDERS")).unwrap().state.messages, 3);

    svc.publish("ORDERS", "orders.evt", b"late").await.unwrap();
    svc.fail_snapshot("ORDERS", "snapshot timed out").await;
    let err = run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(&target))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BackupFailed { failures: 1, .. }));

    let stale = load_manifest(&target.join("ORDERS")).unwrap_err();
    assert!(matches!(stale, Error::MissingManifest { .. }));
    assert!(load_manifest(&target.join("AUDIT")).is_ok());
}

#[cfg(unix)]
#[tokio::test]
async fn unwritable_root_aborts_the_run() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let locked = temp.path().join("locked");
    std::fs::create_dir(&locked).unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();
    // Root ignores permission bits.
    if std::fs::write(locked.join("probe"), b"x").is_ok() {
        return;
    }

    let svc = seeded_service(&[("ORDERS", StorageType::File)]).await;
    let err = run_account_backup(&svc, &AssumeYes, AccountBackupConfig::new(locked.join("bk")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(svc.snapshots.load(Ordering::Relaxed), 0);

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o700)).unwrap();
}
