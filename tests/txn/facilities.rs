use tempfile::tempdir;

use wrongotxn::{
    CheckpointOutcome, LockError, LockRelease, ManagerConfig, SyncResult, TxnError, TxnStatus,
    REC_TYPE_USER_MIN,
};

use super::support::memory_env;

#[test]
fn child_commit_hands_locks_to_parent() {
    let tmp = tempdir().unwrap();
    let env = memory_env(tmp.path(), ManagerConfig::default());
    let parent = env.manager.begin(None).unwrap();
    let child = env.manager.begin(Some(&parent)).unwrap();

    child.commit().unwrap();
    assert_eq!(
        env.locks.released(),
        vec![(child.id(), LockRelease::InheritToParent(parent.id()))]
    );

    parent.commit().unwrap();
    assert_eq!(
        env.locks.released(),
        vec![
            (child.id(), LockRelease::InheritToParent(parent.id())),
            (child.id(), LockRelease::ReleaseAll),
            (parent.id(), LockRelease::ReleaseAll),
        ]
    );
}

#[test]
fn deadlock_on_commit_release_is_reported_after_commit() {
    let tmp = tempdir().unwrap();
    let env = memory_env(tmp.path(), ManagerConfig::default());
    let txn = env.manager.begin(None).unwrap();
    txn.log_record(REC_TYPE_USER_MIN, b"row").unwrap();
    env.locks.fail_for(txn.id(), LockError::Deadlock);

    match txn.commit() {
        Err(TxnError::LockReleaseFailed { txn_id, source }) => {
            assert_eq!(txn_id, txn.id());
            assert_eq!(source, LockError::Deadlock);
        }
        other => panic!("expected LockReleaseFailed, got {other:?}"),
    }
    assert_eq!(txn.status(), TxnStatus::Committed);
    let stats = env.manager.stats().unwrap();
    assert!(stats.active.is_empty());
    assert_eq!(stats.commits, 1);
    assert!(env.undo.applied().is_empty());
}

#[test]
fn abort_ignores_lock_release_failure() {
    let tmp = tempdir().unwrap();
    let env = memory_env(tmp.path(), ManagerConfig::default());
    let txn = env.manager.begin(None).unwrap();
    env.locks.fail_for(txn.id(), LockError::NotHeld(txn.id()));

    txn.abort().unwrap();
    assert_eq!(txn.status(), TxnStatus::Aborted);
    assert_eq!(env.manager.stats().unwrap().aborts, 1);
}

#[test]
fn undo_failure_is_surfaced_without_panicking() {
    let tmp = tempdir().unwrap();
    let env = memory_env(tmp.path(), ManagerConfig::default());
    let txn = env.manager.begin(None).unwrap();
    let first = txn.log_record(REC_TYPE_USER_MIN, b"a").unwrap();
    let second = txn.log_record(REC_TYPE_USER_MIN, b"b").unwrap();
    env.undo.fail_at(first);

    match txn.abort() {
        Err(TxnError::UndoFailed { txn_id, lsn, .. }) => {
            assert_eq!(txn_id, txn.id());
            assert_eq!(lsn, first);
        }
        other => panic!("expected UndoFailed, got {other:?}"),
    }
    assert_eq!(env.undo.applied(), vec![(txn.id(), second)]);
    assert!(!env.manager.is_panicked());
    assert_eq!(txn.status(), TxnStatus::Running);
}

#[test]
fn incomplete_cache_sync_defers_and_resumes_same_lsn() {
    let tmp = tempdir().unwrap();
    let env = memory_env(tmp.path(), ManagerConfig::default());
    let running = env.manager.begin(None).unwrap();
    running.log_record(REC_TYPE_USER_MIN, b"dirty").unwrap();
    env.cache.push(SyncResult::Incomplete);

    let deferred = env.manager.checkpoint(0, 0).unwrap();
    assert_eq!(deferred, CheckpointOutcome::Deferred(running.begin_lsn()));
    let stats = env.manager.stats().unwrap();
    assert_eq!(stats.pending_ckp, running.begin_lsn());
    assert!(stats.last_ckp.is_zero());
    let records_before = env.log.len();

    running.commit().unwrap();
    let later = env.manager.begin(None).unwrap();
    later.log_record(REC_TYPE_USER_MIN, b"more").unwrap();

    match env.manager.checkpoint(0, 0).unwrap() {
        CheckpointOutcome::Written { ckp_lsn, record_lsn } => {
            assert_eq!(ckp_lsn, running.begin_lsn());
            assert!(record_lsn > ckp_lsn);
        }
        other => panic!("expected a written checkpoint, got {other:?}"),
    }
    assert_eq!(
        *env.cache.requests.lock(),
        vec![running.begin_lsn(), running.begin_lsn()]
    );
    assert!(env.log.len() > records_before);
    let stats = env.manager.stats().unwrap();
    assert!(stats.pending_ckp.is_zero());
    assert_eq!(stats.last_ckp, running.begin_lsn());
}

#[test]
fn checkpoint_never_passes_an_active_begin() {
    let tmp = tempdir().unwrap();
    let env = memory_env(tmp.path(), ManagerConfig::default());
    let mut open = Vec::new();
    let mut last = env.manager.stats().unwrap().last_ckp;

    for round in 0..12 {
        let txn = env.manager.begin(None).unwrap();
        txn.log_record(REC_TYPE_USER_MIN, format!("round-{round}").as_bytes())
            .unwrap();
        open.push(txn);
        if round % 3 == 2 {
            open.remove(0).commit().unwrap();
        }

        env.manager.checkpoint(0, 0).unwrap();
        let stats = env.manager.stats().unwrap();
        assert!(stats.last_ckp >= last, "checkpoint LSN went backwards");
        for entry in &stats.active {
            assert!(stats.last_ckp <= entry.begin_lsn);
        }
        last = stats.last_ckp;
    }
}
