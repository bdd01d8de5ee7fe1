use std::sync::Arc;

use tempfile::tempdir;

use wrongotxn::{
    CheckpointOutcome, Facilities, FileLog, ManagerConfig, TxnManager, TxnStatus, Xid, REC_TYPE_USER_MIN,
};

use super::support::UndoRecorder;

#[test]
fn reopen_continues_transaction_ids() {
    let tmp = tempdir().unwrap();

    let last_id = {
        let manager = TxnManager::open_with_facilities(
            tmp.path(),
            ManagerConfig::default(),
            Facilities::new().recovery(Arc::new(UndoRecorder::default())),
        )
        .unwrap();
        let t1 = manager.begin(None).unwrap();
        t1.log_record(REC_TYPE_USER_MIN, b"insert a").unwrap();
        t1.commit().unwrap();

        let t2 = manager.begin(None).unwrap();
        let t3 = manager.begin(Some(&t2)).unwrap();
        t3.log_record(REC_TYPE_USER_MIN, b"insert b").unwrap();
        manager.close().unwrap();
        t3.id()
    };

    assert!(FileLog::path_for_dir(tmp.path()).exists());
    let manager = TxnManager::open(tmp.path(), ManagerConfig::default()).unwrap();
    let summary = manager.recovery_summary();
    assert_eq!(summary.max_txn_id, last_id);
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.incomplete, 1);

    let next = manager.begin(None).unwrap();
    assert!(next.id() > last_id);
    assert_eq!(manager.stats().unwrap().last_txn_id, next.id());
}

#[test]
fn prepared_transaction_survives_reopen() {
    let tmp = tempdir().unwrap();
    let xid = Xid::new(0x1B, b"coordinator-7".to_vec(), b"branch-2".to_vec());

    let prepared_id = {
        let manager = TxnManager::open(tmp.path(), ManagerConfig::default()).unwrap();
        let txn = manager.begin(None).unwrap();
        txn.log_record(REC_TYPE_USER_MIN, b"transfer").unwrap();
        txn.prepare(xid.clone()).unwrap();
        manager.close().unwrap();
        assert_eq!(txn.status(), TxnStatus::Prepared);
        txn.id()
    };

    let manager = TxnManager::open(tmp.path(), ManagerConfig::default()).unwrap();
    assert_eq!(manager.recovery_summary().prepared, vec![(prepared_id, xid)]);
}

#[test]
fn aborted_prepared_transaction_is_not_in_doubt_after_reopen() {
    let tmp = tempdir().unwrap();
    let xid = Xid::new(1, b"g".to_vec(), b"b".to_vec());
    let undo = Arc::new(UndoRecorder::default());

    let aborted_id = {
        let manager = TxnManager::open_with_facilities(
            tmp.path(),
            ManagerConfig::default(),
            Facilities::new().recovery(undo.clone()),
        )
        .unwrap();
        let txn = manager.begin(None).unwrap();
        let lsn = txn.log_record(REC_TYPE_USER_MIN, b"debit").unwrap();
        txn.prepare(xid).unwrap();
        txn.abort().unwrap();
        assert_eq!(txn.status(), TxnStatus::Aborted);
        assert_eq!(undo.applied().into_iter().map(|(_, l)| l).collect::<Vec<_>>(), vec![lsn]);
        manager.close().unwrap();
        txn.id()
    };

    let manager = TxnManager::open(tmp.path(), ManagerConfig::default()).unwrap();
    let summary = manager.recovery_summary();
    assert!(summary.prepared.is_empty());
    assert_eq!(summary.incomplete, 0);
    assert_eq!(summary.max_txn_id, aborted_id);
}

#[test]
fn child_commit_counts_once_its_parent_commits() {
    let tmp = tempdir().unwrap();

    {
        let manager = TxnManager::open(tmp.path(), ManagerConfig::default()).unwrap();
        let parent = manager.begin(None).unwrap();
        let child = manager.begin(Some(&parent)).unwrap();
        child.log_record(REC_TYPE_USER_MIN, b"nested").unwrap();
        child.commit().unwrap();
        parent.commit().unwrap();
    }

    let manager = TxnManager::open(tmp.path(), ManagerConfig::default()).unwrap();
    let summary = manager.recovery_summary();
    assert_eq!(summary.committed, 2);
    assert_eq!(summary.incomplete, 0);
}

#[test]
fn checkpoint_is_restored_on_reopen() {
    let tmp = tempdir().unwrap();

    let ckp_lsn = {
        let manager = TxnManager::open(tmp.path(), ManagerConfig::default()).unwrap();
        let txn = manager.begin(None).unwrap();
        txn.log_record(REC_TYPE_USER_MIN, b"page 9").unwrap();
        txn.commit().unwrap();
        match manager.checkpoint(0, 0).unwrap() {
            CheckpointOutcome::Written { ckp_lsn, .. } => ckp_lsn,
            other => panic!("expected a written checkpoint, got {other:?}"),
        }
    };

    let manager = TxnManager::open(tmp.path(), ManagerConfig::default()).unwrap();
    let stats = manager.stats().unwrap();
    assert_eq!(stats.last_ckp, ckp_lsn);
    assert!(stats.time_ckp > 0);
    assert_eq!(manager.checkpoint(0, 60).unwrap(), CheckpointOutcome::Skipped);
}

#[test]
fn abort_reads_undo_chain_back_from_file() {
    let tmp = tempdir().unwrap();
    let undo = Arc::new(UndoRecorder::default());
    let manager = TxnManager::open_with_facilities(
        tmp.path(),
        ManagerConfig::default(),
        Facilities::new().recovery(undo.clone()),
    )
    .unwrap();

    let txn = manager.begin(None).unwrap();
    let lsns: Vec<_> = (0..4)
        .map(|i| {
            txn.log_record(REC_TYPE_USER_MIN + i, format!("op {i}").as_bytes())
                .unwrap()
        })
        .collect();
    txn.abort().unwrap();

    let applied: Vec<_> = undo.applied().into_iter().map(|(_, lsn)| lsn).collect();
    assert_eq!(applied, lsns.into_iter().rev().collect::<Vec<_>>());
}

#[test]
fn no_sync_commit_skips_the_flush() {
    let tmp = tempdir().unwrap();
    let manager = TxnManager::open(tmp.path(), ManagerConfig::default().no_sync(true)).unwrap();
    let txn = manager.begin(None).unwrap();
    txn.log_record(REC_TYPE_USER_MIN, b"fast path").unwrap();
    txn.commit().unwrap();
    manager.close().unwrap();
    drop(txn);
    drop(manager);

    let reopened = TxnManager::open(tmp.path(), ManagerConfig::default()).unwrap();
    assert_eq!(reopened.recovery_summary().committed, 1);
}
