use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::tempdir;

use wrongotxn::{ManagerConfig, TxnManager, REC_TYPE_USER_MIN};

use super::support::memory_env;

#[test]
fn concurrent_begin_grows_region_once() {
    let tmp = tempdir().unwrap();
    let env = memory_env(tmp.path(), ManagerConfig::default().max_transactions(1));
    let t1 = env.manager.begin(None).unwrap();

    let manager = env.manager.clone();
    let t2 = thread::spawn(move || manager.begin(None).unwrap())
        .join()
        .unwrap();

    assert_ne!(t1.id(), t2.id());
    let stats = env.manager.stats().unwrap();
    assert_eq!(stats.region_grows, 1);
    assert_eq!(stats.nactive, 2);
    t1.commit().unwrap();
    t2.commit().unwrap();
}

#[test]
fn parallel_transactions_get_distinct_ids() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    let tmp = tempdir().unwrap();
    let manager = TxnManager::open(tmp.path(), ManagerConfig::default().max_transactions(2).no_sync(true))
        .unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut ids = Vec::with_capacity(PER_THREAD);
                for i in 0..PER_THREAD {
                    let txn = manager.begin(None).unwrap();
                    if i % 2 == 0 {
                        txn.log_record(REC_TYPE_USER_MIN, format!("w{worker}-{i}").as_bytes())
                            .unwrap();
                    }
                    ids.push(txn.id());
                    if i % 10 == 1 {
                        txn.abort().unwrap();
                    } else {
                        txn.commit().unwrap();
                    }
                }
                ids
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "transaction id {id} handed out twice");
        }
    }

    let stats = manager.stats().unwrap();
    let total = (THREADS * PER_THREAD) as u64;
    assert_eq!(stats.begins, total);
    assert_eq!(stats.commits + stats.aborts, total);
    assert!(stats.active.is_empty());
    assert!(stats.max_active as usize <= THREADS);
    assert!(manager.open_txn_ids().is_empty());
}
