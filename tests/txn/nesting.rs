use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use wrongotxn::{Lsn, ManagerConfig, Txn, TxnId, TxnStatus, REC_TYPE_USER_MIN};

use super::support::memory_env;

struct Node {
    txn: Txn,
    parent: Option<usize>,
    records: Vec<Lsn>,
    aborted_explicitly: bool,
}

fn running(nodes: &[Node], skip_root: bool) -> Vec<usize> {
    nodes
        .iter()
        .enumerate()
        .filter(|(i, node)| !(skip_root && *i == 0) && node.txn.status() == TxnStatus::Running)
        .map(|(i, _)| i)
        .collect()
}

fn ends_aborted(nodes: &[Node], mut index: usize) -> bool {
    loop {
        if nodes[index].aborted_explicitly {
            return true;
        }
        match nodes[index].parent {
            Some(parent) => index = parent,
            None => return false,
        }
    }
}

#[test]
fn random_nesting_resolves_consistently() {
    for seed in 0..25u64 {
        let tmp = tempdir().unwrap();
        let env = memory_env(tmp.path(), ManagerConfig::default().max_transactions(3));
        let mut rng = StdRng::seed_from_u64(seed);

        let mut nodes = vec![Node {
            txn: env.manager.begin(None).unwrap(),
            parent: None,
            records: Vec::new(),
            aborted_explicitly: false,
        }];

        for step in 0..rng.gen_range(4..16) {
            let candidates = running(&nodes, false);
            let parent = candidates[rng.gen_range(0..candidates.len())];
            let txn = env.manager.begin(Some(&nodes[parent].txn)).unwrap();
            nodes.push(Node {
                txn,
                parent: Some(parent),
                records: Vec::new(),
                aborted_explicitly: false,
            });

            for index in running(&nodes, false) {
                if rng.gen_bool(0.4) {
                    let body = format!("seed {seed} step {step} node {index}");
                    let lsn = nodes[index]
                        .txn
                        .log_record(REC_TYPE_USER_MIN, body.as_bytes())
                        .unwrap();
                    nodes[index].records.push(lsn);
                }
            }

            let resolvable = running(&nodes, true);
            if !resolvable.is_empty() && rng.gen_bool(0.35) {
                let index = resolvable[rng.gen_range(0..resolvable.len())];
                if rng.gen_bool(0.5) {
                    nodes[index].txn.commit().unwrap();
                } else {
                    nodes[index].txn.abort().unwrap();
                    nodes[index].aborted_explicitly = true;
                }
            }
        }

        if rng.gen_bool(0.5) {
            nodes[0].txn.commit().unwrap();
        } else {
            nodes[0].txn.abort().unwrap();
            nodes[0].aborted_explicitly = true;
        }

        let mut expected_undo = BTreeSet::new();
        for index in 0..nodes.len() {
            let aborted = ends_aborted(&nodes, index);
            let expected = if aborted {
                TxnStatus::Aborted
            } else {
                TxnStatus::Committed
            };
            assert_eq!(nodes[index].txn.status(), expected, "seed {seed} node {index}");
            if aborted {
                expected_undo.extend(nodes[index].records.iter().copied());
            }
        }

        let applied = env.undo.applied();
        let applied_set: BTreeSet<Lsn> = applied.iter().map(|(_, lsn)| *lsn).collect();
        assert_eq!(applied_set, expected_undo, "seed {seed}");
        assert_eq!(applied.len(), applied_set.len(), "seed {seed}: record undone twice");

        let mut per_txn: HashMap<TxnId, Vec<Lsn>> = HashMap::new();
        for (txn_id, lsn) in applied {
            per_txn.entry(txn_id).or_default().push(lsn);
        }
        for (txn_id, lsns) in per_txn {
            assert!(
                lsns.windows(2).all(|w| w[0] > w[1]),
                "seed {seed}: undo of {txn_id} not newest first"
            );
        }

        let stats = env.manager.stats().unwrap();
        assert!(stats.active.is_empty(), "seed {seed}");
        assert!(env.manager.open_txn_ids().is_empty(), "seed {seed}");
    }
}
