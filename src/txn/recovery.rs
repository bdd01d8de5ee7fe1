//! Log scan performed when a manager opens over an existing log.
//!
//! The scan restores what the region cannot reconstruct on its own: the
//! highest transaction id ever used (ids must keep increasing across
//! restarts), the last checkpoint, and which prepared transactions are still
//! waiting for a commit or abort decision.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::core::errors::TxnError;
use crate::log::{LogFacility, LogRecord, Lsn, TxnRecord};
use crate::txn::{TxnId, Xid, TXN_NONE};

/// Transaction table built while scanning the log.
///
/// A transaction with records but no commit record is treated as aborted
/// (presumed abort), except when it is prepared: prepared transactions stay
/// unresolved until a coordinator decides. A child commit only takes effect
/// when its top-level ancestor's commit record is seen.
#[derive(Debug, Clone, Default)]
pub struct RecoveryTxnTable {
    committed: HashSet<TxnId>,
    aborted: HashSet<TxnId>,
    /// Children that logged a child commit, keyed by parent id.
    child_commits: HashMap<TxnId, Vec<TxnId>>,
    pending: HashSet<TxnId>,
    prepared: BTreeMap<TxnId, Xid>,
    max_txn_id: TxnId,
    last_ckp: Lsn,
    time_ckp: u64,
    records: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    pub records: u64,
    pub max_txn_id: TxnId,
    pub last_ckp: Lsn,
    pub time_ckp: u64,
    /// Top-level commits plus the child commits they made final.
    pub committed: usize,
    /// Transactions with records but no resolution; presumed aborted.
    /// Children of a prepared transaction are not counted.
    pub incomplete: usize,
    /// Prepared but neither committed nor aborted, in id order.
    pub prepared: Vec<(TxnId, Xid)>,
}

impl RecoveryTxnTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from every record the facility can enumerate.
    pub fn scan(log: &dyn LogFacility) -> Result<Self, TxnError> {
        let mut table = Self::new();
        log.scan(&mut |_lsn, data| {
            let record = LogRecord::decode(data)?;
            table.process_record(&record)
        })?;
        Ok(table)
    }

    pub fn process_record(&mut self, record: &LogRecord) -> Result<(), TxnError> {
        self.records += 1;
        let txn_id = record.header.txn_id;
        if txn_id != TXN_NONE {
            self.max_txn_id = self.max_txn_id.max(txn_id);
        }

        match TxnRecord::decode(record)? {
            Some(TxnRecord::Commit) => {
                self.prepared.remove(&txn_id);
                for id in self.take_subtree(txn_id) {
                    self.pending.remove(&id);
                    self.committed.insert(id);
                }
            }
            Some(TxnRecord::Abort) => {
                self.prepared.remove(&txn_id);
                for id in self.take_subtree(txn_id) {
                    self.pending.remove(&id);
                    self.aborted.insert(id);
                }
            }
            Some(TxnRecord::ChildCommit { parent_id }) => {
                self.max_txn_id = self.max_txn_id.max(parent_id);
                if !self.is_resolved(txn_id) {
                    self.pending.insert(txn_id);
                }
                self.child_commits.entry(parent_id).or_default().push(txn_id);
            }
            Some(TxnRecord::Prepare { xid }) => {
                self.pending.remove(&txn_id);
                self.prepared.insert(txn_id, xid);
            }
            Some(TxnRecord::Checkpoint {
                ckp_lsn, timestamp, ..
            }) => {
                self.last_ckp = ckp_lsn;
                self.time_ckp = timestamp;
            }
            None => {
                if txn_id != TXN_NONE && !self.is_resolved(txn_id) {
                    self.pending.insert(txn_id);
                }
            }
        }
        Ok(())
    }

    fn is_resolved(&self, txn_id: TxnId) -> bool {
        self.committed.contains(&txn_id)
            || self.aborted.contains(&txn_id)
            || self.prepared.contains_key(&txn_id)
    }

    /// `root` and every child commit hanging below it, removed from the
    /// child-commit map.
    fn take_subtree(&mut self, root: TxnId) -> Vec<TxnId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(children) = self.child_commits.remove(&id) {
                stack.extend(children);
            }
        }
        out
    }

    /// Child commits waiting on a prepared ancestor.
    fn in_doubt_children(&self) -> HashSet<TxnId> {
        let mut out = HashSet::new();
        let mut stack: Vec<TxnId> = self.prepared.keys().copied().collect();
        while let Some(id) = stack.pop() {
            for child in self.child_commits.get(&id).into_iter().flatten() {
                if out.insert(*child) {
                    stack.push(*child);
                }
            }
        }
        out
    }

    pub fn is_committed(&self, txn_id: TxnId) -> bool {
        self.committed.contains(&txn_id)
    }

    pub fn is_prepared(&self, txn_id: TxnId) -> bool {
        self.prepared.contains_key(&txn_id)
    }

    pub fn is_pending(&self, txn_id: TxnId) -> bool {
        self.pending.contains(&txn_id)
    }

    pub fn is_aborted(&self, txn_id: TxnId) -> bool {
        self.aborted.contains(&txn_id)
    }

    pub fn max_txn_id(&self) -> TxnId {
        self.max_txn_id
    }

    pub fn summary(&self) -> RecoverySummary {
        let in_doubt = self.in_doubt_children();
        RecoverySummary {
            records: self.records,
            max_txn_id: self.max_txn_id,
            last_ckp: self.last_ckp,
            time_ckp: self.time_ckp,
            committed: self.committed.len(),
            incomplete: self
                .pending
                .iter()
                .filter(|id| !in_doubt.contains(id))
                .count(),
            prepared: self
                .prepared
                .iter()
                .map(|(id, xid)| (*id, xid.clone()))
                .collect(),
        }
    }
}
