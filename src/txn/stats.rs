use serde::Serialize;

use crate::core::errors::TxnError;
use crate::core::lock_stats::LockStatsSnapshot;
use crate::log::Lsn;
use crate::region::Region;

use super::{TxnId, TxnStatus, TXN_NONE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveTxnStat {
    pub id: TxnId,
    pub begin_lsn: Lsn,
    pub status: TxnStatus,
    /// `TXN_NONE` for top-level transactions.
    pub parent_id: TxnId,
}

/// Point-in-time copy of the region header and active list.
#[derive(Debug, Clone, Serialize)]
pub struct TxnStats {
    pub last_txn_id: TxnId,
    pub last_ckp: Lsn,
    pub pending_ckp: Lsn,
    pub time_ckp: u64,
    pub max_txns: usize,
    pub aborts: u64,
    pub begins: u64,
    pub commits: u64,
    pub nactive: u32,
    pub max_active: u32,
    pub region_grows: u32,
    pub active: Vec<ActiveTxnStat>,
    pub locks: LockStatsSnapshot,
}

impl TxnStats {
    pub(crate) fn collect(region: &Region, locks: LockStatsSnapshot) -> Self {
        let header = &region.header;
        let active = region
            .active()
            .map(|(_, detail)| ActiveTxnStat {
                id: detail.id,
                begin_lsn: detail.begin_lsn,
                status: detail.status,
                parent_id: detail
                    .parent
                    .and_then(|parent| region.detail(parent))
                    .map(|parent| parent.id)
                    .unwrap_or(TXN_NONE),
            })
            .collect();

        Self {
            last_txn_id: header.last_txn_id,
            last_ckp: header.last_ckp,
            pending_ckp: header.pending_ckp,
            time_ckp: header.time_ckp,
            max_txns: header.max_txns,
            aborts: header.aborts,
            begins: header.begins,
            commits: header.commits,
            nactive: header.nactive,
            max_active: header.max_active,
            region_grows: header.region_grows,
            active,
            locks,
        }
    }

    pub fn active_entry(&self, id: TxnId) -> Option<&ActiveTxnStat> {
        self.active.iter().find(|entry| entry.id == id)
    }

    pub fn to_json(&self) -> Result<String, TxnError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
