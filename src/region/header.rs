use serde::Serialize;

use crate::log::Lsn;
use crate::txn::{TxnId, TXN_NONE};

use super::RegionOffset;

pub const REGION_MAGIC: u32 = 0x5754_584E;
pub const REGION_VERSION: u32 = 1;

/// Which log discipline the region was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogType {
    None,
    File,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockType {
    None,
    External,
}

/// Fixed bookkeeping at the start of the transaction region.
#[derive(Debug, Clone)]
pub struct RegionHeader {
    pub magic: u32,
    pub version: u32,
    /// Capacity hint; doubles each time the region grows.
    pub max_txns: usize,
    pub last_txn_id: TxnId,
    pub log_type: LogType,
    pub lock_type: LockType,
    /// Unix seconds of the last completed checkpoint, 0 if none.
    pub time_ckp: u64,
    pub last_ckp: Lsn,
    pub pending_ckp: Lsn,
    pub active_head: Option<RegionOffset>,
    pub begins: u64,
    pub commits: u64,
    pub aborts: u64,
    pub nactive: u32,
    pub max_active: u32,
    pub region_grows: u32,
}

impl RegionHeader {
    pub fn new(max_txns: usize, log_type: LogType, lock_type: LockType) -> Self {
        Self {
            magic: REGION_MAGIC,
            version: REGION_VERSION,
            max_txns,
            last_txn_id: TXN_NONE,
            log_type,
            lock_type,
            time_ckp: 0,
            last_ckp: Lsn::ZERO,
            pending_ckp: Lsn::ZERO,
            active_head: None,
            begins: 0,
            commits: 0,
            aborts: 0,
            nactive: 0,
            max_active: 0,
            region_grows: 0,
        }
    }
}
