use crate::log::Lsn;
use crate::region::RegionOffset;

use super::{TxnId, TxnStatus, Xid};

/// Intrusive links of the active-transaction list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveLinks {
    pub next: Option<RegionOffset>,
    pub prev: Option<RegionOffset>,
}

/// Shared bookkeeping for one transaction, stored in the region.
///
/// Lives from `begin` until the transaction is aborted or, for a committed
/// child, until its top-level ancestor resolves.
#[derive(Debug, Clone)]
pub struct TxnDetail {
    pub id: TxnId,
    pub begin_lsn: Lsn,
    pub last_lsn: Lsn,
    pub status: TxnStatus,
    pub parent: Option<RegionOffset>,
    pub xid: Option<Xid>,
    pub(crate) links: ActiveLinks,
}

impl TxnDetail {
    pub fn new(id: TxnId, begin_lsn: Lsn, parent: Option<RegionOffset>) -> Self {
        Self {
            id,
            begin_lsn,
            last_lsn: Lsn::ZERO,
            status: TxnStatus::Running,
            parent,
            xid: None,
            links: ActiveLinks::default(),
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }
}
