//! Write-ahead log plumbing used by the transaction manager.
//!
//! The manager does not own the log format beyond the record header in
//! [`record`]; it talks to whichever [`LogFacility`] the environment supplies.

use std::cmp::Ordering;

use crate::core::errors::TxnError;

pub mod file;
pub mod lsn;
pub mod memory;
pub mod record;

pub use file::FileLog;
pub use lsn::Lsn;
pub use memory::MemoryLog;
pub use record::{LogRecord, LogRecordHeader, TxnRecord, REC_TYPE_USER_MIN};

/// Append/read/flush access to a write-ahead log.
pub trait LogFacility: Send + Sync {
    /// Appends one record and returns the LSN it was written at.
    fn append(&self, record: &[u8]) -> Result<Lsn, TxnError>;

    /// Forces every record up to and including `up_to` to stable storage.
    /// `Lsn::ZERO` forces everything appended so far.
    fn flush(&self, up_to: Lsn) -> Result<(), TxnError>;

    /// The LSN the next appended record will receive.
    fn current_lsn(&self) -> Lsn;

    fn read(&self, lsn: Lsn) -> Result<Vec<u8>, TxnError>;

    fn compare(&self, a: Lsn, b: Lsn) -> Ordering {
        a.cmp(&b)
    }

    /// Bytes appended since `lsn`. Crossing a file boundary counts as
    /// unbounded.
    fn bytes_since(&self, lsn: Lsn) -> u64 {
        let current = self.current_lsn();
        if current.file == lsn.file {
            u64::from(current.offset.saturating_sub(lsn.offset))
        } else if self.compare(current, lsn) == Ordering::Greater {
            u64::MAX
        } else {
            0
        }
    }

    /// Visits every record in log order. Facilities that cannot enumerate
    /// their contents visit nothing.
    fn scan(
        &self,
        _visit: &mut dyn FnMut(Lsn, &[u8]) -> Result<(), TxnError>,
    ) -> Result<(), TxnError> {
        Ok(())
    }
}
