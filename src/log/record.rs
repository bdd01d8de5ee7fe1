//! Encoding of the records the transaction manager reads and writes.
//!
//! Every record starts with a fixed 16-byte header:
//!
//! ```text
//! rec_type: u32 | txn_id: u32 | prev_lsn.file: u32 | prev_lsn.offset: u32
//! ```
//!
//! `prev_lsn` links the records of one transaction backwards; undo follows it.
//! Record types below `REC_TYPE_USER_MIN` belong to the transaction manager.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::core::errors::{StorageError, TxnError};
use crate::log::Lsn;
use crate::txn::{TxnId, Xid};

pub const LOG_HEADER_SIZE: usize = 16;

pub const TXN_COMMIT: u32 = 1;
pub const TXN_CHECKPOINT: u32 = 2;
pub const TXN_PREPARE: u32 = 3;
pub const TXN_CHILD_COMMIT: u32 = 4;
pub const TXN_ABORT: u32 = 5;

/// First record type available to callers logging through a transaction.
pub const REC_TYPE_USER_MIN: u32 = 100;

const TXN_OP_COMMIT: u32 = 1;
const TXN_OP_ABORT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
    pub rec_type: u32,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
}

/// A decoded log record: header plus opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub header: LogRecordHeader,
    pub body: Vec<u8>,
}

impl LogRecord {
    pub fn new(rec_type: u32, txn_id: TxnId, prev_lsn: Lsn, body: Vec<u8>) -> Self {
        Self {
            header: LogRecordHeader {
                rec_type,
                txn_id,
                prev_lsn,
            },
            body,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TxnError> {
        let mut buf = Vec::with_capacity(LOG_HEADER_SIZE + self.body.len());
        buf.write_u32::<LittleEndian>(self.header.rec_type)?;
        buf.write_u32::<LittleEndian>(self.header.txn_id)?;
        buf.write_u32::<LittleEndian>(self.header.prev_lsn.file)?;
        buf.write_u32::<LittleEndian>(self.header.prev_lsn.offset)?;
        buf.write_all(&self.body)?;
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self, TxnError> {
        if data.len() < LOG_HEADER_SIZE {
            return Err(StorageError(format!(
                "log record too short: {} bytes, need at least {LOG_HEADER_SIZE}",
                data.len()
            ))
            .into());
        }
        let mut cursor = Cursor::new(data);
        let rec_type = read_u32(&mut cursor, "rec_type")?;
        let txn_id = read_u32(&mut cursor, "txn_id")?;
        let prev_file = read_u32(&mut cursor, "prev_lsn file")?;
        let prev_offset = read_u32(&mut cursor, "prev_lsn offset")?;
        Ok(Self::new(
            rec_type,
            txn_id,
            Lsn::new(prev_file, prev_offset),
            data[LOG_HEADER_SIZE..].to_vec(),
        ))
    }

    pub fn is_txn_record(&self) -> bool {
        self.header.rec_type < REC_TYPE_USER_MIN
    }
}

/// Lifecycle records written by the transaction manager itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnRecord {
    Commit,
    /// Written only when a prepared transaction is aborted, so recovery stops
    /// reporting it as in doubt.
    Abort,
    ChildCommit {
        parent_id: TxnId,
    },
    Prepare {
        xid: Xid,
    },
    Checkpoint {
        ckp_lsn: Lsn,
        last_ckp: Lsn,
        timestamp: u64,
    },
}

impl TxnRecord {
    pub fn rec_type(&self) -> u32 {
        match self {
            TxnRecord::Commit => TXN_COMMIT,
            TxnRecord::Abort => TXN_ABORT,
            TxnRecord::ChildCommit { .. } => TXN_CHILD_COMMIT,
            TxnRecord::Prepare { .. } => TXN_PREPARE,
            TxnRecord::Checkpoint { .. } => TXN_CHECKPOINT,
        }
    }

    pub fn to_log_record(&self, txn_id: TxnId, prev_lsn: Lsn) -> Result<LogRecord, TxnError> {
        Ok(LogRecord::new(
            self.rec_type(),
            txn_id,
            prev_lsn,
            self.encode_body()?,
        ))
    }

    fn encode_body(&self) -> Result<Vec<u8>, TxnError> {
        let mut buf = Vec::new();
        match self {
            TxnRecord::Commit => buf.write_u32::<LittleEndian>(TXN_OP_COMMIT)?,
            TxnRecord::Abort => buf.write_u32::<LittleEndian>(TXN_OP_ABORT)?,
            TxnRecord::ChildCommit { parent_id } => buf.write_u32::<LittleEndian>(*parent_id)?,
            TxnRecord::Prepare { xid } => {
                buf.write_i32::<LittleEndian>(xid.format)?;
                serialize_bytes(&mut buf, &xid.gtrid)?;
                serialize_bytes(&mut buf, &xid.bqual)?;
            }
            TxnRecord::Checkpoint {
                ckp_lsn,
                last_ckp,
                timestamp,
            } => {
                buf.write_u32::<LittleEndian>(ckp_lsn.file)?;
                buf.write_u32::<LittleEndian>(ckp_lsn.offset)?;
                buf.write_u32::<LittleEndian>(last_ckp.file)?;
                buf.write_u32::<LittleEndian>(last_ckp.offset)?;
                buf.write_u64::<LittleEndian>(*timestamp)?;
            }
        }
        Ok(buf)
    }

    /// Decodes a lifecycle record; `Ok(None)` for record types the manager
    /// does not own.
    pub fn decode(record: &LogRecord) -> Result<Option<Self>, TxnError> {
        let mut cursor = Cursor::new(record.body.as_slice());
        let decoded = match record.header.rec_type {
            TXN_COMMIT => {
                let opcode = read_u32(&mut cursor, "commit opcode")?;
                if opcode != TXN_OP_COMMIT {
                    return Err(StorageError(format!("unknown commit opcode: {opcode}")).into());
                }
                TxnRecord::Commit
            }
            TXN_ABORT => {
                let opcode = read_u32(&mut cursor, "abort opcode")?;
                if opcode != TXN_OP_ABORT {
                    return Err(StorageError(format!("unknown abort opcode: {opcode}")).into());
                }
                TxnRecord::Abort
            }
            TXN_CHILD_COMMIT => TxnRecord::ChildCommit {
                parent_id: read_u32(&mut cursor, "parent id")?,
            },
            TXN_PREPARE => {
                let format = cursor
                    .read_i32::<LittleEndian>()
                    .map_err(|e| StorageError(format!("truncated xid format: {e}")))?;
                let gtrid = deserialize_bytes(&mut cursor, "gtrid")?;
                let bqual = deserialize_bytes(&mut cursor, "bqual")?;
                TxnRecord::Prepare {
                    xid: Xid {
                        format,
                        gtrid,
                        bqual,
                    },
                }
            }
            TXN_CHECKPOINT => {
                let ckp_lsn = Lsn::new(
                    read_u32(&mut cursor, "ckp_lsn file")?,
                    read_u32(&mut cursor, "ckp_lsn offset")?,
                );
                let last_ckp = Lsn::new(
                    read_u32(&mut cursor, "last_ckp file")?,
                    read_u32(&mut cursor, "last_ckp offset")?,
                );
                let timestamp = cursor
                    .read_u64::<LittleEndian>()
                    .map_err(|e| StorageError(format!("truncated checkpoint timestamp: {e}")))?;
                TxnRecord::Checkpoint {
                    ckp_lsn,
                    last_ckp,
                    timestamp,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}

fn read_u32(cursor: &mut Cursor<&[u8]>, field: &str) -> Result<u32, TxnError> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| StorageError(format!("truncated {field}: {e}")).into())
}

fn serialize_bytes(buf: &mut Vec<u8>, value: &[u8]) -> Result<(), TxnError> {
    let len = u32::try_from(value.len())
        .map_err(|_| StorageError(format!("xid field too large: {} bytes", value.len())))?;
    buf.write_u32::<LittleEndian>(len)?;
    buf.write_all(value)?;
    Ok(())
}

fn deserialize_bytes(cursor: &mut Cursor<&[u8]>, field: &str) -> Result<Vec<u8>, TxnError> {
    let len = read_u32(cursor, field)? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(StorageError(format!(
            "{field} length {len} exceeds remaining {remaining} bytes"
        ))
        .into());
    }
    let mut out = vec![0u8; len];
    cursor
        .read_exact(&mut out)
        .map_err(|e| StorageError(format!("truncated {field}: {e}")))?;
    Ok(out)
}
