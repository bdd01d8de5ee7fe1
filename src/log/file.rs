//! Single-file write-ahead log.
//!
//! The file starts with a 512-byte header protected by CRC32, followed by
//! records laid out as
//!
//! ```text
//! payload_len: u32 | prev_offset: u32 | crc32: u32 | payload
//! ```
//!
//! An LSN is `(LOG_FILE_ID, byte offset of the record header)`. Appends are
//! buffered; `flush` writes the buffer and fsyncs. A torn tail left by a
//! crash is truncated on open.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crc32fast::Hasher;
use parking_lot::Mutex;
use tracing::warn;

use crate::core::errors::{StorageError, TxnError};
use crate::log::{LogFacility, Lsn};

/// Log file name inside the manager directory.
const LOG_FILE_NAME: &str = "txn.log";
/// Log file magic bytes (8 bytes)
const LOG_MAGIC: &[u8; 8] = b"WTXNLOG\0";
/// Log file format version
const LOG_VERSION: u16 = 1;
/// Log file header size (512 bytes)
const LOG_FILE_HEADER_SIZE: usize = 512;
/// Record header size (12 bytes)
const RECORD_HEADER_SIZE: usize = 12;
/// The single file every LSN of this log refers to.
const LOG_FILE_ID: u32 = 1;

#[derive(Debug, Clone)]
struct LogFileHeader {
    magic: [u8; 8],
    version: u16,
    crc32: u32,
}

impl LogFileHeader {
    fn new() -> Self {
        let mut header = Self {
            magic: *LOG_MAGIC,
            version: LOG_VERSION,
            crc32: 0,
        };
        header.crc32 = header.compute_crc32();
        header
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; LOG_FILE_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        // 10..12 reserved
        buf[12..16].copy_from_slice(&self.crc32.to_le_bytes());
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, TxnError> {
        if data.len() < LOG_FILE_HEADER_SIZE {
            return Err(StorageError("log header too short".into()).into());
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);
        if magic != *LOG_MAGIC {
            return Err(StorageError(format!("invalid log magic: {magic:?}")).into());
        }

        let version = u16::from_le_bytes([data[8], data[9]]);
        if version != LOG_VERSION {
            return Err(StorageError(format!("unsupported log version: {version}")).into());
        }

        let crc32 = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        let header = Self {
            magic,
            version,
            crc32,
        };
        if header.compute_crc32() != crc32 {
            return Err(StorageError("log header CRC32 mismatch".into()).into());
        }
        Ok(header)
    }

    fn compute_crc32(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&self.magic);
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&[0u8, 0u8]);
        hasher.finalize()
    }
}

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    payload_len: u32,
    prev_offset: u32,
    crc32: u32,
}

impl RecordHeader {
    fn serialize(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.prev_offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.crc32.to_le_bytes());
        buf
    }

    fn deserialize(data: &[u8; RECORD_HEADER_SIZE]) -> Self {
        Self {
            payload_len: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            prev_offset: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            crc32: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
        }
    }
}

fn record_crc(payload_len: u32, prev_offset: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&payload_len.to_le_bytes());
    hasher.update(&prev_offset.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Outcome of reading one record at a given offset.
enum ReadOutcome {
    Record { payload: Vec<u8>, next_offset: u64 },
    End,
    Corrupt(String),
}

fn read_record_at(file: &mut File, offset: u64, file_len: u64) -> Result<ReadOutcome, TxnError> {
    if offset + RECORD_HEADER_SIZE as u64 > file_len {
        return Ok(if offset == file_len {
            ReadOutcome::End
        } else {
            ReadOutcome::Corrupt(format!("partial record header at offset {offset}"))
        });
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut header_bytes = [0u8; RECORD_HEADER_SIZE];
    file.read_exact(&mut header_bytes)?;
    let header = RecordHeader::deserialize(&header_bytes);

    let payload_end = offset + RECORD_HEADER_SIZE as u64 + u64::from(header.payload_len);
    if payload_end > file_len {
        return Ok(ReadOutcome::Corrupt(format!(
            "record at offset {offset} runs past end of file"
        )));
    }

    let mut payload = vec![0u8; header.payload_len as usize];
    file.read_exact(&mut payload)?;

    let computed = record_crc(header.payload_len, header.prev_offset, &payload);
    if computed != header.crc32 {
        return Ok(ReadOutcome::Corrupt(format!(
            "checksum mismatch at offset {offset}: expected {:08x}, got {computed:08x}",
            header.crc32
        )));
    }

    Ok(ReadOutcome::Record {
        payload,
        next_offset: payload_end,
    })
}

#[derive(Debug)]
struct FileLogInner {
    file: File,
    write_buffer: Vec<u8>,
    buffer_capacity: usize,
    /// File offset of the first buffered byte.
    buffer_start: u32,
    /// Offset the next record will be written at.
    next_offset: u32,
    /// Offset of the most recently appended record, 0 if none.
    last_record: u32,
    /// Everything below this offset has been fsynced.
    synced_offset: u32,
}

impl FileLogInner {
    const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

    fn append(&mut self, payload: &[u8]) -> Result<Lsn, TxnError> {
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| StorageError(format!("log record too large: {} bytes", payload.len())))?;
        let record_size = RECORD_HEADER_SIZE as u32 + payload_len;
        let lsn_offset = self.next_offset;
        let next_offset = lsn_offset
            .checked_add(record_size)
            .ok_or_else(|| StorageError("log file exceeds addressable size".into()))?;

        let header = RecordHeader {
            payload_len,
            prev_offset: self.last_record,
            crc32: record_crc(payload_len, self.last_record, payload),
        };

        self.write_buffered(&header.serialize())?;
        self.write_buffered(payload)?;

        self.last_record = lsn_offset;
        self.next_offset = next_offset;
        Ok(Lsn::new(LOG_FILE_ID, lsn_offset))
    }

    fn flush_buffer(&mut self) -> Result<(), TxnError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        let buffered = self.write_buffer.len() as u32;
        self.file.seek(SeekFrom::Start(u64::from(self.buffer_start)))?;
        self.file.write_all(&self.write_buffer)?;
        self.write_buffer.clear();
        self.buffer_start += buffered;
        Ok(())
    }

    fn write_buffered(&mut self, data: &[u8]) -> Result<(), TxnError> {
        if self.write_buffer.len() + data.len() > self.buffer_capacity {
            self.flush_buffer()?;
        }
        self.write_buffer.extend_from_slice(data);
        Ok(())
    }

    /// Writes out the buffer and returns the offset an fsync must cover, or
    /// `None` when `up_to` is already durable.
    fn prepare_sync(&mut self, up_to: Lsn) -> Result<Option<u32>, TxnError> {
        if !up_to.is_zero() && up_to.offset < self.synced_offset {
            return Ok(None);
        }
        self.flush_buffer()?;
        Ok(Some(self.next_offset))
    }
}

impl Drop for FileLogInner {
    fn drop(&mut self) {
        // The next open truncates anything torn.
        let _ = self.flush_buffer();
    }
}

/// File-backed [`LogFacility`].
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    inner: Mutex<FileLogInner>,
    /// Second handle on the log file, fsynced without holding `inner`.
    sync_file: File,
    /// Mirror of `inner.next_offset` for lock-free `current_lsn`.
    next_offset: AtomicU32,
}

impl FileLog {
    pub fn path_for_dir<P: AsRef<Path>>(dir: P) -> PathBuf {
        dir.as_ref().join(LOG_FILE_NAME)
    }

    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, TxnError> {
        let path = Self::path_for_dir(dir);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&LogFileHeader::new().serialize())?;
        file.sync_all()?;

        Self::from_parts(path, file, LOG_FILE_HEADER_SIZE as u32, 0)
    }

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, TxnError> {
        let path = Self::path_for_dir(dir);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header_bytes = vec![0u8; LOG_FILE_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        LogFileHeader::deserialize(&header_bytes)?;

        let file_len = file.metadata()?.len();
        let mut offset = LOG_FILE_HEADER_SIZE as u64;
        let mut last_record = 0u64;
        loop {
            match read_record_at(&mut file, offset, file_len)? {
                ReadOutcome::Record { next_offset, .. } => {
                    last_record = offset;
                    offset = next_offset;
                }
                ReadOutcome::End => break,
                ReadOutcome::Corrupt(reason) => {
                    warn!(offset, %reason, "truncating invalid log tail");
                    file.set_len(offset)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        let next_offset = u32::try_from(offset)
            .map_err(|_| StorageError(format!("log file too large: {offset} bytes")))?;

        Self::from_parts(path, file, next_offset, last_record as u32)
    }

    fn from_parts(
        path: PathBuf,
        file: File,
        next_offset: u32,
        last_record: u32,
    ) -> Result<Self, TxnError> {
        let sync_file = file.try_clone()?;
        Ok(Self {
            path,
            inner: Mutex::new(FileLogInner {
                file,
                write_buffer: Vec::with_capacity(FileLogInner::DEFAULT_BUFFER_CAPACITY),
                buffer_capacity: FileLogInner::DEFAULT_BUFFER_CAPACITY,
                buffer_start: next_offset,
                next_offset,
                last_record,
                synced_offset: next_offset,
            }),
            sync_file,
            next_offset: AtomicU32::new(next_offset),
        })
    }

    pub fn open_or_create<P: AsRef<Path>>(dir: P) -> Result<Self, TxnError> {
        if Self::path_for_dir(dir.as_ref()).exists() {
            Self::open(dir)
        } else {
            Self::create(dir)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogFacility for FileLog {
    fn append(&self, record: &[u8]) -> Result<Lsn, TxnError> {
        let mut inner = self.inner.lock();
        let lsn = inner.append(record)?;
        self.next_offset.store(inner.next_offset, Ordering::Release);
        Ok(lsn)
    }

    fn flush(&self, up_to: Lsn) -> Result<(), TxnError> {
        let Some(target) = self.inner.lock().prepare_sync(up_to)? else {
            return Ok(());
        };
        // Appends may continue while the fsync runs.
        self.sync_file.sync_all()?;
        let mut inner = self.inner.lock();
        inner.synced_offset = inner.synced_offset.max(target);
        Ok(())
    }

    fn current_lsn(&self) -> Lsn {
        Lsn::new(LOG_FILE_ID, self.next_offset.load(Ordering::Acquire))
    }

    fn read(&self, lsn: Lsn) -> Result<Vec<u8>, TxnError> {
        if lsn.file != LOG_FILE_ID || (lsn.offset as usize) < LOG_FILE_HEADER_SIZE {
            return Err(StorageError(format!("LSN {lsn} is outside the log")).into());
        }
        let mut inner = self.inner.lock();
        inner.flush_buffer()?;
        let file_len = u64::from(inner.next_offset);
        match read_record_at(&mut inner.file, u64::from(lsn.offset), file_len)? {
            ReadOutcome::Record { payload, .. } => Ok(payload),
            ReadOutcome::End => Err(StorageError(format!("no log record at {lsn}")).into()),
            ReadOutcome::Corrupt(reason) => {
                Err(StorageError(format!("corrupt log record at {lsn}: {reason}")).into())
            }
        }
    }

    fn scan(
        &self,
        visit: &mut dyn FnMut(Lsn, &[u8]) -> Result<(), TxnError>,
    ) -> Result<(), TxnError> {
        let mut offset = LOG_FILE_HEADER_SIZE as u64;
        loop {
            let outcome = {
                let mut inner = self.inner.lock();
                inner.flush_buffer()?;
                let file_len = u64::from(inner.next_offset);
                read_record_at(&mut inner.file, offset, file_len)?
            };
            match outcome {
                ReadOutcome::Record {
                    payload,
                    next_offset,
                } => {
                    visit(Lsn::new(LOG_FILE_ID, offset as u32), &payload)?;
                    offset = next_offset;
                }
                ReadOutcome::End => return Ok(()),
                ReadOutcome::Corrupt(reason) => {
                    return Err(StorageError(format!("corrupt log during scan: {reason}")).into())
                }
            }
        }
    }
}
