use std::fmt;

use serde::{Deserialize, Serialize};

/// Log Sequence Number - a position in the write-ahead log.
///
/// Ordered lexicographically on `(file, offset)`. `Lsn::ZERO` means "not yet
/// assigned".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Lsn {
    pub file: u32,
    pub offset: u32,
}

impl Lsn {
    pub const ZERO: Lsn = Lsn { file: 0, offset: 0 };

    pub fn new(file: u32, offset: u32) -> Self {
        Self { file, offset }
    }

    pub fn is_zero(&self) -> bool {
        self.file == 0 && self.offset == 0
    }

    /// Packs the pair into one integer with the same ordering.
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.file) << 32) | u64::from(self.offset)
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            file: (value >> 32) as u32,
            offset: value as u32,
        }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.file, self.offset)
    }
}
