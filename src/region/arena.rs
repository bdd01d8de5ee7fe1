//! Fixed-capacity slab with free-list reuse and generation-checked offsets.
//!
//! Records are addressed by [`RegionOffset`], never by reference, so growing
//! the slab cannot invalidate anything a handle holds. A freed slot bumps its
//! generation, which turns stale offsets into lookups that miss.

use std::fmt;

use serde::Serialize;

use crate::core::errors::TxnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RegionOffset {
    index: u32,
    generation: u32,
}

impl RegionOffset {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RegionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.generation)
    }
}

/// Returned by [`Arena::allocate`] when every slot is taken; hands the value
/// back so the caller can retry after growing.
#[derive(Debug)]
pub struct OutOfSpace<T>(pub T);

#[derive(Debug)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Free { generation: u32, next_free: Option<u32> },
}

#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    capacity: usize,
    free_head: Option<u32>,
    free_len: usize,
    live: usize,
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            free_head: None,
            free_len: 0,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Slots on the free list plus never-used slots below capacity.
    pub fn available(&self) -> usize {
        self.free_len + (self.capacity - self.slots.len())
    }

    pub fn allocate(&mut self, value: T) -> Result<RegionOffset, OutOfSpace<T>> {
        if let Some(index) = self.free_head {
            if let Some(&Slot::Free {
                generation,
                next_free,
            }) = self.slots.get(index as usize)
            {
                self.slots[index as usize] = Slot::Occupied { generation, value };
                self.free_head = next_free;
                self.free_len -= 1;
                self.live += 1;
                return Ok(RegionOffset { index, generation });
            }
        }

        if self.slots.len() >= self.capacity {
            return Err(OutOfSpace(value));
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        self.live += 1;
        Ok(RegionOffset {
            index,
            generation: 0,
        })
    }

    pub fn free(&mut self, offset: RegionOffset) -> Option<T> {
        let slot = self.slots.get_mut(offset.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == offset.generation => {}
            _ => return None,
        }
        let freed = std::mem::replace(
            slot,
            Slot::Free {
                generation: offset.generation.wrapping_add(1),
                next_free: self.free_head,
            },
        );
        self.free_head = Some(offset.index);
        self.free_len += 1;
        self.live -= 1;
        match freed {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Free { .. } => None,
        }
    }

    pub fn get(&self, offset: RegionOffset) -> Option<&T> {
        match self.slots.get(offset.index as usize)? {
            Slot::Occupied { generation, value } if *generation == offset.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, offset: RegionOffset) -> Option<&mut T> {
        match self.slots.get_mut(offset.index as usize)? {
            Slot::Occupied { generation, value } if *generation == offset.generation => Some(value),
            _ => None,
        }
    }

    /// Extends the slab to `new_capacity` slots. Existing offsets stay valid.
    pub fn grow(&mut self, new_capacity: usize) -> Result<(), TxnError> {
        if new_capacity <= self.capacity {
            return Err(TxnError::RegionGrowFailed(format!(
                "new capacity {new_capacity} does not exceed current {}",
                self.capacity
            )));
        }
        self.slots
            .try_reserve(new_capacity - self.slots.len())
            .map_err(|e| TxnError::RegionGrowFailed(e.to_string()))?;
        self.capacity = new_capacity;
        Ok(())
    }
}
