//! Single-buffer arena backing an entire tree.
//!
//! Every node lives in one growable byte buffer and is referred to by its
//! offset from the start of that buffer. Growth may move the buffer, so
//! callers keep offsets and re-borrow slices after any mutation.

use tagtree_common::{NbtError, NbtResult};
use tracing::trace;

/// Page size used for standalone files.
pub const FILE_PAGE_SIZE: usize = 1024;

/// Page size used for region chunk entries.
pub const REGION_PAGE_SIZE: usize = 4096;

/// Rounds `n` up to the next multiple of 4.
#[must_use]
pub const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Growable byte arena with 4-byte aligned allocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arena {
    /// Backing buffer; `len()` is the write cursor
    mem: Vec<u8>,
    /// Growth granularity
    page: usize,
    /// Size of the most recent allocation
    last: usize,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(FILE_PAGE_SIZE)
    }
}

impl Arena {
    /// Creates an empty arena growing by multiples of `page` bytes.
    #[must_use]
    pub fn new(page: usize) -> Self {
        Self {
            mem: Vec::new(),
            page: page.max(4),
            last: 0,
        }
    }

    /// Creates an empty arena with `capacity` bytes reserved up front.
    pub fn with_capacity(page: usize, capacity: usize) -> NbtResult<Self> {
        let mut arena = Self::new(page);
        arena.reserve_total(capacity)?;
        Ok(arena)
    }

    /// Wraps bytes that already hold a tree (or fragment body).
    #[must_use]
    pub fn from_bytes(mem: Vec<u8>, page: usize) -> Self {
        Self {
            mem,
            page: page.max(4),
            last: 0,
        }
    }

    /// Bytes in use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    /// True when nothing has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Bytes allocated from the system.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mem.capacity()
    }

    /// Growth granularity.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page
    }

    /// Size (after alignment) of the most recent [`Arena::allocate`] call.
    #[must_use]
    pub const fn last_allocation_size(&self) -> usize {
        self.last
    }

    /// Used bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.mem
    }

    /// Used bytes, mutable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    /// Consumes the arena, returning the used bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.mem
    }

    /// Reserves `(size + 3) & !3` zeroed bytes at the cursor and returns their offset.
    pub fn allocate(&mut self, size: usize) -> NbtResult<usize> {
        let aligned = align4(size);
        let start = self.mem.len();
        self.reserve_total(start + aligned)?;
        self.mem.resize(start + aligned, 0);
        self.last = aligned;
        Ok(start)
    }

    /// Appends `bytes` (padded to 4) and returns their offset.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> NbtResult<usize> {
        let start = self.allocate(bytes.len())?;
        self.mem[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(start)
    }

    /// Drops everything past `len`.
    pub fn truncate(&mut self, len: usize) {
        self.mem.truncate(len);
    }

    /// Replaces `old_len` bytes at `offset` with `bytes`, moving the tail.
    pub fn splice(&mut self, offset: usize, old_len: usize, bytes: &[u8]) -> NbtResult<()> {
        let end = offset + old_len;
        if end > self.mem.len() {
            return Err(NbtError::StreamCorrupt(format!(
                "splice range {offset}..{end} past arena end {}",
                self.mem.len()
            )));
        }
        if bytes.len() > old_len {
            self.reserve_total(self.mem.len() + bytes.len() - old_len)?;
        }
        self.mem.splice(offset..end, bytes.iter().copied());
        Ok(())
    }

    /// Removes `len` bytes at `offset`, moving the tail down.
    pub fn remove(&mut self, offset: usize, len: usize) {
        let end = (offset + len).min(self.mem.len());
        self.mem.drain(offset..end);
    }

    /// Releases capacity beyond the used bytes rounded up to a page.
    pub fn shrink_to_page(&mut self) {
        let target = round_to_page(self.mem.len(), self.page);
        if target < self.mem.capacity() {
            self.mem.shrink_to(target);
        }
    }

    /// Makes sure the buffer can hold `total` bytes without reallocating.
    fn reserve_total(&mut self, total: usize) -> NbtResult<()> {
        if total <= self.mem.capacity() {
            return Ok(());
        }
        let target = round_to_page(total, self.page);
        self.mem
            .try_reserve_exact(target - self.mem.len())
            .map_err(|_| NbtError::OutOfMemory { requested: target })?;
        trace!("Arena grown to {} bytes", self.mem.capacity());
        Ok(())
    }
}

fn round_to_page(n: usize, page: usize) -> usize {
    n.div_ceil(page) * page
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_aligned() {
        let mut arena = Arena::new(16);
        assert_eq!(arena.allocate(1).expect("alloc"), 0);
        assert_eq!(arena.last_allocation_size(), 4);
        assert_eq!(arena.allocate(5).expect("alloc"), 4);
        assert_eq!(arena.last_allocation_size(), 8);
        assert_eq!(arena.len(), 12);
    }

    #[test]
    fn test_growth_rounds_to_page() {
        let mut arena = Arena::new(1024);
        arena.allocate(10).expect("alloc");
        assert!(arena.capacity() >= 1024);
        arena.allocate(2000).expect("alloc");
        assert!(arena.capacity() >= 2048);
        assert_eq!(arena.len(), 12 + 2000);
    }

    #[test]
    fn test_offsets_survive_growth() {
        let mut arena = Arena::new(4);
        let first = arena.push_bytes(&[1, 2, 3, 4]).expect("push");
        for _ in 0..100 {
            arena.allocate(64).expect("alloc");
        }
        assert_eq!(&arena.as_slice()[first..first + 4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_splice_grows_and_shrinks() {
        let mut arena = Arena::from_bytes(vec![1, 2, 3, 4, 5, 6, 7, 8], 4);
        arena.splice(4, 4, &[9, 9, 9, 9, 9, 9, 9, 9]).expect("splice");
        assert_eq!(arena.as_slice(), &[1, 2, 3, 4, 9, 9, 9, 9, 9, 9, 9, 9]);
        arena.splice(0, 8, &[0, 0, 0, 0]).expect("splice");
        assert_eq!(arena.as_slice(), &[0, 0, 0, 0, 9, 9, 9, 9]);
        assert!(arena.splice(6, 8, &[]).is_err());
    }

    #[test]
    fn test_shrink_to_page() {
        let mut arena = Arena::with_capacity(4096, 100 * 1024).expect("reserve");
        arena.allocate(5000).expect("alloc");
        arena.shrink_to_page();
        assert!(arena.capacity() >= 5000);
        assert!(arena.capacity() < 100 * 1024);
    }
}
