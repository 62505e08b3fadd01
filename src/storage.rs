use crate::error::ErrorKind;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};
use log::error;

pub const SECTOR_SHIFT: u32 = 9;

/// Request addressing unit. Independent of the logical block size.
pub const SECTOR_SIZE: usize = 1 << SECTOR_SHIFT;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sector(pub u64);

impl Sector {
    /// Byte offset of this sector, `None` if it does not fit in a `u64`.
    pub fn offset(self) -> Option<u64> {
        self.0.checked_mul(SECTOR_SIZE as u64)
    }
}

/// The bytes of the device.
///
/// Cells are relaxed atomics: request processing takes no lock, so two
/// requests touching the same bytes at once interleave in an unspecified
/// order, but never tear memory safety.
pub struct BackingStore {
    cells: Box<[AtomicU8]>,
}

impl BackingStore {
    /// Allocate `nbytes` of zeroed storage. Fails instead of aborting when the
    /// allocator cannot satisfy the request.
    pub fn allocate(nbytes: usize) -> Result<Self, ErrorKind> {
        let mut cells: Vec<AtomicU8> = Vec::new();
        if cells.try_reserve_exact(nbytes).is_err() {
            error!("memory allocation failed for the RAM disk ({} bytes)", nbytes);
            return Err(ErrorKind::AllocationFailed);
        }
        cells.resize_with(nbytes, || AtomicU8::new(0));
        Ok(BackingStore {
            cells: cells.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of whole sectors held.
    pub fn capacity(&self) -> Sector {
        Sector((self.cells.len() >> SECTOR_SHIFT) as u64)
    }

    /// View of `len` bytes starting at `offset`, or `None` when any part of
    /// the range lies outside the store.
    pub fn extent(&self, offset: usize, len: usize) -> Option<Extent<'_>> {
        let end = offset.checked_add(len)?;
        self.cells.get(offset..end).map(|cells| Extent { cells })
    }
}

/// A bounds-checked window into the backing store.
pub struct Extent<'a> {
    cells: &'a [AtomicU8],
}

impl<'a> Extent<'a> {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Copy the whole extent into `dst`, which must be the same length.
    pub fn copy_to(&self, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.cells.len());
        for (byte, cell) in dst.iter_mut().zip(self.cells) {
            *byte = cell.load(Ordering::Relaxed);
        }
    }

    /// Overwrite the whole extent from `src`, which must be the same length.
    pub fn copy_from(&self, src: &[u8]) {
        debug_assert_eq!(src.len(), self.cells.len());
        for (cell, byte) in self.cells.iter().zip(src) {
            cell.store(*byte, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_allocate_zeroed() {
        let store = BackingStore::allocate(4 * SECTOR_SIZE).unwrap();
        assert_eq!(store.len(), 2048);
        assert_eq!(store.capacity(), Sector(4));

        let mut data = vec![0xAAu8; store.len()];
        store.extent(0, store.len()).unwrap().copy_to(&mut data);
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_allocate_failure() {
        assert_eq!(
            BackingStore::allocate(1 << 60).err(),
            Some(ErrorKind::AllocationFailed)
        );
    }

    #[test]
    fn test_extent_bounds() {
        let store = BackingStore::allocate(1024).unwrap();
        assert_eq!(store.extent(0, 1024).unwrap().len(), 1024);
        assert_eq!(store.extent(1024, 0).unwrap().len(), 0);
        assert!(store.extent(512, 513).is_none());
        assert!(store.extent(1025, 0).is_none());
        assert!(store.extent(usize::MAX, 2).is_none());
    }

    #[test]
    fn test_extent_copy() {
        let store = BackingStore::allocate(2048).unwrap();
        let txt = rust_counter_strings::generate(700);
        let data = txt.as_bytes();
        store.extent(100, data.len()).unwrap().copy_from(data);

        let mut data2 = vec![0u8; data.len()];
        store.extent(100, data.len()).unwrap().copy_to(&mut data2);
        assert_eq!(&data2[..], data);

        // Bytes on either side stay untouched.
        let mut edge = [0xFFu8; 1];
        store.extent(99, 1).unwrap().copy_to(&mut edge);
        assert_eq!(edge, [0]);
        store.extent(800, 1).unwrap().copy_to(&mut edge);
        assert_eq!(edge, [0]);
    }

    #[test]
    fn test_sector_offset() {
        assert_eq!(Sector(0).offset(), Some(0));
        assert_eq!(Sector(81919).offset(), Some(41_942_528));
        assert_eq!(Sector(u64::MAX).offset(), None);
    }
}
