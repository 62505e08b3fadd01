use crate::queue::{Locking, RamQueue};
use crate::storage::BackingStore;
use std::vec::Vec;

pub(crate) fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Self-describing bytes, so a misplaced copy shows up as a wrong offset.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    rust_counter_strings::generate(len).as_bytes().to_vec()
}

pub(crate) fn filled(len: usize, byte: u8) -> Vec<u8> {
    vec![byte; len]
}

pub(crate) fn make_queue(nbytes: usize, locking: Locking) -> RamQueue {
    RamQueue::new(BackingStore::allocate(nbytes).unwrap(), locking)
}
