#![deny(unsafe_op_in_unsafe_fn)]

use std::ptr::NonNull;

use arena_hater::Subject;
use buddy_arena::{AllocInitError, BuddyArena, Global};

pub struct BuddySubject(BuddyArena<Global>);

impl BuddySubject {
    pub fn new(min_order: u32, max_order: u32) -> Result<Self, AllocInitError> {
        let b = BuddyArena::try_new(min_order, max_order)?;
        Ok(BuddySubject(b))
    }

    pub fn arena(&self) -> &BuddyArena<Global> {
        &self.0
    }
}

impl Subject for BuddySubject {
    type AllocError = buddy_arena::AllocError;
    type ReleaseError = buddy_arena::ReleaseError;

    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError> {
        self.0.allocate(size)
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>) -> Result<(), Self::ReleaseError> {
        self.0.release(ptr)
    }

    fn check(&self) -> Result<(), String> {
        self.0.check_invariants().map_err(|e| e.to_string())
    }
}
