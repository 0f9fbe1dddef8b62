//! A fixed-capacity binary-buddy allocator.
//!
//! A [`BuddyArena`] manages one contiguous region of `2^max_order` bytes. The
//! region is partitioned into blocks whose sizes are powers of two, from one
//! page (`2^min_order` bytes) up to the whole arena. Allocation splits the
//! smallest sufficient free block; release merges a block with its buddy for
//! as long as the buddy is free and of the same order.
//!
//! ```
//! use buddy_arena::BuddyArena;
//!
//! // 4 KiB pages, 1 MiB arena.
//! let mut arena = BuddyArena::try_new(12, 20).unwrap();
//!
//! let a = arena.allocate_offset(5000).unwrap();
//! assert_eq!(arena.block_order(a), Some(13));
//!
//! arena.release_offset(a).unwrap();
//! assert_eq!(arena.free_bytes(), 1 << 20);
//! ```
//!
//! The allocator performs no internal locking. All mutating operations take
//! `&mut self`, so sharing an arena between threads requires an external lock.

#![doc(html_root_url = "https://docs.rs/buddy_arena/0.1.0")]
#![no_std]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(docs_rs, feature(doc_cfg))]
// This is necessary to allow `sptr` and `polyfill` to shadow methods which
// newer toolchains provide inherently.
#![allow(unstable_name_collisions)]

extern crate alloc;

#[cfg(feature = "log")]
#[allow(unused_imports)]
#[macro_use]
extern crate log;

// No-op stand-ins so that call sites compile unchanged without `log`.
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

mod base;
pub mod buddy;
mod free_list;
mod order;
mod page;
mod polyfill;
mod report;

#[cfg(test)]
mod tests;

use core::{alloc::Layout, fmt, ptr::NonNull};

pub use crate::{
    buddy::BuddyArena,
    order::{DEFAULT_MAX_ORDER, DEFAULT_MIN_ORDER},
    page::PageState,
    report::{FreeListReport, OrderStats},
};

/// The error type for allocator constructors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocInitError {
    /// A necessary allocation failed.
    ///
    /// This variant is returned when a constructor cannot allocate the
    /// managed region or the page descriptors and free lists that track it.
    ///
    /// The variant contains the [`Layout`] that could not be allocated.
    AllocFailed(Layout),

    /// The configuration of the allocator is invalid.
    ///
    /// This variant is returned when the requested order range is impossible
    /// to satisfy, e.g. `min_order > max_order`.
    InvalidConfig,
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::AllocFailed(layout) => write!(
                f,
                "failed to allocate {} bytes aligned to {}",
                layout.size(),
                layout.align()
            ),
            AllocInitError::InvalidConfig => f.write_str("invalid allocator configuration"),
        }
    }
}

/// Indicates that an allocation request could not be satisfied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The requested size was zero.
    ZeroSize,
    /// The requested size exceeds the capacity of the whole arena.
    OutOfRange,
    /// No free block of sufficient size is available.
    OutOfMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllocError::ZeroSize => "zero-sized allocation",
            AllocError::OutOfRange => "allocation larger than the arena",
            AllocError::OutOfMemory => "no free block large enough",
        })
    }
}

/// Indicates that a block could not be released.
///
/// A rejected release leaves the allocator untouched.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReleaseError {
    /// The address lies outside the arena.
    OutOfBounds,
    /// The address is not on a page boundary.
    Misaligned,
    /// The address does not start a currently allocated block.
    ///
    /// This covers double release and addresses in the interior of a block.
    NotAllocated,
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReleaseError::OutOfBounds => "address outside the arena",
            ReleaseError::Misaligned => "address not on a page boundary",
            ReleaseError::NotAllocated => "address does not start an allocated block",
        })
    }
}

/// A broken allocator invariant, as reported by
/// [`BuddyArena::check_invariants`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The page is not covered by any block.
    Uncovered {
        /// Index of the page.
        page: usize,
    },
    /// The page is claimed by more than one block.
    Overlap {
        /// Index of the page.
        page: usize,
    },
    /// The block headed by `page` is not aligned to its size.
    Misaligned {
        /// Index of the head page.
        page: usize,
        /// Order of the block.
        order: u32,
    },
    /// The free list of `order` disagrees with the page descriptors about
    /// `page`.
    FreeListMismatch {
        /// Index of the head page.
        page: usize,
        /// Order of the free list.
        order: u32,
    },
    /// The free list of `order` is not sorted by ascending page index.
    Unsorted {
        /// Order of the free list.
        order: u32,
    },
    /// The block headed by `page` and its buddy are both free, but were not
    /// merged.
    Unmerged {
        /// Index of the lower head page.
        page: usize,
        /// Order of both blocks.
        order: u32,
    },
    /// Free and allocated bytes do not add up to the arena size.
    Conservation {
        /// Bytes held by free blocks.
        free: usize,
        /// Bytes held by allocated blocks.
        used: usize,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            InvariantViolation::Uncovered { page } => {
                write!(f, "page {page} is not covered by any block")
            }
            InvariantViolation::Overlap { page } => {
                write!(f, "page {page} is covered by more than one block")
            }
            InvariantViolation::Misaligned { page, order } => {
                write!(f, "order {order} block at page {page} is misaligned")
            }
            InvariantViolation::FreeListMismatch { page, order } => {
                write!(f, "order {order} free list disagrees about page {page}")
            }
            InvariantViolation::Unsorted { order } => {
                write!(f, "order {order} free list is not sorted")
            }
            InvariantViolation::Unmerged { page, order } => {
                write!(f, "free order {order} buddies at page {page} were not merged")
            }
            InvariantViolation::Conservation { free, used } => {
                write!(f, "{free} free bytes and {used} used bytes do not cover the arena")
            }
        }
    }
}

/// Types which provide the memory region backing an allocator.
///
/// This trait is sealed, and is implemented by the following types:
/// - The `Raw` marker type indicates that an allocator is not backed by another
///   allocator. This is the case when constructing the allocator from a raw
///   pointer. The region can be reclaimed using `.into_raw_parts()`.
/// - The `Global` marker type indicates that an allocator is backed by the
///   global allocator. The allocator will free its region on drop.
pub trait BackingAllocator: Sealed {
    /// Deallocates the memory referenced by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block of memory currently allocated via this
    /// allocator, and `layout` must be the layout it was allocated with.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// A marker type indicating that an allocator is backed by raw pointers.
#[derive(Clone, Debug)]
pub struct Raw;
impl Sealed for Raw {}
impl BackingAllocator for Raw {
    unsafe fn deallocate(&self, _: NonNull<u8>, _: Layout) {}
}

/// The global memory allocator.
#[cfg(any(feature = "alloc", test))]
#[cfg_attr(docs_rs, doc(cfg(feature = "alloc")))]
#[derive(Clone, Debug)]
pub struct Global;

#[cfg(any(feature = "alloc", test))]
impl Sealed for Global {}

#[cfg(any(feature = "alloc", test))]
impl BackingAllocator for Global {
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

#[doc(hidden)]
mod private {
    pub trait Sealed {}
}
use private::Sealed;
