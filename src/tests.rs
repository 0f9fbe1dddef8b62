#![cfg(test)]
extern crate std;

use core::cmp;

use alloc::{boxed::Box, vec::Vec};
use quickcheck::{Arbitrary, Gen, QuickCheck};

use crate::{AllocError, BuddyArena, Global};

// Parameters =================================================================

/// The order range of an arena under test.
#[derive(Copy, Clone, Debug)]
struct ArenaParams {
    min_order: u32,
    max_order: u32,
}

impl ArenaParams {
    fn arena(self) -> BuddyArena<Global> {
        BuddyArena::try_new(self.min_order, self.max_order).unwrap()
    }
}

impl Arbitrary for ArenaParams {
    fn arbitrary(g: &mut Gen) -> Self {
        // Keep arenas small so that exhaustion and full coalescing both occur.
        let min_order = u32::arbitrary(g) % 9;
        let max_order = min_order + u32::arbitrary(g) % 8;

        ArenaParams {
            min_order,
            max_order,
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let ArenaParams {
            min_order,
            max_order,
        } = *self;

        let narrower = (max_order > min_order).then(|| ArenaParams {
            min_order,
            max_order: max_order - 1,
        });
        let smaller = (min_order > 0).then(|| ArenaParams {
            min_order: min_order - 1,
            max_order: max_order - 1,
        });

        Box::new(narrower.into_iter().chain(smaller))
    }
}

enum AllocatorOpTag {
    Allocate,
    Free,
}

#[derive(Clone, Debug)]
enum AllocatorOp {
    /// Allocate a block of at least `size` bytes.
    Allocate { size: usize },
    /// Free an existing allocation.
    ///
    /// Given `n` outstanding allocations, the allocation to free is at index
    /// `index % n`.
    Free { index: usize },
}

/// Limit on allocation size, expressed in bits.
const ALLOC_LIMIT_BITS: u8 = 16;

fn limited_size(g: &mut Gen) -> usize {
    // Try to distribute allocations evenly between powers of two.
    let exp = u8::arbitrary(g) % (ALLOC_LIMIT_BITS + 1);
    usize::arbitrary(g) % 2_usize.pow(exp.into())
}

impl Arbitrary for AllocatorOp {
    fn arbitrary(g: &mut Gen) -> Self {
        match g
            .choose(&[AllocatorOpTag::Allocate, AllocatorOpTag::Free])
            .unwrap()
        {
            AllocatorOpTag::Allocate => AllocatorOp::Allocate {
                size: limited_size(g),
            },
            AllocatorOpTag::Free => AllocatorOp::Free {
                index: usize::arbitrary(g),
            },
        }
    }
}

// Checker ====================================================================

type OpId = u32;

/// A live allocation, painted with the id of the operation that created it.
struct Allocation {
    id: OpId,
    offset: usize,
    size: usize,
}

fn paint(arena: &mut BuddyArena<Global>, a: &Allocation) {
    let id_bytes = a.id.to_le_bytes().into_iter().cycle();
    let block = arena.block_mut(a.offset).unwrap();

    for (byte, value) in block.iter_mut().zip(id_bytes) {
        *byte = value;
    }
}

fn verify(arena: &BuddyArena<Global>, a: &Allocation) -> bool {
    let id_bytes = a.id.to_le_bytes().into_iter().cycle();

    match arena.block(a.offset) {
        Some(block) => block.iter().zip(id_bytes).all(|(&b, v)| b == v),
        None => false,
    }
}

struct AllocatorChecker {
    arena: BuddyArena<Global>,
    allocations: Vec<Allocation>,
    num_ops: u32,
}

impl AllocatorChecker {
    fn new(params: ArenaParams, capacity: usize) -> AllocatorChecker {
        AllocatorChecker {
            arena: params.arena(),
            allocations: Vec::with_capacity(capacity),
            num_ops: 0,
        }
    }

    /// Checks the result of an allocation of `size` bytes.
    fn post_allocate(&self, size: usize, res: Result<usize, AllocError>) -> bool {
        let arena = &self.arena;

        match res {
            Ok(offset) => {
                let Some(order) = arena.block_order(offset) else {
                    return false;
                };
                let block_size = 1_usize << order;

                // Minimal, aligned, and inside the arena.
                let minimal = order == arena.min_order() || block_size / 2 < size;
                block_size >= size
                    && minimal
                    && offset % block_size == 0
                    && offset + block_size <= arena.total_bytes()
            }
            Err(AllocError::ZeroSize) => size == 0,
            Err(AllocError::OutOfRange) => size > arena.total_bytes(),
            Err(AllocError::OutOfMemory) => {
                // Fail only if no free block could have held the request.
                let needed = cmp::max(size.next_power_of_two(), arena.page_size());
                (needed.trailing_zeros()..=arena.max_order())
                    .all(|o| arena.free_blocks(o).next().is_none())
            }
        }
    }

    fn do_op(&mut self, op: AllocatorOp) -> bool {
        let op_id = self.num_ops;
        self.num_ops += 1;

        match op {
            AllocatorOp::Allocate { size } => {
                let res = self.arena.allocate_offset(size);

                if !self.post_allocate(size, res) {
                    return false;
                }

                if let Ok(offset) = res {
                    let a = Allocation {
                        id: op_id,
                        offset,
                        size,
                    };
                    paint(&mut self.arena, &a);
                    self.allocations.push(a);
                }
            }

            AllocatorOp::Free { index } => {
                if self.allocations.is_empty() {
                    return true;
                }

                let index = index % self.allocations.len();
                let a = self.allocations.swap_remove(index);

                if !verify(&self.arena, &a) {
                    return false;
                }

                if self.arena.release_offset(a.offset).is_err() {
                    return false;
                }
            }
        }

        self.arena.check_invariants().is_ok()
    }

    fn run(&mut self, ops: Vec<AllocatorOp>) -> bool {
        if !ops.into_iter().all(|op| self.do_op(op)) {
            return false;
        }

        let requested: usize = self.allocations.iter().map(|a| a.size).sum();
        if requested > self.arena.used_bytes() {
            return false;
        }

        // Free any outstanding allocations.
        for a in self.allocations.drain(..) {
            if !verify(&self.arena, &a) || self.arena.release_offset(a.offset).is_err() {
                return false;
            }
        }

        // Everything coalesces back into the single initial block.
        let report = self.arena.dump();
        self.arena.check_invariants().is_ok()
            && report.free_blocks(self.arena.max_order()) == 1
            && report.free_bytes() == self.arena.total_bytes()
    }
}

// Miri is substantially slower to run property tests, so the number of test
// cases is reduced to keep the runtime in check.

#[cfg(not(miri))]
const MAX_TESTS: u64 = 100;

#[cfg(miri)]
const MAX_TESTS: u64 = 20;

// Properties =================================================================

fn arbitrary_ops_keep_invariants(params: ArenaParams, ops: Vec<AllocatorOp>) -> bool {
    let mut checker = AllocatorChecker::new(params, ops.len());
    checker.run(ops)
}

#[test]
fn allocations_are_mutually_exclusive_and_coalesce() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(arbitrary_ops_keep_invariants as fn(_, _) -> bool);
}

fn allocate_then_release_is_identity(params: ArenaParams, size: usize) -> bool {
    let mut arena = params.arena();
    let size = size % arena.total_bytes() + 1;

    let before = arena.dump();
    let offset = match arena.allocate_offset(size) {
        Ok(o) => o,
        Err(_) => return false,
    };

    // A fresh arena always serves from the lowest address.
    if offset != 0 || arena.used_bytes() < size {
        return false;
    }

    arena.release_offset(offset).is_ok() && arena.dump() == before && arena.used_bytes() == 0
}

#[test]
fn allocate_release_inverse() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(allocate_then_release_is_identity as fn(_, _) -> bool);
}

fn conservation_holds(params: ArenaParams, sizes: Vec<usize>) -> bool {
    let mut arena = params.arena();
    let total = arena.total_bytes();

    for size in sizes {
        let _ = arena.allocate_offset(size % (total * 2));

        if arena.free_bytes() + arena.used_bytes() != total {
            return false;
        }
    }

    true
}

#[test]
fn free_and_used_bytes_cover_the_arena() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(conservation_holds as fn(_, _) -> bool);
}

fn double_release_is_rejected(params: ArenaParams, sizes: Vec<usize>) -> bool {
    let mut arena = params.arena();
    let total = arena.total_bytes();

    let offsets: Vec<usize> = sizes
        .into_iter()
        .filter_map(|s| arena.allocate_offset(s % total + 1).ok())
        .collect();

    for &offset in &offsets {
        if arena.release_offset(offset).is_err() {
            return false;
        }

        let snapshot = arena.dump();
        if arena.release_offset(offset).is_ok() || arena.dump() != snapshot {
            return false;
        }
    }

    arena.check_invariants().is_ok()
}

#[test]
fn releasing_twice_fails_without_side_effects() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(double_release_is_rejected as fn(_, _) -> bool);
}

// Version sync ================================================================
#[test]
fn html_root_url() {
    version_sync::assert_html_root_url_updated!("src/lib.rs");
}

#[test]
fn readme_deps() {
    version_sync::assert_markdown_deps_updated!("README.md");
}
