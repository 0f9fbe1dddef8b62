//! Free-list diagnostics.

use alloc::vec::Vec;
use core::fmt;

/// The free blocks of one order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OrderStats {
    /// The order of the blocks.
    pub order: u32,
    /// The number of free blocks of this order.
    pub free_blocks: usize,
    /// The size of each block in bytes.
    pub block_size: usize,
}

impl OrderStats {
    /// Returns the number of free bytes held by blocks of this order.
    pub fn free_bytes(&self) -> usize {
        self.free_blocks * self.block_size
    }
}

/// A snapshot of every free list of an arena, smallest order first.
///
/// The `Display` implementation renders one `count:size` pair per order, with
/// sizes in KiB where they are whole KiB and in bytes otherwise:
///
/// ```
/// use buddy_arena::BuddyArena;
///
/// let arena = BuddyArena::try_new(12, 14).unwrap();
/// assert_eq!(arena.dump().to_string(), "0:4K 0:8K 1:16K");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeListReport {
    orders: Vec<OrderStats>,
}

impl FreeListReport {
    pub(crate) fn new(orders: Vec<OrderStats>) -> FreeListReport {
        FreeListReport { orders }
    }

    /// Returns the statistics for `order`, if it is an order of the arena.
    pub fn order(&self, order: u32) -> Option<&OrderStats> {
        let first = self.orders.first()?.order;
        self.orders.get(order.checked_sub(first)? as usize)
    }

    /// Returns the number of free blocks of `order`.
    ///
    /// Orders outside the arena have no free blocks.
    pub fn free_blocks(&self, order: u32) -> usize {
        self.order(order).map_or(0, |s| s.free_blocks)
    }

    /// Returns the total number of free bytes.
    pub fn free_bytes(&self) -> usize {
        self.orders.iter().map(OrderStats::free_bytes).sum()
    }

    /// Returns an iterator over the per-order statistics, smallest first.
    pub fn iter(&self) -> impl Iterator<Item = &OrderStats> + '_ {
        self.orders.iter()
    }
}

struct BlockSize(usize);

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 && self.0 % 1024 == 0 {
            write!(f, "{}K", self.0 / 1024)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

impl fmt::Display for FreeListReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stats) in self.orders.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }

            write!(f, "{}:{}", stats.free_blocks, BlockSize(stats.block_size))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::prelude::rust_2021::*;

    use super::*;

    fn report(counts: &[usize], min_order: u32) -> FreeListReport {
        FreeListReport::new(
            counts
                .iter()
                .zip(min_order..)
                .map(|(&free_blocks, order)| OrderStats {
                    order,
                    free_blocks,
                    block_size: 1 << order,
                })
                .collect(),
        )
    }

    #[test]
    fn renders_kib_pairs() {
        let r = report(&[0, 1, 0, 2], 12);
        assert_eq!(r.to_string(), "0:4K 1:8K 0:16K 2:32K");
    }

    #[test]
    fn renders_small_sizes_in_bytes() {
        let r = report(&[1, 0, 3], 9);
        assert_eq!(r.to_string(), "1:512B 0:1K 3:2K");
    }

    #[test]
    fn lookup_by_order() {
        let r = report(&[0, 1, 0, 2], 12);

        assert_eq!(r.free_blocks(13), 1);
        assert_eq!(r.free_blocks(15), 2);
        assert_eq!(r.free_blocks(11), 0);
        assert_eq!(r.free_blocks(16), 0);
        assert_eq!(r.order(14).map(|s| s.block_size), Some(1 << 14));
        assert_eq!(r.free_bytes(), (1 << 13) + 2 * (1 << 15));
    }
}
