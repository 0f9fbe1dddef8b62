//! Translation between sizes, orders, pages and offsets.

use core::{alloc::Layout, cmp};

use crate::{AllocError, AllocInitError};

/// The minimum block order of the classic configuration (4 KiB pages).
pub const DEFAULT_MIN_ORDER: u32 = 12;

/// The maximum block order of the classic configuration (1 MiB arena).
pub const DEFAULT_MAX_ORDER: u32 = 20;

/// The order range of an arena.
///
/// Orders are the base-2 logarithms of block sizes. Blocks of `min_order` are
/// pages; the single block of `max_order` is the whole arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    min_order: u32,
    max_order: u32,
}

impl Geometry {
    pub fn new(min_order: u32, max_order: u32) -> Result<Geometry, AllocInitError> {
        // The arena size and its successor must both be representable, and
        // the region must fit in an `isize`.
        if min_order > max_order || max_order >= usize::BITS - 1 {
            return Err(AllocInitError::InvalidConfig);
        }

        Ok(Geometry {
            min_order,
            max_order,
        })
    }

    #[inline]
    pub fn min_order(self) -> u32 {
        self.min_order
    }

    #[inline]
    pub fn max_order(self) -> u32 {
        self.max_order
    }

    #[inline]
    pub fn page_size(self) -> usize {
        Self::block_size(self.min_order)
    }

    #[inline]
    pub fn arena_size(self) -> usize {
        Self::block_size(self.max_order)
    }

    #[inline]
    pub fn num_pages(self) -> usize {
        1 << (self.max_order - self.min_order)
    }

    #[inline]
    pub fn num_orders(self) -> usize {
        (self.max_order - self.min_order + 1) as usize
    }

    /// Returns the orders of the arena, smallest first.
    #[inline]
    pub fn orders(self) -> impl DoubleEndedIterator<Item = u32> + Clone {
        self.min_order..=self.max_order
    }

    #[inline]
    pub fn block_size(order: u32) -> usize {
        1 << order
    }

    /// Returns the number of pages in a block of `order`.
    #[inline]
    pub fn pages_in(self, order: u32) -> usize {
        1 << (order - self.min_order)
    }

    /// Returns the layout of the region managed by an arena of this geometry.
    pub fn region_layout(self) -> Result<Layout, AllocInitError> {
        Layout::from_size_align(self.arena_size(), self.page_size())
            .map_err(|_| AllocInitError::InvalidConfig)
    }

    /// Returns the smallest order whose blocks can hold `size` bytes.
    pub fn order_for(self, size: usize) -> Result<u32, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        if size > self.arena_size() {
            return Err(AllocError::OutOfRange);
        }

        // `size <= 2^max_order < 2^(BITS - 1)`, so this cannot overflow.
        let order = size.next_power_of_two().trailing_zeros();

        Ok(cmp::max(order, self.min_order))
    }

    /// Returns the position of `order`'s free list in the free-list set.
    #[inline]
    pub fn level_of(self, order: u32) -> usize {
        debug_assert!((self.min_order..=self.max_order).contains(&order));

        (order - self.min_order) as usize
    }

    #[inline]
    pub fn page_to_offset(self, page: usize) -> usize {
        page << self.min_order
    }

    /// Returns the page containing `offset`.
    #[inline]
    pub fn offset_to_page(self, offset: usize) -> usize {
        offset >> self.min_order
    }

    #[inline]
    pub fn is_page_aligned(self, offset: usize) -> bool {
        offset & (self.page_size() - 1) == 0
    }

    /// Returns the offset of the buddy of the `order` block at `offset`.
    #[inline]
    pub fn buddy_offset(self, offset: usize, order: u32) -> usize {
        debug_assert!(order < self.max_order, "the arena block has no buddy");

        offset ^ Self::block_size(order)
    }

    /// Returns the head page of the buddy of the `order` block headed by
    /// `page`.
    #[inline]
    pub fn buddy_page(self, page: usize, order: u32) -> usize {
        self.offset_to_page(self.buddy_offset(self.page_to_offset(page), order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic() -> Geometry {
        Geometry::new(DEFAULT_MIN_ORDER, DEFAULT_MAX_ORDER).unwrap()
    }

    #[test]
    fn rejects_impossible_ranges() {
        assert_eq!(Geometry::new(13, 12), Err(AllocInitError::InvalidConfig));
        assert_eq!(
            Geometry::new(0, usize::BITS - 1),
            Err(AllocInitError::InvalidConfig)
        );
        assert!(Geometry::new(0, 0).is_ok());
        assert!(Geometry::new(5, 5).is_ok());
    }

    #[test]
    fn sizes() {
        let g = classic();
        assert_eq!(g.page_size(), 4096);
        assert_eq!(g.arena_size(), 1 << 20);
        assert_eq!(g.num_pages(), 256);
        assert_eq!(g.num_orders(), 9);
        assert_eq!(g.pages_in(12), 1);
        assert_eq!(g.pages_in(20), 256);
        assert_eq!(g.region_layout().unwrap().align(), 4096);
    }

    #[test]
    fn order_is_minimal() {
        let g = classic();

        assert_eq!(g.order_for(0), Err(AllocError::ZeroSize));
        assert_eq!(g.order_for(1), Ok(12));
        assert_eq!(g.order_for(4096), Ok(12));
        assert_eq!(g.order_for(4097), Ok(13));
        assert_eq!(g.order_for(5000), Ok(13));
        assert_eq!(g.order_for(8192), Ok(13));
        assert_eq!(g.order_for(1 << 20), Ok(20));
        assert_eq!(g.order_for((1 << 20) + 1), Err(AllocError::OutOfRange));
        assert_eq!(g.order_for(usize::MAX), Err(AllocError::OutOfRange));
    }

    #[test]
    fn buddies_flip_the_order_bit() {
        let g = classic();

        assert_eq!(g.buddy_offset(0, 12), 0x1000);
        assert_eq!(g.buddy_offset(0x1000, 12), 0);
        assert_eq!(g.buddy_offset(0x2000, 13), 0);
        assert_eq!(g.buddy_offset(0x80000, 19), 0);

        assert_eq!(g.buddy_page(0, 12), 1);
        assert_eq!(g.buddy_page(6, 13), 4);
        assert_eq!(g.buddy_page(128, 19), 0);
    }

    #[test]
    fn page_translation() {
        let g = classic();

        assert_eq!(g.page_to_offset(3), 0x3000);
        assert_eq!(g.offset_to_page(0x3000), 3);
        assert_eq!(g.offset_to_page(0x3fff), 3);
        assert!(g.is_page_aligned(0x3000));
        assert!(!g.is_page_aligned(0x3001));
        assert_eq!(g.level_of(12), 0);
        assert_eq!(g.level_of(20), 8);
    }
}
