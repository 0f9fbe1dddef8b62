//! Binary-buddy allocation.
//!
//! A buddy allocator manages a region of `2^max_order` bytes, divided into
//! blocks whose sizes are powers of two. The smallest blocks are pages of
//! `2^min_order` bytes. Initially the whole region is a single free block.
//!
//! An allocation is served from the smallest free block that can hold it. If
//! no block of exactly that size is free, a larger block is split in half
//! repeatedly; the lower half is kept and the upper half of each split is put
//! on the free list of its order. When a block is released, it is merged with
//! its *buddy* (the other half of the block it was split from) whenever the
//! buddy is also free, and the merged block is merged again with its own buddy,
//! and so on up to the whole region.
//!
//! Free blocks of each order are kept sorted by address, and allocation always
//! takes the lowest one, so the addresses returned by a given sequence of
//! operations are deterministic.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! With `L = max_order - min_order` and `n` the length of the longest free
//! list:
//!
//! | Operation                | Best-case | Worst-case  |
//! |--------------------------|-----------|-------------|
//! | Allocate                 | O(n)      | O(L * n)    |
//! | Release                  | O(n)      | O(L * n)    |
//!
//! Free lists are sorted vectors, so taking or inserting a block shifts the
//! entries after it.
//!
//! #### Fragmentation
//!
//! Every allocation is rounded up to a power of two no smaller than a page,
//! so internal fragmentation is below 50% for requests larger than a page.
//! External fragmentation is limited by merging buddies eagerly on release.

use alloc::vec::Vec;
use core::{alloc::Layout, cmp, fmt, ptr, ptr::NonNull};

#[cfg(any(feature = "alloc", test))]
use crate::Global;

use crate::{
    base::BasePtr,
    free_list::FreeList,
    order::Geometry,
    page::{PageState, PageTable},
    polyfill::NonNullStrict,
    report::{FreeListReport, OrderStats},
    AllocError, AllocInitError, BackingAllocator, InvariantViolation, Raw, ReleaseError,
};

/// A binary-buddy allocator over a single arena.
///
/// For a discussion of buddy allocation, see the [module-level
/// documentation].
///
/// [module-level documentation]: crate::buddy
pub struct BuddyArena<A: BackingAllocator> {
    base: BasePtr,
    geometry: Geometry,
    region_layout: Layout,
    pages: PageTable,
    /// One free list per order, smallest order first.
    free_lists: Vec<FreeList>,
    /// Bytes held by allocated blocks.
    used_bytes: usize,
    backing_allocator: A,
}

impl BuddyArena<Raw> {
    /// Returns the layout requirements of the region managed by an arena with
    /// the given order range.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if `min_order > max_order`
    /// or the arena would not fit in the address space.
    pub fn region_layout(min_order: u32, max_order: u32) -> Result<Layout, AllocInitError> {
        Geometry::new(min_order, max_order)?.region_layout()
    }

    /// Constructs a new `BuddyArena` from a raw pointer.
    ///
    /// The region is zeroed and becomes a single free block.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if the order range is
    /// invalid, or if `region` is not aligned as required by
    /// [`Self::region_layout(min_order, max_order)`].
    ///
    /// # Safety
    ///
    /// `region` must be valid for reads and writes for the size indicated by
    /// [`Self::region_layout(min_order, max_order)`], and no other code may
    /// access that memory while the arena exists.
    ///
    /// [`Self::region_layout(min_order, max_order)`]: BuddyArena::region_layout
    pub unsafe fn new_raw(
        region: NonNull<u8>,
        min_order: u32,
        max_order: u32,
    ) -> Result<BuddyArena<Raw>, AllocInitError> {
        let geometry = Geometry::new(min_order, max_order)?;
        let layout = geometry.region_layout()?;

        if region.addr().get() % layout.align() != 0 {
            return Err(AllocInitError::InvalidConfig);
        }

        unsafe { BuddyArena::from_parts(region, geometry, layout, Raw) }
    }

    /// Decomposes the arena, returning the region it was constructed with.
    ///
    /// All outstanding allocations are invalidated; the caller becomes the
    /// sole owner of the region again.
    pub fn into_raw_parts(self) -> NonNull<u8> {
        // Dropping a `Raw` arena leaves the region alone.
        self.base.ptr()
    }
}

#[cfg(any(feature = "alloc", test))]
impl BuddyArena<Global> {
    /// Attempts to construct a new `BuddyArena` backed by the global
    /// allocator.
    ///
    /// The arena spans `2^max_order` bytes, divided into pages of
    /// `2^min_order` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidConfig`] if the order range is
    /// invalid, or [`AllocInitError::AllocFailed`] if the region or its
    /// page descriptors could not be allocated.
    #[cfg_attr(docs_rs, doc(cfg(feature = "alloc")))]
    pub fn try_new(min_order: u32, max_order: u32) -> Result<BuddyArena<Global>, AllocInitError> {
        let geometry = Geometry::new(min_order, max_order)?;
        let layout = geometry.region_layout()?;

        unsafe {
            // SAFETY: the region is at least one byte long.
            let raw = alloc::alloc::alloc(layout);
            let region = NonNull::new(raw).ok_or(AllocInitError::AllocFailed(layout))?;

            // SAFETY: `region` was just allocated with `layout` and is owned
            // by nothing else.
            BuddyArena::from_parts(region, geometry, layout, Global).map_err(|e| {
                alloc::alloc::dealloc(region.as_ptr(), layout);
                e
            })
        }
    }
}

impl<A: BackingAllocator> BuddyArena<A> {
    /// # Safety
    ///
    /// `region` must be valid for reads and writes for `layout.size()` bytes
    /// and exclusively owned by the returned arena.
    unsafe fn from_parts(
        region: NonNull<u8>,
        geometry: Geometry,
        layout: Layout,
        backing_allocator: A,
    ) -> Result<BuddyArena<A>, AllocInitError> {
        let base = BasePtr::new(region, layout.size()).ok_or(AllocInitError::InvalidConfig)?;

        let pages = PageTable::try_new(geometry.num_pages())?;

        let num_orders = geometry.num_orders();
        let lists_layout =
            Layout::array::<FreeList>(num_orders).map_err(|_| AllocInitError::InvalidConfig)?;
        let mut free_lists = Vec::new();
        free_lists
            .try_reserve_exact(num_orders)
            .map_err(|_| AllocInitError::AllocFailed(lists_layout))?;
        free_lists.resize(num_orders, FreeList::new());

        // Blocks are handed out as byte slices, so every byte must be
        // initialized.
        unsafe { ptr::write_bytes(region.as_ptr(), 0, layout.size()) };

        let mut arena = BuddyArena {
            base,
            geometry,
            region_layout: layout,
            pages,
            free_lists,
            used_bytes: 0,
            backing_allocator,
        };

        arena.init();

        debug!(
            "buddy arena: {} bytes at {:p}, orders {}..={}",
            layout.size(),
            region,
            geometry.min_order(),
            geometry.max_order()
        );

        Ok(arena)
    }

    /// Resets the arena to a single free block spanning the whole region.
    ///
    /// Every outstanding allocation is forgotten. Pointers previously returned
    /// by [`allocate`](Self::allocate) must not be used afterwards.
    pub fn init(&mut self) {
        let max_order = self.geometry.max_order();

        self.pages.reset();
        self.free_lists.iter_mut().for_each(FreeList::clear);

        self.pages.set(0, PageState::Free(max_order));
        self.free_list_mut(max_order).insert(0);
        self.used_bytes = 0;
    }

    #[inline]
    fn free_list(&self, order: u32) -> &FreeList {
        &self.free_lists[self.geometry.level_of(order)]
    }

    #[inline]
    fn free_list_mut(&mut self, order: u32) -> &mut FreeList {
        let level = self.geometry.level_of(order);
        &mut self.free_lists[level]
    }

    /// Returns the order of the smallest blocks, i.e. pages.
    #[inline]
    pub fn min_order(&self) -> u32 {
        self.geometry.min_order()
    }

    /// Returns the order of the whole arena.
    #[inline]
    pub fn max_order(&self) -> u32 {
        self.geometry.max_order()
    }

    /// Returns the size of a page in bytes.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.geometry.page_size()
    }

    /// Returns the number of pages in the arena.
    #[inline]
    pub fn num_pages(&self) -> usize {
        self.geometry.num_pages()
    }

    /// Returns the size of the arena in bytes.
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.geometry.arena_size()
    }

    /// Returns the number of bytes held by allocated blocks.
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Returns the number of bytes held by free blocks.
    pub fn free_bytes(&self) -> usize {
        self.geometry
            .orders()
            .map(|o| self.free_list(o).len() * Geometry::block_size(o))
            .sum()
    }

    /// Returns a pointer to the start of the arena.
    #[inline]
    pub fn base_ptr(&self) -> NonNull<u8> {
        self.base.ptr()
    }

    /// Returns the offset of `ptr` from the start of the arena, or `None` if
    /// `ptr` does not point into the arena.
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.base.offset_to(ptr.addr())
    }

    /// Returns the state of the descriptor of `page`.
    pub fn page_state(&self, page: usize) -> Option<PageState> {
        self.pages.get(page)
    }

    /// Returns the order of the block starting at `offset`, whether it is
    /// free or allocated.
    ///
    /// Returns `None` if no block starts at `offset`.
    pub fn block_order(&self, offset: usize) -> Option<u32> {
        if !self.geometry.is_page_aligned(offset) {
            return None;
        }

        self.pages
            .get(self.geometry.offset_to_page(offset))?
            .order()
    }

    /// Returns `true` if an allocated block starts at `offset`.
    pub fn is_allocated(&self, offset: usize) -> bool {
        self.allocated_order(offset).is_ok()
    }

    /// Returns the offsets of the free blocks of `order`, lowest first.
    ///
    /// Orders outside the arena have no free blocks.
    pub fn free_blocks(&self, order: u32) -> impl Iterator<Item = usize> + '_ {
        let geometry = self.geometry;

        (geometry.min_order()..=geometry.max_order())
            .contains(&order)
            .then(|| self.free_list(order))
            .into_iter()
            .flat_map(FreeList::iter)
            .map(move |page| geometry.page_to_offset(page))
    }

    /// Allocates a block and returns its head page and order.
    fn allocate_block(&mut self, size: usize) -> Result<(usize, u32), AllocError> {
        let geometry = self.geometry;
        let target = geometry.order_for(size).map_err(|e| {
            debug!("buddy arena: rejected request for {} bytes: {}", size, e);
            e
        })?;

        // Take the lowest free block of the smallest sufficient order.
        let free_lists = &mut self.free_lists;
        let (page, mut order) = (target..=geometry.max_order())
            .find_map(|o| {
                free_lists[geometry.level_of(o)]
                    .pop_first()
                    .map(|page| (page, o))
            })
            .ok_or_else(|| {
                debug!(
                    "buddy arena: out of memory for {} bytes (order {})",
                    size, target
                );
                AllocError::OutOfMemory
            })?;

        // Split the block down to the target order. The lower half keeps the
        // head page; each upper half becomes a free block.
        while order > target {
            order -= 1;

            let upper = geometry.buddy_page(page, order);
            self.pages.set(upper, PageState::Free(order));
            self.free_list_mut(order).insert(upper);

            trace!("buddy arena: split page {} at order {}", page, order + 1);
        }

        self.pages.set(page, PageState::Allocated(target));
        self.used_bytes += Geometry::block_size(target);

        Ok((page, target))
    }

    /// Attempts to allocate a block of at least `size` bytes, returning its
    /// offset from the start of the arena.
    ///
    /// The block is the smallest one that holds `size` bytes, and its offset
    /// is a multiple of its size.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ZeroSize`] if `size` is zero.
    /// - [`AllocError::OutOfRange`] if `size` exceeds the arena.
    /// - [`AllocError::OutOfMemory`] if no free block is large enough.
    pub fn allocate_offset(&mut self, size: usize) -> Result<usize, AllocError> {
        let (page, _) = self.allocate_block(size)?;
        Ok(self.geometry.page_to_offset(page))
    }

    /// Attempts to allocate a block of at least `size` bytes.
    ///
    /// On success, returns a pointer to the whole block, which may be larger
    /// than `size`. The pointer is valid until the block is released or the
    /// arena is reset or dropped.
    ///
    /// # Errors
    ///
    /// See [`allocate_offset`](Self::allocate_offset).
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, AllocError> {
        let (page, order) = self.allocate_block(size)?;
        let offset = self.geometry.page_to_offset(page);

        // The returned block inherits the provenance of the base pointer.
        Ok(self
            .base
            .with_offset_and_size(offset, Geometry::block_size(order)))
    }

    /// Returns the order of the allocated block starting at `offset`.
    fn allocated_order(&self, offset: usize) -> Result<u32, ReleaseError> {
        if offset >= self.geometry.arena_size() {
            return Err(ReleaseError::OutOfBounds);
        }

        if !self.geometry.is_page_aligned(offset) {
            return Err(ReleaseError::Misaligned);
        }

        match self.pages.state(self.geometry.offset_to_page(offset)) {
            PageState::Allocated(order) => Ok(order),
            _ => Err(ReleaseError::NotAllocated),
        }
    }

    /// Releases the allocated block starting at `offset`.
    ///
    /// The block is merged with its buddy for as long as the buddy is free and
    /// of the same order. The lower of the two buddies heads the merged block.
    ///
    /// # Errors
    ///
    /// - [`ReleaseError::OutOfBounds`] if `offset` lies outside the arena.
    /// - [`ReleaseError::Misaligned`] if `offset` is not on a page boundary.
    /// - [`ReleaseError::NotAllocated`] if no allocated block starts at
    ///   `offset`.
    ///
    /// The arena is unchanged if an error is returned.
    pub fn release_offset(&mut self, offset: usize) -> Result<(), ReleaseError> {
        let mut order = self.allocated_order(offset).map_err(|e| {
            warn!("buddy arena: rejected release of {:#x}: {}", offset, e);
            e
        })?;

        let geometry = self.geometry;
        let mut page = geometry.offset_to_page(offset);
        self.used_bytes -= Geometry::block_size(order);

        while order < geometry.max_order() {
            let buddy = geometry.buddy_page(page, order);
            if self.pages.state(buddy) != PageState::Free(order) {
                break;
            }

            let removed = self.free_list_mut(order).remove(buddy);
            debug_assert!(removed, "free buddy {buddy} missing from free list");

            self.pages.set(cmp::max(page, buddy), PageState::Inactive);
            page = cmp::min(page, buddy);
            order += 1;

            trace!("buddy arena: merged into page {} at order {}", page, order);
        }

        self.pages.set(page, PageState::Free(order));
        self.free_list_mut(order).insert(page);

        Ok(())
    }

    /// Releases the allocated block pointed to by `ptr`.
    ///
    /// # Errors
    ///
    /// See [`release_offset`](Self::release_offset).
    pub fn release(&mut self, ptr: NonNull<u8>) -> Result<(), ReleaseError> {
        let offset = self.offset_of(ptr).ok_or_else(|| {
            warn!("buddy arena: rejected release of foreign pointer {:p}", ptr);
            ReleaseError::OutOfBounds
        })?;

        self.release_offset(offset)
    }

    /// Returns the contents of the allocated block starting at `offset`.
    pub fn block(&self, offset: usize) -> Option<&[u8]> {
        let order = self.allocated_order(offset).ok()?;
        let block = self
            .base
            .with_offset_and_size(offset, Geometry::block_size(order));

        // SAFETY: the block lies within the region, which was initialized at
        // construction, and the borrow of `self` prevents it from being
        // released while the slice is alive.
        Some(unsafe { block.as_ref() })
    }

    /// Returns the contents of the allocated block starting at `offset`,
    /// mutably.
    pub fn block_mut(&mut self, offset: usize) -> Option<&mut [u8]> {
        let order = self.allocated_order(offset).ok()?;
        let mut block = self
            .base
            .with_offset_and_size(offset, Geometry::block_size(order));

        // SAFETY: as in `block`, and `self` is borrowed mutably.
        Some(unsafe { block.as_mut() })
    }

    /// Returns a snapshot of the free lists.
    pub fn dump(&self) -> FreeListReport {
        FreeListReport::new(
            self.geometry
                .orders()
                .map(|order| OrderStats {
                    order,
                    free_blocks: self.free_list(order).len(),
                    block_size: Geometry::block_size(order),
                })
                .collect(),
        )
    }

    /// Verifies the internal consistency of the arena.
    ///
    /// This checks that the blocks exactly partition the arena, that every
    /// block is aligned to its size, that the free lists are sorted and agree
    /// with the page descriptors, that no two free buddies were left unmerged,
    /// and that free and allocated bytes add up to the arena size.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let geometry = self.geometry;
        let orders = geometry.min_order()..=geometry.max_order();
        let mut used = 0;

        let mut page = 0;
        while page < self.pages.len() {
            let state = self.pages.state(page);
            let order = state
                .order()
                .ok_or(InvariantViolation::Uncovered { page })?;

            if !orders.contains(&order) || page % geometry.pages_in(order) != 0 {
                return Err(InvariantViolation::Misaligned { page, order });
            }

            let end = page + geometry.pages_in(order);
            if let Some(member) = (page + 1..end).find(|&p| self.pages.state(p).is_head()) {
                return Err(InvariantViolation::Overlap { page: member });
            }

            match state {
                PageState::Free(_) => {
                    if !self.free_list(order).contains(page) {
                        return Err(InvariantViolation::FreeListMismatch { page, order });
                    }

                    if order < geometry.max_order() {
                        let buddy = geometry.buddy_page(page, order);
                        if self.pages.state(buddy) == PageState::Free(order) {
                            return Err(InvariantViolation::Unmerged {
                                page: cmp::min(page, buddy),
                                order,
                            });
                        }
                    }
                }
                _ => used += Geometry::block_size(order),
            }

            page = end;
        }

        for order in geometry.orders() {
            let list = self.free_list(order);
            if !list.is_sorted() {
                return Err(InvariantViolation::Unsorted { order });
            }

            if let Some(page) = list
                .iter()
                .find(|&p| self.pages.get(p) != Some(PageState::Free(order)))
            {
                return Err(InvariantViolation::FreeListMismatch { page, order });
            }
        }

        let free = self.free_bytes();
        if used != self.used_bytes || free + used != geometry.arena_size() {
            return Err(InvariantViolation::Conservation {
                free,
                used: self.used_bytes,
            });
        }

        Ok(())
    }
}

impl<A: BackingAllocator> fmt::Debug for BuddyArena<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyArena")
            .field("base", &self.base.ptr())
            .field("min_order", &self.geometry.min_order())
            .field("max_order", &self.geometry.max_order())
            .field("used_bytes", &self.used_bytes)
            .field("free_lists", &format_args!("{}", self.dump()))
            .finish()
    }
}

impl<A: BackingAllocator> Drop for BuddyArena<A> {
    fn drop(&mut self) {
        unsafe {
            self.backing_allocator
                .deallocate(self.base.ptr(), self.region_layout)
        };
    }
}
