//! Page descriptors.

use alloc::vec::Vec;
use core::alloc::Layout;

use crate::AllocInitError;

/// The state of a page descriptor.
///
/// Every block is represented by the descriptor of its first page, the head
/// page. The remaining pages of a block are `Inactive`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PageState {
    /// The page heads a free block of the given order.
    Free(u32),
    /// The page heads an allocated block of the given order.
    Allocated(u32),
    /// The page does not head a block.
    Inactive,
}

impl PageState {
    /// Returns the order of the block headed by this page, if any.
    #[inline]
    pub fn order(self) -> Option<u32> {
        match self {
            PageState::Free(o) | PageState::Allocated(o) => Some(o),
            PageState::Inactive => None,
        }
    }

    /// Returns `true` if this page heads a block.
    #[inline]
    pub fn is_head(self) -> bool {
        self != PageState::Inactive
    }
}

/// One descriptor per page of the arena, indexed by page identity.
#[derive(Debug)]
pub struct PageTable {
    states: Vec<PageState>,
}

impl PageTable {
    /// Creates a table of `num_pages` inactive descriptors.
    ///
    /// Returns [`AllocInitError::AllocFailed`] if the table cannot be
    /// allocated.
    pub fn try_new(num_pages: usize) -> Result<PageTable, AllocInitError> {
        let layout = Layout::array::<PageState>(num_pages)
            .map_err(|_| AllocInitError::InvalidConfig)?;

        let mut states = Vec::new();
        states
            .try_reserve_exact(num_pages)
            .map_err(|_| AllocInitError::AllocFailed(layout))?;
        states.resize(num_pages, PageState::Inactive);

        Ok(PageTable { states })
    }

    /// Marks every page inactive.
    pub fn reset(&mut self) {
        self.states.fill(PageState::Inactive);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns the state of `page`, or `None` if there is no such page.
    #[inline]
    pub fn get(&self, page: usize) -> Option<PageState> {
        self.states.get(page).copied()
    }

    #[inline]
    pub fn state(&self, page: usize) -> PageState {
        self.states[page]
    }

    #[inline]
    pub fn set(&mut self, page: usize, state: PageState) {
        self.states[page] = state;
    }
}
