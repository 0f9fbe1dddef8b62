use alloc::vec::Vec;

/// The free blocks of one order, as head page indices in ascending order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FreeList {
    pages: Vec<usize>,
}

impl FreeList {
    pub const fn new() -> FreeList {
        FreeList { pages: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    pub fn contains(&self, page: usize) -> bool {
        self.pages.binary_search(&page).is_ok()
    }

    /// Inserts `page`, keeping the list sorted.
    pub fn insert(&mut self, page: usize) {
        match self.pages.binary_search(&page) {
            Ok(_) => debug_assert!(false, "page {page} is already in the free list"),
            Err(pos) => self.pages.insert(pos, page),
        }
    }

    /// Removes `page` from the list.
    ///
    /// Returns `false` if the page was not present.
    pub fn remove(&mut self, page: usize) -> bool {
        match self.pages.binary_search(&page) {
            Ok(pos) => {
                self.pages.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Removes and returns the lowest page in the list.
    pub fn pop_first(&mut self) -> Option<usize> {
        (!self.is_empty()).then(|| self.pages.remove(0))
    }

    /// Returns `true` if the pages are strictly ascending.
    pub fn is_sorted(&self) -> bool {
        self.pages.windows(2).all(|w| w[0] < w[1])
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = usize> + ExactSizeIterator + '_ {
        self.pages.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::prelude::rust_2021::*;

    use super::*;

    #[test]
    fn insert_keeps_ascending_order() {
        let mut list = FreeList::new();
        for page in [8, 2, 12, 0, 4] {
            list.insert(page);
        }

        assert_eq!(list.iter().collect::<Vec<_>>(), [0, 2, 4, 8, 12]);
        assert!(list.is_sorted());
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn remove_and_pop() {
        let mut list = FreeList::new();
        for page in [6, 1, 3] {
            list.insert(page);
        }

        assert!(list.remove(3));
        assert!(!list.remove(3));
        assert!(!list.contains(3));
        assert!(list.contains(6));

        assert_eq!(list.pop_first(), Some(1));
        assert_eq!(list.pop_first(), Some(6));
        assert_eq!(list.pop_first(), None);
        assert!(list.is_empty());
    }
}
