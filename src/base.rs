use core::{
    num::NonZeroUsize,
    ptr::{self, NonNull},
};

use crate::polyfill::NonNullStrict;

/// A pointer to the base of the arena managed by an allocator.
///
/// All pointers handed out by the allocator are derived from this one, so they
/// share its provenance. Everything else is tracked as a byte offset from it.
#[derive(Copy, Clone, Debug)]
pub struct BasePtr {
    ptr: NonNull<u8>,
    extent: usize,
}

impl BasePtr {
    /// Creates a `BasePtr` from `ptr`, covering `extent` bytes.
    ///
    /// Returns `None` if the end of the region would overflow the address
    /// space.
    #[inline]
    pub fn new(ptr: NonNull<u8>, extent: usize) -> Option<BasePtr> {
        ptr.addr().get().checked_add(extent)?;

        Some(BasePtr { ptr, extent })
    }

    /// Returns the base pointer as a `NonNull<u8>`.
    #[inline]
    pub fn ptr(self) -> NonNull<u8> {
        self.ptr
    }

    /// Calculates the offset from `self` to `addr`.
    ///
    /// Returns `None` if `addr` does not lie within the region.
    #[inline]
    pub fn offset_to(self, addr: NonZeroUsize) -> Option<usize> {
        let ofs = addr.get().checked_sub(self.ptr.addr().get())?;
        (ofs < self.extent).then_some(ofs)
    }

    /// Creates a new pointer with the given offset.
    ///
    /// The returned pointer has the provenance of this pointer.
    #[inline]
    pub fn with_offset(self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset < self.extent, "offset {offset:#x} out of region");

        let addr = self.ptr.addr().get() + offset;

        // SAFETY: the constructor guarantees that `base + extent` does not
        // overflow, so an address above a non-null base is itself non-null.
        self.ptr
            .with_addr(unsafe { NonZeroUsize::new_unchecked(addr) })
    }

    /// Creates a new slice pointer of `len` bytes at the given offset.
    #[inline]
    pub fn with_offset_and_size(self, offset: usize, len: usize) -> NonNull<[u8]> {
        debug_assert!(offset + len <= self.extent, "slice out of region");

        let raw_slice = ptr::slice_from_raw_parts_mut(self.with_offset(offset).as_ptr(), len);

        // SAFETY: the data pointer is non-null.
        unsafe { NonNull::new_unchecked(raw_slice) }
    }
}
