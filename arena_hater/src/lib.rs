//! A small library for ~~hating on~~ evaluating the correctness of arena
//! allocators.
//!
//! An [`Evaluator`] drives a [`Subject`] through a sequence of
//! [`AllocatorOp`]s. Every block handed out is painted with the id of the
//! operation that produced it, and the paint is verified before the block is
//! released, so overlapping blocks are caught as soon as one of them is freed.
#![deny(unsafe_op_in_unsafe_fn)]

use core::{fmt, mem::MaybeUninit, ptr::NonNull, slice};

use arbitrary::{Arbitrary, Unstructured};

/// Upper bound on arbitrary request sizes, expressed in bits.
pub const MAX_SIZE_BITS: u32 = 24;

/// A request size which implements `Arbitrary`.
///
/// Sizes are spread evenly between powers of two, up to
/// `2^MAX_SIZE_BITS` bytes. Zero is a possible size.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArbSize(pub usize);

impl Arbitrary<'_> for ArbSize {
    fn arbitrary(u: &mut Unstructured<'_>) -> arbitrary::Result<Self> {
        let exp = u32::from(u8::arbitrary(u)?) % (MAX_SIZE_BITS + 1);
        let size = usize::arbitrary(u)? % (1_usize << exp);

        Ok(ArbSize(size))
    }
}

#[derive(Arbitrary)]
enum AllocatorOpTag {
    Alloc,
    Release,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocatorOp {
    /// Allocate a block of at least this many bytes.
    Alloc(usize),
    /// Release an outstanding block.
    ///
    /// Given `n` outstanding blocks, the block to release is at index
    /// `index % n`.
    Release(usize),
}

impl Arbitrary<'_> for AllocatorOp {
    fn arbitrary(u: &mut Unstructured<'_>) -> arbitrary::Result<Self> {
        let op = match AllocatorOpTag::arbitrary(u)? {
            AllocatorOpTag::Alloc => AllocatorOp::Alloc(ArbSize::arbitrary(u)?.0),
            AllocatorOpTag::Release => AllocatorOp::Release(usize::arbitrary(u)?),
        };

        Ok(op)
    }
}

/// An allocator under evaluation.
pub trait Subject {
    type AllocError: fmt::Debug;
    type ReleaseError: fmt::Debug;

    /// Allocates a block of at least `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError>;

    /// Releases the block pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block currently allocated by this subject.
    unsafe fn release(&mut self, ptr: NonNull<u8>) -> Result<(), Self::ReleaseError>;

    /// Checks the internal consistency of the subject.
    ///
    /// Called after every operation. The default implementation checks
    /// nothing.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A list of outstanding blocks.
#[derive(Default)]
pub struct Blocks {
    blocks: Vec<Block>,
}

impl Blocks {
    pub fn new() -> Blocks {
        Blocks { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn remove_modulo(&mut self, idx: usize) -> Option<Block> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }
}

impl IntoIterator for Blocks {
    type Item = Block;

    type IntoIter = std::vec::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// An outstanding block of memory.
pub struct Block {
    // A pointer to the whole block, as returned by the subject.
    ptr: NonNull<[u8]>,
    // The unique ID of the last operation that wrote to this block.
    id: u64,
}

unsafe fn slice_ptr_to_uninit_slice_mut<'a>(ptr: NonNull<[u8]>) -> &'a mut [MaybeUninit<u8>] {
    unsafe { slice::from_raw_parts_mut(ptr.cast().as_ptr(), ptr.len()) }
}

unsafe fn paint(slice: &mut [MaybeUninit<u8>], id: u64) {
    let id_bytes = id.to_le_bytes().into_iter().cycle();

    for (byte, value) in slice.iter_mut().zip(id_bytes) {
        byte.write(value);
    }
}

impl Block {
    /// Creates a block from `ptr` and paints it according to `id`.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - `ptr` must be valid for reads and writes for `ptr.len()` bytes.
    /// - No references to the memory at `ptr` may exist when this function is
    ///   called.
    /// - No accesses to the memory at `ptr` may be made except by way of the
    ///   returned `Block` until said `Block` is dropped or released.
    pub unsafe fn init(ptr: NonNull<[u8]>, id: u64) -> Block {
        let mut b = Block { ptr, id };
        b.paint(id);
        b
    }

    /// Returns the size of the block in bytes.
    pub fn len(&self) -> usize {
        self.ptr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a pointer to the start of the block.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr.cast()
    }

    /// "Paints" the memory contained by `self` with the value of `id`.
    pub fn paint(&mut self, id: u64) {
        // SAFETY: self is mutably borrowed, so no other references to the
        // block can exist.
        unsafe { paint(slice_ptr_to_uninit_slice_mut(self.ptr), id) };
        self.id = id;
    }

    /// Verifies that the memory contained by `self` has not been overwritten.
    pub fn verify(&self) -> bool {
        // SAFETY: the block was fully painted on creation.
        let slice: &[u8] = unsafe { self.ptr.as_ref() };
        let id_bytes = self.id.to_le_bytes().into_iter().cycle();

        slice.iter().zip(id_bytes).all(|(byte, value)| *byte == value)
    }
}

/// The reason an evaluation failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// A block returned by the subject was smaller than requested.
    Undersized { requested: usize, len: usize },
    /// A block's contents changed while it was outstanding.
    Corrupted,
    /// The subject refused to release an outstanding block.
    ReleaseRejected(String),
    /// The subject's consistency check failed.
    Inconsistent(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Undersized { requested, len } => {
                write!(f, "requested {requested} bytes but got a block of {len}")
            }
            FailureKind::Corrupted => f.write_str("block contents were overwritten"),
            FailureKind::ReleaseRejected(e) => write!(f, "release was rejected: {e}"),
            FailureKind::Inconsistent(e) => write!(f, "subject is inconsistent: {e}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<AllocatorOp>,
    /// The failing operation, or `None` if the failure occurred while
    /// releasing the blocks left over at the end.
    pub failed_op: Option<AllocatorOp>,
    pub kind: FailureKind,
}

impl fmt::Display for Failed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failed_op {
            Some(op) => write!(
                f,
                "{:?} failed after {} operations: {}",
                op,
                self.completed.len(),
                self.kind
            ),
            None => write!(f, "final cleanup failed: {}", self.kind),
        }
    }
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn subject(&self) -> &S {
        &self.subject
    }

    pub fn into_subject(self) -> S {
        self.subject
    }

    fn check(&self) -> Result<(), FailureKind> {
        self.subject.check().map_err(FailureKind::Inconsistent)
    }

    fn release(&mut self, block: Block) -> Result<(), FailureKind> {
        if !block.verify() {
            return Err(FailureKind::Corrupted);
        }

        unsafe { self.subject.release(block.as_ptr()) }
            .map_err(|e| FailureKind::ReleaseRejected(format!("{e:?}")))
    }

    fn apply(&mut self, op_id: u64, op: AllocatorOp, blocks: &mut Blocks) -> Result<(), FailureKind> {
        match op {
            AllocatorOp::Alloc(size) => {
                // Allocation failure is a legitimate outcome.
                if let Ok(ptr) = self.subject.allocate(size) {
                    if ptr.len() < size {
                        return Err(FailureKind::Undersized {
                            requested: size,
                            len: ptr.len(),
                        });
                    }

                    blocks.push(unsafe { Block::init(ptr, op_id) });
                }
            }

            AllocatorOp::Release(raw_idx) => {
                if let Some(mut block) = blocks.remove_modulo(raw_idx) {
                    if !block.verify() {
                        return Err(FailureKind::Corrupted);
                    }

                    // Scribble over the block so that stale reads show up.
                    block.paint(op_id);
                    self.release(block)?;
                }
            }
        }

        self.check()
    }

    /// Runs `ops` against the subject, then releases every block still
    /// outstanding.
    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = AllocatorOp>,
    {
        let mut completed = Vec::new();
        let mut blocks = Blocks::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();

            if let Err(kind) = self.apply(op_id, op, &mut blocks) {
                return Err(Failed {
                    completed,
                    failed_op: Some(op),
                    kind,
                });
            }

            completed.push(op);
        }

        for block in blocks {
            if let Err(kind) = self.release(block).and_then(|()| self.check()) {
                return Err(Failed {
                    completed,
                    failed_op: None,
                    kind,
                });
            }
        }

        Ok(())
    }
}
