//! Physical page blocks shared between the CPU and the GPU
//!
//! Page tables, the safe zone and the command buffer all live in blocks of
//! `PAGE_SIZE << order` bytes handed out by a [`PageAllocator`]. Each block
//! carries both addresses the code needs: the physical address written into
//! GPU-visible descriptors, and the CPU linear mapping used to fill them.

use core::ptr::{self, NonNull};

use crate::address::PA;
use crate::error::PageError;
use crate::PAGE_SIZE;

/// An owned, order-aligned run of physical pages.
///
/// Not `Clone`: a block is released exactly once, by handing it back to
/// [`PageAllocator::free_pages`].
pub struct PhysicalPageBlock {
    order: u8,
    phys: PA,
    virt: NonNull<u8>,
}

// SAFETY: The block exclusively owns its memory; access goes through &self /
// &mut self and callers serialise GPU-visible updates with their own locks.
unsafe impl Send for PhysicalPageBlock {}
// SAFETY: Shared access only performs volatile reads.
unsafe impl Sync for PhysicalPageBlock {}

impl PhysicalPageBlock {
    /// Wrap a block produced by a page allocator.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `virt` maps `PAGE_SIZE << order` bytes of memory backing `phys`
    /// - Both addresses are aligned to at least 4 bytes
    /// - Nothing else accesses the memory while this block is alive
    #[inline]
    pub const unsafe fn new(order: u8, phys: PA, virt: NonNull<u8>) -> Self {
        Self { order, phys, virt }
    }

    #[inline]
    #[must_use]
    pub const fn order(&self) -> u8 {
        self.order
    }

    /// Size of the block in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        PAGE_SIZE << self.order
    }

    /// Number of 32-bit words in the block.
    #[inline]
    #[must_use]
    pub const fn words(&self) -> usize {
        self.size() / 4
    }

    #[inline]
    #[must_use]
    pub const fn phys(&self) -> PA {
        self.phys
    }

    /// CPU linear mapping of the block.
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> NonNull<u8> {
        self.virt
    }

    /// Volatile read of the 32-bit word at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the block.
    #[inline]
    #[must_use]
    pub fn read_u32(&self, index: usize) -> u32 {
        assert!(index < self.words(), "page block word index out of range");
        // SAFETY: index is in bounds and the block is 4-byte aligned
        unsafe { ptr::read_volatile(self.virt.as_ptr().cast::<u32>().add(index)) }
    }

    /// Volatile write of the 32-bit word at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the block.
    #[inline]
    pub fn write_u32(&mut self, index: usize, value: u32) {
        assert!(index < self.words(), "page block word index out of range");
        // SAFETY: index is in bounds, the block is 4-byte aligned and we hold &mut
        unsafe { ptr::write_volatile(self.virt.as_ptr().cast::<u32>().add(index), value) }
    }

    /// Fill every word of the block with `value`.
    pub fn fill_u32(&mut self, value: u32) {
        for index in 0..self.words() {
            self.write_u32(index, value);
        }
    }

    /// The block as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the block maps size() bytes we own for the lifetime of &self
        unsafe { core::slice::from_raw_parts(self.virt.as_ptr(), self.size()) }
    }

    /// The block as a mutable byte slice.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: the block maps size() bytes we own exclusively through &mut self
        unsafe { core::slice::from_raw_parts_mut(self.virt.as_ptr(), self.size()) }
    }
}

impl core::fmt::Debug for PhysicalPageBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhysicalPageBlock")
            .field("order", &self.order)
            .field("phys", &self.phys)
            .finish()
    }
}

/// Source of physical page blocks.
///
/// Implemented by the platform's page allocator. Blocks must be naturally
/// aligned to their size and reachable with 32-bit GPU addresses.
pub trait PageAllocator: Send + Sync {
    /// Allocate `PAGE_SIZE << order` bytes.
    fn alloc_pages(&self, order: u8) -> Result<PhysicalPageBlock, PageError>;

    /// Return a block obtained from [`alloc_pages`](Self::alloc_pages).
    fn free_pages(&self, block: PhysicalPageBlock);
}

impl<T: PageAllocator + ?Sized> PageAllocator for &T {
    #[inline]
    fn alloc_pages(&self, order: u8) -> Result<PhysicalPageBlock, PageError> {
        (**self).alloc_pages(order)
    }

    #[inline]
    fn free_pages(&self, block: PhysicalPageBlock) {
        (**self).free_pages(block);
    }
}
