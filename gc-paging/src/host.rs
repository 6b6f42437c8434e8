//! Heap-backed page allocator
//!
//! Backs every block with zeroed, size-aligned heap memory and hands out
//! synthetic physical addresses from a bump counter below 4GB. Keeps count
//! of outstanding pages so leak and exhaustion behaviour is observable.

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::address::PA;
use crate::error::PageError;
use crate::page::{PageAllocator, PhysicalPageBlock};
use crate::PAGE_SIZE;

/// Largest order the host allocator serves.
pub const MAX_ORDER: u8 = 8;

/// First synthetic physical address handed out.
pub const PHYS_BASE: u64 = 0x4000_0000;

/// `PageAllocator` over the global heap.
pub struct HostPageAllocator {
    next_phys: Mutex<u64>,
    pages_live: AtomicUsize,
    allocations: AtomicUsize,
    limit: Option<usize>,
}

impl HostPageAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_phys: Mutex::new(PHYS_BASE),
            pages_live: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            limit: None,
        }
    }

    /// Allocator that fails once `pages` pages are outstanding.
    #[must_use]
    pub const fn with_limit(pages: usize) -> Self {
        Self {
            next_phys: Mutex::new(PHYS_BASE),
            pages_live: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            limit: Some(pages),
        }
    }

    /// Pages currently allocated and not yet freed.
    #[must_use]
    pub fn pages_live(&self) -> usize {
        self.pages_live.load(Ordering::Acquire)
    }

    /// Total successful allocations since creation.
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Acquire)
    }

    fn layout(order: u8) -> Result<Layout, PageError> {
        let size = PAGE_SIZE << order;
        Layout::from_size_align(size, size).map_err(|_| PageError::InvalidOrder(order))
    }

    fn reserve(&self, pages: usize) -> Result<(), PageError> {
        let previous = self.pages_live.fetch_add(pages, Ordering::AcqRel);
        if let Some(limit) = self.limit
            && previous + pages > limit
        {
            self.pages_live.fetch_sub(pages, Ordering::AcqRel);
            return Err(PageError::OutOfMemory);
        }
        Ok(())
    }

    fn next_phys(&self, size: u64) -> Result<PA, PageError> {
        let mut next = self.next_phys.lock();
        let base = next.next_multiple_of(size);
        let end = base + size;
        if end > u64::from(u32::MAX) + 1 {
            return Err(PageError::Unaddressable);
        }
        *next = end;
        Ok(PA::new(base))
    }
}

impl Default for HostPageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator for HostPageAllocator {
    fn alloc_pages(&self, order: u8) -> Result<PhysicalPageBlock, PageError> {
        if order > MAX_ORDER {
            return Err(PageError::InvalidOrder(order));
        }
        let layout = Self::layout(order)?;
        let pages = 1usize << order;

        self.reserve(pages)?;
        let phys = match self.next_phys(layout.size() as u64) {
            Ok(phys) => phys,
            Err(e) => {
                self.pages_live.fetch_sub(pages, Ordering::AcqRel);
                return Err(e);
            }
        };

        // SAFETY: layout has non-zero size
        let Some(virt) = NonNull::new(unsafe { alloc_zeroed(layout) }) else {
            self.pages_live.fetch_sub(pages, Ordering::AcqRel);
            return Err(PageError::OutOfMemory);
        };

        self.allocations.fetch_add(1, Ordering::AcqRel);
        log::trace!("host pages: order {} at {:?}", order, phys);
        // SAFETY: virt maps layout.size() bytes of fresh, exclusively owned memory
        Ok(unsafe { PhysicalPageBlock::new(order, phys, virt) })
    }

    fn free_pages(&self, block: PhysicalPageBlock) {
        let order = block.order();
        let Ok(layout) = Self::layout(order) else {
            return;
        };
        // SAFETY: the block came from alloc_pages with this exact layout
        unsafe { dealloc(block.as_ptr().as_ptr(), layout) };
        self.pages_live.fetch_sub(1 << order, Ordering::AcqRel);
    }
}
