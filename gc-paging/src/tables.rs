//! Master and slave translation tables
//!
//! A context owns one [`MasterTable`] and creates [`SlaveTable`]s on demand
//! through its [`SlaveTableManager`]. Each slave table counts its present
//! entries so the owner can return it to the page allocator the moment the
//! last page it maps goes away.

use core::ops::{Index, IndexMut};

use crate::descriptors::{MasterEntry, SlaveEntry};
use crate::error::{PageError, PoolError};
use crate::page::{PageAllocator, PhysicalPageBlock};
use crate::pool::{Handle, Pool};
use crate::{MASTER_ENTRIES, PA, SLAVE_ENTRIES, SLAVE_TABLE_ORDER};

impl From<PoolError> for PageError {
    fn from(_: PoolError) -> Self {
        PageError::OutOfMemory
    }
}

// =============================================================================
// Master table
// =============================================================================

/// The first-level table of one context.
pub struct MasterTable {
    block: PhysicalPageBlock,
}

impl MasterTable {
    /// Take ownership of `block` and mark every entry vacant.
    ///
    /// Fails with [`PageError::Unaddressable`] if the GPU cannot reach it.
    pub fn new(mut block: PhysicalPageBlock) -> Result<Self, (PageError, PhysicalPageBlock)> {
        if block.phys().to_u32().is_none() || block.words() < MASTER_ENTRIES as usize {
            return Err((PageError::Unaddressable, block));
        }
        for index in 0..MASTER_ENTRIES as usize {
            block.write_u32(index, MasterEntry::VACANT.raw());
        }
        Ok(Self { block })
    }

    #[inline]
    #[must_use]
    pub fn phys(&self) -> PA {
        self.block.phys()
    }

    /// 32-bit GPU-visible address of the table.
    #[inline]
    #[must_use]
    pub fn address(&self) -> u32 {
        self.block.phys().value() as u32
    }

    /// # Panics
    ///
    /// Panics if `index` is not below `MASTER_ENTRIES`.
    #[inline]
    #[must_use]
    pub fn entry(&self, index: u32) -> MasterEntry {
        assert!(index < MASTER_ENTRIES, "master index out of range");
        MasterEntry::from_raw(self.block.read_u32(index as usize))
    }

    #[inline]
    pub fn set_entry(&mut self, index: u32, entry: MasterEntry) {
        assert!(index < MASTER_ENTRIES, "master index out of range");
        self.block.write_u32(index as usize, entry.raw());
    }

    /// Release the table, returning its backing block.
    #[must_use]
    pub fn into_block(self) -> PhysicalPageBlock {
        self.block
    }
}

// =============================================================================
// Slave tables
// =============================================================================

/// A second-level table and its count of present entries.
pub struct SlaveTable {
    block: PhysicalPageBlock,
    used: u32,
}

impl SlaveTable {
    fn new(mut block: PhysicalPageBlock) -> Self {
        block.fill_u32(SlaveEntry::VACANT.raw());
        Self { block, used: 0 }
    }

    #[inline]
    #[must_use]
    pub fn phys(&self) -> PA {
        self.block.phys()
    }

    #[inline]
    #[must_use]
    pub fn address(&self) -> u32 {
        self.block.phys().value() as u32
    }

    /// Present entries in this table.
    #[inline]
    #[must_use]
    pub fn used(&self) -> u32 {
        self.used
    }

    #[inline]
    #[must_use]
    pub fn entry(&self, index: u32) -> SlaveEntry {
        assert!(index < SLAVE_ENTRIES, "slave index out of range");
        SlaveEntry::from_raw(self.block.read_u32(index as usize))
    }

    /// Write a present entry and count it.
    pub fn map(&mut self, index: u32, entry: SlaveEntry) {
        assert!(index < SLAVE_ENTRIES, "slave index out of range");
        if !self.entry(index).is_present() {
            self.used += 1;
        }
        self.block.write_u32(index as usize, entry.raw());
    }

    /// Reset an entry to vacant and return how many entries remain present.
    pub fn unmap(&mut self, index: u32) -> u32 {
        assert!(index < SLAVE_ENTRIES, "slave index out of range");
        if self.entry(index).is_present() {
            self.used -= 1;
        }
        self.block.write_u32(index as usize, SlaveEntry::VACANT.raw());
        self.used
    }
}

/// Per-context owner of slave tables.
///
/// Table records live in a [`Pool`]; a released record slot is reused by the
/// next allocation while its backing pages go back to the page allocator.
#[derive(Default)]
pub struct SlaveTableManager {
    tables: Pool<SlaveTable>,
}

impl SlaveTableManager {
    #[must_use]
    pub const fn new() -> Self {
        Self { tables: Pool::new() }
    }

    /// Manager whose record pool holds at most `records` tables.
    #[must_use]
    pub const fn with_limit(records: usize) -> Self {
        Self {
            tables: Pool::with_limit(records),
        }
    }

    /// Allocate a table with every entry vacant.
    pub fn allocate<P>(&mut self, pages: &P) -> Result<Handle<SlaveTable>, PageError>
    where
        P: PageAllocator + ?Sized,
    {
        self.tables.reserve()?;
        let block = pages.alloc_pages(SLAVE_TABLE_ORDER)?;
        if block.phys().to_u32().is_none() {
            pages.free_pages(block);
            return Err(PageError::Unaddressable);
        }
        let table = SlaveTable::new(block);
        log::trace!("slave table at {:?}", table.phys());
        Ok(self.tables.insert(table)?)
    }

    /// Release a table's pages and recycle its record.
    pub fn free<P>(&mut self, pages: &P, handle: Handle<SlaveTable>)
    where
        P: PageAllocator + ?Sized,
    {
        if let Some(table) = self.tables.remove(handle) {
            pages.free_pages(table.block);
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, handle: Handle<SlaveTable>) -> Option<&SlaveTable> {
        self.tables.get(handle)
    }

    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, handle: Handle<SlaveTable>) -> Option<&mut SlaveTable> {
        self.tables.get_mut(handle)
    }

    /// Tables currently allocated.
    #[inline]
    #[must_use]
    pub fn live(&self) -> usize {
        self.tables.len()
    }
}

impl Index<Handle<SlaveTable>> for SlaveTableManager {
    type Output = SlaveTable;

    fn index(&self, handle: Handle<SlaveTable>) -> &SlaveTable {
        &self.tables[handle]
    }
}

impl IndexMut<Handle<SlaveTable>> for SlaveTableManager {
    fn index_mut(&mut self, handle: Handle<SlaveTable>) -> &mut SlaveTable {
        &mut self.tables[handle]
    }
}
