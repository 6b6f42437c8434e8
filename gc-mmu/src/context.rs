//! Address space contexts
//!
//! A context is one GPU virtual address space: a master table, the slave
//! tables hanging off it and the arena lists tracking which pages are in
//! use. Mapping reserves a run from the arenas and fills the tables along
//! it, creating slave tables on first touch. Unmapping walks the same run
//! backwards and returns every slave table that becomes empty.
//!
//! All table state sits behind one lock, so a context can be shared
//! between threads mapping and unmapping concurrently.

use alloc::vec::Vec;

use gc_cmd::CommandWriter;
use gc_cmd::registers::{MMU_CONFIGURATION, MMU_CONFIGURATION_ADDRESS, MMU_CONFIGURATION_MODE_1K};
use gc_mmio::RegisterIo;
use gc_paging::{
    ArenaAllocator, GpuVa, Handle, MASTER_ENTRIES, MASTER_TABLE_ORDER, MasterEntry, MasterTable,
    PA, PAGE_SHIFT, PAGE_SIZE, PageAllocator, PageRun, SLAVE_ENTRIES, SlaveEntry, SlaveTable,
    SlaveTableManager, TOTAL_PAGES,
};
use spin::Mutex;

use crate::device::MmuDevice;
use crate::error::MmuError;

/// Page frames above this bound are outside the 32-bit physical reach.
const MAX_PFN: u64 = 1 << (32 - PAGE_SHIFT);

/// Physical pages to map, in GPU virtual order.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalMemory<'a> {
    /// Page frame numbers
    pub frames: &'a [u64],
    /// Byte offset of the buffer inside the first page
    pub offset: u32,
    pub page_size: usize,
}

impl<'a> PhysicalMemory<'a> {
    /// 4KB pages starting `offset` bytes into the first frame.
    #[must_use]
    pub const fn new(frames: &'a [u64], offset: u32) -> Self {
        Self {
            frames,
            offset,
            page_size: PAGE_SIZE,
        }
    }
}

/// Where a buffer ended up in the GPU address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMapping {
    address: GpuVa,
    run: PageRun,
}

impl GpuMapping {
    /// GPU address of the first byte of the buffer.
    #[inline]
    #[must_use]
    pub fn address(&self) -> GpuVa {
        self.address
    }

    #[inline]
    #[must_use]
    pub fn run(&self) -> PageRun {
        self.run
    }

    #[inline]
    #[must_use]
    pub fn pages(&self) -> u32 {
        self.run.count
    }
}

/// Snapshot of a context's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    pub vacant_pages: u64,
    pub allocated_pages: u64,
    pub vacant_runs: usize,
    pub allocated_runs: usize,
    pub slave_tables: usize,
}

struct ContextState {
    master: MasterTable,
    /// Slave table behind each master slot
    slaves: Vec<Option<Handle<SlaveTable>>>,
    tables: SlaveTableManager,
    arenas: ArenaAllocator,
}

impl ContextState {
    /// Slave table for `master`, allocating and linking it if absent.
    fn slave_for<A>(&mut self, pages: &A, master: u32) -> Result<Handle<SlaveTable>, MmuError>
    where
        A: PageAllocator + ?Sized,
    {
        if let Some(handle) = self.slaves[master as usize] {
            return Ok(handle);
        }
        let handle = self.tables.allocate(pages)?;
        self.master.set_entry(master, MasterEntry::table(self.tables[handle].address()));
        self.slaves[master as usize] = Some(handle);
        Ok(handle)
    }

    /// Point every page of `run` at the matching frame.
    ///
    /// Entries written before a failure are left in place.
    fn populate<A>(&mut self, pages: &A, run: PageRun, frames: &[u64]) -> Result<(), MmuError>
    where
        A: PageAllocator + ?Sized,
    {
        let mut at = run;
        for &pfn in frames {
            let handle = self.slave_for(pages, at.master)?;
            let entry = SlaveEntry::page(PA::from_pfn(pfn).value() as u32, true);
            self.tables[handle].map(at.slave, entry);
            at = at.advance(1, SLAVE_ENTRIES);
        }
        Ok(())
    }

    /// Clear every page of `run`, releasing slave tables left empty.
    fn depopulate<A>(&mut self, pages: &A, run: PageRun)
    where
        A: PageAllocator + ?Sized,
    {
        let mut at = run;
        for _ in 0..run.count {
            if let Some(handle) = self.slaves[at.master as usize]
                && self.tables[handle].unmap(at.slave) == 0
            {
                self.tables.free(pages, handle);
                self.slaves[at.master as usize] = None;
                self.master.set_entry(at.master, MasterEntry::VACANT);
                log::trace!("slave table {} released", at.master);
            }
            at = at.advance(1, SLAVE_ENTRIES);
        }
    }
}

/// One GPU virtual address space.
pub struct MmuContext {
    id: u32,
    /// Device that created this context
    device: u32,
    /// MMU_CONFIGURATION value selecting this context's master table
    configuration: u32,
    master_address: PA,
    state: Mutex<ContextState>,
}

impl MmuContext {
    pub(crate) fn create<P, R>(device: &MmuDevice<P, R>) -> Result<Self, MmuError>
    where
        P: PageAllocator,
        R: RegisterIo,
    {
        let pages = device.pages();
        let block = pages.alloc_pages(MASTER_TABLE_ORDER)?;
        let master = MasterTable::new(block).map_err(|(e, block)| {
            pages.free_pages(block);
            MmuError::from(e)
        })?;

        let mut slaves = Vec::new();
        if slaves.try_reserve_exact(MASTER_ENTRIES as usize).is_err() {
            pages.free_pages(master.into_block());
            return Err(MmuError::OutOfMemory);
        }
        slaves.resize(MASTER_ENTRIES as usize, None);

        let arenas = match ArenaAllocator::new(device.take_arena_records()) {
            Ok(arenas) => arenas,
            Err(e) => {
                pages.free_pages(master.into_block());
                return Err(e.into());
            }
        };

        let configuration =
            (master.address() & MMU_CONFIGURATION_ADDRESS) | MMU_CONFIGURATION_MODE_1K;
        Ok(Self {
            id: device.next_context_id(),
            device: device.id(),
            configuration,
            master_address: master.phys(),
            state: Mutex::new(ContextState {
                master,
                slaves,
                tables: SlaveTableManager::new(),
                arenas,
            }),
        })
    }

    /// Return every page and the arena records to `device`.
    pub(crate) fn release<P: PageAllocator, R: RegisterIo>(self, device: &MmuDevice<P, R>) {
        let ContextState {
            mut master,
            slaves,
            mut tables,
            arenas,
        } = self.state.into_inner();

        for (index, slot) in slaves.into_iter().enumerate() {
            if let Some(handle) = slot {
                tables.free(device.pages(), handle);
                master.set_entry(index as u32, MasterEntry::VACANT);
            }
        }
        device.return_arena_records(arenas.into_records());
        device.pages().free_pages(master.into_block());
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn device_id(&self) -> u32 {
        self.device
    }

    /// Value loaded into MMU_CONFIGURATION to make this context current.
    #[inline]
    #[must_use]
    pub fn configuration(&self) -> u32 {
        self.configuration
    }

    #[inline]
    #[must_use]
    pub fn master_address(&self) -> PA {
        self.master_address
    }

    fn check_device<P, R>(&self, device: &MmuDevice<P, R>) -> Result<(), MmuError>
    where
        P: PageAllocator,
        R: RegisterIo,
    {
        if self.device != device.id() {
            return Err(MmuError::ForeignContext);
        }
        if !device.is_enabled() {
            return Err(MmuError::NotEnabled);
        }
        Ok(())
    }

    /// Switch the GPU to this context's master table.
    ///
    /// Follow with a TLB flush before relying on the new translations.
    pub fn set_master(&self, writer: &mut CommandWriter<'_>) -> Result<(), MmuError> {
        writer.load_state(MMU_CONFIGURATION, self.configuration)?;
        Ok(())
    }

    /// Map `memory` at the lowest free GPU address that fits it.
    pub fn map_physical<P: PageAllocator, R: RegisterIo>(
        &self,
        device: &MmuDevice<P, R>,
        memory: &PhysicalMemory<'_>,
    ) -> Result<GpuMapping, MmuError> {
        self.check_device(device)?;
        if memory.page_size != PAGE_SIZE {
            return Err(MmuError::InvalidPageSize(memory.page_size));
        }
        let count = memory.frames.len();
        if count == 0 || count > TOTAL_PAGES as usize {
            return Err(MmuError::InvalidPageCount(count));
        }
        if memory.offset as usize >= PAGE_SIZE {
            return Err(MmuError::InvalidOffset(memory.offset));
        }
        if let Some(&pfn) = memory.frames.iter().find(|&&pfn| pfn >= MAX_PFN) {
            return Err(MmuError::Unaddressable(pfn));
        }

        let mut state = self.state.lock();
        let run = state.arenas.allocate(count as u32)?;
        state.populate(device.pages(), run, memory.frames)?;
        drop(state);

        let address = GpuVa::compose(run.master, run.slave, memory.offset);
        log::debug!("context {}: mapped {} pages at {} {:?}", self.id, count, address, run);
        Ok(GpuMapping { address, run })
    }

    /// Remove a mapping made by [`map_physical`](Self::map_physical).
    pub fn unmap_physical<P: PageAllocator, R: RegisterIo>(
        &self,
        device: &MmuDevice<P, R>,
        mapping: &GpuMapping,
    ) -> Result<(), MmuError> {
        if self.device != device.id() {
            return Err(MmuError::ForeignContext);
        }
        let run = mapping.run;
        let mut state = self.state.lock();
        let Some(allocated) = state.arenas.find_allocated(run.master, run.slave) else {
            return Err(MmuError::NotMapped(mapping.address));
        };
        if allocated.count != run.count {
            return Err(MmuError::LengthMismatch {
                expected: allocated.count,
                actual: run.count,
            });
        }

        state.depopulate(device.pages(), run);
        state.arenas.free(run)?;
        drop(state);

        log::debug!("context {}: unmapped {} pages at {}", self.id, run.count, mapping.address);
        Ok(())
    }

    /// Physical address behind `address`, if it is mapped.
    #[must_use]
    pub fn translate(&self, address: GpuVa) -> Option<PA> {
        let state = self.state.lock();
        let master = address.master_index();
        if !state.master.entry(master).is_present() {
            return None;
        }
        let handle = state.slaves[master as usize]?;
        let page = state.tables.get(handle)?.entry(address.slave_index()).page_address()?;
        Some(page + address.page_offset() as u64)
    }

    #[must_use]
    pub fn usage(&self) -> ContextUsage {
        let state = self.state.lock();
        ContextUsage {
            vacant_pages: state.arenas.vacant_pages(),
            allocated_pages: state.arenas.allocated_pages(),
            vacant_runs: state.arenas.vacant_runs().count(),
            allocated_runs: state.arenas.allocated_runs().count(),
            slave_tables: state.tables.live(),
        }
    }

    /// Log the arena lists.
    pub fn dump(&self) {
        log::debug!("context {} (device {}):", self.id, self.device);
        self.state.lock().arenas.dump();
    }
}

impl core::fmt::Debug for MmuContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmuContext")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("master", &self.master_address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, device_with, submitted_without_trailer};
    use gc_cmd::FakeCompletion;
    use gc_cmd::opcode;
    use gc_paging::HostPageAllocator;

    #[test]
    fn test_configuration_names_master_table() {
        let dev = device();
        let ctx = dev.create_context().unwrap();
        assert_eq!(
            ctx.configuration(),
            ctx.master_address().value() as u32 | MMU_CONFIGURATION_MODE_1K
        );
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_map_single_page() {
        let dev = device();
        let ctx = dev.create_context().unwrap();

        let mapping = ctx.map_physical(&dev, &PhysicalMemory::new(&[0x12345], 0x10)).unwrap();
        assert_eq!(mapping.address(), GpuVa::new(0x10));
        assert_eq!(mapping.run(), PageRun::new(0, 0, 1));
        assert_eq!(ctx.translate(GpuVa::new(0x10)), Some(PA::new(0x1234_5010)));
        assert_eq!(ctx.translate(GpuVa::new(0x1000)), None);
        assert_eq!(ctx.translate(GpuVa::new(0x0100_0000)), None);

        let usage = ctx.usage();
        assert_eq!(usage.allocated_pages, 1);
        assert_eq!(usage.vacant_pages, u64::from(TOTAL_PAGES) - 1);
        assert_eq!(usage.slave_tables, 1);
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_map_unmap_ten_pages_restores_space() {
        let dev = device();
        let ctx = dev.create_context().unwrap();
        let frames: Vec<u64> = (0x100..0x10A).collect();

        let mapping = ctx.map_physical(&dev, &PhysicalMemory::new(&frames, 0)).unwrap();
        assert_eq!(mapping.pages(), 10);
        assert_eq!(ctx.translate(GpuVa::new(0x9000)), Some(PA::new(0x10_9000)));
        assert_eq!(ctx.usage().vacant_pages, 1_048_566);

        ctx.unmap_physical(&dev, &mapping).unwrap();
        assert_eq!(
            ctx.usage(),
            ContextUsage {
                vacant_pages: 1_048_576,
                allocated_pages: 0,
                vacant_runs: 1,
                allocated_runs: 0,
                slave_tables: 0,
            }
        );
        let state = ctx.state.lock();
        let runs: Vec<PageRun> = state.arenas.vacant_runs().collect();
        assert_eq!(runs, [PageRun::new(0, 0, MASTER_ENTRIES * SLAVE_ENTRIES)]);
        drop(state);
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_entries_are_present_writeable() {
        let dev = device();
        let ctx = dev.create_context().unwrap();
        ctx.map_physical(&dev, &PhysicalMemory::new(&[0x80001], 0)).unwrap();

        let state = ctx.state.lock();
        let master = state.master.entry(0);
        let table = &state.tables[state.slaves[0].unwrap()];
        assert_eq!(master.raw(), table.address() | 0x3);
        assert_eq!(table.entry(0).raw(), 0x8000_1007);
        assert_eq!(table.entry(1), SlaveEntry::VACANT);
        assert_eq!(state.master.entry(1), MasterEntry::VACANT);
        drop(state);
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_maps_are_packed_in_order() {
        let dev = device();
        let ctx = dev.create_context().unwrap();

        let a = ctx.map_physical(&dev, &PhysicalMemory::new(&[1, 2, 3], 0)).unwrap();
        let b = ctx.map_physical(&dev, &PhysicalMemory::new(&[4], 0x800)).unwrap();
        assert_eq!(a.address(), GpuVa::new(0));
        assert_eq!(b.address(), GpuVa::new(0x3800));
        assert_eq!(ctx.translate(GpuVa::new(0x2004)), Some(PA::new(0x3004)));
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_map_crosses_master_boundary() {
        let dev = device();
        let ctx = dev.create_context().unwrap();

        let filler: Vec<u64> = (0..4094).collect();
        ctx.map_physical(&dev, &PhysicalMemory::new(&filler, 0)).unwrap();
        let mapping = ctx
            .map_physical(&dev, &PhysicalMemory::new(&[0x100, 0x101, 0x102, 0x103], 0))
            .unwrap();

        assert_eq!(mapping.address(), GpuVa::new(0x00FF_E000));
        assert_eq!(ctx.translate(GpuVa::new(0x00FF_F000)), Some(PA::new(0x10_1000)));
        assert_eq!(ctx.translate(GpuVa::new(0x0100_0000)), Some(PA::new(0x10_2000)));
        assert_eq!(ctx.translate(GpuVa::new(0x0100_1FFF)), Some(PA::new(0x10_3FFF)));
        assert_eq!(ctx.usage().slave_tables, 2);
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_unmap_releases_empty_slave_tables() {
        let dev = device();
        let ctx = dev.create_context().unwrap();
        let baseline = dev.pages().pages_live();

        let filler: Vec<u64> = (0..4094).collect();
        let first = ctx.map_physical(&dev, &PhysicalMemory::new(&filler, 0)).unwrap();
        let second = ctx.map_physical(&dev, &PhysicalMemory::new(&[1, 2, 3, 4], 0)).unwrap();
        assert_eq!(dev.pages().pages_live(), baseline + 8);

        ctx.unmap_physical(&dev, &second).unwrap();
        // Master slot 0 still backs the first mapping; slot 1 is gone.
        assert_eq!(ctx.usage().slave_tables, 1);
        assert_eq!(ctx.translate(second.address()), None);
        assert_eq!(ctx.translate(GpuVa::new(0x1000)), Some(PA::new(0x1000)));
        assert_eq!(ctx.state.lock().master.entry(1), MasterEntry::VACANT);

        ctx.unmap_physical(&dev, &first).unwrap();
        let usage = ctx.usage();
        assert_eq!(usage.slave_tables, 0);
        assert_eq!(usage.vacant_runs, 1);
        assert_eq!(usage.allocated_pages, 0);
        assert_eq!(dev.pages().pages_live(), baseline);
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_unmapped_space_is_reused() {
        let dev = device();
        let ctx = dev.create_context().unwrap();

        let a = ctx.map_physical(&dev, &PhysicalMemory::new(&[1, 2], 0)).unwrap();
        let b = ctx.map_physical(&dev, &PhysicalMemory::new(&[3], 0)).unwrap();
        ctx.unmap_physical(&dev, &a).unwrap();

        let c = ctx.map_physical(&dev, &PhysicalMemory::new(&[5], 0)).unwrap();
        assert_eq!(c.address(), GpuVa::new(0));
        assert_eq!(ctx.translate(b.address()), Some(PA::new(0x3000)));
        assert_eq!(ctx.usage().vacant_runs, 2);
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_unmap_unknown_mapping() {
        let dev = device();
        let ctx = dev.create_context().unwrap();
        let other = dev.create_context().unwrap();

        let mapping = other.map_physical(&dev, &PhysicalMemory::new(&[1], 0)).unwrap();
        let err = ctx.unmap_physical(&dev, &mapping).unwrap_err();
        assert_eq!(err, MmuError::NotMapped(GpuVa::new(0)));
        assert_eq!(err.errno(), -2);

        other.unmap_physical(&dev, &mapping).unwrap();
        assert_eq!(other.unmap_physical(&dev, &mapping).unwrap_err().errno(), -2);

        dev.destroy_context(ctx).unwrap();
        dev.destroy_context(other).unwrap();
    }

    #[test]
    fn test_unmap_length_mismatch() {
        let dev = device();
        let ctx = dev.create_context().unwrap();
        let mapping = ctx.map_physical(&dev, &PhysicalMemory::new(&[1, 2, 3], 0)).unwrap();

        let forged = GpuMapping {
            address: mapping.address(),
            run: PageRun::new(0, 0, 2),
        };
        let err = ctx.unmap_physical(&dev, &forged).unwrap_err();
        assert_eq!(err, MmuError::LengthMismatch { expected: 3, actual: 2 });
        assert_eq!(err.errno(), -22);
        assert_eq!(ctx.usage().allocated_pages, 3);
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_map_rejects_bad_input() {
        let dev = device();
        let ctx = dev.create_context().unwrap();

        let cases = [
            (
                PhysicalMemory { frames: &[1], offset: 0, page_size: 8192 },
                MmuError::InvalidPageSize(8192),
            ),
            (PhysicalMemory::new(&[], 0), MmuError::InvalidPageCount(0)),
            (PhysicalMemory::new(&[1], 4096), MmuError::InvalidOffset(4096)),
            (PhysicalMemory::new(&[1, MAX_PFN], 0), MmuError::Unaddressable(MAX_PFN)),
        ];
        for (memory, expected) in cases {
            let err = ctx.map_physical(&dev, &memory).unwrap_err();
            assert_eq!(err, expected);
            assert_eq!(err.errno(), -22);
        }
        assert_eq!(ctx.usage().allocated_pages, 0);
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_map_rejects_foreign_device() {
        let dev = device();
        let other = device();
        let ctx = dev.create_context().unwrap();

        let memory = PhysicalMemory::new(&[1], 0);
        assert_eq!(ctx.map_physical(&other, &memory), Err(MmuError::ForeignContext));
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_map_whole_address_space() {
        let dev = device();
        let ctx = dev.create_context().unwrap();

        let frames: Vec<u64> = (0..u64::from(TOTAL_PAGES)).collect();
        let mapping = ctx.map_physical(&dev, &PhysicalMemory::new(&frames, 0)).unwrap();
        assert_eq!(mapping.address(), GpuVa::new(0));
        assert_eq!(ctx.usage().vacant_pages, 0);
        assert_eq!(ctx.usage().slave_tables, MASTER_ENTRIES as usize);
        assert_eq!(ctx.translate(GpuVa::new(0xFFFF_FFFF)), Some(PA::new(0xFFFF_FFFF)));

        let err = ctx.map_physical(&dev, &PhysicalMemory::new(&[1], 0)).unwrap_err();
        assert_eq!(err.errno(), -12);

        ctx.unmap_physical(&dev, &mapping).unwrap();
        assert_eq!(ctx.usage().slave_tables, 0);
        assert_eq!(ctx.usage().vacant_pages, u64::from(TOTAL_PAGES));
        dev.destroy_context(ctx).unwrap();
    }

    #[test]
    fn test_failed_map_keeps_partial_entries() {
        // Command buffer, master table, safe zone and one slave table.
        let dev = device_with(HostPageAllocator::with_limit(7), FakeCompletion::new());
        let ctx = dev.create_context().unwrap();

        let frames: Vec<u64> = (0..4097).collect();
        let err = ctx.map_physical(&dev, &PhysicalMemory::new(&frames, 0)).unwrap_err();
        assert_eq!(err, MmuError::OutOfMemory);

        let usage = ctx.usage();
        assert_eq!(usage.allocated_pages, 4097);
        assert_eq!(usage.slave_tables, 1);
        assert_eq!(ctx.translate(GpuVa::new(0x00FF_F000)), Some(PA::new(0xFFF000)));

        dev.destroy_context(ctx).unwrap();
        assert_eq!(dev.pages().pages_live(), 2);
    }

    #[test]
    fn test_set_master_emits_configuration() {
        let dev = device();
        let first = dev.create_context().unwrap();
        let second = dev.create_context().unwrap();

        let mut session = dev.commands();
        second.set_master(&mut session.alloc(8).unwrap()).unwrap();
        session.flush().unwrap();
        drop(session);

        assert_eq!(
            submitted_without_trailer(&dev),
            [opcode::load_state(MMU_CONFIGURATION, 1), second.configuration()]
        );
        assert_ne!(first.configuration(), second.configuration());
        dev.destroy_context(first).unwrap();
        dev.destroy_context(second).unwrap();
    }

    #[test]
    fn test_destroy_returns_every_page() {
        let dev = device();
        let ctx = dev.create_context().unwrap();
        let frames: Vec<u64> = (0..10_000).collect();
        ctx.map_physical(&dev, &PhysicalMemory::new(&frames, 0)).unwrap();
        ctx.map_physical(&dev, &PhysicalMemory::new(&[7; 3], 0)).unwrap();

        dev.destroy_context(ctx).unwrap();
        assert_eq!(dev.pages().pages_live(), 2);
        assert_eq!(dev.context_count(), 0);
    }

    #[test]
    fn test_concurrent_map_unmap() {
        let dev = device();
        let ctx = dev.create_context().unwrap();

        let mut mappings: Vec<GpuMapping> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4u64)
                .map(|worker| {
                    let (dev, ctx) = (&dev, &ctx);
                    scope.spawn(move || {
                        let mut kept = Vec::new();
                        for round in 0..32u64 {
                            let first = worker * 1000 + round * 8;
                            let frames: Vec<u64> = (first..first + 8).collect();
                            let memory = PhysicalMemory::new(&frames, 0);
                            let mapping = ctx.map_physical(dev, &memory).unwrap();
                            if round % 2 == 0 {
                                ctx.unmap_physical(dev, &mapping).unwrap();
                            } else {
                                kept.push(mapping);
                            }
                        }
                        kept
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        mappings.sort_by_key(|m| m.address().value());
        for pair in mappings.windows(2) {
            assert!(pair[0].address().value() + 8 * PAGE_SIZE as u64 <= pair[1].address().value());
        }
        let usage = ctx.usage();
        assert_eq!(usage.allocated_pages, 64 * 8);
        assert_eq!(usage.vacant_pages + usage.allocated_pages, u64::from(TOTAL_PAGES));
        dev.destroy_context(ctx).unwrap();
    }
}
