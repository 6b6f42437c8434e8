//! GPU virtual address arenas
//!
//! The address space of a context is tracked as runs of pages, each run
//! identified by the (master, slave) index pair of its first page. Runs live
//! on two singly linked lists threaded through a [`Pool`]:
//!
//! - **vacant**: free runs, sorted by (master, slave), never adjacent
//! - **allocated**: runs handed out by [`ArenaAllocator::allocate`], unordered
//!
//! Allocation is first fit and takes the front of the matching vacant run.
//! Freeing a run reinserts it in order and merges it with whichever
//! neighbours it touches, so the vacant list stays fully coalesced.

use core::fmt;

use crate::error::ArenaError;
use crate::pool::{Handle, Pool};
use crate::{MASTER_ENTRIES, SLAVE_ENTRIES};

/// A run of `count` pages starting at (`master`, `slave`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRun {
    pub master: u32,
    pub slave: u32,
    pub count: u32,
}

impl PageRun {
    #[inline]
    #[must_use]
    pub const fn new(master: u32, slave: u32, count: u32) -> Self {
        Self { master, slave, count }
    }

    /// Linear page index of the first page.
    #[inline]
    #[must_use]
    pub const fn first_page(&self, slave_entries: u32) -> u64 {
        self.master as u64 * slave_entries as u64 + self.slave as u64
    }

    /// The run left after dropping its first `pages` pages.
    #[must_use]
    pub const fn advance(self, pages: u32, slave_entries: u32) -> Self {
        let slave = self.slave as u64 + pages as u64;
        Self {
            master: self.master + (slave / slave_entries as u64) as u32,
            slave: (slave % slave_entries as u64) as u32,
            count: self.count - pages,
        }
    }

    #[inline]
    const fn key(&self) -> (u32, u32) {
        (self.master, self.slave)
    }
}

impl fmt::Debug for PageRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{} +{}]", self.master, self.slave, self.count)
    }
}

/// Whether `b` starts exactly where `a` ends.
///
/// Walks `a.count` slots forward from `a`'s start, carrying into the next
/// master slot every `slave_entries` pages.
#[must_use]
pub const fn siblings(a: PageRun, b: PageRun, slave_entries: u32) -> bool {
    let slave = a.slave as u64 + a.count as u64;
    let master = a.master as u64 + slave / slave_entries as u64;
    master == b.master as u64 && slave % slave_entries as u64 == b.slave as u64
}

/// One record on the vacant or allocated list.
pub struct Arena {
    run: PageRun,
    next: Option<Handle<Arena>>,
}

impl Arena {
    #[inline]
    #[must_use]
    pub fn run(&self) -> PageRun {
        self.run
    }
}

/// Vacant and allocated run lists for one address space.
pub struct ArenaAllocator {
    records: Pool<Arena>,
    vacant: Option<Handle<Arena>>,
    allocated: Option<Handle<Arena>>,
    slave_entries: u32,
    total_pages: u32,
}

impl ArenaAllocator {
    /// Allocator covering the whole GPU address space.
    ///
    /// `records` is cleared first, which lets a pool released by a previous
    /// context be reused.
    pub fn new(records: Pool<Arena>) -> Result<Self, ArenaError> {
        Self::with_geometry(MASTER_ENTRIES, SLAVE_ENTRIES, records)
    }

    /// Allocator over `master_entries * slave_entries` pages.
    pub fn with_geometry(
        master_entries: u32,
        slave_entries: u32,
        mut records: Pool<Arena>,
    ) -> Result<Self, ArenaError> {
        let total_pages = master_entries
            .checked_mul(slave_entries)
            .filter(|&total| total > 0)
            .ok_or(ArenaError::InvalidCount(0))?;

        records.clear();
        let whole = records.insert(Arena {
            run: PageRun::new(0, 0, total_pages),
            next: None,
        })?;

        Ok(Self {
            records,
            vacant: Some(whole),
            allocated: None,
            slave_entries,
            total_pages,
        })
    }

    /// Drain both lists and hand back the record pool.
    #[must_use]
    pub fn into_records(mut self) -> Pool<Arena> {
        self.records.clear();
        self.records
    }

    #[inline]
    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    #[inline]
    #[must_use]
    pub fn slave_entries(&self) -> u32 {
        self.slave_entries
    }

    /// Reserve `count` contiguous pages.
    ///
    /// On failure nothing is modified.
    pub fn allocate(&mut self, count: u32) -> Result<PageRun, ArenaError> {
        if count == 0 || count > self.total_pages {
            return Err(ArenaError::InvalidCount(count));
        }

        let mut prev = None;
        let mut cursor = self.vacant;
        while let Some(handle) = cursor {
            let arena = &self.records[handle];
            if arena.run.count >= count {
                break;
            }
            prev = cursor;
            cursor = arena.next;
        }
        let Some(found) = cursor else {
            return Err(ArenaError::Exhausted { requested: count });
        };

        let run = self.records[found].run;
        if run.count == count {
            let next = self.records[found].next;
            self.link_vacant(prev, next);
            self.records[found].next = self.allocated;
            self.allocated = Some(found);
            return Ok(run);
        }

        let front = PageRun::new(run.master, run.slave, count);
        let handle = self.records.insert(Arena {
            run: front,
            next: self.allocated,
        })?;
        self.allocated = Some(handle);
        self.records[found].run = run.advance(count, self.slave_entries);
        Ok(front)
    }

    /// Return a run obtained from [`allocate`](Self::allocate).
    pub fn free(&mut self, run: PageRun) -> Result<(), ArenaError> {
        let mut prev: Option<Handle<Arena>> = None;
        let mut cursor = self.allocated;
        while let Some(handle) = cursor {
            let arena = &self.records[handle];
            if arena.run.key() == run.key() {
                break;
            }
            prev = cursor;
            cursor = arena.next;
        }
        let Some(found) = cursor else {
            return Err(ArenaError::NotFound {
                master: run.master,
                slave: run.slave,
            });
        };

        let allocated = self.records[found].run;
        if allocated.count != run.count {
            return Err(ArenaError::LengthMismatch {
                expected: allocated.count,
                actual: run.count,
            });
        }

        let next = self.records[found].next;
        match prev {
            Some(p) => self.records[p].next = next,
            None => self.allocated = next,
        }
        self.insert_vacant(found);
        Ok(())
    }

    /// The allocated run starting at (`master`, `slave`), if any.
    #[must_use]
    pub fn find_allocated(&self, master: u32, slave: u32) -> Option<PageRun> {
        self.allocated_runs()
            .find(|run| run.master == master && run.slave == slave)
    }

    /// Vacant runs in address order.
    pub fn vacant_runs(&self) -> Runs<'_> {
        Runs {
            records: &self.records,
            cursor: self.vacant,
        }
    }

    /// Allocated runs, most recent first.
    pub fn allocated_runs(&self) -> Runs<'_> {
        Runs {
            records: &self.records,
            cursor: self.allocated,
        }
    }

    #[must_use]
    pub fn vacant_pages(&self) -> u64 {
        self.vacant_runs().map(|run| u64::from(run.count)).sum()
    }

    #[must_use]
    pub fn allocated_pages(&self) -> u64 {
        self.allocated_runs().map(|run| u64::from(run.count)).sum()
    }

    /// Records in use by both lists.
    #[must_use]
    pub fn records_in_use(&self) -> usize {
        self.records.len()
    }

    /// Log both lists at debug level.
    pub fn dump(&self) {
        log::debug!(
            "arenas: {} vacant pages, {} allocated pages",
            self.vacant_pages(),
            self.allocated_pages()
        );
        for run in self.vacant_runs() {
            log::debug!("  vacant    {:?}", run);
        }
        for run in self.allocated_runs() {
            log::debug!("  allocated {:?}", run);
        }
    }

    fn link_vacant(&mut self, prev: Option<Handle<Arena>>, next: Option<Handle<Arena>>) {
        match prev {
            Some(p) => self.records[p].next = next,
            None => self.vacant = next,
        }
    }

    /// Put the detached record `freed` back on the vacant list, merging it
    /// with adjacent runs.
    fn insert_vacant(&mut self, freed: Handle<Arena>) {
        let run = self.records[freed].run;

        let mut prev = None;
        let mut cursor = self.vacant;
        while let Some(handle) = cursor {
            let arena = &self.records[handle];
            debug_assert!(arena.run.key() != run.key(), "run {:?} is already vacant", run);
            if arena.run.key() > run.key() {
                break;
            }
            prev = cursor;
            cursor = arena.next;
        }

        let se = self.slave_entries;
        let left = prev.filter(|&p| siblings(self.records[p].run, run, se));
        let right = cursor.filter(|&n| siblings(run, self.records[n].run, se));

        match (left, right) {
            (Some(p), Some(n)) => {
                let absorbed = self.records[n].run.count;
                let after = self.records[n].next;
                let merged = &mut self.records[p];
                merged.run.count += run.count + absorbed;
                merged.next = after;
                self.records.remove(n);
                self.records.remove(freed);
            }
            (Some(p), None) => {
                self.records[p].run.count += run.count;
                self.records.remove(freed);
            }
            (None, Some(n)) => {
                let merged = &mut self.records[n].run;
                merged.master = run.master;
                merged.slave = run.slave;
                merged.count += run.count;
                self.records.remove(freed);
            }
            (None, None) => {
                self.records[freed].next = cursor;
                self.link_vacant(prev, Some(freed));
            }
        }
    }
}

impl fmt::Debug for ArenaAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("vacant", &self.vacant_pages())
            .field("allocated", &self.allocated_pages())
            .field("records", &self.records)
            .finish()
    }
}

/// Iterator over one of the run lists.
pub struct Runs<'a> {
    records: &'a Pool<Arena>,
    cursor: Option<Handle<Arena>>,
}

impl Iterator for Runs<'_> {
    type Item = PageRun;

    fn next(&mut self) -> Option<PageRun> {
        let arena = &self.records[self.cursor?];
        self.cursor = arena.next;
        Some(arena.run)
    }
}
