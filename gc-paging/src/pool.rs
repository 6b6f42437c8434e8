//! Index-based record pool
//!
//! Arena and slave-table records are small and churn constantly. Instead of
//! heap-allocating each one, a [`Pool`] keeps them in a single vector of
//! slots threaded onto an intrusive free list, growing by roughly one page
//! worth of records whenever the free list runs dry.
//!
//! Records are addressed by [`Handle`], which carries the slot index and a
//! generation. Releasing a slot bumps its generation, so a handle that
//! outlived its record is detected instead of silently aliasing a newer one.

use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::{Index, IndexMut};

use crate::error::PoolError;
use crate::PAGE_SIZE;

/// Typed reference to a record in a [`Pool<T>`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next: Option<u32> },
}

/// Slab of `T` records with a free list.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Option<u32>,
    live: usize,
    limit: Option<usize>,
}

impl<T> Pool<T> {
    /// Records added per growth step.
    pub const GROW_BY: usize = {
        let per_page = PAGE_SIZE / mem::size_of::<Slot<T>>();
        if per_page == 0 { 1 } else { per_page }
    };

    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: None,
            live: 0,
            limit: None,
        }
    }

    /// Pool that never holds more than `records` slots.
    #[must_use]
    pub const fn with_limit(records: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: None,
            live: 0,
            limit: Some(records),
        }
    }

    /// Records currently in use.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Slots owned by the pool, used or free.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Make sure the next [`insert`](Self::insert) cannot fail.
    pub fn reserve(&mut self) -> Result<(), PoolError> {
        if self.free.is_none() {
            self.grow()?;
        }
        Ok(())
    }

    /// Store `value`, growing the pool if no free slot remains.
    pub fn insert(&mut self, value: T) -> Result<Handle<T>, PoolError> {
        self.reserve()?;
        let index = self.free.ok_or(PoolError::OutOfMemory)?;
        let slot = &mut self.slots[index as usize];
        let Slot::Vacant { generation, next } = *slot else {
            return Err(PoolError::OutOfMemory);
        };
        *slot = Slot::Occupied { generation, value };
        self.free = next;
        self.live += 1;
        Ok(Handle {
            index,
            generation,
            _marker: PhantomData,
        })
    }

    /// Release the record behind `handle`, returning its value.
    ///
    /// Returns `None` if the handle is stale.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
            next: self.free,
        };
        let Slot::Occupied { value, .. } = mem::replace(slot, vacant) else {
            return None;
        };
        self.free = Some(handle.index);
        self.live -= 1;
        Some(value)
    }

    #[must_use]
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Release every record, keeping the slots for reuse.
    pub fn clear(&mut self) {
        let mut next = None;
        for index in (0..self.slots.len()).rev() {
            let generation = match &self.slots[index] {
                Slot::Occupied { generation, .. } => generation.wrapping_add(1),
                Slot::Vacant { generation, .. } => *generation,
            };
            self.slots[index] = Slot::Vacant { generation, next };
            next = Some(index as u32);
        }
        self.free = next;
        self.live = 0;
    }

    fn grow(&mut self) -> Result<(), PoolError> {
        let start = self.slots.len();
        let headroom = self.limit.map_or(Self::GROW_BY, |limit| limit.saturating_sub(start));
        let add = headroom.min(Self::GROW_BY);
        if add == 0 || start + add > u32::MAX as usize {
            return Err(PoolError::OutOfMemory);
        }
        self.slots
            .try_reserve_exact(add)
            .map_err(|_| PoolError::OutOfMemory)?;

        for index in start..start + add {
            let next = if index + 1 < start + add {
                Some(index as u32 + 1)
            } else {
                self.free
            };
            self.slots.push(Slot::Vacant { generation: 0, next });
        }
        self.free = Some(start as u32);
        log::trace!("pool grew by {} records to {}", add, self.slots.len());
        Ok(())
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Handle<T>> for Pool<T> {
    type Output = T;

    /// # Panics
    ///
    /// Panics on a stale handle.
    fn index(&self, handle: Handle<T>) -> &T {
        self.get(handle).unwrap_or_else(|| panic!("stale pool handle {:?}", handle))
    }
}

impl<T> IndexMut<Handle<T>> for Pool<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.get_mut(handle).unwrap_or_else(|| panic!("stale pool handle {:?}", handle))
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("live", &self.live)
            .field("capacity", &self.slots.len())
            .finish()
    }
}
