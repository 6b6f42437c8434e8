//! Recording register file for host-side tests.
//!
//! Stores register values in a map and keeps an ordered log of every write,
//! so tests can assert both the final state and the exact programming
//! sequence. Registers can be preset to model values the hardware reports.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

use crate::RegisterIo;

#[derive(Default)]
struct FakeState {
    values: BTreeMap<usize, u32>,
    writes: Vec<(usize, u32)>,
    reads: usize,
    read_clears: Vec<usize>,
}

/// In-memory [`RegisterIo`] implementation.
#[derive(Default)]
pub struct FakeRegisters {
    state: Mutex<FakeState>,
}

impl FakeRegisters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a register value without recording a write.
    pub fn preset(&self, offset: usize, value: u32) {
        self.state.lock().values.insert(offset, value);
    }

    /// Mark a register as clear-on-read (like an interrupt acknowledge).
    pub fn clear_on_read(&self, offset: usize) {
        self.state.lock().read_clears.push(offset);
    }

    /// Current value of a register; unset registers read as zero.
    #[must_use]
    pub fn value(&self, offset: usize) -> u32 {
        self.state.lock().values.get(&offset).copied().unwrap_or(0)
    }

    /// All writes in program order.
    #[must_use]
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state.lock().writes.clone()
    }

    /// Writes to one register, in program order.
    #[must_use]
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    #[must_use]
    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }
}

impl RegisterIo for FakeRegisters {
    fn read32(&self, offset: usize) -> u32 {
        let mut state = self.state.lock();
        state.reads += 1;
        let value = state.values.get(&offset).copied().unwrap_or(0);
        if state.read_clears.contains(&offset) {
            state.values.remove(&offset);
        }
        value
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut state = self.state.lock();
        state.writes.push((offset, value));
        state.values.insert(offset, value);
    }
}
