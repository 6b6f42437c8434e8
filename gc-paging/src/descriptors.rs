//! GPU translation table entry formats
//!
//! Master (MTLB) entry:
//! ```text
//! +-------------------------------------------+------+----+---+---+
//! |        Slave table address [31:6]         |  R   | SZ | E | P |
//! +-------------------------------------------+------+----+---+---+
//!  31                                         6 5    4 3  2  1   0
//! ```
//!
//! Slave (STLB) entry:
//! ```text
//! +---------------------------------+------------------+---+---+---+
//! |      Page address [31:12]       |        R         | W | E | P |
//! +---------------------------------+------------------+---+---+---+
//!  31                             12 11               3  2   1   0
//! ```
//!
//! Unused entries of both kinds hold [`MasterEntry::VACANT`] /
//! [`SlaveEntry::VACANT`]: not present, exception raised on access.

use tock_registers::{
    interfaces::{Readable, Writeable},
    register_bitfields,
    registers::InMemoryRegister,
};

use crate::address::PA;

const MASTER_ADDRESS_MASK: u32 = 0xFFFF_FFC0;
const SLAVE_ADDRESS_MASK: u32 = 0xFFFF_F000;

register_bitfields![u32,
    /// Master table entry fields
    pub MasterFields [
        /// Entry points at a slave table
        PRESENT OFFSET(0) NUMBITS(1) [],

        /// Raise an MMU exception on access
        EXCEPTION OFFSET(1) NUMBITS(1) [],

        /// Page size served by the slave table
        SIZE OFFSET(2) NUMBITS(2) [
            Size4K = 0,
            Size64K = 1
        ],

        /// Slave table physical address [31:6]
        ADDRESS OFFSET(6) NUMBITS(26) []
    ],

    /// Slave table entry fields
    pub SlaveFields [
        /// Entry maps a page
        PRESENT OFFSET(0) NUMBITS(1) [],

        /// Raise an MMU exception on access
        EXCEPTION OFFSET(1) NUMBITS(1) [],

        /// Page may be written by the GPU
        WRITEABLE OFFSET(2) NUMBITS(1) [],

        /// Page physical address [31:12]
        ADDRESS OFFSET(12) NUMBITS(20) []
    ]
];

/// One 32-bit master table entry.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MasterEntry(u32);

impl MasterEntry {
    pub const VACANT: Self = Self(0x0000_0002);

    /// Entry pointing at a 4KB-page slave table at `table`.
    ///
    /// `table` must be 64-byte aligned.
    #[must_use]
    pub fn table(table: u32) -> Self {
        debug_assert!(table & !MASTER_ADDRESS_MASK == 0, "slave table misaligned");
        let reg = InMemoryRegister::<u32, MasterFields::Register>::new(0);
        reg.write(
            MasterFields::PRESENT::SET
                + MasterFields::EXCEPTION::SET
                + MasterFields::SIZE::Size4K
                + MasterFields::ADDRESS.val(table >> 6),
        );
        Self(reg.get())
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn is_present(self) -> bool {
        InMemoryRegister::<u32, MasterFields::Register>::new(self.0).is_set(MasterFields::PRESENT)
    }

    /// Physical address of the slave table, if present.
    #[must_use]
    pub fn table_address(self) -> Option<PA> {
        self.is_present()
            .then(|| PA::new(u64::from(self.0 & MASTER_ADDRESS_MASK)))
    }
}

impl core::fmt::Debug for MasterEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "MasterEntry({:#010x})", self.0)
    }
}

/// One 32-bit slave table entry.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SlaveEntry(u32);

impl SlaveEntry {
    pub const VACANT: Self = Self(0x0000_0002);

    /// Entry mapping the 4KB page at `page`.
    #[must_use]
    pub fn page(page: u32, writeable: bool) -> Self {
        debug_assert!(page & !SLAVE_ADDRESS_MASK == 0, "page misaligned");
        let reg = InMemoryRegister::<u32, SlaveFields::Register>::new(0);
        let access = if writeable {
            SlaveFields::WRITEABLE::SET
        } else {
            SlaveFields::WRITEABLE::CLEAR
        };
        reg.write(
            SlaveFields::PRESENT::SET
                + SlaveFields::EXCEPTION::SET
                + access
                + SlaveFields::ADDRESS.val(page >> 12),
        );
        Self(reg.get())
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn is_present(self) -> bool {
        InMemoryRegister::<u32, SlaveFields::Register>::new(self.0).is_set(SlaveFields::PRESENT)
    }

    #[inline]
    #[must_use]
    pub fn is_writeable(self) -> bool {
        InMemoryRegister::<u32, SlaveFields::Register>::new(self.0).is_set(SlaveFields::WRITEABLE)
    }

    /// Physical address of the mapped page, if present.
    #[must_use]
    pub fn page_address(self) -> Option<PA> {
        self.is_present()
            .then(|| PA::new(u64::from(self.0 & SLAVE_ADDRESS_MASK)))
    }
}

impl core::fmt::Debug for SlaveEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SlaveEntry({:#010x})", self.0)
    }
}
