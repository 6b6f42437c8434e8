//! Front-end command stream encoding
//!
//! The front end consumes 32-bit little-endian words. Every command starts
//! with a header carrying the opcode in bits [31:27]:
//!
//! ```text
//! LOAD_STATE  | 00001 | R | COUNT[25:16] | ADDRESS[15:0] |  value * COUNT  (pad to 64 bits)
//! END         | 00010 |                 0               |
//! NOP         | 00011 |                 0               |
//! LINK        | 01000 |       0       | PREFETCH[15:0]  |  address
//! STALL       | 01001 |                 0               |  token (FROM | TO << 8)
//! ```

use core::fmt;

use tock_registers::{
    interfaces::{Readable, Writeable},
    register_bitfields,
    registers::InMemoryRegister,
};

use crate::error::CmdError;

register_bitfields![u32,
    /// Fields shared by every command header
    pub CommandHeader [
        OPCODE OFFSET(27) NUMBITS(5) [
            LoadState = 1,
            End = 2,
            Nop = 3,
            Link = 8,
            Stall = 9
        ]
    ],

    /// LOAD_STATE header
    pub LoadStateHeader [
        /// State address in words
        ADDRESS OFFSET(0) NUMBITS(16) [],
        /// Number of values that follow
        COUNT OFFSET(16) NUMBITS(10) []
    ],

    /// LINK header
    pub LinkHeader [
        /// Words to fetch at the target, in 64-bit units
        PREFETCH OFFSET(0) NUMBITS(16) []
    ],

    /// Semaphore and stall token
    pub SyncToken [
        FROM OFFSET(0) NUMBITS(5) [
            FrontEnd = 1,
            PixelEngine = 7
        ],
        TO OFFSET(8) NUMBITS(5) [
            FrontEnd = 1,
            PixelEngine = 7
        ]
    ]
];

/// Largest value count a single LOAD_STATE can carry.
pub const MAX_LOAD_STATE_COUNT: usize = 1023;

/// END header.
pub const END: u32 = 2 << 27;

/// NOP header.
pub const NOP: u32 = 3 << 27;

/// STALL header.
pub const STALL: u32 = 9 << 27;

/// Pipeline module taking part in a semaphore or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    FrontEnd,
    PixelEngine,
}

impl Recipient {
    const fn raw(self) -> u32 {
        match self {
            Self::FrontEnd => 1,
            Self::PixelEngine => 7,
        }
    }
}

/// LOAD_STATE header for `count` values starting at state `address`.
#[must_use]
pub fn load_state(address: u32, count: usize) -> u32 {
    debug_assert!(address.is_multiple_of(4), "state address not word aligned");
    debug_assert!((1..=MAX_LOAD_STATE_COUNT).contains(&count), "bad LOAD_STATE count");
    let header = InMemoryRegister::<u32, LoadStateHeader::Register>::new(0);
    header.write(
        LoadStateHeader::ADDRESS.val(address >> 2) + LoadStateHeader::COUNT.val(count as u32),
    );
    header.get() | CommandHeader::OPCODE::LoadState.value
}

/// LINK header with the prefetch length of the target stream.
#[must_use]
pub fn link(prefetch: u16) -> u32 {
    let header = InMemoryRegister::<u32, LinkHeader::Register>::new(0);
    header.write(LinkHeader::PREFETCH.val(u32::from(prefetch)));
    header.get() | CommandHeader::OPCODE::Link.value
}

/// Token naming the module that signals and the module that waits.
#[must_use]
pub fn sync_token(from: Recipient, to: Recipient) -> u32 {
    let token = InMemoryRegister::<u32, SyncToken::Register>::new(0);
    token.write(SyncToken::FROM.val(from.raw()) + SyncToken::TO.val(to.raw()));
    token.get()
}

/// Words occupied by a LOAD_STATE of `count` values, padding included.
#[inline]
#[must_use]
pub const fn load_state_words(count: usize) -> usize {
    (1 + count).next_multiple_of(2)
}

/// A decoded command.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    LoadState { address: u32, values: &'a [u32] },
    End,
    Nop,
    Link { prefetch: u16, address: u32 },
    Stall { token: u32 },
    Unknown(u32),
}

impl fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadState { address, values } => {
                write!(f, "LOAD_STATE {:#06x} <- {:x?}", address, values)
            }
            Self::End => write!(f, "END"),
            Self::Nop => write!(f, "NOP"),
            Self::Link { prefetch, address } => {
                write!(f, "LINK {:#010x} prefetch {}", address, prefetch)
            }
            Self::Stall { token } => write!(f, "STALL token {:#06x}", token),
            Self::Unknown(word) => write!(f, "?? {:#010x}", word),
        }
    }
}

/// Iterator decoding a command stream.
///
/// Stops at the end of the words; reports a command cut short as
/// [`CmdError::Truncated`] and then stops.
pub struct Decoder<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> Decoder<'a> {
    #[must_use]
    pub fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u32], CmdError> {
        let offset = self.pos;
        let words = self
            .words
            .get(offset..offset + n)
            .ok_or(CmdError::Truncated { offset })?;
        self.pos += n;
        Ok(words)
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<Command<'a>, CmdError>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.pos;
        let header_word = *self.words.get(start)?;
        let header = InMemoryRegister::<u32, CommandHeader::Register>::new(header_word);

        let result = match header.read_as_enum(CommandHeader::OPCODE) {
            Some(CommandHeader::OPCODE::Value::LoadState) => {
                let fields = InMemoryRegister::<u32, LoadStateHeader::Register>::new(header_word);
                let count = fields.read(LoadStateHeader::COUNT) as usize;
                let address = fields.read(LoadStateHeader::ADDRESS) << 2;
                self.take(1 + count).map(|words| {
                    // Padding is only present when something follows.
                    let padded = load_state_words(count);
                    if start + padded <= self.words.len() {
                        self.pos = start + padded;
                    }
                    Command::LoadState {
                        address,
                        values: &words[1..],
                    }
                })
            }
            Some(CommandHeader::OPCODE::Value::End) => self.take(1).map(|_| Command::End),
            Some(CommandHeader::OPCODE::Value::Nop) => self.take(1).map(|_| Command::Nop),
            Some(CommandHeader::OPCODE::Value::Link) => self.take(2).map(|words| {
                let fields = InMemoryRegister::<u32, LinkHeader::Register>::new(words[0]);
                Command::Link {
                    prefetch: fields.read(LinkHeader::PREFETCH) as u16,
                    address: words[1],
                }
            }),
            Some(CommandHeader::OPCODE::Value::Stall) => {
                self.take(2).map(|words| Command::Stall { token: words[1] })
            }
            None => self.take(1).map(|_| Command::Unknown(header_word)),
        };

        if result.is_err() {
            self.pos = self.words.len();
        }
        Some(result)
    }
}
