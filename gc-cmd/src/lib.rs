//! GPU front-end command stream
//!
//! Everything that reaches the GPU's front end goes through this crate:
//!
//! - [`registers`]: Host register offsets and pipeline state addresses
//! - [`opcode`]: Bit-exact command encoders and a stream decoder
//! - [`buffer`]: The command buffer, its writers, and the flush protocol
//! - [`completion`]: Strategies for waiting on the end-of-stream event
//!
//! # Example
//!
//! ```ignore
//! let mut cmdbuf = CommandBuffer::new(pages.alloc_pages(0)?)?;
//! cmdbuf.alloc(8)?.load_state(MMU_SAFE_ADDRESS, safe)?;
//! cmdbuf.flush(&regs, &completion, None)?;
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod buffer;
pub mod completion;
pub mod error;
pub mod opcode;
pub mod registers;

pub use buffer::{BufferState, CommandBuffer, CommandWriter, MAX_BUFFER_BYTES, TRAILER_BYTES};
#[cfg(any(test, feature = "fake"))]
pub use completion::FakeCompletion;
pub use completion::{Clock, Completion, PollingCompletion, WaitQueue, WaitQueueCompletion};
pub use error::CmdError;
pub use opcode::{Command, Decoder, Recipient};
