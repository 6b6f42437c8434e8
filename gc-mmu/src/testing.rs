//! Fixtures shared by the unit tests

use alloc::boxed::Box;
use alloc::vec::Vec;

use gc_cmd::{FakeCompletion, TRAILER_BYTES};
use gc_mmio::{FakeRegisters, RegisterIo};
use gc_paging::{HostPageAllocator, PageAllocator};

use crate::config::MmuConfig;
use crate::device::MmuDevice;

pub(crate) type TestDevice = MmuDevice<HostPageAllocator, FakeRegisters>;

pub(crate) fn device() -> TestDevice {
    device_with(HostPageAllocator::new(), FakeCompletion::new())
}

pub(crate) fn device_with(pages: HostPageAllocator, completion: FakeCompletion) -> TestDevice {
    MmuDevice::new(pages, FakeRegisters::new(), Box::new(completion), MmuConfig::default()).unwrap()
}

/// Words of the last submission, minus the completion trailer.
pub(crate) fn submitted_without_trailer<P, R>(dev: &MmuDevice<P, R>) -> Vec<u32>
where
    P: PageAllocator,
    R: RegisterIo,
{
    let mut words = dev.commands().submitted();
    words.truncate(words.len() - TRAILER_BYTES / 4);
    words
}
