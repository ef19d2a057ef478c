//! Host-side access to the VideoCore firmware through the `vcio` mailbox character device.
//!
//! The crate is split along the lifetime of a request:
//! - [`channel`] owns the device handle and performs the blocking property `ioctl`,
//! - [`vcmem`] drives the firmware's relocatable memory allocator and maps blocks for CPU access,
//! - [`firmware`] holds the small typed queries (version, overscan),
//! - [`emulated`] is an in-process firmware used by tests and headless tooling.
//!
//! Everything above the device layer is written against the [`PropertyTransport`] and
//! [`BusMapper`] traits, so the same code runs against real hardware or the emulator.

pub mod channel;
pub mod config;
pub mod device;
pub mod emulated;
pub mod error;
pub mod firmware;
pub mod mapping;
pub mod vcmem;

pub use channel::MailboxChannel;
pub use config::{ConfigError, MailboxConfig};
pub use device::VideoCoreDevice;
pub use emulated::{
    EmulatedVideoCore, FirmwareCursorInfo, FirmwareCursorState, Outstanding,
    DEFAULT_FIRMWARE_VERSION, REQUEST_LOG_CAPACITY,
};
pub use error::{MailboxError, Result, TransactionFailure};
pub use firmware::{firmware_version, overscan, FirmwareVersion, Overscan};
pub use mapping::{BusMapper, DevMemMapper, MappedRegion};
pub use vcmem::{
    videocore_alloc, videocore_alloc_with, videocore_free, AllocFlags, BusAddress, GpuMemoryBlock,
    MemoryHandle,
};

pub use vc_property::{PropertyMessage, PropertyTag};

use tracing::{debug, warn};
use vc_property::PropertyResponse;

/// Exchanges one property message with firmware.
///
/// `transact` blocks until the firmware has written its response into `msg`. It only reports
/// whether the exchange itself completed; response validation is left to
/// [`transact_checked`].
pub trait PropertyTransport {
    fn transact(&mut self, msg: &mut PropertyMessage) -> Result<()>;
}

impl<T: PropertyTransport + ?Sized> PropertyTransport for &mut T {
    fn transact(&mut self, msg: &mut PropertyMessage) -> Result<()> {
        (**self).transact(msg)
    }
}

impl<T: PropertyTransport + ?Sized> PropertyTransport for Box<T> {
    fn transact(&mut self, msg: &mut PropertyMessage) -> Result<()> {
        (**self).transact(msg)
    }
}

/// Everything the allocator and cursor layers need from a firmware connection.
pub trait VideoCore: PropertyTransport + BusMapper {}

impl<T: PropertyTransport + BusMapper + ?Sized> VideoCore for T {}

/// Run one transaction and validate the response header.
///
/// A buffer the firmware did not mark as successfully processed is reported exactly like a
/// failed `ioctl`: as [`MailboxError::TransactionFailed`].
pub fn transact_checked<'m, T: PropertyTransport + ?Sized>(
    transport: &mut T,
    msg: &'m mut PropertyMessage,
) -> Result<PropertyResponse<'m>> {
    let tag = msg.tag();
    transport.transact(msg)?;

    let msg: &'m PropertyMessage = msg;
    msg.decode().map_err(|err| {
        warn!("property tag {tag:#010x} not acknowledged by firmware: {err}");
        MailboxError::TransactionFailed {
            tag,
            reason: TransactionFailure::Response(err),
        }
    })
}

/// Send a single-tag request and copy out the first `N` response words.
pub fn call<T: PropertyTransport + ?Sized, const N: usize>(
    transport: &mut T,
    tag: PropertyTag,
    payload: &[u32],
) -> Result<[u32; N]> {
    let mut msg = PropertyMessage::request(tag, payload)?;
    debug!(?tag, ?payload, "property request");

    let resp = transact_checked(transport, &mut msg)?;
    let words = resp
        .expect_words(N)
        .map_err(|err| MailboxError::TransactionFailed {
            tag: tag.id(),
            reason: TransactionFailure::Response(err),
        })?;

    let mut out = [0u32; N];
    out.copy_from_slice(words);
    debug!(?tag, response = ?out, "property response");
    Ok(out)
}
