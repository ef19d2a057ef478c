//! The firmware's relocatable memory allocator.
//!
//! GPU memory is acquired in three steps (allocate, lock, map) and released in the reverse
//! order. [`videocore_alloc`] and [`videocore_free`] wrap the sequence so that a partially
//! acquired block is never leaked.

use core::fmt;

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::error::{MailboxError, Result};
use crate::mapping::MappedRegion;
use crate::{call, PropertyTag, PropertyTransport, VideoCore};

/// Alignment used for blocks that will be mapped into the CPU.
pub const PAGE_ALIGNMENT: u32 = 4096;

/// Firmware handle for a relocatable allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryHandle(u32);

impl MemoryHandle {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Address of locked memory as seen by the VideoCore.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusAddress(u32);

impl BusAddress {
    /// Bits 30-31 select the VideoCore cache alias; the ARM sees the same memory without them.
    const ALIAS_MASK: u32 = 0x3fff_ffff;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// ARM physical address of the same memory.
    pub const fn to_physical(self) -> u32 {
        self.0 & Self::ALIAS_MASK
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

bitflags! {
    /// Allocation flags understood by the firmware's memory manager.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u32 {
        /// Can be resized to 0 at any time. Use for cached data.
        const DISCARDABLE = 1 << 0;
        /// Normal allocating alias. Don't use from the ARM.
        const NORMAL = 0 << 2;
        /// 0xC alias, uncached.
        const DIRECT = 1 << 2;
        /// 0x8 alias. Non-allocating in L2 but coherent.
        const COHERENT = 2 << 2;
        /// Allocating in L2.
        const L1_NONALLOCATING = Self::DIRECT.bits() | Self::COHERENT.bits();
        /// Initialise the buffer to all zeros.
        const ZERO = 1 << 4;
        /// Don't initialise (default is to fill with 0xff in debug builds).
        const NO_INIT = 1 << 5;
        /// Likely to be locked for long periods of time.
        const HINT_PERMALOCK = 1 << 6;
    }
}

/// Reserve `size` bytes of GPU memory.
pub fn allocate<T: PropertyTransport + ?Sized>(
    transport: &mut T,
    size: u32,
    alignment: u32,
    flags: AllocFlags,
) -> Result<MemoryHandle> {
    let [handle] = call::<_, 1>(
        transport,
        PropertyTag::AllocateMemory,
        &[size, alignment, flags.bits()],
    )?;
    if handle == 0 {
        warn!("firmware refused allocation of {size} bytes (align {alignment}, flags {flags:?})");
        return Err(MailboxError::AllocationRefused { size });
    }
    Ok(MemoryHandle(handle))
}

/// Pin an allocation and return its bus address.
pub fn lock<T: PropertyTransport + ?Sized>(
    transport: &mut T,
    handle: MemoryHandle,
) -> Result<BusAddress> {
    let [bus] = call::<_, 1>(transport, PropertyTag::LockMemory, &[handle.0])?;
    if bus == 0 {
        warn!("firmware failed to lock handle {handle}");
        return Err(MailboxError::LockFailed { handle });
    }
    Ok(BusAddress(bus))
}

pub fn unlock<T: PropertyTransport + ?Sized>(transport: &mut T, handle: MemoryHandle) -> Result<()> {
    let [status] = call::<_, 1>(transport, PropertyTag::UnlockMemory, &[handle.0])?;
    if status != 0 {
        warn!("firmware failed to unlock handle {handle}: status {status:#x}");
        return Err(MailboxError::UnlockFailed { handle, status });
    }
    Ok(())
}

pub fn free<T: PropertyTransport + ?Sized>(transport: &mut T, handle: MemoryHandle) -> Result<()> {
    let [status] = call::<_, 1>(transport, PropertyTag::ReleaseMemory, &[handle.0])?;
    if status != 0 {
        warn!("firmware failed to release handle {handle}: status {status:#x}");
        return Err(MailboxError::FreeFailed { handle, status });
    }
    Ok(())
}

/// A locked and CPU-mapped GPU allocation.
///
/// Release it with [`videocore_free`] on the device that produced it.
#[derive(Debug)]
#[must_use = "GPU memory is only released through videocore_free"]
pub struct GpuMemoryBlock {
    handle: MemoryHandle,
    bus_address: BusAddress,
    mapping: MappedRegion,
    size: u32,
}

impl GpuMemoryBlock {
    pub fn handle(&self) -> MemoryHandle {
        self.handle
    }

    pub fn bus_address(&self) -> BusAddress {
        self.bus_address
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn as_slice(&self) -> &[u8] {
        self.mapping.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.mapping.as_mut_slice()
    }
}

/// Allocate, lock and map `size` bytes of page-aligned, uncached GPU memory.
pub fn videocore_alloc<V: VideoCore + ?Sized>(dev: &mut V, size: u32) -> Result<GpuMemoryBlock> {
    videocore_alloc_with(dev, size, PAGE_ALIGNMENT, AllocFlags::L1_NONALLOCATING)
}

/// [`videocore_alloc`] with explicit alignment and flags.
///
/// If locking or mapping fails, the steps already taken are undone before the error is returned.
pub fn videocore_alloc_with<V: VideoCore + ?Sized>(
    dev: &mut V,
    size: u32,
    alignment: u32,
    flags: AllocFlags,
) -> Result<GpuMemoryBlock> {
    let handle = allocate(dev, size, alignment, flags)?;

    let bus_address = match lock(dev, handle) {
        Ok(bus) => bus,
        Err(err) => {
            release_quietly(dev, handle, false);
            return Err(err);
        }
    };

    let mapping = match dev.map(bus_address, size as usize) {
        Ok(mapping) => mapping,
        Err(err) => {
            release_quietly(dev, handle, true);
            return Err(err);
        }
    };

    debug!("allocated {size} bytes: handle {handle}, bus {bus_address}");
    Ok(GpuMemoryBlock {
        handle,
        bus_address,
        mapping,
        size,
    })
}

/// Unwind a partially acquired block. The caller reports the first error.
fn release_quietly<V: VideoCore + ?Sized>(dev: &mut V, handle: MemoryHandle, locked: bool) {
    if locked {
        if let Err(err) = unlock(dev, handle) {
            warn!("unwinding allocation: unlock of {handle} failed: {err}");
        }
    }
    if let Err(err) = free(dev, handle) {
        warn!("unwinding allocation: release of {handle} failed: {err}");
    }
}

/// Unmap, unlock and release a block.
///
/// Every step is attempted even if an earlier one fails; the first failure is returned.
pub fn videocore_free<V: VideoCore + ?Sized>(dev: &mut V, block: GpuMemoryBlock) -> Result<()> {
    let GpuMemoryBlock {
        handle,
        bus_address,
        mapping,
        size,
    } = block;

    let unmapped = dev.unmap(mapping);
    let unlocked = unlock(dev, handle);
    let freed = free(dev, handle);
    debug!("released {size} bytes: handle {handle}, bus {bus_address}");

    unmapped.and(unlocked).and(freed)
}
