//! An in-process stand-in for the VideoCore firmware.
//!
//! [`EmulatedVideoCore`] answers every property tag the crate sends, backs allocations with host
//! memory so blocks can be mapped and written, and records each request it sees. Faults can be
//! injected per tag to exercise error paths that real firmware rarely produces.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::ptr::NonNull;

use tracing::{debug, warn};
use vc_property::RESPONSE_PARSE_ERROR;

use crate::error::{MailboxError, Result, TransactionFailure};
use crate::firmware::Overscan;
use crate::mapping::{BusMapper, MappedRegion};
use crate::vcmem::{AllocFlags, BusAddress};
use crate::{PropertyMessage, PropertyTag, PropertyTransport};

/// Reported by default; recent enough for cursor support.
pub const DEFAULT_FIRMWARE_VERSION: u32 = 1_418_143_306;

/// First bus address handed out (uncached `0xC` alias).
const BUS_BASE: u32 = 0xde00_0000;
/// One past the last usable bus address.
const BUS_END: u64 = 1 << 32;
const BUS_GRANULE: u32 = 4096;

/// Oldest half of the request log is dropped once it holds this many messages.
pub const REQUEST_LOG_CAPACITY: usize = 4096;

/// Largest cursor the firmware accepts.
const MAX_CURSOR_DIM: u32 = 64;

const STATUS_OK: u32 = 0;
const STATUS_ERROR: u32 = 1;

/// Last cursor state written by `SetCursorState`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FirmwareCursorState {
    pub enabled: bool,
    pub x: u32,
    pub y: u32,
}

/// Last geometry accepted by `SetCursorInfo`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FirmwareCursorInfo {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub bus: BusAddress,
    pub hotspot_x: u32,
    pub hotspot_y: u32,
}

/// Resources currently held against the emulated firmware.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Outstanding {
    pub handles: usize,
    pub locked: usize,
    pub mappings: usize,
}

impl Outstanding {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug)]
struct Block {
    /// Start of the host allocation (from `Box::into_raw`).
    mem: NonNull<u8>,
    size: u32,
    bus: u32,
    locks: u32,
    mappings: usize,
}

impl Block {
    /// Bus range occupied by the block, rounded out to whole granules.
    fn span(&self) -> (u64, u64) {
        let start = u64::from(self.bus);
        (start, align_up(start + u64::from(self.size), u64::from(BUS_GRANULE)))
    }

    fn contains(&self, bus: u32, len: usize) -> bool {
        let start = u64::from(self.bus);
        let end = start + u64::from(self.size);
        let bus = u64::from(bus);
        bus >= start && bus + len as u64 <= end
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing: HashSet<u32>,
    withheld: HashSet<u32>,
    refuse_allocations: bool,
    fail_maps: bool,
}

#[derive(Debug)]
pub struct EmulatedVideoCore {
    firmware_version: u32,
    overscan: Overscan,
    blocks: BTreeMap<u32, Block>,
    next_handle: u32,
    faults: Faults,
    requests: Vec<PropertyMessage>,
    cursor_state: Option<FirmwareCursorState>,
    cursor_info: Option<FirmwareCursorInfo>,
    cursor_image: Option<Vec<u32>>,
}

impl Default for EmulatedVideoCore {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedVideoCore {
    pub fn new() -> Self {
        Self {
            firmware_version: DEFAULT_FIRMWARE_VERSION,
            overscan: Overscan::default(),
            blocks: BTreeMap::new(),
            next_handle: 1,
            faults: Faults::default(),
            requests: Vec::new(),
            cursor_state: None,
            cursor_info: None,
            cursor_image: None,
        }
    }

    pub fn set_firmware_version(&mut self, version: u32) {
        self.firmware_version = version;
    }

    pub fn set_overscan(&mut self, overscan: Overscan) {
        self.overscan = overscan;
    }

    /// Make every transaction for `tag` fail as if the `ioctl` had returned an error.
    pub fn fail_tag(&mut self, tag: PropertyTag) {
        self.faults.failing.insert(tag.id());
    }

    /// Leave `tag` requests unprocessed: the `ioctl` succeeds but the buffer comes back without
    /// the success code and nothing takes effect.
    pub fn withhold_success(&mut self, tag: PropertyTag) {
        self.faults.withheld.insert(tag.id());
    }

    /// Answer allocation requests with handle 0.
    pub fn refuse_allocations(&mut self, refuse: bool) {
        self.faults.refuse_allocations = refuse;
    }

    pub fn fail_maps(&mut self, fail: bool) {
        self.faults.fail_maps = fail;
    }

    pub fn clear_faults(&mut self) {
        self.faults = Faults::default();
    }

    /// Requests transacted so far, as submitted. Only the most recent
    /// [`REQUEST_LOG_CAPACITY`] are kept.
    pub fn requests(&self) -> &[PropertyMessage] {
        &self.requests
    }

    pub fn requests_for(&self, tag: PropertyTag) -> Vec<&PropertyMessage> {
        self.requests
            .iter()
            .filter(|msg| msg.tag() == tag.id())
            .collect()
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    pub fn cursor_state(&self) -> Option<FirmwareCursorState> {
        self.cursor_state
    }

    pub fn cursor_info(&self) -> Option<FirmwareCursorInfo> {
        self.cursor_info
    }

    /// Pixels captured from the transfer buffer when `SetCursorInfo` was last accepted, row-major
    /// `width * height` ARGB words.
    pub fn cursor_image(&self) -> Option<&[u32]> {
        self.cursor_image.as_deref()
    }

    pub fn outstanding(&self) -> Outstanding {
        Outstanding {
            handles: self.blocks.len(),
            locked: self.blocks.values().filter(|b| b.locks > 0).count(),
            mappings: self.blocks.values().map(|b| b.mappings).sum(),
        }
    }

    fn respond(&mut self, tag: PropertyTag, payload: &[u32]) -> Vec<u32> {
        match tag {
            PropertyTag::GetFirmwareVersion => vec![self.firmware_version],
            PropertyTag::GetOverscan => {
                let o = self.overscan;
                vec![o.top, o.bottom, o.left, o.right]
            }
            PropertyTag::AllocateMemory => {
                vec![self.allocate(payload[0], payload[1], AllocFlags::from_bits_retain(payload[2]))]
            }
            PropertyTag::LockMemory => vec![self.lock(payload[0])],
            PropertyTag::UnlockMemory => vec![self.unlock(payload[0])],
            PropertyTag::ReleaseMemory => vec![self.release(payload[0])],
            PropertyTag::SetCursorInfo => vec![self.set_cursor_info(payload)],
            PropertyTag::SetCursorState => {
                self.cursor_state = Some(FirmwareCursorState {
                    enabled: payload[0] != 0,
                    x: payload[1],
                    y: payload[2],
                });
                vec![STATUS_OK]
            }
        }
    }

    fn allocate(&mut self, size: u32, alignment: u32, flags: AllocFlags) -> u32 {
        let alignment = alignment.max(1);
        if self.faults.refuse_allocations || size == 0 || !alignment.is_power_of_two() {
            return 0;
        }

        let Some(bus) = self.find_bus_range(size, alignment.max(BUS_GRANULE)) else {
            return 0;
        };

        // Debug firmware fills fresh allocations with 0xff unless asked otherwise.
        let fill: u8 = if flags.contains(AllocFlags::ZERO) { 0x00 } else { 0xff };
        let mem: Box<[u8]> = vec![fill; size as usize].into_boxed_slice();
        let Some(mem) = NonNull::new(Box::into_raw(mem).cast::<u8>()) else {
            return 0;
        };

        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.blocks.insert(
            handle,
            Block {
                mem,
                size,
                bus,
                locks: 0,
                mappings: 0,
            },
        );
        handle
    }

    /// Lowest free bus range of `size` bytes at `align`. Released ranges are reused.
    fn find_bus_range(&self, size: u32, align: u32) -> Option<u32> {
        let align = u64::from(align);
        let len = align_up(u64::from(size), u64::from(BUS_GRANULE));

        let mut spans: Vec<(u64, u64)> = self.blocks.values().map(Block::span).collect();
        spans.sort_unstable();

        let mut candidate = align_up(u64::from(BUS_BASE), align);
        for (start, end) in spans {
            if candidate + len <= start {
                break;
            }
            candidate = candidate.max(align_up(end, align));
        }
        if candidate + len > BUS_END {
            return None;
        }
        u32::try_from(candidate).ok()
    }

    fn lock(&mut self, handle: u32) -> u32 {
        match self.blocks.get_mut(&handle) {
            Some(block) => {
                block.locks += 1;
                block.bus
            }
            None => 0,
        }
    }

    fn unlock(&mut self, handle: u32) -> u32 {
        match self.blocks.get_mut(&handle) {
            Some(block) if block.locks > 0 => {
                block.locks -= 1;
                STATUS_OK
            }
            _ => STATUS_ERROR,
        }
    }

    fn release(&mut self, handle: u32) -> u32 {
        match self.blocks.get(&handle) {
            Some(block) if block.locks == 0 && block.mappings == 0 => {}
            _ => return STATUS_ERROR,
        }
        if let Some(block) = self.blocks.remove(&handle) {
            free_block(block);
        }
        STATUS_OK
    }

    fn set_cursor_info(&mut self, payload: &[u32]) -> u32 {
        let info = FirmwareCursorInfo {
            width: payload[0],
            height: payload[1],
            format: payload[2],
            bus: BusAddress::new(payload[3]),
            hotspot_x: payload[4],
            hotspot_y: payload[5],
        };
        if info.width == 0
            || info.height == 0
            || info.width > MAX_CURSOR_DIM
            || info.height > MAX_CURSOR_DIM
            || info.hotspot_x >= info.width
            || info.hotspot_y >= info.height
        {
            return STATUS_ERROR;
        }

        let pixels = (info.width * info.height) as usize;
        let Some(block) = self
            .blocks
            .values()
            .find(|b| b.locks > 0 && b.contains(info.bus.get(), pixels * 4))
        else {
            return STATUS_ERROR;
        };

        let offset = (info.bus.get() - block.bus) as usize;
        // SAFETY: `contains` checked that `offset + pixels * 4` lies within the block's live
        // allocation of `size` bytes.
        let bytes = unsafe { std::slice::from_raw_parts(block.mem.as_ptr().add(offset), pixels * 4) };
        let image = bytes
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        self.cursor_info = Some(info);
        self.cursor_image = Some(image);
        STATUS_OK
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

fn free_block(block: Block) {
    let raw = std::ptr::slice_from_raw_parts_mut(block.mem.as_ptr(), block.size as usize);
    // SAFETY: `mem` came from `Box::<[u8]>::into_raw` with this length and is released once.
    drop(unsafe { Box::from_raw(raw) });
}

fn ioctl_fault(tag: u32) -> MailboxError {
    MailboxError::TransactionFailed {
        tag,
        reason: TransactionFailure::Ioctl(io::Error::other("injected mailbox failure")),
    }
}

impl PropertyTransport for EmulatedVideoCore {
    fn transact(&mut self, msg: &mut PropertyMessage) -> Result<()> {
        let id = msg.tag();
        if self.requests.len() >= REQUEST_LOG_CAPACITY {
            self.requests.drain(..REQUEST_LOG_CAPACITY / 2);
        }
        self.requests.push(msg.clone());

        if self.faults.failing.contains(&id) {
            debug!("emulated firmware: failing tag {id:#010x}");
            return Err(ioctl_fault(id));
        }
        if self.faults.withheld.contains(&id) {
            debug!("emulated firmware: withholding response to tag {id:#010x}");
            return Ok(());
        }

        if msg.size_bytes() as usize != msg.len_words() * 4 {
            msg.set_code(RESPONSE_PARSE_ERROR);
            return Ok(());
        }
        let Some(tag) = PropertyTag::from_word(id) else {
            // Unknown tags are acknowledged with an empty response.
            msg.complete(&[]);
            return Ok(());
        };
        let payload = msg.request_payload().to_vec();
        if payload.len() < tag.request_words() {
            msg.set_code(RESPONSE_PARSE_ERROR);
            return Ok(());
        }

        let response = self.respond(tag, &payload);
        msg.complete(&response);
        Ok(())
    }
}

impl BusMapper for EmulatedVideoCore {
    fn map(&mut self, bus: BusAddress, len: usize) -> Result<MappedRegion> {
        let refuse = |reason: &str| MailboxError::MapFailed {
            bus,
            len,
            source: io::Error::new(io::ErrorKind::InvalidInput, reason.to_string()),
        };
        if self.faults.fail_maps {
            return Err(refuse("injected map failure"));
        }

        let block = self
            .blocks
            .values_mut()
            .find(|b| b.contains(bus.get(), len))
            .ok_or_else(|| refuse("no allocation at bus address"))?;
        if block.locks == 0 {
            return Err(refuse("allocation is not locked"));
        }

        let offset = (bus.get() - block.bus) as usize;
        // SAFETY: `contains` guarantees `offset + len <= size`.
        let ptr = unsafe { NonNull::new_unchecked(block.mem.as_ptr().add(offset)) };
        block.mappings += 1;
        // SAFETY: the block's memory stays allocated while it has mappings; `release` refuses
        // mapped blocks and `Drop` leaks them.
        Ok(unsafe { MappedRegion::from_raw_parts(ptr, len, bus, block.mem, block.size as usize) })
    }

    fn unmap(&mut self, region: MappedRegion) -> Result<()> {
        let base = region.map_base();
        match self
            .blocks
            .values_mut()
            .find(|b| b.mem == base && b.mappings > 0)
        {
            Some(block) => {
                block.mappings -= 1;
                Ok(())
            }
            None => Err(MailboxError::UnmapFailed {
                bus: region.bus_address(),
                len: region.len(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "region not mapped here"),
            }),
        }
    }
}

impl Drop for EmulatedVideoCore {
    fn drop(&mut self) {
        for (handle, block) in std::mem::take(&mut self.blocks) {
            if block.mappings > 0 {
                // A live `MappedRegion` may still point here.
                warn!("emulated firmware dropped with handle {handle} still mapped; leaking it");
                continue;
            }
            free_block(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcmem::{videocore_alloc, videocore_free};
    use crate::{call, transact_checked};
    use pretty_assertions::assert_eq;

    #[test]
    fn requests_are_recorded_as_submitted() {
        let mut vc = EmulatedVideoCore::new();
        let [status] = call::<_, 1>(&mut vc, PropertyTag::SetCursorState, &[1, 5, 5]).unwrap();
        assert_eq!(status, STATUS_OK);
        let recorded = vc.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].code(), 0);
        assert_eq!(recorded[0].request_payload(), &[1, 5, 5]);
        assert_eq!(
            vc.cursor_state(),
            Some(FirmwareCursorState {
                enabled: true,
                x: 5,
                y: 5
            })
        );
    }

    #[test]
    fn allocations_honour_alignment() {
        let mut vc = EmulatedVideoCore::new();
        let a = vc.allocate(100, 4096, AllocFlags::empty());
        let b = vc.allocate(100, 65536, AllocFlags::empty());
        let bus_a = vc.lock(a);
        let bus_b = vc.lock(b);
        assert_eq!(bus_a % 4096, 0);
        assert_eq!(bus_b % 65536, 0);
        assert_ne!(bus_a, bus_b);
    }

    #[test]
    fn fresh_memory_is_filled_unless_zero_requested() {
        let mut vc = EmulatedVideoCore::new();
        let block = videocore_alloc(&mut vc, 64).unwrap();
        assert!(block.as_slice().iter().all(|&b| b == 0xff));
        videocore_free(&mut vc, block).unwrap();

        let handle = vc.allocate(64, 4096, AllocFlags::ZERO);
        let bus = BusAddress::new(vc.lock(handle));
        let region = vc.map(bus, 64).unwrap();
        assert!(region.as_slice().iter().all(|&b| b == 0));
        vc.unmap(region).unwrap();
    }

    #[test]
    fn fresh_memory_is_filled_byte_for_byte() {
        let mut vc = EmulatedVideoCore::new();
        let block = videocore_alloc(&mut vc, 64).unwrap();
        assert_eq!(block.as_slice(), &[0xffu8; 64][..]);
        videocore_free(&mut vc, block).unwrap();
        assert!(vc.outstanding().is_clean());
    }

    #[test]
    fn released_bus_space_is_reused() {
        let mut vc = EmulatedVideoCore::new();
        let first = videocore_alloc(&mut vc, 16384).unwrap();
        let bus = first.bus_address();
        videocore_free(&mut vc, first).unwrap();

        let second = videocore_alloc(&mut vc, 16384).unwrap();
        assert_eq!(second.bus_address(), bus);
        videocore_free(&mut vc, second).unwrap();
    }

    #[test]
    fn holes_are_filled_lowest_first() {
        let mut vc = EmulatedVideoCore::new();
        let a = vc.allocate(8192, 4096, AllocFlags::empty());
        let b = vc.allocate(4096, 4096, AllocFlags::empty());
        let c = vc.allocate(4096, 4096, AllocFlags::empty());
        let bus_b = vc.blocks[&b].bus;
        assert_eq!(vc.release(b), STATUS_OK);

        let d = vc.allocate(4096, 4096, AllocFlags::empty());
        assert_eq!(vc.blocks[&d].bus, bus_b);
        // Too large for the hole: placed after `c`.
        let e = vc.allocate(8192, 4096, AllocFlags::empty());
        assert!(vc.blocks[&e].bus > vc.blocks[&c].bus);
        assert!(vc.blocks[&a].bus < bus_b);
    }

    #[test]
    fn repeated_cycles_never_exhaust_bus_space() {
        // 16 MiB blocks exhaust the window after 34 allocations without reuse.
        const SIZE: u32 = 16 << 20;
        let mut vc = EmulatedVideoCore::new();
        for cycle in 0..100 {
            let handle = vc.allocate(SIZE, 4096, AllocFlags::ZERO);
            assert_ne!(handle, 0, "allocation refused in cycle {cycle}");
            assert_eq!(vc.release(handle), STATUS_OK);
        }
        assert!(vc.outstanding().is_clean());
    }

    #[test]
    fn full_bus_window_refuses_allocation() {
        let mut vc = EmulatedVideoCore::new();
        let window = (BUS_END - u64::from(BUS_BASE)) as u32;
        assert_eq!(vc.allocate(window + 4096, 4096, AllocFlags::empty()), 0);
    }

    #[test]
    fn request_log_is_bounded() {
        let mut vc = EmulatedVideoCore::new();
        for i in 0..(REQUEST_LOG_CAPACITY as u32 + 10) {
            call::<_, 1>(&mut vc, PropertyTag::SetCursorState, &[0, i, 0]).unwrap();
        }
        let recorded = vc.requests();
        assert!(recorded.len() <= REQUEST_LOG_CAPACITY);
        let last = recorded.last().unwrap();
        assert_eq!(last.request_payload()[1], REQUEST_LOG_CAPACITY as u32 + 9);
    }

    #[test]
    fn withheld_tag_has_no_effect() {
        let mut vc = EmulatedVideoCore::new();
        vc.withhold_success(PropertyTag::SetCursorState);
        let mut msg = PropertyMessage::request(PropertyTag::SetCursorState, &[1, 0, 0]).unwrap();
        assert!(transact_checked(&mut vc, &mut msg).is_err());
        assert_eq!(vc.cursor_state(), None);

        vc.clear_faults();
        let mut msg = PropertyMessage::request(PropertyTag::SetCursorState, &[1, 0, 0]).unwrap();
        transact_checked(&mut vc, &mut msg).unwrap();
        assert!(vc.cursor_state().is_some());
    }

    #[test]
    fn cursor_info_captures_transfer_buffer() {
        let mut vc = EmulatedVideoCore::new();
        let mut block = videocore_alloc(&mut vc, 16 * 16 * 4).unwrap();
        for (i, px) in block.as_mut_slice().chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&(i as u32).to_ne_bytes());
        }

        let [status] = call::<_, 1>(
            &mut vc,
            PropertyTag::SetCursorInfo,
            &[16, 16, 0, block.bus_address().get(), 0, 0],
        )
        .unwrap();
        assert_eq!(status, STATUS_OK);
        let image = vc.cursor_image().unwrap();
        assert_eq!(image.len(), 256);
        assert_eq!(image[17], 17);
        assert_eq!(vc.cursor_info().unwrap().bus, block.bus_address());

        videocore_free(&mut vc, block).unwrap();
    }

    #[test]
    fn oversized_cursor_info_is_rejected() {
        let mut vc = EmulatedVideoCore::new();
        let block = videocore_alloc(&mut vc, 16384).unwrap();
        let [status] = call::<_, 1>(
            &mut vc,
            PropertyTag::SetCursorInfo,
            &[80, 80, 0, block.bus_address().get(), 0, 0],
        )
        .unwrap();
        assert_ne!(status, STATUS_OK);
        assert_eq!(vc.cursor_info(), None);
        videocore_free(&mut vc, block).unwrap();
    }

    #[test]
    fn mapping_requires_a_lock() {
        let mut vc = EmulatedVideoCore::new();
        let handle = vc.allocate(4096, 4096, AllocFlags::empty());
        let bus = BusAddress::new(vc.blocks[&handle].bus);
        let err = vc.map(bus, 16).unwrap_err();
        assert!(matches!(err, MailboxError::MapFailed { .. }), "{err}");
    }
}
