//! CPU mappings of GPU bus memory.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::error::{MailboxError, Result};
use crate::vcmem::BusAddress;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Maps locked GPU memory into the process.
pub trait BusMapper {
    /// Map `len` bytes starting at `bus` for CPU read/write.
    fn map(&mut self, bus: BusAddress, len: usize) -> Result<MappedRegion>;

    /// Release a mapping produced by [`BusMapper::map`] on the same mapper.
    fn unmap(&mut self, region: MappedRegion) -> Result<()>;
}

impl<T: BusMapper + ?Sized> BusMapper for &mut T {
    fn map(&mut self, bus: BusAddress, len: usize) -> Result<MappedRegion> {
        (**self).map(bus, len)
    }

    fn unmap(&mut self, region: MappedRegion) -> Result<()> {
        (**self).unmap(region)
    }
}

impl<T: BusMapper + ?Sized> BusMapper for Box<T> {
    fn map(&mut self, bus: BusAddress, len: usize) -> Result<MappedRegion> {
        (**self).map(bus, len)
    }

    fn unmap(&mut self, region: MappedRegion) -> Result<()> {
        (**self).unmap(region)
    }
}

/// An exclusively owned CPU window onto bus memory.
///
/// Writes through the window are visible to the GPU without an explicit flush (the mapping is
/// shared and uncached). The region is not unmapped on drop; hand it back to the mapper that
/// produced it.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
    bus: BusAddress,
    /// Page-aligned start and length of the underlying mapping.
    map_base: NonNull<u8>,
    map_len: usize,
}

impl MappedRegion {
    /// # Safety
    ///
    /// `ptr..ptr + len` must be valid for reads and writes and lie within
    /// `map_base..map_base + map_len`, and stay valid until the region is unmapped.
    pub(crate) unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        len: usize,
        bus: BusAddress,
        map_base: NonNull<u8>,
        map_len: usize,
    ) -> Self {
        Self {
            ptr,
            len,
            bus,
            map_base,
            map_len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bus_address(&self) -> BusAddress {
        self.bus
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: guaranteed valid for `len` bytes by `from_raw_parts`; `&self` prevents a
        // concurrent mutable view.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes the view exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn map_base(&self) -> NonNull<u8> {
        self.map_base
    }

    pub(crate) fn map_len(&self) -> usize {
        self.map_len
    }
}

/// Maps bus memory through `/dev/mem`.
#[derive(Debug, Clone)]
pub struct DevMemMapper {
    path: PathBuf,
}

impl DevMemMapper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn page_size() -> usize {
    // SAFETY: `sysconf` has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

/// Split `addr` into a page-aligned base and the offset of `addr` within that page.
pub(crate) fn page_split(addr: u64, page_size: usize) -> (u64, usize) {
    let offset = (addr % page_size as u64) as usize;
    (addr - offset as u64, offset)
}

impl BusMapper for DevMemMapper {
    fn map(&mut self, bus: BusAddress, len: usize) -> Result<MappedRegion> {
        let map_failed = |source: io::Error| MailboxError::MapFailed { bus, len, source };

        let page = page_size();
        let (phys_base, offset) = page_split(u64::from(bus.to_physical()), page);
        let map_len = offset
            .checked_add(len)
            .ok_or_else(|| map_failed(io::Error::from(io::ErrorKind::InvalidInput)))?;
        let file_offset = libc::off_t::try_from(phys_base)
            .map_err(|_| map_failed(io::Error::from(io::ErrorKind::InvalidInput)))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&self.path)
            .map_err(map_failed)?;

        // SAFETY: a fresh shared mapping of the device at a page-aligned offset; the kernel picks
        // the address, so no existing memory is affected.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                file_offset,
            )
        };
        if base == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            warn!("mmap of bus address {bus} ({len} bytes) failed: {err}");
            return Err(map_failed(err));
        }
        // The mapping outlives the descriptor.
        drop(file);

        let map_base = NonNull::new(base.cast::<u8>())
            .ok_or_else(|| map_failed(io::Error::from(io::ErrorKind::AddrNotAvailable)))?;
        // SAFETY: `offset < page <= map_len`, so the pointer stays inside the mapping.
        let ptr = unsafe { NonNull::new_unchecked(map_base.as_ptr().add(offset)) };
        debug!("mapped bus address {bus} ({len} bytes) at {:p}", ptr.as_ptr());

        // SAFETY: `ptr..ptr + len` lies within the `map_len`-byte mapping created above, which
        // lives until `unmap`.
        Ok(unsafe { MappedRegion::from_raw_parts(ptr, len, bus, map_base, map_len) })
    }

    fn unmap(&mut self, region: MappedRegion) -> Result<()> {
        // SAFETY: `map_base`/`map_len` describe a mapping created by `mmap` above, and consuming
        // the region means no view into it survives.
        let rc = unsafe { libc::munmap(region.map_base().as_ptr().cast(), region.map_len()) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            warn!(
                "munmap of bus address {} ({} bytes) failed: {err}",
                region.bus_address(),
                region.len()
            );
            return Err(MailboxError::UnmapFailed {
                bus: region.bus_address(),
                len: region.len(),
                source: err,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_split_rounds_down_and_keeps_offset() {
        assert_eq!(page_split(0x1000, 4096), (0x1000, 0));
        assert_eq!(page_split(0x1234, 4096), (0x1000, 0x234));
        assert_eq!(page_split(0xfff, 4096), (0, 0xfff));
    }

    #[test]
    fn dev_mem_mapper_maps_regular_file() {
        // A plain file stands in for /dev/mem: the offset arithmetic and mapping lifetime are
        // the same.
        let page = page_size();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mem");
        let mut contents = vec![0u8; page * 2];
        contents[page + 0x10] = 0xAB;
        std::fs::write(&path, &contents).unwrap();

        let mut mapper = DevMemMapper::new(&path);
        let bus = BusAddress::new((page + 0x10) as u32);
        let mut region = mapper.map(bus, 16).unwrap();
        assert_eq!(region.len(), 16);
        assert_eq!(region.as_slice()[0], 0xAB);

        region.as_mut_slice()[1] = 0xCD;
        mapper.unmap(region).unwrap();

        let after = std::fs::read(&path).unwrap();
        assert_eq!(after[page + 0x11], 0xCD);
    }

    #[test]
    fn missing_device_is_a_map_failure() {
        let mut mapper = DevMemMapper::new("/nonexistent/vc-mailbox-test/mem");
        let err = mapper.map(BusAddress::new(0x1000), 16).unwrap_err();
        assert!(matches!(err, MailboxError::MapFailed { len: 16, .. }), "{err}");
    }
}
