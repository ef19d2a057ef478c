//! The `vcio` mailbox character device.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::error::{MailboxError, Result, TransactionFailure};
use crate::{PropertyMessage, PropertyTransport};

/// ioctl type byte registered by the `vcio` driver.
const VCIO_IOC_MAGIC: u32 = 100;
const VCIO_IOC_PROPERTY_NR: u32 = 0;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;
const IOC_READ_WRITE: u64 = 3;

const fn iowr(ty: u32, nr: u32, size: usize) -> u64 {
    (IOC_READ_WRITE << IOC_DIRSHIFT)
        | ((size as u64) << IOC_SIZESHIFT)
        | ((ty as u64) << IOC_TYPESHIFT)
        | ((nr as u64) << IOC_NRSHIFT)
}

/// `_IOWR(100, 0, char *)`: the argument is a pointer to the property buffer.
pub const IOCTL_MBOX_PROPERTY: u64 = iowr(
    VCIO_IOC_MAGIC,
    VCIO_IOC_PROPERTY_NR,
    core::mem::size_of::<*mut libc::c_char>(),
);

/// Open handle to the firmware mailbox.
#[derive(Debug)]
pub struct MailboxChannel {
    file: File,
    path: PathBuf,
}

impl MailboxChannel {
    /// Open the mailbox device, creating the node first if it does not exist.
    pub fn open(config: &MailboxConfig) -> Result<Self> {
        let path = config.device.clone();

        if fs::symlink_metadata(&path).is_err() {
            info!(
                "creating mailbox device node {} ({}:{})",
                path.display(),
                config.major,
                config.minor
            );
            create_device_node(&path, config.major, config.minor).map_err(|source| {
                MailboxError::ChannelUnavailable {
                    path: path.clone(),
                    source,
                }
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| MailboxError::ChannelUnavailable {
                path: path.clone(),
                source,
            })?;

        debug!("opened mailbox device {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the device. The node itself is left in place for later users.
    pub fn close(self) {
        debug!("closing mailbox device {}", self.path.display());
        drop(self.file);
    }
}

impl PropertyTransport for MailboxChannel {
    fn transact(&mut self, msg: &mut PropertyMessage) -> Result<()> {
        let tag = msg.tag();

        // SAFETY: the driver copies `word[0]` bytes in from the pointer and writes the response
        // back over the same range. `word[0]` never exceeds the message's fixed capacity, and the
        // exclusive borrow keeps the buffer alive and unaliased for the duration of the call.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_MBOX_PROPERTY as _,
                msg.as_mut_ptr(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            warn!("mailbox ioctl for tag {tag:#010x} failed: {err}");
            return Err(MailboxError::TransactionFailed {
                tag,
                reason: TransactionFailure::Ioctl(err),
            });
        }
        Ok(())
    }
}

/// Character device, owner read/write, group/other read.
fn create_device_node(path: &Path, major: u32, minor: u32) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "device path contains NUL"))?;
    let mode = libc::S_IFCHR | libc::S_IRUSR | libc::S_IWUSR | libc::S_IRGRP | libc::S_IROTH;

    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mknod(c_path.as_ptr(), mode, libc::makedev(major, minor)) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
