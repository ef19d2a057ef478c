use std::io;
use std::path::PathBuf;

use thiserror::Error;
use vc_property::PropertyError;

use crate::vcmem::{BusAddress, MemoryHandle};

pub type Result<T> = std::result::Result<T, MailboxError>;

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("mailbox device {} unavailable: {source}", path.display())]
    ChannelUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("property transaction for tag {tag:#010x} failed: {reason}")]
    TransactionFailed {
        tag: u32,
        #[source]
        reason: TransactionFailure,
    },

    #[error("firmware refused to allocate {size} bytes")]
    AllocationRefused { size: u32 },

    #[error("firmware failed to lock memory handle {handle}")]
    LockFailed { handle: MemoryHandle },

    #[error("firmware failed to unlock memory handle {handle} (status {status:#x})")]
    UnlockFailed { handle: MemoryHandle, status: u32 },

    #[error("firmware failed to release memory handle {handle} (status {status:#x})")]
    FreeFailed { handle: MemoryHandle, status: u32 },

    #[error("failed to map {len} bytes at bus address {bus}: {source}")]
    MapFailed {
        bus: BusAddress,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to unmap {len} bytes at bus address {bus}: {source}")]
    UnmapFailed {
        bus: BusAddress,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Property(#[from] PropertyError),
}

/// Why a property transaction did not produce a usable response.
#[derive(Debug, Error)]
pub enum TransactionFailure {
    #[error("ioctl failed: {0}")]
    Ioctl(#[source] io::Error),

    #[error(transparent)]
    Response(#[from] PropertyError),
}

impl MailboxError {
    pub fn is_transaction_failed(&self) -> bool {
        matches!(self, Self::TransactionFailed { .. })
    }

    pub fn is_channel_unavailable(&self) -> bool {
        matches!(self, Self::ChannelUnavailable { .. })
    }
}
