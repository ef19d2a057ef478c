use thiserror::Error;
use vc_mailbox::{FirmwareVersion, MailboxError};
use vc_property::PropertyTag;

use crate::raster::RasterError;

pub type Result<T> = std::result::Result<T, CursorError>;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("firmware version {found} predates hardware cursor support (need {minimum})")]
    UnsupportedFirmware {
        found: FirmwareVersion,
        minimum: FirmwareVersion,
    },

    #[error("cursor of {width}x{height} exceeds the 64x64 hardware limit")]
    GeometryUnsupported { width: u32, height: u32 },

    #[error("hardware cursor initialisation already failed")]
    InitAlreadyFailed,

    #[error("firmware rejected {tag:?} (status {status:#x})")]
    FirmwareRejected { tag: PropertyTag, status: u32 },

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

impl CursorError {
    pub fn is_channel_unavailable(&self) -> bool {
        matches!(self, Self::Mailbox(err) if err.is_channel_unavailable())
    }

    /// The request reached firmware but did not take effect.
    pub fn is_transaction_failed(&self) -> bool {
        match self {
            Self::Mailbox(err) => err.is_transaction_failed(),
            Self::FirmwareRejected { .. } => true,
            _ => false,
        }
    }
}
