/// Property tags used by the cursor subsystem.
///
/// Values come from the firmware's mailbox property interface.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PropertyTag {
    // VideoCore.
    GetFirmwareVersion = 0x0000_0001,

    // Relocatable GPU memory.
    AllocateMemory = 0x0003_000c,
    LockMemory = 0x0003_000d,
    UnlockMemory = 0x0003_000e,
    ReleaseMemory = 0x0003_000f,

    // Framebuffer.
    GetOverscan = 0x0004_000a,

    // Hardware cursor.
    SetCursorInfo = 0x0000_8010,
    SetCursorState = 0x0000_8011,
}

impl PropertyTag {
    pub const fn id(self) -> u32 {
        self as u32
    }

    pub fn from_word(word: u32) -> Option<Self> {
        Some(match word {
            x if x == Self::GetFirmwareVersion as u32 => Self::GetFirmwareVersion,
            x if x == Self::AllocateMemory as u32 => Self::AllocateMemory,
            x if x == Self::LockMemory as u32 => Self::LockMemory,
            x if x == Self::UnlockMemory as u32 => Self::UnlockMemory,
            x if x == Self::ReleaseMemory as u32 => Self::ReleaseMemory,
            x if x == Self::GetOverscan as u32 => Self::GetOverscan,
            x if x == Self::SetCursorInfo as u32 => Self::SetCursorInfo,
            x if x == Self::SetCursorState as u32 => Self::SetCursorState,
            _ => return None,
        })
    }

    /// Number of request words the firmware expects for this tag.
    pub const fn request_words(self) -> usize {
        match self {
            Self::GetFirmwareVersion | Self::GetOverscan => 0,
            Self::AllocateMemory => 3,
            Self::LockMemory | Self::UnlockMemory | Self::ReleaseMemory => 1,
            Self::SetCursorInfo => 6,
            Self::SetCursorState => 3,
        }
    }

    /// Number of response words the firmware writes back for this tag.
    pub const fn response_words(self) -> usize {
        match self {
            Self::GetOverscan => 4,
            _ => 1,
        }
    }
}
