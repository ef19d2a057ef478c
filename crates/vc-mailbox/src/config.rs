use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_MAILBOX_DEVICE: &str = "/dev/vc4mail";
/// Character device numbers registered by the `vcio` driver.
pub const DEFAULT_MAILBOX_MAJOR: u32 = 100;
pub const DEFAULT_MAILBOX_MINOR: u32 = 0;
pub const DEFAULT_MEM_DEVICE: &str = "/dev/mem";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxConfig {
    /// Mailbox device node; created on demand when missing.
    pub device: PathBuf,
    pub major: u32,
    pub minor: u32,
    /// Physical memory device used to map locked GPU blocks.
    pub mem_device: PathBuf,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_MAILBOX_DEVICE),
            major: DEFAULT_MAILBOX_MAJOR,
            minor: DEFAULT_MAILBOX_MINOR,
            mem_device: PathBuf::from(DEFAULT_MEM_DEVICE),
        }
    }
}

impl MailboxConfig {
    /// Defaults overridden by `VC_MAILBOX_DEVICE`, `VC_MAILBOX_MAJOR`, `VC_MAILBOX_MINOR` and
    /// `VC_MEM_DEVICE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            device: lookup("VC_MAILBOX_DEVICE")
                .map(PathBuf::from)
                .unwrap_or(defaults.device),
            major: parse_u32(&lookup, "VC_MAILBOX_MAJOR")?.unwrap_or(defaults.major),
            minor: parse_u32(&lookup, "VC_MAILBOX_MINOR")?.unwrap_or(defaults.minor),
            mem_device: lookup("VC_MEM_DEVICE")
                .map(PathBuf::from)
                .unwrap_or(defaults.mem_device),
        })
    }
}

/// Parse an optional numeric variable; accepts decimal or `0x`-prefixed hex.
pub fn parse_u32(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u32>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse::<u32>(),
    };
    parsed.map(Some).map_err(|_| ConfigError::InvalidEnv(key))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),
}
