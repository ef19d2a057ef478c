use vc_mailbox::config::parse_u32;
use vc_mailbox::{ConfigError, FirmwareVersion, MailboxConfig};

use crate::raster::{BitOrder, MonoLayout};

/// Build timestamp of the first firmware that implements the cursor tags.
pub const MIN_CURSOR_FIRMWARE_VERSION: u32 = 1_390_809_622;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CursorConfig {
    pub mailbox: MailboxConfig,
    pub min_firmware: FirmwareVersion,
    /// Layout of two-colour cursor bitmaps handed over by the host.
    pub mono_layout: MonoLayout,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            mailbox: MailboxConfig::default(),
            min_firmware: FirmwareVersion(MIN_CURSOR_FIRMWARE_VERSION),
            mono_layout: MonoLayout::default(),
        }
    }
}

impl CursorConfig {
    /// [`MailboxConfig::from_env`] plus `VC_CURSOR_MIN_FIRMWARE`, `VC_CURSOR_BIT_ORDER`
    /// (`lsb`/`msb`) and `VC_CURSOR_SCANLINE_PAD` (8, 16, 32 or 64).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bit_order = match lookup("VC_CURSOR_BIT_ORDER").as_deref().map(str::trim) {
            None => defaults.mono_layout.bit_order,
            Some(v) if v.eq_ignore_ascii_case("lsb") => BitOrder::LsbFirst,
            Some(v) if v.eq_ignore_ascii_case("msb") => BitOrder::MsbFirst,
            Some(_) => return Err(ConfigError::InvalidEnv("VC_CURSOR_BIT_ORDER")),
        };
        let scanline_pad_bits = match parse_u32(&lookup, "VC_CURSOR_SCANLINE_PAD")? {
            None => defaults.mono_layout.scanline_pad_bits,
            Some(pad @ (8 | 16 | 32 | 64)) => pad,
            Some(_) => return Err(ConfigError::InvalidEnv("VC_CURSOR_SCANLINE_PAD")),
        };

        Ok(Self {
            mailbox: MailboxConfig::from_lookup(&lookup)?,
            min_firmware: parse_u32(&lookup, "VC_CURSOR_MIN_FIRMWARE")?
                .map(FirmwareVersion)
                .unwrap_or(defaults.min_firmware),
            mono_layout: MonoLayout {
                scanline_pad_bits,
                bit_order,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = CursorConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg, CursorConfig::default());
        assert_eq!(cfg.min_firmware, FirmwareVersion(MIN_CURSOR_FIRMWARE_VERSION));
        assert_eq!(cfg.mono_layout.scanline_pad_bits, 32);
        assert_eq!(cfg.mono_layout.bit_order, BitOrder::LsbFirst);
    }

    #[test]
    fn cursor_and_mailbox_overrides() {
        let cfg = CursorConfig::from_lookup(lookup_from(&[
            ("VC_CURSOR_MIN_FIRMWARE", "12345"),
            ("VC_CURSOR_BIT_ORDER", "MSB"),
            ("VC_CURSOR_SCANLINE_PAD", "8"),
            ("VC_MAILBOX_DEVICE", "/tmp/mbox"),
        ]))
        .unwrap();
        assert_eq!(cfg.min_firmware, FirmwareVersion(12345));
        assert_eq!(
            cfg.mono_layout,
            MonoLayout {
                scanline_pad_bits: 8,
                bit_order: BitOrder::MsbFirst
            }
        );
        assert_eq!(cfg.mailbox.device, std::path::PathBuf::from("/tmp/mbox"));
    }

    #[test]
    fn rejects_unsupported_pad_and_order() {
        assert_eq!(
            CursorConfig::from_lookup(lookup_from(&[("VC_CURSOR_SCANLINE_PAD", "24")])).unwrap_err(),
            ConfigError::InvalidEnv("VC_CURSOR_SCANLINE_PAD")
        );
        assert_eq!(
            CursorConfig::from_lookup(lookup_from(&[("VC_CURSOR_BIT_ORDER", "middle")])).unwrap_err(),
            ConfigError::InvalidEnv("VC_CURSOR_BIT_ORDER")
        );
    }
}
