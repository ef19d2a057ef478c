use core::fmt;

use tracing::debug;

use crate::error::Result;
use crate::{call, PropertyTag, PropertyTransport};

/// Firmware build timestamp (seconds since the Unix epoch).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FirmwareVersion(pub u32);

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overscan borders applied by the firmware to the display, in pixels.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Overscan {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

pub fn firmware_version<T: PropertyTransport + ?Sized>(transport: &mut T) -> Result<FirmwareVersion> {
    let [version] = call::<_, 1>(transport, PropertyTag::GetFirmwareVersion, &[])?;
    debug!("firmware version {version}");
    Ok(FirmwareVersion(version))
}

pub fn overscan<T: PropertyTransport + ?Sized>(transport: &mut T) -> Result<Overscan> {
    let [top, bottom, left, right] = call::<_, 4>(transport, PropertyTag::GetOverscan, &[])?;
    Ok(Overscan {
        top,
        bottom,
        left,
        right,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::{EmulatedVideoCore, DEFAULT_FIRMWARE_VERSION};
    use crate::MailboxError;

    #[test]
    fn reads_configured_version() {
        let mut vc = EmulatedVideoCore::new();
        assert_eq!(
            firmware_version(&mut vc).unwrap(),
            FirmwareVersion(DEFAULT_FIRMWARE_VERSION)
        );

        vc.set_firmware_version(1_234);
        assert_eq!(firmware_version(&mut vc).unwrap(), FirmwareVersion(1_234));
    }

    #[test]
    fn overscan_words_are_in_wire_order() {
        let mut vc = EmulatedVideoCore::new();
        let expected = Overscan {
            top: 16,
            bottom: 24,
            left: 32,
            right: 48,
        };
        vc.set_overscan(expected);
        assert_eq!(overscan(&mut vc).unwrap(), expected);
    }

    #[test]
    fn withheld_success_bit_is_a_transaction_failure() {
        let mut vc = EmulatedVideoCore::new();
        vc.withhold_success(PropertyTag::GetFirmwareVersion);
        let err = firmware_version(&mut vc).unwrap_err();
        assert!(
            matches!(err, MailboxError::TransactionFailed { tag: 0x0000_0001, .. }),
            "{err}"
        );
    }
}
