//! The windowing system's view of the hardware cursor.
//!
//! A display server drives the cursor through a small callback table and has no way to act on
//! errors from it. [`HostCursorSink`] mirrors that table; the [`CursorController`] implementation
//! logs failures and keeps the previous cursor on screen.

use tracing::warn;
use vc_mailbox::VideoCore;

use crate::controller::CursorController;
use crate::error::Result;
use crate::raster::{CursorColors, CursorImage, DeviceColor, MAX_CURSOR_HEIGHT, MAX_CURSOR_WIDTH};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CursorCapabilities {
    pub max_width: u32,
    pub max_height: u32,
    pub bits_per_pixel: u32,
    /// Full ARGB images are supported, not just two-colour bitmaps.
    pub argb: bool,
}

pub const HARDWARE_CURSOR_CAPABILITIES: CursorCapabilities = CursorCapabilities {
    max_width: MAX_CURSOR_WIDTH,
    max_height: MAX_CURSOR_HEIGHT,
    bits_per_pixel: 32,
    argb: true,
};

pub trait HostCursorSink {
    fn capabilities(&self) -> CursorCapabilities;

    fn show(&mut self);

    fn hide(&mut self);

    /// Position of the cursor's top-left corner; the host has already applied the hotspot.
    fn set_position(&mut self, x: i32, y: i32);

    fn set_colors(&mut self, foreground: DeviceColor, background: DeviceColor);

    /// Two-colour image: the source plane followed by the mask plane, each laid out with the
    /// sink's configured scanline pad and bit order.
    fn load_image(&mut self, width: u32, height: u32, bits: &[u8]);

    /// Whether an ARGB cursor of this size can be shown in hardware. Enables or disables the
    /// hardware cursor accordingly.
    fn try_enable_truecolor(&mut self, width: u32, height: u32) -> bool;

    fn load_truecolor(&mut self, width: u32, height: u32, pixels: &[u32]);
}

fn log_failure(op: &str, result: Result<()>) {
    if let Err(err) = result {
        warn!("hardware cursor {op} failed: {err}");
    }
}

impl<V: VideoCore> HostCursorSink for CursorController<V> {
    fn capabilities(&self) -> CursorCapabilities {
        HARDWARE_CURSOR_CAPABILITIES
    }

    fn show(&mut self) {
        log_failure("show", CursorController::show(self));
    }

    fn hide(&mut self) {
        log_failure("hide", CursorController::hide(self));
    }

    fn set_position(&mut self, x: i32, y: i32) {
        log_failure("move", self.move_to(x, y));
    }

    fn set_colors(&mut self, foreground: DeviceColor, background: DeviceColor) {
        CursorController::set_colors(
            self,
            CursorColors {
                foreground,
                background,
            },
        );
    }

    fn load_image(&mut self, width: u32, height: u32, bits: &[u8]) {
        let layout = self.config().mono_layout;
        let plane = (layout.pitch(width) * height as usize).min(bits.len());
        let (source, mask) = bits.split_at(plane);
        let image = CursorImage::Mono {
            width,
            height,
            source,
            mask,
            layout,
        };
        log_failure("image upload", CursorController::load_image(self, &image));
    }

    fn try_enable_truecolor(&mut self, width: u32, height: u32) -> bool {
        match CursorController::try_enable_truecolor(self, width, height) {
            Ok(enabled) => enabled,
            Err(err) => {
                warn!("hardware cursor enable failed: {err}");
                false
            }
        }
    }

    fn load_truecolor(&mut self, width: u32, height: u32, pixels: &[u32]) {
        let image = CursorImage::Argb {
            width,
            height,
            pixels,
        };
        log_failure("image upload", CursorController::load_image(self, &image));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CursorConfig;
    use crate::controller::CursorState;
    use vc_mailbox::{EmulatedVideoCore, PropertyTag};

    fn sink() -> CursorController<EmulatedVideoCore> {
        let mut cursor = CursorController::new(EmulatedVideoCore::new(), CursorConfig::default());
        cursor.init().unwrap();
        cursor
    }

    #[test]
    fn advertises_64x64_argb() {
        let cursor = sink();
        let caps = HostCursorSink::capabilities(&cursor);
        assert_eq!((caps.max_width, caps.max_height, caps.bits_per_pixel), (64, 64, 32));
        assert!(caps.argb);
    }

    #[test]
    fn failures_are_swallowed() {
        let mut cursor = sink();
        cursor.device_mut().fail_tag(PropertyTag::SetCursorState);
        HostCursorSink::show(&mut cursor);
        HostCursorSink::set_position(&mut cursor, 1, 1);
        assert!(!HostCursorSink::try_enable_truecolor(&mut cursor, 32, 32));
        assert_eq!(cursor.state(), CursorState::Hidden);
    }

    #[test]
    fn mono_bits_are_split_into_source_and_mask() {
        let mut cursor = sink();
        // 16x16 at 32-bit pad: 64 bytes per plane. Source all set, mask only the first pixel.
        let mut bits = vec![0xffu8; 64];
        bits.extend(std::iter::once(0x01).chain(std::iter::repeat(0).take(63)));
        HostCursorSink::set_colors(&mut cursor, DeviceColor::new(0, 0xff00, 0), DeviceColor::BLACK);
        HostCursorSink::load_image(&mut cursor, 16, 16, &bits);

        let image = cursor.device().cursor_image().unwrap();
        assert_eq!(image[0], 0xff00_ff00);
        assert_eq!(image[1], 0x0000_ff00);
    }

    #[test]
    fn short_bitmap_is_logged_not_uploaded() {
        let mut cursor = sink();
        HostCursorSink::load_image(&mut cursor, 16, 16, &[0xff; 70]);
        assert!(cursor.device().cursor_info().is_none());
    }
}
