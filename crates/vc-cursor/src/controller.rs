use tracing::{debug, info, warn};
use vc_mailbox::{
    call, firmware_version, videocore_alloc_with, videocore_free, AllocFlags, FirmwareVersion,
    GpuMemoryBlock, VideoCore,
};
use vc_property::PropertyTag;

use crate::config::CursorConfig;
use crate::error::{CursorError, Result};
use crate::raster::{
    realize, CursorColors, CursorImage, CURSOR_BUFFER_BYTES, MAX_CURSOR_HEIGHT, MAX_CURSOR_WIDTH,
};

const TRANSFER_BUFFER_ALIGN: u32 = 4096;
/// Cursor formats other than ARGB8888 are not implemented by the firmware.
const CURSOR_FORMAT_ARGB: u32 = 0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorState {
    Uninitialized,
    Hidden,
    Visible,
    /// Initialisation failed; every later call is ignored.
    Unavailable,
    Closed,
}

impl CursorState {
    fn is_ready(self) -> bool {
        matches!(self, Self::Hidden | Self::Visible)
    }
}

/// What the firmware was last told about the cursor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CursorSurface {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub hotspot_x: u32,
    pub hotspot_y: u32,
    pub colors: CursorColors,
    pub enabled: bool,
    pub x: i32,
    pub y: i32,
}

impl Default for CursorSurface {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: CURSOR_FORMAT_ARGB,
            hotspot_x: 0,
            hotspot_y: 0,
            colors: CursorColors::default(),
            enabled: false,
            x: 0,
            y: 0,
        }
    }
}

/// Drives the firmware cursor through a [`VideoCore`] connection.
///
/// Every visible change is one property transaction. The surface is only updated once the firmware
/// has acknowledged the request, so a failed call leaves the previous cursor on screen and the
/// recorded state in step with it.
pub struct CursorController<V: VideoCore> {
    device: V,
    config: CursorConfig,
    state: CursorState,
    surface: CursorSurface,
    firmware: Option<FirmwareVersion>,
    transfer: Option<GpuMemoryBlock>,
}

impl<V: VideoCore> CursorController<V> {
    pub fn new(device: V, config: CursorConfig) -> Self {
        Self {
            device,
            config,
            state: CursorState::Uninitialized,
            surface: CursorSurface::default(),
            firmware: None,
            transfer: None,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn surface(&self) -> &CursorSurface {
        &self.surface
    }

    pub fn config(&self) -> &CursorConfig {
        &self.config
    }

    pub fn firmware_version(&self) -> Option<FirmwareVersion> {
        self.firmware
    }

    pub fn device(&self) -> &V {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut V {
        &mut self.device
    }

    /// Check firmware support and set up the transfer buffer.
    ///
    /// Any failure is permanent: the controller becomes [`CursorState::Unavailable`] and a later
    /// `init` returns [`CursorError::InitAlreadyFailed`].
    pub fn init(&mut self) -> Result<()> {
        match self.state {
            CursorState::Uninitialized => {}
            CursorState::Unavailable => return Err(CursorError::InitAlreadyFailed),
            CursorState::Hidden | CursorState::Visible | CursorState::Closed => return Ok(()),
        }

        match self.try_init() {
            Ok(()) => {
                self.state = CursorState::Hidden;
                info!("hardware cursor ready (firmware {:?})", self.firmware);
                Ok(())
            }
            Err(err) => {
                self.state = CursorState::Unavailable;
                warn!("hardware cursor unavailable: {err}");
                Err(err)
            }
        }
    }

    fn try_init(&mut self) -> Result<()> {
        let version = firmware_version(&mut self.device)?;
        self.firmware = Some(version);
        if version < self.config.min_firmware {
            return Err(CursorError::UnsupportedFirmware {
                found: version,
                minimum: self.config.min_firmware,
            });
        }

        let mut block = videocore_alloc_with(
            &mut self.device,
            CURSOR_BUFFER_BYTES as u32,
            TRANSFER_BUFFER_ALIGN,
            AllocFlags::L1_NONALLOCATING,
        )?;
        block.as_mut_slice().fill(0);
        debug!(
            "cursor transfer buffer at bus {} ({} bytes)",
            block.bus_address(),
            block.size()
        );
        self.transfer = Some(block);
        Ok(())
    }

    pub fn show(&mut self) -> Result<()> {
        if !self.state.is_ready() {
            return Ok(());
        }
        self.send_state(true, self.surface.x, self.surface.y)
    }

    pub fn hide(&mut self) -> Result<()> {
        if !self.state.is_ready() {
            return Ok(());
        }
        self.send_state(false, self.surface.x, self.surface.y)
    }

    pub fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
        if !self.state.is_ready() {
            return Ok(());
        }
        self.send_state(self.surface.enabled, x, y)
    }

    /// Store colours for the next two-colour image. The current image is not redrawn.
    pub fn set_colors(&mut self, colors: CursorColors) {
        self.surface.colors = colors;
    }

    /// Enable the cursor if an image of `width` x `height` fits the hardware, disable it
    /// otherwise. Returns whether the hardware cursor is now in use.
    pub fn try_enable_truecolor(&mut self, width: u32, height: u32) -> Result<bool> {
        if !self.state.is_ready() {
            return Ok(false);
        }
        let enabled = width <= MAX_CURSOR_WIDTH && height <= MAX_CURSOR_HEIGHT;
        self.send_state(enabled, self.surface.x, self.surface.y)?;
        Ok(enabled)
    }

    /// Rasterize `image` into the transfer buffer and point the firmware at it.
    ///
    /// An image larger than the hardware supports disables a visible cursor, so the previous
    /// image does not stay on screen.
    pub fn load_image(&mut self, image: &CursorImage<'_>) -> Result<()> {
        if !self.state.is_ready() {
            return Ok(());
        }

        let (width, height) = image.dimensions();
        if width > MAX_CURSOR_WIDTH || height > MAX_CURSOR_HEIGHT {
            if self.surface.enabled {
                self.send_state(false, self.surface.x, self.surface.y)?;
            }
            return Err(CursorError::GeometryUnsupported { width, height });
        }
        let cursor = realize(image, &self.surface.colors)?;

        let Some(block) = self.transfer.as_mut() else {
            return Ok(());
        };
        let buffer = block.as_mut_slice();
        buffer.fill(0);
        cursor.write_to(buffer);
        let bus = block.bus_address();

        let (hotspot_x, hotspot_y) = cursor.hotspot;
        self.expect_status(
            PropertyTag::SetCursorInfo,
            &[
                cursor.width,
                cursor.height,
                CURSOR_FORMAT_ARGB,
                bus.get(),
                hotspot_x,
                hotspot_y,
            ],
        )?;

        self.surface.width = cursor.width;
        self.surface.height = cursor.height;
        self.surface.format = CURSOR_FORMAT_ARGB;
        self.surface.hotspot_x = hotspot_x;
        self.surface.hotspot_y = hotspot_y;
        debug!("cursor image {}x{} loaded", cursor.width, cursor.height);
        Ok(())
    }

    /// Hide the cursor and release the transfer buffer.
    ///
    /// Both steps are attempted; the first failure is returned. The controller is closed either
    /// way.
    pub fn close(&mut self) -> Result<()> {
        let was_ready = self.state.is_ready();
        self.state = CursorState::Closed;
        if !was_ready {
            return Ok(());
        }

        let hidden = self
            .expect_status(
                PropertyTag::SetCursorState,
                &[0, self.surface.x as u32, self.surface.y as u32],
            )
            .map(|()| self.surface.enabled = false);
        let freed = match self.transfer.take() {
            Some(block) => videocore_free(&mut self.device, block).map_err(CursorError::from),
            None => Ok(()),
        };
        info!("hardware cursor closed");
        hidden.and(freed)
    }

    fn send_state(&mut self, enabled: bool, x: i32, y: i32) -> Result<()> {
        // Positions are signed on the host side; firmware reads the same bits.
        self.expect_status(
            PropertyTag::SetCursorState,
            &[u32::from(enabled), x as u32, y as u32],
        )?;

        self.surface.enabled = enabled;
        self.surface.x = x;
        self.surface.y = y;
        self.state = if enabled {
            CursorState::Visible
        } else {
            CursorState::Hidden
        };
        debug!("cursor {:?} at ({x}, {y})", self.state);
        Ok(())
    }

    fn expect_status(&mut self, tag: PropertyTag, payload: &[u32]) -> Result<()> {
        let [status] = call::<_, 1>(&mut self.device, tag, payload)?;
        if status != 0 {
            warn!("firmware rejected {tag:?}: status {status:#x}");
            return Err(CursorError::FirmwareRejected { tag, status });
        }
        Ok(())
    }
}

impl<V: VideoCore> Drop for CursorController<V> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("closing hardware cursor: {err}");
        }
    }
}

impl<V: VideoCore> std::fmt::Debug for CursorController<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorController")
            .field("state", &self.state)
            .field("surface", &self.surface)
            .field("firmware", &self.firmware)
            .field("transfer", &self.transfer.as_ref().map(|b| b.bus_address()))
            .finish_non_exhaustive()
    }
}
