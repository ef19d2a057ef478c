//! Hardware cursor for displays scanned out by the VideoCore firmware.
//!
//! [`CursorController`] owns the firmware connection and a 64x64 ARGB transfer buffer in GPU
//! memory. Host images are rasterized into that buffer by [`raster`], and every change of image,
//! position or visibility becomes one mailbox property transaction.
#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod raster;

pub use config::{CursorConfig, MIN_CURSOR_FIRMWARE_VERSION};
pub use controller::{CursorController, CursorState, CursorSurface};
pub use error::{CursorError, Result};
pub use host::{CursorCapabilities, HostCursorSink, HARDWARE_CURSOR_CAPABILITIES};
pub use raster::{
    normalize_dimensions, realize, BitOrder, CursorColors, CursorImage, DeviceColor, MonoLayout,
    RasterError, RealizedCursor,
};
