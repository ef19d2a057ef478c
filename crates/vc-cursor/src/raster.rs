//! Conversion of host cursor images into the ARGB8888 layout the firmware scans out.

use thiserror::Error;

pub const MAX_CURSOR_WIDTH: u32 = 64;
pub const MAX_CURSOR_HEIGHT: u32 = 64;
/// The firmware does not display cursors narrower or shorter than this.
pub const MIN_CURSOR_DIMENSION: u32 = 16;

/// Bytes needed for the largest cursor; the transfer buffer is always this size.
pub const CURSOR_BUFFER_BYTES: usize = (MAX_CURSOR_WIDTH * MAX_CURSOR_HEIGHT * 4) as usize;

/// Round a requested cursor size up to what the firmware accepts: at least 16 pixels and even.
pub fn normalize_dimensions(width: u32, height: u32) -> (u32, u32) {
    (normalize(width), normalize(height))
}

fn normalize(v: u32) -> u32 {
    let v = v.clamp(MIN_CURSOR_DIMENSION, u32::MAX - 1);
    v + (v & 1)
}

/// Which bit of a bitmap byte holds the leftmost pixel.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum BitOrder {
    #[default]
    LsbFirst,
    MsbFirst,
}

/// Row layout of 1-bit source and mask planes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MonoLayout {
    /// Each scanline is padded to a multiple of this many bits (8, 16, 32 or 64). Other values
    /// still yield whole-byte rows.
    pub scanline_pad_bits: u32,
    pub bit_order: BitOrder,
}

impl Default for MonoLayout {
    fn default() -> Self {
        Self {
            scanline_pad_bits: 32,
            bit_order: BitOrder::LsbFirst,
        }
    }
}

impl MonoLayout {
    /// Bytes per scanline for a plane `width` pixels wide.
    pub fn pitch(&self, width: u32) -> usize {
        let pad = self.scanline_pad_bits.max(8) as usize;
        ((width as usize).div_ceil(pad) * pad).div_ceil(8)
    }

    fn bit(&self, row: &[u8], x: u32) -> bool {
        let byte = row[(x / 8) as usize];
        let shift = match self.bit_order {
            BitOrder::LsbFirst => x % 8,
            BitOrder::MsbFirst => 7 - x % 8,
        };
        (byte >> shift) & 1 != 0
    }
}

/// A colour with 16 bits per channel, as handed over by the windowing system.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeviceColor {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl DeviceColor {
    pub const BLACK: Self = Self::new(0, 0, 0);
    pub const WHITE: Self = Self::new(0xffff, 0xffff, 0xffff);

    pub const fn new(red: u16, green: u16, blue: u16) -> Self {
        Self { red, green, blue }
    }

    /// Widen a packed `0x00RRGGBB` value.
    pub const fn from_rgb888(rgb: u32) -> Self {
        const fn widen(c: u32) -> u16 {
            ((c & 0xff) * 0x101) as u16
        }
        Self::new(widen(rgb >> 16), widen(rgb >> 8), widen(rgb))
    }

    /// `0xAARRGGBB` using the top byte of each channel.
    pub const fn to_argb(self, alpha: u8) -> u32 {
        (alpha as u32) << 24
            | ((self.red >> 8) as u32) << 16
            | ((self.green >> 8) as u32) << 8
            | (self.blue >> 8) as u32
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CursorColors {
    pub foreground: DeviceColor,
    pub background: DeviceColor,
}

impl Default for CursorColors {
    fn default() -> Self {
        Self {
            foreground: DeviceColor::WHITE,
            background: DeviceColor::BLACK,
        }
    }
}

/// A cursor image as supplied by the host.
#[derive(Debug, Copy, Clone)]
pub enum CursorImage<'a> {
    /// Two-colour cursor: `source` selects foreground/background, `mask` selects opacity.
    Mono {
        width: u32,
        height: u32,
        source: &'a [u8],
        mask: &'a [u8],
        layout: MonoLayout,
    },
    /// Pre-multiplied `0xAARRGGBB` pixels, `width` per row.
    Argb {
        width: u32,
        height: u32,
        pixels: &'a [u32],
    },
}

impl CursorImage<'_> {
    pub fn dimensions(&self) -> (u32, u32) {
        match *self {
            Self::Mono { width, height, .. } | Self::Argb { width, height, .. } => (width, height),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Plane {
    Source,
    Mask,
    Pixels,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RasterError {
    #[error("{plane:?} bitmap holds {found} bytes, {needed} needed")]
    BitmapTooShort {
        plane: Plane,
        needed: usize,
        found: usize,
    },
}

/// ARGB8888 pixels ready for the transfer buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealizedCursor {
    pub width: u32,
    pub height: u32,
    pub hotspot: (u32, u32),
    /// Row-major, `width` pixels per row.
    pub pixels: Vec<u32>,
}

impl RealizedCursor {
    /// Copy the pixels into `dst` as native-endian words. Stops at the end of `dst`; returns the
    /// number of bytes written.
    pub fn write_to(&self, dst: &mut [u8]) -> usize {
        let mut written = 0;
        for (out, px) in dst.chunks_exact_mut(4).zip(&self.pixels) {
            out.copy_from_slice(&px.to_ne_bytes());
            written += 4;
        }
        written
    }
}

/// Rasterize `image` at its normalized size.
///
/// The hotspot is always the top-left corner: the host already offsets the position it reports.
pub fn realize(image: &CursorImage<'_>, colors: &CursorColors) -> Result<RealizedCursor, RasterError> {
    let (src_w, src_h) = image.dimensions();
    let (width, height) = normalize_dimensions(src_w, src_h);
    let mut pixels = vec![0u32; width as usize * height as usize];

    match *image {
        CursorImage::Argb {
            pixels: src,
            width: src_w,
            height: src_h,
        } => {
            let needed = src_w as usize * src_h as usize;
            check_len(Plane::Pixels, needed * 4, src.len() * 4)?;

            let cols = src_w.min(width) as usize;
            for y in 0..src_h.min(height) as usize {
                let from = &src[y * src_w as usize..][..cols];
                pixels[y * width as usize..][..cols].copy_from_slice(from);
            }
        }
        CursorImage::Mono {
            width: src_w,
            height: src_h,
            source,
            mask,
            layout,
        } => {
            let pitch = layout.pitch(src_w);
            let needed = pitch * src_h as usize;
            check_len(Plane::Source, needed, source.len())?;
            check_len(Plane::Mask, needed, mask.len())?;

            let fg = colors.foreground.to_argb(0);
            let bg = colors.background.to_argb(0);
            for y in 0..src_h.min(height) {
                let src_row = &source[y as usize * pitch..][..pitch];
                let mask_row = &mask[y as usize * pitch..][..pitch];
                let out = &mut pixels[(y * width) as usize..][..width as usize];
                for x in 0..src_w.min(width) {
                    let rgb = if layout.bit(src_row, x) { fg } else { bg };
                    let alpha = if layout.bit(mask_row, x) { 0xff00_0000 } else { 0 };
                    out[x as usize] = alpha | rgb;
                }
            }
        }
    }

    Ok(RealizedCursor {
        width,
        height,
        hotspot: (0, 0),
        pixels,
    })
}

fn check_len(plane: Plane, needed: usize, found: usize) -> Result<(), RasterError> {
    if found < needed {
        return Err(RasterError::BitmapTooShort {
            plane,
            needed,
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn mono(width: u32, height: u32, source: &[u8], mask: &[u8]) -> RealizedCursor {
        let image = CursorImage::Mono {
            width,
            height,
            source,
            mask,
            layout: MonoLayout::default(),
        };
        realize(&image, &CursorColors::default()).unwrap()
    }

    #[test]
    fn normalization_examples() {
        assert_eq!(normalize_dimensions(10, 10), (16, 16));
        assert_eq!(normalize_dimensions(17, 31), (18, 32));
        assert_eq!(normalize_dimensions(64, 63), (64, 64));
        assert_eq!(normalize_dimensions(0, 16), (16, 16));
    }

    #[test]
    fn all_set_mono_is_opaque_foreground() {
        // 10 pixels per row padded to 32 bits: 4 bytes per scanline.
        let bits = [0xffu8; 4 * 10];
        let cursor = mono(10, 10, &bits, &bits);
        assert_eq!((cursor.width, cursor.height), (16, 16));
        assert_eq!(cursor.pixels.len(), 256);
        assert_eq!(cursor.hotspot, (0, 0));

        for y in 0..16 {
            for x in 0..16 {
                let px = cursor.pixels[y * 16 + x];
                if x < 10 && y < 10 {
                    assert_eq!(px, 0xffff_ffff, "({x}, {y})");
                } else {
                    assert_eq!(px, 0, "padding at ({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn mask_controls_alpha_and_source_selects_colour() {
        // Row 0: source 0b0101, mask 0b0011 (LSB first => x=0 is bit 0).
        let source = [0b0101u8, 0, 0, 0];
        let mask = [0b0011u8, 0, 0, 0];
        let colors = CursorColors {
            foreground: DeviceColor::new(0x1234, 0x5678, 0x9abc),
            background: DeviceColor::new(0xff00, 0x0000, 0x00ff),
        };
        let image = CursorImage::Mono {
            width: 4,
            height: 1,
            source: &source,
            mask: &mask,
            layout: MonoLayout::default(),
        };
        let cursor = realize(&image, &colors).unwrap();
        assert_eq!(
            &cursor.pixels[..4],
            &[0xff12_569a, 0xffff_0000, 0x0012_569a, 0x00ff_0000]
        );
    }

    #[test]
    fn msb_first_reads_high_bit_as_leftmost() {
        let source = [0b1000_0000u8];
        let mask = [0b1000_0000u8];
        let image = CursorImage::Mono {
            width: 8,
            height: 1,
            source: &source,
            mask: &mask,
            layout: MonoLayout {
                scanline_pad_bits: 8,
                bit_order: BitOrder::MsbFirst,
            },
        };
        let cursor = realize(&image, &CursorColors::default()).unwrap();
        assert_eq!(cursor.pixels[0], 0xffff_ffff);
        assert_eq!(cursor.pixels[1], 0x0000_0000);
    }

    #[test]
    fn pitch_is_independent_of_width() {
        let layout = MonoLayout::default();
        assert_eq!(layout.pitch(1), 4);
        assert_eq!(layout.pitch(32), 4);
        assert_eq!(layout.pitch(33), 8);
        let bytes = MonoLayout {
            scanline_pad_bits: 8,
            ..layout
        };
        assert_eq!(bytes.pitch(9), 2);

        // Second row must come from byte 4, not byte 2.
        let mut bits = [0u8; 8];
        bits[4] = 0x01;
        let cursor = mono(10, 2, &bits, &bits);
        assert_eq!(cursor.pixels[16], 0xffff_ffff);
        assert!(cursor.pixels[..16].iter().all(|&p| p == 0));
    }

    #[test]
    fn short_mask_is_rejected() {
        let image = CursorImage::Mono {
            width: 16,
            height: 16,
            source: &[0; 64],
            mask: &[0; 63],
            layout: MonoLayout::default(),
        };
        assert_eq!(
            realize(&image, &CursorColors::default()).unwrap_err(),
            RasterError::BitmapTooShort {
                plane: Plane::Mask,
                needed: 64,
                found: 63
            }
        );
    }

    #[test]
    fn argb_rows_use_source_stride() {
        let src: Vec<u32> = (0..(20 * 3)).map(|i| 0xff00_0000 | i).collect();
        let image = CursorImage::Argb {
            width: 20,
            height: 3,
            pixels: &src,
        };
        let cursor = realize(&image, &CursorColors::default()).unwrap();
        assert_eq!((cursor.width, cursor.height), (20, 16));
        for y in 0..3 {
            assert_eq!(&cursor.pixels[y * 20..y * 20 + 20], &src[y * 20..y * 20 + 20]);
        }
        assert!(cursor.pixels[60..].iter().all(|&p| p == 0));
    }

    #[test]
    fn odd_argb_width_is_padded_per_row() {
        let src = vec![0xffff_ffffu32; 17];
        let image = CursorImage::Argb {
            width: 17,
            height: 1,
            pixels: &src,
        };
        let cursor = realize(&image, &CursorColors::default()).unwrap();
        assert_eq!(cursor.width, 18);
        assert_eq!(cursor.pixels[16], 0xffff_ffff);
        assert_eq!(cursor.pixels[17], 0);
    }

    #[test]
    fn write_to_clips_to_destination() {
        let cursor = mono(16, 16, &[0xff; 64], &[0xff; 64]);
        let mut small = [0u8; 10];
        assert_eq!(cursor.write_to(&mut small), 8);
        assert_eq!(&small[..8], &[0xff; 8]);
        assert_eq!(&small[8..], &[0, 0]);

        let mut full = vec![0u8; CURSOR_BUFFER_BYTES];
        assert_eq!(cursor.write_to(&mut full), 16 * 16 * 4);
    }

    #[test]
    fn colour_reduction_takes_top_byte() {
        assert_eq!(DeviceColor::new(0xabff, 0x0100, 0x00ff).to_argb(0x80), 0x80ab_0100);
        assert_eq!(DeviceColor::from_rgb888(0x00a1_b2c3), DeviceColor::new(0xa1a1, 0xb2b2, 0xc3c3));
    }

    #[test]
    fn normalization_saturates_at_the_top_of_the_range() {
        assert_eq!(normalize_dimensions(u32::MAX, 1), (u32::MAX - 1, 16));
        assert_eq!(normalize_dimensions(u32::MAX - 2, u32::MAX - 1), (u32::MAX - 1, u32::MAX - 1));
    }

    #[test]
    fn unusual_pad_rounds_rows_up_to_whole_bytes() {
        let layout = MonoLayout {
            scanline_pad_bits: 12,
            bit_order: BitOrder::LsbFirst,
        };
        assert_eq!(layout.pitch(16), 3);
        assert_eq!(layout.pitch(20), 3);

        let pitch = layout.pitch(20);
        let source = vec![0x00u8; pitch * 20];
        let mask = vec![0xffu8; pitch * 20];
        let cursor = realize(
            &CursorImage::Mono {
                width: 20,
                height: 20,
                source: &source,
                mask: &mask,
                layout,
            },
            &CursorColors::default(),
        )
        .unwrap();
        assert_eq!(cursor.pixels[19] >> 24, 0xff);
    }

    proptest! {
        #[test]
        fn normalized_dimensions_are_even_and_at_least_minimum(w in any::<u32>(), h in any::<u32>()) {
            let (nw, nh) = normalize_dimensions(w, h);
            for n in [nw, nh] {
                prop_assert_eq!(n % 2, 0);
                prop_assert!(n >= MIN_CURSOR_DIMENSION);
            }
        }

        #[test]
        fn normalized_dimensions_are_even_and_in_range(w in 0u32..=64, h in 0u32..=64) {
            let (nw, nh) = normalize_dimensions(w, h);
            for (n, v) in [(nw, w), (nh, h)] {
                prop_assert_eq!(n % 2, 0);
                prop_assert!(n >= MIN_CURSOR_DIMENSION);
                prop_assert!(n <= MAX_CURSOR_WIDTH);
                prop_assert!(n >= v);
            }
        }

        #[test]
        fn realized_size_matches_normalized(w in 1u32..=64, h in 1u32..=64) {
            let src = vec![0u32; (w * h) as usize];
            let image = CursorImage::Argb { width: w, height: h, pixels: &src };
            let cursor = realize(&image, &CursorColors::default()).unwrap();
            let (nw, nh) = normalize_dimensions(w, h);
            prop_assert_eq!(cursor.pixels.len(), (nw * nh) as usize);
        }
    }
}
