use crate::{Palette, RasterError};

/// How a delta frame's nonzero pixels map onto its base palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaEncoding {
    /// Delta palette is the base palette behind one transparent entry, so a
    /// pixel value `v` stands for base index `v - 1`.
    Shifted,
    /// Both palettes share indices and entry 0 of the delta is transparent;
    /// nonzero values are copied as they are.
    Direct,
}

impl DeltaEncoding {
    pub fn detect(base: &Palette, delta: &Palette) -> Result<Self, RasterError> {
        if !delta.is_transparent(0) {
            return Err(RasterError::OpaqueDeltaSentinel);
        }
        if delta.len() == base.len() + 1 {
            Ok(DeltaEncoding::Shifted)
        } else if delta.len() == base.len() {
            Ok(DeltaEncoding::Direct)
        } else {
            Err(RasterError::PaletteMismatch {
                base: base.len(),
                delta: delta.len(),
            })
        }
    }
}

/// An indexed-color image, one byte per pixel in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    palette: Palette,
    pixels: Vec<u8>,
}

impl Raster {
    pub fn new(width: u32, height: u32, palette: Palette) -> Self {
        Self::filled(width, height, palette, 0)
    }

    pub fn filled(width: u32, height: u32, palette: Palette, index: u8) -> Self {
        Raster {
            width,
            height,
            palette,
            pixels: vec![index; width as usize * height as usize],
        }
    }

    pub fn from_pixels(
        width: u32,
        height: u32,
        palette: Palette,
        pixels: Vec<u8>,
    ) -> Result<Self, RasterError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(RasterError::BufferLength {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Raster {
            width,
            height,
            palette,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.width as usize;
        &self.pixels[start..start + self.width as usize]
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[x as usize + y as usize * self.width as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, index: u8) {
        self.pixels[x as usize + y as usize * self.width as usize] = index;
    }

    /// RGBA of every pixel, resolved through the palette. Indices without a
    /// palette entry resolve to transparent black.
    pub fn resolved_colors(&self) -> impl Iterator<Item = [u8; 4]> + '_ {
        self.pixels
            .iter()
            .map(|&index| self.palette.get(index).unwrap_or([0, 0, 0, 0]))
    }

    fn check_dimensions(&self, other: &Raster) -> Result<(), RasterError> {
        if self.width != other.width || self.height != other.height {
            return Err(RasterError::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: other.width,
                actual_height: other.height,
            });
        }
        Ok(())
    }

    /// Encodes `target` relative to `base` as a shifted delta: 0 where the
    /// pixel is unchanged, `index + 1` where it differs.
    pub fn compute_delta(base: &Raster, target: &Raster) -> Result<Raster, RasterError> {
        base.check_dimensions(target)?;
        if base.palette != target.palette || base.palette.len() > u8::MAX as usize {
            return Err(RasterError::PaletteMismatch {
                base: base.palette.len(),
                delta: target.palette.len(),
            });
        }

        let mut pixels = Vec::with_capacity(base.pixels.len());
        for (&old, &new) in base.pixels.iter().zip(&target.pixels) {
            if new as usize >= target.palette.len() {
                return Err(RasterError::IndexOutOfRange {
                    index: new,
                    len: target.palette.len(),
                });
            }
            pixels.push(if old == new { 0 } else { new + 1 });
        }

        Ok(Raster {
            width: base.width,
            height: base.height,
            palette: base.palette.with_transparent_prefix(),
            pixels,
        })
    }

    /// Overlays a delta frame onto its base. The result carries the base
    /// palette.
    pub fn apply_delta(base: &Raster, delta: &Raster) -> Result<Raster, RasterError> {
        base.check_dimensions(delta)?;
        let encoding = DeltaEncoding::detect(&base.palette, &delta.palette)?;

        let mut combined = base.clone();
        for (out, &value) in combined.pixels.iter_mut().zip(&delta.pixels) {
            if value == 0 {
                continue;
            }
            let index = match encoding {
                DeltaEncoding::Shifted => value - 1,
                DeltaEncoding::Direct => value,
            };
            if index as usize >= base.palette.len() {
                return Err(RasterError::IndexOutOfRange {
                    index,
                    len: base.palette.len(),
                });
            }
            *out = index;
        }
        Ok(combined)
    }
}
