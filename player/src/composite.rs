use structures::{CanvasGeometry, Raster, TileClip};

use crate::ReplayError;

/// Full-resolution canvas state as raster indices. Starts with every pixel
/// set to the geometry's untouched index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composite {
    geometry: CanvasGeometry,
    pixels: Vec<u8>,
}

impl Composite {
    pub fn new(geometry: CanvasGeometry) -> Self {
        let pixels = vec![geometry.untouched; geometry.pixel_count()];
        Composite { geometry, pixels }
    }

    pub fn geometry(&self) -> &CanvasGeometry {
        &self.geometry
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.geometry.width || y >= self.geometry.height {
            return None;
        }
        Some(self.pixels[self.offset(x, y)])
    }

    pub fn set(&mut self, x: u32, y: u32, index: u8) -> bool {
        if x >= self.geometry.width || y >= self.geometry.height {
            return false;
        }
        let offset = self.offset(x, y);
        self.pixels[offset] = index;
        true
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.geometry.width as usize + x as usize
    }

    pub fn clip(&self, tile: u8, raster: &Raster) -> Result<TileClip, ReplayError> {
        self.geometry
            .clip(tile, raster.width(), raster.height())
            .ok_or(ReplayError::TileOutsideCanvas(tile))
    }

    /// Copies a tile raster into place, calling `on_change(x, y, old, new)`
    /// in row-major order for every pixel whose index differs.
    pub fn overwrite_tile<F>(
        &mut self,
        tile: u8,
        raster: &Raster,
        mut on_change: F,
    ) -> Result<usize, ReplayError>
    where
        F: FnMut(u32, u32, u8, u8) -> Result<(), ReplayError>,
    {
        let clip = self.clip(tile, raster)?;
        let mut changed = 0;
        for row in 0..clip.height {
            let src = &raster.row(clip.src_y + row)[clip.src_x as usize..][..clip.width as usize];
            let y = clip.dst_y + row;
            let start = self.offset(clip.dst_x, y);
            let dst = &mut self.pixels[start..start + clip.width as usize];
            for (col, (cur, &new)) in dst.iter_mut().zip(src).enumerate() {
                if *cur != new {
                    on_change(clip.dst_x + col as u32, y, *cur, new)?;
                    *cur = new;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Number of pixels of the tile's region that differ from `raster`.
    pub fn count_mismatches(&self, tile: u8, raster: &Raster) -> Result<usize, ReplayError> {
        let clip = self.clip(tile, raster)?;
        let mut mismatches = 0;
        for row in 0..clip.height {
            let src = &raster.row(clip.src_y + row)[clip.src_x as usize..][..clip.width as usize];
            let start = self.offset(clip.dst_x, clip.dst_y + row);
            let dst = &self.pixels[start..start + clip.width as usize];
            mismatches += dst.iter().zip(src).filter(|(a, b)| a != b).count();
        }
        Ok(mismatches)
    }

    /// Composite pixels under the tile, in the clipped raster's layout.
    pub fn tile_region(&self, clip: &TileClip) -> Vec<u8> {
        let mut region = Vec::with_capacity(clip.width as usize * clip.height as usize);
        for row in 0..clip.height {
            let start = self.offset(clip.dst_x, clip.dst_y + row);
            region.extend_from_slice(&self.pixels[start..start + clip.width as usize]);
        }
        region
    }

    /// 5-bit event codes of every pixel.
    pub fn codes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .map(|&index| self.geometry.encode_color(index))
            .collect()
    }
}
