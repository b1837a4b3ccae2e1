use crate::{RasterError, MAX_TILES};

/// Widest composite the raw event record can address (12-bit x).
const MAX_WIDTH: u32 = 1 << 12;
/// Tallest composite the raw event record can address (11-bit y).
const MAX_HEIGHT: u32 = 1 << 11;
/// Local coordinates inside an octant are packed into 10 + 9 bits.
const MAX_OCTANT_WIDTH: u32 = 1 << 10;
const MAX_OCTANT_HEIGHT: u32 = 1 << 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileOrigin {
    pub x: i32,
    pub y: i32,
}

/// Placement of one tile inside the composite after clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileClip {
    pub src_x: u32,
    pub src_y: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub width: u32,
    pub height: u32,
}

/// Layout of the composite canvas for one capture epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasGeometry {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub tile_columns: u32,
    pub tile_count: u8,
    /// Explicit per-tile origins; when absent origins follow the column grid.
    pub tile_origins: Option<Vec<TileOrigin>>,
    pub octant_width: u32,
    pub octant_height: u32,
    /// Subtracted from a raster index to get its 5-bit event color.
    pub color_bias: u8,
    /// Composite index meaning "no snapshot has covered this pixel yet".
    pub untouched: u8,
}

impl Default for CanvasGeometry {
    fn default() -> Self {
        Self::place_2023()
    }
}

impl CanvasGeometry {
    pub fn place_2023() -> Self {
        CanvasGeometry {
            width: 3000,
            height: 2000,
            tile_size: 1000,
            tile_columns: 3,
            tile_count: 6,
            tile_origins: None,
            octant_width: 1000,
            octant_height: 500,
            color_bias: 1,
            untouched: 32,
        }
    }

    pub fn place_2022() -> Self {
        CanvasGeometry {
            width: 2000,
            height: 2000,
            tile_columns: 2,
            tile_count: 4,
            ..Self::place_2023()
        }
    }

    pub fn validate(&self) -> Result<(), RasterError> {
        let fail = |msg: String| Err(RasterError::Geometry(msg));

        if self.width == 0 || self.width > MAX_WIDTH {
            return fail(format!("width {} not in 1..={}", self.width, MAX_WIDTH));
        }
        if self.height == 0 || self.height > MAX_HEIGHT {
            return fail(format!("height {} not in 1..={}", self.height, MAX_HEIGHT));
        }
        if self.tile_count == 0 || self.tile_count > MAX_TILES {
            return fail(format!("tile count {} not in 1..={}", self.tile_count, MAX_TILES));
        }
        if self.tile_size == 0 || self.tile_columns == 0 {
            return fail("tile size and column count must be nonzero".to_string());
        }
        if let Some(origins) = &self.tile_origins {
            if origins.len() != self.tile_count as usize {
                return fail(format!(
                    "{} tile origins for {} tiles",
                    origins.len(),
                    self.tile_count
                ));
            }
        }
        if self.octant_width == 0 || self.octant_width > MAX_OCTANT_WIDTH {
            return fail(format!("octant width {} not in 1..={}", self.octant_width, MAX_OCTANT_WIDTH));
        }
        if self.octant_height == 0 || self.octant_height > MAX_OCTANT_HEIGHT {
            return fail(format!(
                "octant height {} not in 1..={}",
                self.octant_height, MAX_OCTANT_HEIGHT
            ));
        }
        Ok(())
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn tile_origin(&self, tile: u8) -> Option<TileOrigin> {
        if tile >= self.tile_count {
            return None;
        }
        if let Some(origins) = &self.tile_origins {
            return origins.get(tile as usize).copied();
        }
        let tile = u32::from(tile);
        Some(TileOrigin {
            x: ((tile % self.tile_columns) * self.tile_size) as i32,
            y: ((tile / self.tile_columns) * self.tile_size) as i32,
        })
    }

    /// Intersects a `width` x `height` tile raster placed at its origin with
    /// the composite bounds.
    pub fn clip(&self, tile: u8, width: u32, height: u32) -> Option<TileClip> {
        let origin = self.tile_origin(tile)?;
        let (src_x, dst_x, width) = clip_axis(origin.x, width, self.width)?;
        let (src_y, dst_y, height) = clip_axis(origin.y, height, self.height)?;
        Some(TileClip {
            src_x,
            src_y,
            dst_x,
            dst_y,
            width,
            height,
        })
    }

    /// First tile whose square covers the composite pixel.
    pub fn tile_at(&self, x: u32, y: u32) -> Option<u8> {
        (0..self.tile_count).find(|&tile| {
            self.tile_origin(tile).is_some_and(|o| {
                let (x, y) = (i64::from(x), i64::from(y));
                let size = i64::from(self.tile_size);
                x >= i64::from(o.x)
                    && x < i64::from(o.x) + size
                    && y >= i64::from(o.y)
                    && y < i64::from(o.y) + size
            })
        })
    }

    pub fn encode_color(&self, index: u8) -> u8 {
        index.wrapping_sub(self.color_bias) & 31
    }

    pub fn decode_color(&self, code: u8) -> u8 {
        code.wrapping_add(self.color_bias)
    }

    pub fn untouched_code(&self) -> u8 {
        self.encode_color(self.untouched)
    }

    pub fn octant_rows(&self) -> u32 {
        self.height.div_ceil(self.octant_height)
    }

    pub fn octant_count(&self) -> u32 {
        self.octant_rows() * self.width.div_ceil(self.octant_width)
    }

    /// Bits reserved for the octant in a crunch group header.
    pub fn octant_bits(&self) -> u32 {
        let count = self.octant_count();
        if count <= 1 {
            0
        } else {
            32 - (count - 1).leading_zeros()
        }
    }

    pub fn octant_of(&self, x: u32, y: u32) -> u32 {
        y / self.octant_height + self.octant_rows() * (x / self.octant_width)
    }

    pub fn octant_origin(&self, octant: u32) -> (u32, u32) {
        let rows = self.octant_rows();
        (
            (octant / rows) * self.octant_width,
            (octant % rows) * self.octant_height,
        )
    }
}

fn clip_axis(origin: i32, len: u32, bound: u32) -> Option<(u32, u32, u32)> {
    let start = i64::from(origin).max(0);
    let end = (i64::from(origin) + i64::from(len)).min(i64::from(bound));
    if end <= start {
        return None;
    }
    Some((
        (start - i64::from(origin)) as u32,
        start as u32,
        (end - start) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_origins() {
        let geometry = CanvasGeometry::place_2023();
        geometry.validate().unwrap();
        assert_eq!(geometry.tile_origin(4), Some(TileOrigin { x: 1000, y: 1000 }));
        assert_eq!(geometry.tile_origin(2), Some(TileOrigin { x: 2000, y: 0 }));
        assert_eq!(geometry.tile_origin(6), None);
        assert_eq!(geometry.tile_at(2500, 1999), Some(5));
    }

    #[test]
    fn octants_follow_half_tiles() {
        let geometry = CanvasGeometry::place_2023();
        assert_eq!(geometry.octant_count(), 12);
        assert_eq!(geometry.octant_bits(), 4);
        assert_eq!(geometry.octant_of(0, 0), 0);
        assert_eq!(geometry.octant_of(999, 1999), 3);
        assert_eq!(geometry.octant_of(2999, 1999), 11);
        assert_eq!(geometry.octant_origin(11), (2000, 1500));
        assert_eq!(CanvasGeometry::place_2022().octant_bits(), 3);
    }

    #[test]
    fn negative_origins_are_clipped() {
        let geometry = CanvasGeometry {
            width: 1500,
            height: 1000,
            tile_count: 2,
            tile_origins: Some(vec![TileOrigin { x: -500, y: 0 }, TileOrigin { x: 500, y: 0 }]),
            ..CanvasGeometry::place_2023()
        };
        geometry.validate().unwrap();
        assert_eq!(
            geometry.clip(0, 1000, 1000),
            Some(TileClip { src_x: 500, src_y: 0, dst_x: 0, dst_y: 0, width: 500, height: 1000 })
        );
        assert_eq!(
            geometry.clip(1, 1000, 1000),
            Some(TileClip { src_x: 0, src_y: 0, dst_x: 500, dst_y: 0, width: 1000, height: 1000 })
        );
    }

    #[test]
    fn rejects_unaddressable_layouts() {
        let too_wide = CanvasGeometry { width: 5000, ..CanvasGeometry::place_2023() };
        assert!(too_wide.validate().is_err());
        let too_many = CanvasGeometry { tile_count: 17, ..CanvasGeometry::place_2023() };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn color_codes_wrap_into_five_bits() {
        let geometry = CanvasGeometry::place_2023();
        assert_eq!(geometry.encode_color(1), 0);
        assert_eq!(geometry.untouched_code(), 31);
        assert_eq!(geometry.decode_color(31), 32);
    }

    #[test]
    fn parses_from_toml_with_defaults() {
        let geometry: CanvasGeometry = toml::from_str("width = 2000\ntile_columns = 2\ntile_count = 4\n").unwrap();
        assert_eq!(geometry, CanvasGeometry::place_2022());
    }
}
