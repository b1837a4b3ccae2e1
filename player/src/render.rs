use std::io::{Read, Seek};

use archive::SnapshotStore;
use structures::{CanvasGeometry, Palette};
use tracing::debug;

use crate::{Composite, ReplayError};

/// Crops snap to multiples of this many pixels.
const CROP_STEP: u32 = 500;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Tiles whose latest snapshot is older than this are left out.
    pub window_ms: i64,
    /// Trim fully transparent margins.
    pub crop: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            window_ms: 180_000,
            crop: false,
        }
    }
}

/// An RGBA image of the canvas as it looked at one moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Time of the newest snapshot that went into the image.
    pub timestamp: i64,
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Composes the latest snapshot at or before `timestamp` of every tile.
/// Returns `None` when no tile has a snapshot inside the window.
pub fn render_at<R: Read + Seek>(
    store: &SnapshotStore<R>,
    geometry: &CanvasGeometry,
    timestamp: i64,
    options: &RenderOptions,
) -> Result<Option<Rendered>, ReplayError> {
    geometry.validate()?;
    let mut composite = Composite::new(geometry.clone());
    let mut palette: Option<Palette> = None;
    let mut newest = None;
    // the untouched index may double as a real color
    let mut covered = vec![false; geometry.pixel_count()];

    for tile in 0..geometry.tile_count {
        let Some(record) = store.find_nearest_at_or_before(timestamp, tile) else {
            continue;
        };
        if timestamp - record.timestamp() > options.window_ms {
            debug!(tile, snapshot = %record.key, "tile too old to render");
            continue;
        }
        let raster = store.reconstruct(record.key)?;
        composite.overwrite_tile(tile, &raster, |_, _, _, _| Ok(()))?;
        let clip = composite.clip(tile, &raster)?;
        for y in clip.dst_y..clip.dst_y + clip.height {
            let start = y as usize * geometry.width as usize + clip.dst_x as usize;
            covered[start..start + clip.width as usize].fill(true);
        }
        newest = newest.max(Some(record.timestamp()));
        if palette.is_none() {
            palette = Some(raster.palette().clone());
        }
    }

    let (Some(newest), Some(palette)) = (newest, palette) else {
        return Ok(None);
    };

    let colors: Vec<[u8; 4]> = composite
        .pixels()
        .iter()
        .zip(&covered)
        .map(|(&index, &shown)| {
            if shown {
                palette.get(index).unwrap_or([0, 0, 0, 0])
            } else {
                [0, 0, 0, 0]
            }
        })
        .collect();

    let (x0, y0, width, height) = if options.crop {
        crop_bounds(&colors, geometry.width, geometry.height)
    } else {
        (0, 0, geometry.width, geometry.height)
    };

    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for y in y0..y0 + height {
        let start = y as usize * geometry.width as usize + x0 as usize;
        for color in &colors[start..start + width as usize] {
            rgba.extend_from_slice(color);
        }
    }

    Ok(Some(Rendered {
        timestamp: newest,
        x0,
        y0,
        width,
        height,
        rgba,
    }))
}

/// Smallest `CROP_STEP`-aligned box holding every visible pixel.
fn crop_bounds(colors: &[[u8; 4]], width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
    for (i, color) in colors.iter().enumerate() {
        if color[3] == 0 {
            continue;
        }
        let (x, y) = ((i % width as usize) as u32, (i / width as usize) as u32);
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    if min_x == u32::MAX {
        return (0, 0, width, height);
    }

    let x0 = min_x / CROP_STEP * CROP_STEP;
    let y0 = min_y / CROP_STEP * CROP_STEP;
    let x1 = ((max_x / CROP_STEP + 1) * CROP_STEP).min(width);
    let y1 = ((max_y / CROP_STEP + 1) * CROP_STEP).min(height);
    (x0, y0, x1 - x0, y1 - y0)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use archive::{codec::encode_png_to_vec, entry::ArchiveEntry, EntrySink, ZipSink};
    use structures::Raster;

    use super::*;

    fn store(frames: &[(u8, i64, &Raster)]) -> SnapshotStore<Cursor<Vec<u8>>> {
        let mut sink = ZipSink::new(Cursor::new(Vec::new()));
        for (tile, ts, raster) in frames {
            let name = format!("{}-{}.png", ts, tile);
            sink.commit(ArchiveEntry {
                bytes: encode_png_to_vec(raster, &name).unwrap(),
                name,
                timestamp_ms: *ts,
            })
            .unwrap();
        }
        let bytes = sink.finish().unwrap().into_inner();
        SnapshotStore::from_sources(vec![Cursor::new(bytes)], 4).unwrap()
    }

    #[test]
    fn picks_latest_snapshot_per_tile_inside_window() {
        let geometry = CanvasGeometry {
            width: 4,
            height: 2,
            tile_size: 2,
            tile_columns: 2,
            tile_count: 2,
            ..CanvasGeometry::place_2023()
        };
        let red = Raster::filled(2, 2, Palette::place(), 3);
        let black = Raster::filled(2, 2, Palette::place(), 28);
        let store = store(&[(0, 1_000, &red), (0, 2_000, &black), (1, 500, &red)]);

        let options = RenderOptions {
            window_ms: 1_000,
            crop: false,
        };
        let rendered = render_at(&store, &geometry, 1_600, &options).unwrap().unwrap();
        // tile 1 is 1100 ms old and stays transparent
        assert_eq!(rendered.timestamp, 1_000);
        assert_eq!((rendered.width, rendered.height), (4, 2));
        assert_eq!(&rendered.rgba[..4], &[0xFF, 0x45, 0x00, 0xFF]);
        assert_eq!(&rendered.rgba[8..12], &[0, 0, 0, 0]);

        let later = render_at(&store, &geometry, 2_000, &options).unwrap().unwrap();
        assert_eq!(later.timestamp, 2_000);
        assert_eq!(&later.rgba[..4], &[0, 0, 0, 0xFF]);

        assert_eq!(render_at(&store, &geometry, 400, &options).unwrap(), None);
    }

    #[test]
    fn crop_snaps_to_steps() {
        let (width, height) = (1200, 1000);
        let mut colors = vec![[0u8; 4]; width as usize * height as usize];
        colors[600 * width as usize + 700] = [1, 2, 3, 255];
        assert_eq!(crop_bounds(&colors, width, height), (500, 500, 500, 500));
        colors[999 * width as usize + 1199] = [1, 2, 3, 255];
        assert_eq!(crop_bounds(&colors, width, height), (500, 500, 700, 500));
        assert_eq!(crop_bounds(&vec![[0; 4]; 4], 2, 2), (0, 0, 2, 2));
    }
}
