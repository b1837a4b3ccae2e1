//! Builds snapshot archives from captured frames: one pass producing the
//! full and delta archives, and incremental passes appending ticks archives.

mod build;
mod errors;
mod frames;
mod producers;
mod source;
mod ticks;

pub use crate::build::{build_archives, nearest_base, select_bases, BuildOptions, BuildSummary};
pub use crate::errors::{BuildError, FetchError};
pub use crate::frames::{read_locator_list, scan_frames, FrameLocator, FrameScan};
pub use crate::source::{FileSource, FrameSource, Retrying, DEFAULT_RETRY_BACKOFF};
pub use crate::ticks::{write_ticks, TicksOptions, TicksSummary};

pub(crate) fn human_time(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use archive::codec::encode_png_to_vec;
    use rand::Rng;
    use structures::{Palette, Raster};

    use crate::FrameLocator;

    pub const T0: i64 = 1_648_817_087_221;

    pub fn random_raster(rng: &mut impl Rng, width: u32, height: u32) -> Raster {
        let pixels = (0..width * height).map(|_| rng.gen_range(1..33u8)).collect();
        Raster::from_pixels(width, height, Palette::place(), pixels).unwrap()
    }

    pub fn evolve(rng: &mut impl Rng, raster: &Raster, changes: usize) -> Raster {
        let mut next = raster.clone();
        for _ in 0..changes {
            let x = rng.gen_range(0..raster.width());
            let y = rng.gen_range(0..raster.height());
            next.set(x, y, rng.gen_range(1..33u8));
        }
        next
    }

    pub fn write_frame(dir: &Path, ts: i64, tile: u8, raster: &Raster) -> FrameLocator {
        let path = dir.join(format!("{}-{}-f.png", ts, tile));
        std::fs::write(&path, encode_png_to_vec(raster, "frame").unwrap()).unwrap();
        FrameLocator::parse(&path.to_string_lossy()).unwrap()
    }
}
