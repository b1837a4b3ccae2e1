use std::io::{Read, Seek};

use archive::SnapshotStore;
use structures::{CanvasGeometry, Raster, PALETTE_LEN};
use tracing::info;

use crate::{human_time, ReplayEngine, ReplayError, ReplayMode, ReplayOptions};

#[derive(Debug, Clone, Default)]
pub struct AverageOptions {
    /// Snapshots before this time are ignored.
    pub start_ms: Option<i64>,
    /// Snapshots after this time end the run.
    pub end_ms: Option<i64>,
    pub replay: ReplayOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Averaged {
    /// Full canvas holding the most frequent index of every pixel.
    pub raster: Raster,
    pub snapshots: usize,
    pub skipped: usize,
}

/// Counts how often each palette index shows at every pixel across the
/// snapshots inside the window and keeps the most frequent one. Ties go to
/// the lower index. Pixels no snapshot covered keep the untouched index.
///
/// Returns `None` when no snapshot in the window could be decoded.
pub fn average<R: Read + Seek>(
    store: &SnapshotStore<R>,
    geometry: &CanvasGeometry,
    options: &AverageOptions,
) -> Result<Option<Averaged>, ReplayError> {
    let mut engine = ReplayEngine::new(
        store,
        geometry.clone(),
        ReplayMode::Overwrite,
        options.replay.clone(),
    )?;
    let width = geometry.width as usize;
    let mut counts = vec![[0u32; PALETTE_LEN]; geometry.pixel_count()];
    let (mut snapshots, mut skipped) = (0, 0);

    let timeline = store.timeline();
    let total = timeline.len();
    for (n, key) in timeline.into_iter().enumerate() {
        let ts = key.timestamp();
        if options.start_ms.is_some_and(|start| ts < start) {
            continue;
        }
        if options.end_ms.is_some_and(|end| ts > end) {
            break;
        }
        let Some(applied) = engine.apply(key, |_, _, _, _| Ok(()))? else {
            skipped += 1;
            continue;
        };

        // the composite now equals the snapshot inside its region
        let region = applied.region;
        let pixels = engine.composite().pixels();
        for y in region.dst_y..region.dst_y + region.height {
            let start = y as usize * width + region.dst_x as usize;
            let end = start + region.width as usize;
            for (slot, &index) in counts[start..end].iter_mut().zip(&pixels[start..end]) {
                if let Some(count) = slot.get_mut(index as usize) {
                    *count += 1;
                }
            }
        }
        snapshots += 1;

        if n % options.replay.progress_every.max(1) == 0 {
            info!(n, total, time = %human_time(ts), "averaging");
        }
    }

    let Some(palette) = engine.palette().cloned() else {
        return Ok(None);
    };
    let pixels = counts
        .iter()
        .map(|slot| most_frequent(slot).unwrap_or(geometry.untouched))
        .collect();
    let raster = Raster::from_pixels(geometry.width, geometry.height, palette, pixels)?;
    info!(snapshots, skipped, "average finished");
    Ok(Some(Averaged {
        raster,
        snapshots,
        skipped,
    }))
}

fn most_frequent(counts: &[u32; PALETTE_LEN]) -> Option<u8> {
    let mut best = None;
    let mut max = 0;
    for (index, &count) in counts.iter().enumerate() {
        if count > max {
            max = count;
            best = Some(index as u8);
        }
    }
    best
}
