use std::io::{Read, Seek};

use archive::SnapshotStore;
use eventlog::RawEventReader;
use structures::{CanvasGeometry, PixelEvent};
use tracing::{info, warn};

use crate::{human_time, ReplayEngine, ReplayError, ReplayMode, ReplayOptions};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub snapshots: usize,
    pub skipped: usize,
    pub events_applied: u64,
    pub mismatched_snapshots: usize,
    pub mismatched_pixels: u64,
}

/// Checks the snapshot archives against an independently recorded event
/// log. Before each snapshot is compared, every logged event up to its time
/// is painted onto the composite. Disagreements are counted and logged.
pub fn reconcile<R, L>(
    store: &SnapshotStore<R>,
    geometry: &CanvasGeometry,
    events: RawEventReader<L>,
    options: ReplayOptions,
) -> Result<ReconcileSummary, ReplayError>
where
    R: Read + Seek,
    L: Read,
{
    let epoch = events.epoch() as i64;
    let mut events = events.peekable();
    let progress_every = options.progress_every.max(1);
    let mut engine = ReplayEngine::new(store, geometry.clone(), ReplayMode::Validate, options)?;
    let mut summary = ReconcileSummary::default();

    for (n, key) in store.timeline().into_iter().enumerate() {
        let ts = key.timestamp();
        while let Some(next) = events.next_if(|event| {
            event
                .as_ref()
                .map_or(true, |e| epoch + i64::from(e.time_offset) <= ts)
        }) {
            paint(&mut engine, geometry, &next?);
            summary.events_applied += 1;
        }

        if engine.apply(key, |_, _, _, _| Ok(()))?.is_none() {
            summary.skipped += 1;
        } else {
            summary.snapshots += 1;
        }
        if n % progress_every == 0 {
            info!(
                n,
                events = summary.events_applied,
                mismatched = engine.stats().mismatched_snapshots,
                time = %human_time(ts),
                "reconciling"
            );
        }
    }

    let stats = engine.stats();
    summary.mismatched_snapshots = stats.mismatched_snapshots;
    summary.mismatched_pixels = stats.mismatched_pixels;
    if summary.mismatched_snapshots > 0 {
        warn!(
            snapshots = summary.mismatched_snapshots,
            pixels = summary.mismatched_pixels,
            "archives disagree with the event log"
        );
    }
    Ok(summary)
}

fn paint<R: Read + Seek>(engine: &mut ReplayEngine<'_, R>, geometry: &CanvasGeometry, event: &PixelEvent) {
    let index = geometry.decode_color(event.new_color);
    if !engine
        .composite_mut()
        .set(u32::from(event.x), u32::from(event.y), index)
    {
        warn!(x = event.x, y = event.y, "logged event lies outside the canvas");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use archive::{codec::encode_png_to_vec, entry::ArchiveEntry, EntrySink, ZipSink};
    use eventlog::RawEventWriter;
    use structures::{Palette, Raster};

    use super::*;

    fn geometry() -> CanvasGeometry {
        CanvasGeometry {
            width: 2,
            height: 2,
            tile_size: 2,
            tile_columns: 1,
            tile_count: 1,
            octant_width: 2,
            octant_height: 2,
            ..CanvasGeometry::place_2023()
        }
    }

    fn store(frames: &[(i64, &Raster)]) -> SnapshotStore<Cursor<Vec<u8>>> {
        let mut sink = ZipSink::new(Cursor::new(Vec::new()));
        for (ts, raster) in frames {
            let name = format!("{}-0.png", ts);
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

    fn log(events: &[(u32, u16, u16, u8)]) -> RawEventReader<Cursor<Vec<u8>>> {
        let geometry = geometry();
        let mut log = RawEventWriter::new(Vec::new());
        log.start(1_000).unwrap();
        for &(time_offset, x, y, index) in events {
            log.push(&PixelEvent {
                time_offset,
                x,
                y,
                new_color: geometry.encode_color(index),
                old_color: geometry.untouched_code(),
            })
            .unwrap();
        }
        RawEventReader::open(Cursor::new(log.finish().unwrap())).unwrap()
    }

    fn frame(pixels: [u8; 4]) -> Raster {
        Raster::from_pixels(2, 2, Palette::place(), pixels.to_vec()).unwrap()
    }

    #[test]
    fn agreeing_log_has_no_mismatches() {
        let store = store(&[
            (1_000, &frame([5, 32, 32, 32])),
            (1_200, &frame([5, 7, 32, 9])),
        ]);
        let events = log(&[(0, 0, 0, 5), (100, 1, 0, 7), (200, 1, 1, 9), (900, 0, 1, 4)]);

        let summary = reconcile(&store, &geometry(), events, ReplayOptions::default()).unwrap();
        assert_eq!(summary.snapshots, 2);
        // the event at +900 is later than every snapshot
        assert_eq!(summary.events_applied, 3);
        assert_eq!(summary.mismatched_snapshots, 0);
    }

    #[test]
    fn missing_events_are_counted() {
        let store = store(&[
            (1_000, &frame([5, 32, 32, 32])),
            (1_200, &frame([5, 7, 8, 9])),
        ]);
        let events = log(&[(0, 0, 0, 5), (100, 1, 0, 7)]);

        let summary = reconcile(&store, &geometry(), events, ReplayOptions::default()).unwrap();
        assert_eq!(summary.mismatched_snapshots, 1);
        assert_eq!(summary.mismatched_pixels, 2);
    }
}
