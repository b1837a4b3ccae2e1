use std::io::{Read, Seek, Write};

use archive::SnapshotStore;
use eventlog::{time_offset, RawEventWriter};
use structures::{CanvasGeometry, PixelEvent};
use tracing::info;

use crate::{human_time, ReplayEngine, ReplayError, ReplayMode, ReplayOptions};

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Snapshots before this time only seed the composite; they emit nothing.
    pub start_ms: Option<i64>,
    /// Snapshots after this time end the run.
    pub end_ms: Option<i64>,
    /// Stop after emitting events for this many snapshots.
    pub max_images: Option<usize>,
    pub replay: ReplayOptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub epoch: u64,
    pub snapshots: usize,
    pub skipped: usize,
    pub events: u64,
    pub last_time_offset: u32,
}

/// Replays the store and writes one raw event per changed pixel. The log's
/// epoch is the time of the first snapshot that emits events.
pub fn extract_events<R, W>(
    store: &SnapshotStore<R>,
    geometry: &CanvasGeometry,
    options: &ExtractOptions,
    mut log: RawEventWriter<W>,
) -> Result<(ExtractSummary, W), ReplayError>
where
    R: Read + Seek,
    W: Write,
{
    let mut engine = ReplayEngine::new(
        store,
        geometry.clone(),
        ReplayMode::Overwrite,
        options.replay.clone(),
    )?;
    let mut summary = ExtractSummary::default();
    let timeline = store.timeline();
    let total = timeline.len();

    for key in timeline {
        let ts = key.timestamp();
        if options.end_ms.is_some_and(|end| ts > end) {
            break;
        }
        if options.max_images.is_some_and(|max| summary.snapshots >= max) {
            break;
        }
        if options.start_ms.is_some_and(|start| ts < start) {
            engine.apply(key, |_, _, _, _| Ok(()))?;
            continue;
        }

        let epoch = log.start(ts.max(0) as u64)?;
        let offset = time_offset(epoch, ts)?;
        let applied = engine.apply(key, |x, y, old, new| {
            log.push(&PixelEvent {
                time_offset: offset,
                x: x as u16,
                y: y as u16,
                new_color: geometry.encode_color(new),
                old_color: geometry.encode_color(old),
            })?;
            Ok(())
        })?;

        match applied {
            None => summary.skipped += 1,
            Some(_) => {
                summary.snapshots += 1;
                summary.last_time_offset = offset;
            }
        }
        if (summary.snapshots + summary.skipped) % options.replay.progress_every.max(1) == 0 {
            info!(
                snapshot = %key,
                done = summary.snapshots + summary.skipped,
                total,
                events = log.events(),
                time = %human_time(ts),
                "extracting events"
            );
        }
    }

    summary.epoch = log.start(0)?;
    summary.events = log.events();
    info!(
        snapshots = summary.snapshots,
        skipped = summary.skipped,
        events = summary.events,
        "extraction finished"
    );
    Ok((summary, log.finish()?))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use archive::{codec::encode_png_to_vec, entry::ArchiveEntry, EntrySink, ZipSink};
    use eventlog::RawEventReader;
    use structures::{Palette, Raster};

    use super::*;

    fn geometry() -> CanvasGeometry {
        CanvasGeometry {
            width: 4,
            height: 2,
            tile_size: 2,
            tile_columns: 2,
            tile_count: 2,
            octant_width: 2,
            octant_height: 2,
            color_bias: 0,
            untouched: 0,
            ..CanvasGeometry::place_2023()
        }
    }

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

    fn raster(pixels: [u8; 4]) -> Raster {
        Raster::from_pixels(2, 2, Palette::place(), pixels.to_vec()).unwrap()
    }

    fn read_all(bytes: Vec<u8>) -> (u64, Vec<PixelEvent>) {
        let reader = RawEventReader::open(Cursor::new(bytes)).unwrap();
        let epoch = reader.epoch();
        (epoch, reader.map(Result::unwrap).collect())
    }

    #[test]
    fn events_follow_snapshot_then_scan_order() {
        let a = raster([0, 5, 0, 0]);
        let b = raster([2, 0, 0, 3]);
        let a2 = raster([0, 6, 0, 0]);
        let store = store(&[(0, 1_000, &a), (1, 1_000, &b), (0, 1_500, &a2)]);

        let (summary, bytes) = extract_events(
            &store,
            &geometry(),
            &ExtractOptions::default(),
            RawEventWriter::new(Vec::new()),
        )
        .unwrap();
        assert_eq!(summary.snapshots, 3);
        assert_eq!(summary.events, 4);
        assert_eq!(summary.epoch, 1_000);

        let (epoch, events) = read_all(bytes);
        assert_eq!(epoch, 1_000);
        let simple: Vec<_> = events
            .iter()
            .map(|e| (e.time_offset, e.x, e.y, e.new_color, e.old_color))
            .collect();
        assert_eq!(
            simple,
            vec![(0, 1, 0, 5, 0), (0, 2, 0, 2, 0), (0, 3, 1, 3, 0), (500, 1, 0, 6, 5)]
        );
    }

    #[test]
    fn window_and_limit() {
        let a = raster([1, 1, 1, 1]);
        let b = raster([2, 1, 1, 1]);
        let c = raster([2, 2, 1, 1]);
        let d = raster([2, 2, 2, 1]);
        let store = store(&[(0, 100, &a), (0, 200, &b), (0, 300, &c), (0, 400, &d)]);

        let options = ExtractOptions {
            start_ms: Some(200),
            max_images: Some(2),
            ..Default::default()
        };
        let (summary, bytes) =
            extract_events(&store, &geometry(), &options, RawEventWriter::new(Vec::new())).unwrap();
        assert_eq!(summary.snapshots, 2);

        let (epoch, events) = read_all(bytes);
        assert_eq!(epoch, 200);
        // the seeded snapshot at 100 shows up as the old color
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].x, events[0].old_color, events[0].new_color), (0, 1, 2));
        assert_eq!((events[1].time_offset, events[1].x), (100, 1));
    }

    #[test]
    fn empty_run_writes_a_zero_epoch() {
        let store = store(&[]);
        let (summary, bytes) = extract_events(
            &store,
            &geometry(),
            &ExtractOptions::default(),
            RawEventWriter::new(Vec::new()),
        )
        .unwrap();
        assert_eq!(summary.events, 0);
        assert_eq!(read_all(bytes), (0, vec![]));
    }
}
