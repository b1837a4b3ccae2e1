use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufWriter, Cursor, Write},
    path::Path,
    sync::Arc,
};

use archive::{
    codec::{content_hash, decode_png, encode_png_to_vec},
    constants::{DELTA_ARCHIVE, FULL_ARCHIVE},
    entry::{ArchiveEntry, EntryName},
    ArchiveError, OrderedWriter, ZipSink,
};
use structures::Raster;
use tracing::{debug, info};

use crate::{
    human_time,
    producers::{into_sink, Producers},
    BuildError, FrameLocator, FrameScan, FrameSource,
};

pub type ZipFileWriter = OrderedWriter<ZipSink<BufWriter<File>>>;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Spacing of the query times that pick full base frames.
    pub base_interval_ms: i64,
    /// Producers allowed in flight at once.
    pub permits: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            base_interval_ms: 120_000,
            permits: 64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub frames: usize,
    pub input_bytes: u64,
    pub full_entries: usize,
    pub delta_entries: usize,
    pub full_bytes: u64,
    pub delta_bytes: u64,
}

/// Packs a directory of captured frames into a full-frame archive and a
/// delta archive in `out_dir`.
pub async fn build_archives<S: FrameSource + 'static>(
    scan: FrameScan,
    source: Arc<S>,
    out_dir: &Path,
    options: &BuildOptions,
) -> Result<BuildSummary, BuildError> {
    let full_path = out_dir.join(FULL_ARCHIVE);
    let delta_path = out_dir.join(DELTA_ARCHIVE);
    let full = Arc::new(OrderedWriter::new(ZipSink::new(BufWriter::new(File::create(
        &full_path,
    )?))));
    let delta = Arc::new(OrderedWriter::new(ZipSink::new(BufWriter::new(File::create(
        &delta_path,
    )?))));

    let mut producers = Producers::new(options.permits);
    let dispatched = dispatch(&scan.frames, &source, &full, &delta, &mut producers, options).await;
    // archives are only finalised once every producer has drained
    let drained = producers.drain().await;
    dispatched.and(drained)?;

    let full_entries = finish_zip(full)?;
    let delta_entries = finish_zip(delta)?;

    let summary = BuildSummary {
        frames: scan.frames.len(),
        input_bytes: scan.bytes,
        full_entries,
        delta_entries,
        full_bytes: fs::metadata(&full_path)?.len(),
        delta_bytes: fs::metadata(&delta_path)?.len(),
    };
    info!(?summary, "archives written");
    Ok(summary)
}

async fn dispatch<S: FrameSource + 'static>(
    frames: &[FrameLocator],
    source: &Arc<S>,
    full: &Arc<ZipFileWriter>,
    delta: &Arc<ZipFileWriter>,
    producers: &mut Producers,
    options: &BuildOptions,
) -> Result<(), BuildError> {
    let mut tiles: BTreeMap<u8, Vec<&FrameLocator>> = BTreeMap::new();
    for frame in frames {
        tiles.entry(frame.tile).or_default().push(frame);
    }

    for (tile, mut frames) in tiles {
        frames.sort_by_key(|frame| frame.timestamp);
        frames.dedup_by_key(|frame| frame.timestamp);
        let times: Vec<i64> = frames.iter().map(|frame| frame.timestamp).collect();

        let mut bases: Vec<(i64, Arc<Raster>)> = Vec::new();
        for ind in select_bases(&times, options.base_interval_ms) {
            let frame = frames[ind].clone();
            let raster = Arc::new(fetch(source, &frame.location).await?);
            info!(tile, ts = frame.timestamp, time = %human_time(frame.timestamp), "base frame");

            bases.push((frame.timestamp, Arc::clone(&raster)));
            producers
                .spawn(full, move || {
                    let name = EntryName::full(frame.timestamp, tile).to_string();
                    let bytes = encode_png_to_vec(&raster, &name)?;
                    Ok(ArchiveEntry {
                        name,
                        timestamp_ms: frame.timestamp,
                        bytes,
                    })
                })
                .await?;
        }

        let base_times: Vec<i64> = bases.iter().map(|(ts, _)| *ts).collect();
        for frame in frames {
            let Some(ind) = nearest_base(&base_times, frame.timestamp) else {
                continue;
            };
            let (base_ts, base) = &bases[ind];
            if *base_ts == frame.timestamp {
                continue;
            }
            debug!(tile, ts = frame.timestamp, base = base_ts, "delta frame");

            let entry = EntryName::delta(frame.timestamp, tile, *base_ts, None);
            let base = Arc::clone(base);
            let source = Arc::clone(source);
            let location = frame.location.clone();
            producers
                .spawn(delta, move || {
                    let target = source.fetch(&location)?;
                    reconciled_delta(&base, &target, &entry).map_err(BuildError::from)
                })
                .await?;

            if full.is_aborted() || delta.is_aborted() {
                return Ok(());
            }
        }
    }
    Ok(())
}

pub(crate) async fn fetch<S: FrameSource + 'static>(
    source: &Arc<S>,
    location: &str,
) -> Result<Raster, BuildError> {
    let source = Arc::clone(source);
    let location = location.to_string();
    Ok(tokio::task::spawn_blocking(move || source.fetch(&location)).await??)
}

/// Indices of the frames used as full bases: for each query time from the
/// first frame on, the last frame at or before it, skipping repeats.
pub fn select_bases(times: &[i64], interval_ms: i64) -> Vec<usize> {
    let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
        return Vec::new();
    };
    let interval = interval_ms.max(1);

    let mut picked: Vec<usize> = Vec::new();
    let mut query = first;
    while query <= last {
        let ind = times.partition_point(|&ts| ts <= query) - 1;
        if picked.last() != Some(&ind) {
            picked.push(ind);
        }
        query += interval;
    }
    picked
}

/// Base closest to `ts`, which may lie after it; ties go to the earlier base.
pub fn nearest_base(base_times: &[i64], ts: i64) -> Option<usize> {
    if base_times.is_empty() {
        return None;
    }
    let mut ind = base_times.partition_point(|&base| base < ts);
    if ind == base_times.len() {
        ind -= 1;
    }
    if ind > 0 && ts - base_times[ind - 1] <= base_times[ind] - ts {
        ind -= 1;
    }
    Some(ind)
}

/// Encodes `target` as a delta over `base` and checks, before anything is
/// committed, that the stored payload rebuilds `target` exactly.
pub(crate) fn reconciled_delta(
    base: &Raster,
    target: &Raster,
    entry: &EntryName,
) -> Result<ArchiveEntry, ArchiveError> {
    let name = entry.to_string();
    let invariant = |source| ArchiveError::Invariant {
        key: entry.key(),
        source,
    };

    let delta = Raster::compute_delta(base, target).map_err(invariant)?;
    let bytes = encode_png_to_vec(&delta, &name)?;

    let stored = decode_png(Cursor::new(&bytes), &name)?;
    let rebuilt = Raster::apply_delta(base, &stored).map_err(invariant)?;
    if content_hash(&rebuilt) != content_hash(target) {
        return Err(ArchiveError::ReconciliationFailed { entry: name });
    }

    Ok(ArchiveEntry {
        name,
        timestamp_ms: entry.timestamp,
        bytes,
    })
}

fn finish_zip(writer: Arc<ZipFileWriter>) -> Result<usize, BuildError> {
    let sink = into_sink(writer)?;
    let entries = sink.entries();
    let mut out = sink.finish()?;
    out.flush()?;
    Ok(entries)
}
