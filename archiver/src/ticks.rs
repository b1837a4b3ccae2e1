use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, BufWriter, Read, Seek, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use archive::{
    constants::ticks_archive_name, entry::EntryName, OrderedWriter, SnapshotStore, ZipSink,
};
use structures::SnapshotKey;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::{
    build::{reconciled_delta, ZipFileWriter},
    human_time,
    producers::{into_sink, Producers},
    BuildError, FrameLocator, FrameSource,
};

#[derive(Debug, Clone)]
pub struct TicksOptions {
    /// Entries per ticks archive before starting the next one.
    pub rotate_every: usize,
    pub permits: usize,
}

impl Default for TicksOptions {
    fn default() -> Self {
        TicksOptions {
            rotate_every: 10_000,
            permits: 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicksSummary {
    pub written: usize,
    pub already_archived: usize,
    pub already_stored: usize,
    pub no_base: usize,
    pub archives: Vec<PathBuf>,
}

/// Appends supplementary frames to numbered ticks archives in `data_dir`,
/// each stored as a delta over the nearest snapshot in `store`.
pub async fn write_ticks<R, S>(
    store: Arc<SnapshotStore<R>>,
    frames: Vec<FrameLocator>,
    source: Arc<S>,
    data_dir: &Path,
    options: &TicksOptions,
) -> Result<TicksSummary, BuildError>
where
    R: Read + Seek + Send + 'static,
    S: FrameSource + 'static,
{
    let (next_index, archived) = existing_ticks(data_dir)?;
    let mut run = TickRun {
        data_dir,
        rotate_every: options.rotate_every.max(1),
        producers: Producers::new(options.permits),
        current: None,
        next_index,
        archived,
        summary: TicksSummary::default(),
    };

    let dispatched = run.dispatch(&store, &source, frames).await;
    let finished = run.rotate().await;
    dispatched.and(finished)?;

    info!(summary = ?run.summary, "ticks written");
    Ok(run.summary)
}

/// Index of the next free ticks archive, plus every key already archived.
fn existing_ticks(data_dir: &Path) -> Result<(usize, HashSet<SnapshotKey>), BuildError> {
    let mut archived = HashSet::new();
    let mut index = 0;
    loop {
        let path = data_dir.join(ticks_archive_name(index));
        if !path.exists() {
            break;
        }
        let archive = ZipArchive::new(BufReader::new(File::open(&path)?))
            .map_err(archive::ArchiveError::from)?;
        for name in archive.file_names() {
            let entry: EntryName = name.parse()?;
            archived.insert(entry.key());
        }
        debug!(path = %path.display(), "found ticks archive");
        index += 1;
    }
    Ok((index, archived))
}

struct TickArchive {
    path: PathBuf,
    temp: NamedTempFile,
    writer: Arc<ZipFileWriter>,
    entries: usize,
}

impl TickArchive {
    fn create(data_dir: &Path, index: usize) -> Result<Self, BuildError> {
        let name = ticks_archive_name(index);
        let temp = tempfile::Builder::new()
            .prefix(&name)
            .suffix(".tmp")
            .tempfile_in(data_dir)?;
        let sink = ZipSink::new(BufWriter::new(temp.reopen()?));
        info!(archive = %name, "started ticks archive");
        Ok(TickArchive {
            path: data_dir.join(name),
            temp,
            writer: Arc::new(OrderedWriter::new(sink)),
            entries: 0,
        })
    }

    /// Only valid once every producer writing to this archive has drained.
    fn persist(self) -> Result<PathBuf, BuildError> {
        let sink = into_sink(self.writer)?;
        let mut out = sink.finish()?;
        out.flush()?;
        drop(out);
        self.temp
            .persist(&self.path)
            .map_err(|err| BuildError::Io(err.error))?;
        Ok(self.path)
    }
}

struct TickRun<'a> {
    data_dir: &'a Path,
    rotate_every: usize,
    producers: Producers,
    current: Option<TickArchive>,
    next_index: usize,
    archived: HashSet<SnapshotKey>,
    summary: TicksSummary,
}

impl TickRun<'_> {
    async fn dispatch<R, S>(
        &mut self,
        store: &Arc<SnapshotStore<R>>,
        source: &Arc<S>,
        frames: Vec<FrameLocator>,
    ) -> Result<(), BuildError>
    where
        R: Read + Seek + Send + 'static,
        S: FrameSource + 'static,
    {
        for frame in frames {
            if self.archived.contains(&frame.key()) {
                self.summary.already_archived += 1;
                continue;
            }
            let Some(nearest) = store.find_nearest(frame.timestamp, frame.tile).cloned() else {
                warn!(location = %frame.location, "no snapshot of this tile to delta against");
                self.summary.no_base += 1;
                continue;
            };
            if nearest.timestamp() == frame.timestamp {
                debug!(location = %frame.location, "already stored");
                self.summary.already_stored += 1;
                continue;
            }
            info!(
                location = %frame.location,
                time = %human_time(frame.timestamp),
                base = %nearest.key,
                "tick"
            );

            let base = {
                let store = Arc::clone(store);
                let key = nearest.key;
                tokio::task::spawn_blocking(move || store.reconstruct(key)).await??
            };
            let entry = EntryName::delta(
                frame.timestamp,
                frame.tile,
                nearest.timestamp(),
                nearest.base.map(SnapshotKey::timestamp),
            );

            let key = entry.key();
            let writer = self.current_writer()?;
            let source = Arc::clone(source);
            self.producers
                .spawn(&writer, move || {
                    let target = source.fetch(&frame.location)?;
                    reconciled_delta(&base, &target, &entry).map_err(BuildError::from)
                })
                .await?;
            self.archived.insert(key);
            self.summary.written += 1;

            let aborted = writer.is_aborted();
            drop(writer);
            if aborted {
                return Ok(());
            }
            if self.current.as_ref().is_some_and(|c| c.entries >= self.rotate_every) {
                self.rotate().await?;
            }
        }
        Ok(())
    }

    fn current_writer(&mut self) -> Result<Arc<ZipFileWriter>, BuildError> {
        let archive = match self.current.take() {
            Some(archive) => archive,
            None => {
                let archive = TickArchive::create(self.data_dir, self.next_index)?;
                self.next_index += 1;
                archive
            }
        };
        let archive = self.current.insert(archive);
        archive.entries += 1;
        Ok(Arc::clone(&archive.writer))
    }

    /// Drains all producers, then renames the current archive into place.
    async fn rotate(&mut self) -> Result<(), BuildError> {
        self.producers.drain().await?;
        if let Some(archive) = self.current.take() {
            let path = archive.persist()?;
            info!(path = %path.display(), "finished ticks archive");
            self.summary.archives.push(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use archive::{
        codec::encode_png_to_vec,
        constants::{DELTA_ARCHIVE, FULL_ARCHIVE},
        entry::ArchiveEntry,
        EntrySink,
    };
    use rand::{rngs::StdRng, SeedableRng};
    use structures::Raster;

    use super::*;
    use crate::{testing::*, FileSource};

    fn write_zip(path: &Path, entries: &[(EntryName, &Raster)]) {
        let mut sink = ZipSink::new(File::create(path).unwrap());
        for (name, raster) in entries {
            let name_str = name.to_string();
            sink.commit(ArchiveEntry {
                bytes: encode_png_to_vec(raster, &name_str).unwrap(),
                name: name_str,
                timestamp_ms: name.timestamp,
            })
            .unwrap();
        }
        sink.finish().unwrap();
    }

    fn open_store(dir: &Path) -> SnapshotStore<BufReader<File>> {
        let (count, _) = existing_ticks(dir).unwrap();
        let ticks: Vec<PathBuf> = (0..count).map(|n| dir.join(ticks_archive_name(n))).collect();
        SnapshotStore::open(&dir.join(FULL_ARCHIVE), Some(&dir.join(DELTA_ARCHIVE)), &ticks, 8)
            .unwrap()
    }

    #[tokio::test]
    async fn ticks_chain_onto_nearest_snapshot_and_rotate() {
        let data = tempfile::tempdir().unwrap();
        let captures = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let full = random_raster(&mut rng, 16, 16);
        let later = evolve(&mut rng, &full, 10);
        write_zip(&data.path().join(FULL_ARCHIVE), &[(EntryName::full(T0, 0), &full)]);
        let stored_delta = Raster::compute_delta(&full, &later).unwrap();
        write_zip(
            &data.path().join(DELTA_ARCHIVE),
            &[(EntryName::delta(T0 + 100_000, 0, T0, None), &stored_delta)],
        );

        let near_full = evolve(&mut rng, &full, 5);
        let near_delta = evolve(&mut rng, &later, 5);
        let near_delta_2 = evolve(&mut rng, &near_delta, 5);
        let frames = vec![
            write_frame(captures.path(), T0 + 10_000, 0, &near_full),
            write_frame(captures.path(), T0 + 100_000, 0, &later),
            write_frame(captures.path(), T0 + 110_000, 0, &near_delta),
            write_frame(captures.path(), T0 + 120_000, 0, &near_delta_2),
        ];

        let store = Arc::new(open_store(data.path()));
        let options = TicksOptions {
            rotate_every: 2,
            permits: 2,
        };
        let summary = write_ticks(
            Arc::clone(&store),
            frames.clone(),
            Arc::new(FileSource),
            data.path(),
            &options,
        )
        .await
        .unwrap();
        assert_eq!(summary.written, 3);
        assert_eq!(summary.already_stored, 1);
        assert_eq!(
            summary.archives,
            vec![
                data.path().join(ticks_archive_name(0)),
                data.path().join(ticks_archive_name(1)),
            ]
        );

        let store = open_store(data.path());
        assert_eq!(store.len(), 5);
        let tick = store.get(0, T0 + 110_000).unwrap();
        assert_eq!(tick.base.map(|k| k.timestamp()), Some(T0 + 100_000));
        assert_eq!(tick.secondary_base.map(|k| k.timestamp()), Some(T0));
        assert_eq!(store.reconstruct(tick.key).unwrap(), near_delta);
        assert_eq!(store.reconstruct(SnapshotKey::new(0, T0 + 10_000)).unwrap(), near_full);
        assert_eq!(store.reconstruct(SnapshotKey::new(0, T0 + 120_000)).unwrap(), near_delta_2);

        // a second run finds everything archived and opens nothing new
        let again = write_ticks(Arc::new(store), frames, Arc::new(FileSource), data.path(), &options)
            .await
            .unwrap();
        assert_eq!(again.written, 0);
        assert_eq!(again.already_archived, 3);
        assert!(again.archives.is_empty());
        assert!(!data.path().join(ticks_archive_name(2)).exists());
    }
}
