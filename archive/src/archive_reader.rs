use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read, Seek},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use structures::{Raster, RasterError, SnapshotKey, MAX_TILES};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::{
    cache::FifoCache,
    codec::decode_png,
    constants::MAX_CHAIN_DEPTH,
    entry::{EntryName, SnapshotRecord},
    ArchiveError,
};

/// Index over one or more snapshot archives, able to rebuild any frame by
/// resolving its chain of delta bases.
pub struct SnapshotStore<R: Read + Seek> {
    records: HashMap<SnapshotKey, SnapshotRecord>,
    tiles: Vec<Vec<SnapshotKey>>,
    inner: Mutex<StoreInner<R>>,
}

struct StoreInner<R: Read + Seek> {
    sources: Vec<ZipArchive<R>>,
    cache: FifoCache<SnapshotKey, Arc<Raster>>,
    stats: CacheStats,
}

/// Counters over every payload the store has touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Payloads decoded from an archive.
    pub decodes: u64,
    /// Bases served from the cache without decoding.
    pub hits: u64,
}

impl SnapshotStore<BufReader<File>> {
    /// Opens the full-frame archive plus optional delta and ticks archives.
    /// When two archives hold the same key, the later one in the order
    /// full, ticks, delta wins.
    pub fn open(
        full: &Path,
        delta: Option<&Path>,
        ticks: &[PathBuf],
        cache_capacity: usize,
    ) -> Result<Self, ArchiveError> {
        let mut paths = vec![full];
        paths.extend(ticks.iter().map(PathBuf::as_path));
        paths.extend(delta);

        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            debug!(path = %path.display(), "opening snapshot archive");
            sources.push(BufReader::new(File::open(path)?));
        }
        Self::from_sources(sources, cache_capacity)
    }
}

impl<R: Read + Seek> SnapshotStore<R> {
    pub fn from_sources(sources: Vec<R>, cache_capacity: usize) -> Result<Self, ArchiveError> {
        let mut archives = Vec::with_capacity(sources.len());
        let mut records: HashMap<SnapshotKey, SnapshotRecord> = HashMap::new();

        for (source, reader) in sources.into_iter().enumerate() {
            let mut archive = ZipArchive::new(reader)?;
            for i in 0..archive.len() {
                let file = archive.by_index_raw(i)?;
                if file.is_dir() {
                    continue;
                }
                let name: EntryName = file.name().parse()?;
                let record = SnapshotRecord {
                    key: name.key(),
                    source,
                    entry_name: file.name().to_string(),
                    base: name.base_key(),
                    secondary_base: name.secondary_base_key(),
                };
                if let Some(replaced) = records.insert(record.key, record) {
                    debug!(entry = %replaced.entry_name, "snapshot superseded by a later source");
                }
            }
            archives.push(archive);
        }

        let orphans = prune_orphans(&mut records);
        if orphans > 0 {
            warn!(orphans, "ignored deltas missing predecessors");
        }

        let mut tiles = vec![Vec::new(); MAX_TILES as usize];
        for key in records.keys() {
            tiles[key.tile() as usize].push(*key);
        }
        for timeline in &mut tiles {
            timeline.sort_unstable();
        }

        info!(snapshots = records.len(), "indexed snapshot archives");

        Ok(SnapshotStore {
            records,
            tiles,
            inner: Mutex::new(StoreInner {
                sources: archives,
                cache: FifoCache::new(cache_capacity),
                stats: CacheStats::default(),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, key: SnapshotKey) -> Option<&SnapshotRecord> {
        self.records.get(&key)
    }

    /// Exact lookup by tile and timestamp.
    pub fn get(&self, tile: u8, timestamp: i64) -> Option<&SnapshotRecord> {
        if tile >= MAX_TILES {
            return None;
        }
        self.records.get(&SnapshotKey::new(tile, timestamp))
    }

    /// Time-sorted records of one tile.
    pub fn tile_records(&self, tile: u8) -> impl Iterator<Item = &SnapshotRecord> + '_ {
        self.tiles
            .get(tile as usize)
            .into_iter()
            .flatten()
            .filter_map(|key| self.records.get(key))
    }

    /// Every snapshot key across all tiles in ascending time order, tile
    /// breaking ties.
    pub fn timeline(&self) -> Vec<SnapshotKey> {
        let mut keys: Vec<SnapshotKey> = self.records.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Record closest in time to `timestamp`; on an exact tie the earlier
    /// record wins.
    pub fn find_nearest(&self, timestamp: i64, tile: u8) -> Option<&SnapshotRecord> {
        let timeline = self.tiles.get(tile as usize)?;
        if timeline.is_empty() {
            return None;
        }
        let mut ind = timeline.partition_point(|k| k.timestamp() <= timestamp);
        if ind == timeline.len() {
            ind -= 1;
        }
        if ind > 0
            && timestamp - timeline[ind - 1].timestamp() <= timeline[ind].timestamp() - timestamp
        {
            ind -= 1;
        }
        self.records.get(&timeline[ind])
    }

    /// Last record at or before `timestamp`.
    pub fn find_nearest_at_or_before(&self, timestamp: i64, tile: u8) -> Option<&SnapshotRecord> {
        let timeline = self.tiles.get(tile as usize)?;
        let ind = timeline.partition_point(|k| k.timestamp() <= timestamp);
        if ind == 0 {
            return None;
        }
        self.records.get(&timeline[ind - 1])
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Raw payload bytes of one entry, as stored.
    pub fn read_entry(&self, key: SnapshotKey) -> Result<Vec<u8>, ArchiveError> {
        let record = self.records.get(&key).ok_or(ArchiveError::NotFound(key))?;
        let mut inner = self.inner.lock();
        let mut file = inner.sources[record.source].by_name(&record.entry_name)?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Rebuilds the full raster of a snapshot. The requested entry itself is
    /// always decoded afresh; only the bases it rests on come from the cache.
    pub fn reconstruct(&self, key: SnapshotKey) -> Result<Raster, ArchiveError> {
        let record = self.records.get(&key).ok_or(ArchiveError::NotFound(key))?;
        let mut inner = self.inner.lock();

        let raster = inner.decode(record)?;
        match self.resolve_base_of(&mut inner, record, 1)? {
            None => Ok(raster),
            Some(base) => apply(key, &base, &raster),
        }
    }

    /// Fully composed raster of a snapshot used as a base.
    fn resolve(
        &self,
        inner: &mut StoreInner<R>,
        key: SnapshotKey,
        depth: usize,
    ) -> Result<Raster, ArchiveError> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(ArchiveError::ChainTooDeep(key));
        }
        let record = self.records.get(&key).ok_or(ArchiveError::NotFound(key))?;
        let raw = inner.cached(record)?;
        match self.resolve_base_of(inner, record, depth)? {
            None => Ok(Raster::clone(&raw)),
            Some(base) => apply(key, &base, &raw),
        }
    }

    fn resolve_base_of(
        &self,
        inner: &mut StoreInner<R>,
        record: &SnapshotRecord,
        depth: usize,
    ) -> Result<Option<Raster>, ArchiveError> {
        let Some(base_key) = record.base else {
            return Ok(None);
        };

        let base = match record.secondary_base {
            // the base is itself a delta over the secondary base
            Some(secondary_key) => {
                let under = self.resolve(inner, secondary_key, depth + 1)?;
                let base_record = self
                    .records
                    .get(&base_key)
                    .ok_or(ArchiveError::NotFound(base_key))?;
                let raw = inner.cached(base_record)?;
                apply(base_key, &under, &raw)?
            }
            None => self.resolve(inner, base_key, depth + 1)?,
        };
        Ok(Some(base))
    }
}

impl<R: Read + Seek> StoreInner<R> {
    fn decode(&mut self, record: &SnapshotRecord) -> Result<Raster, ArchiveError> {
        let file = self.sources[record.source].by_name(&record.entry_name)?;
        self.stats.decodes += 1;
        decode_png(file, &record.entry_name)
    }

    fn cached(&mut self, record: &SnapshotRecord) -> Result<Arc<Raster>, ArchiveError> {
        if let Some(raster) = self.cache.get(&record.key) {
            self.stats.hits += 1;
            return Ok(Arc::clone(raster));
        }
        let raster = Arc::new(self.decode(record)?);
        self.cache.insert(record.key, Arc::clone(&raster));
        Ok(raster)
    }
}

fn apply(key: SnapshotKey, base: &Raster, delta: &Raster) -> Result<Raster, ArchiveError> {
    Raster::apply_delta(base, delta).map_err(|source: RasterError| ArchiveError::Invariant { key, source })
}

/// Drops deltas whose base chain cannot be satisfied, returning how many.
fn prune_orphans(records: &mut HashMap<SnapshotKey, SnapshotRecord>) -> usize {
    let mut pruned = 0;
    loop {
        let orphans: Vec<SnapshotKey> = records
            .values()
            .filter(|r| {
                r.base.is_some_and(|b| !records.contains_key(&b))
                    || r.secondary_base.is_some_and(|b| !records.contains_key(&b))
            })
            .map(|r| r.key)
            .collect();
        if orphans.is_empty() {
            return pruned;
        }
        pruned += orphans.len();
        for key in orphans {
            records.remove(&key);
        }
    }
}
