use std::{
    io::{Read, Seek},
    time::{Duration, Instant},
};

use archive::SnapshotStore;
use structures::{CanvasGeometry, Palette, Raster, SnapshotKey, TileClip};
use tracing::{info, warn};

use crate::{human_time, Composite, ReplayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Copy every snapshot into the composite.
    Overwrite,
    /// Compare each snapshot with the composite first and report
    /// differences, then copy it in.
    Validate,
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Reconstructions slower than this are logged.
    pub slow_decode: Duration,
    /// Snapshots changing more pixels than this are logged.
    pub burst_events: usize,
    pub progress_every: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions {
            slow_decode: Duration::from_millis(20),
            burst_events: 10_000,
            progress_every: 128,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    pub skipped: usize,
    pub changed_pixels: u64,
    pub mismatched_snapshots: usize,
    pub mismatched_pixels: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub changed: usize,
    pub mismatched: usize,
    pub decode_time: Duration,
    /// Where the snapshot landed on the composite.
    pub region: TileClip,
}

/// Walks snapshots in time order, keeping one composite canvas up to date.
pub struct ReplayEngine<'s, R: Read + Seek> {
    store: &'s SnapshotStore<R>,
    composite: Composite,
    mode: ReplayMode,
    options: ReplayOptions,
    last_time: Option<i64>,
    palette: Option<Palette>,
    stats: ReplayStats,
}

impl<'s, R: Read + Seek> ReplayEngine<'s, R> {
    pub fn new(
        store: &'s SnapshotStore<R>,
        geometry: CanvasGeometry,
        mode: ReplayMode,
        options: ReplayOptions,
    ) -> Result<Self, ReplayError> {
        geometry.validate()?;
        Ok(ReplayEngine {
            store,
            composite: Composite::new(geometry),
            mode,
            options,
            last_time: None,
            palette: None,
            stats: ReplayStats::default(),
        })
    }

    pub fn composite(&self) -> &Composite {
        &self.composite
    }

    pub fn composite_mut(&mut self) -> &mut Composite {
        &mut self.composite
    }

    pub fn into_composite(self) -> Composite {
        self.composite
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    /// Palette of the first snapshot applied.
    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref()
    }

    /// Reconstructs one snapshot and writes it into the composite,
    /// calling `on_change(x, y, old, new)` for each pixel it changes.
    ///
    /// A snapshot whose payload cannot be read or decoded is logged and
    /// skipped (`Ok(None)`). Broken delta chains, errors raised by
    /// `on_change` and out-of-order keys end the replay.
    pub fn apply<F>(&mut self, key: SnapshotKey, on_change: F) -> Result<Option<Applied>, ReplayError>
    where
        F: FnMut(u32, u32, u8, u8) -> Result<(), ReplayError>,
    {
        if let Some(last) = self.last_time {
            if key.timestamp() < last {
                return Err(ReplayError::OutOfOrder { key, last });
            }
        }
        self.last_time = Some(key.timestamp());

        let start = Instant::now();
        let raster = match self.store.reconstruct(key) {
            Ok(raster) => raster,
            Err(err) if err.is_decode_failure() => {
                warn!(snapshot = %key, error = %err, "skipping snapshot that failed to decode");
                self.stats.skipped += 1;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let decode_time = start.elapsed();
        if decode_time > self.options.slow_decode {
            warn!(snapshot = %key, elapsed = ?decode_time, "slow decode");
        }

        let mut applied = self.apply_raster(key, &raster, on_change)?;
        applied.decode_time = decode_time;
        Ok(Some(applied))
    }

    /// Same as [`ReplayEngine::apply`] for an already reconstructed raster.
    pub fn apply_raster<F>(
        &mut self,
        key: SnapshotKey,
        raster: &Raster,
        on_change: F,
    ) -> Result<Applied, ReplayError>
    where
        F: FnMut(u32, u32, u8, u8) -> Result<(), ReplayError>,
    {
        let mismatched = match self.mode {
            ReplayMode::Overwrite => 0,
            ReplayMode::Validate => self.composite.count_mismatches(key.tile(), raster)?,
        };
        if mismatched > 0 {
            warn!(snapshot = %key, pixels = mismatched, "snapshot disagrees with composite");
            self.stats.mismatched_snapshots += 1;
            self.stats.mismatched_pixels += mismatched as u64;
        }

        let region = self.composite.clip(key.tile(), raster)?;
        let changed = self.composite.overwrite_tile(key.tile(), raster, on_change)?;
        if self.palette.is_none() {
            self.palette = Some(raster.palette().clone());
        }
        if changed > self.options.burst_events {
            warn!(snapshot = %key, changed, "unusually large change burst");
        }

        self.stats.applied += 1;
        self.stats.changed_pixels += changed as u64;
        Ok(Applied {
            changed,
            mismatched,
            decode_time: Duration::ZERO,
            region,
        })
    }

    /// Replays every snapshot in the store.
    pub fn run(&mut self) -> Result<ReplayStats, ReplayError> {
        let timeline = self.store.timeline();
        let total = timeline.len();
        for (n, key) in timeline.into_iter().enumerate() {
            self.apply(key, |_, _, _, _| Ok(()))?;
            if n % self.options.progress_every.max(1) == 0 {
                info!(
                    n,
                    total,
                    changed = self.stats.changed_pixels,
                    time = %human_time(key.timestamp()),
                    "replaying"
                );
            }
        }
        info!(stats = ?self.stats, "replay finished");
        Ok(self.stats)
    }
}
