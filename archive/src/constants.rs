pub const FULL_ARCHIVE: &str = "canvas_full.zip";
pub const DELTA_ARCHIVE: &str = "canvas_delta.zip";

/// Ticks archives are numbered `canvas_ticks.00000.zip`, `canvas_ticks.00001.zip`, ...
pub fn ticks_archive_name(n: usize) -> String {
    format!("canvas_ticks.{:05}.zip", n)
}

pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Deepest base chain a snapshot may reference before the store gives up.
pub const MAX_CHAIN_DEPTH: usize = 4;
