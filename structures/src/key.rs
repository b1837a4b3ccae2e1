use std::fmt;

/// Tiles are packed into the low four bits of a [`SnapshotKey`].
pub const MAX_TILES: u8 = 16;

/// A `(tile, timestamp)` pair packed as `timestamp * 16 + tile`, so ordering
/// keys orders by time first and tile second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotKey(i64);

impl SnapshotKey {
    pub fn new(tile: u8, timestamp_ms: i64) -> Self {
        debug_assert!(tile < MAX_TILES, "tile {} does not fit in a key", tile);
        SnapshotKey(timestamp_ms * 16 + i64::from(tile & 15))
    }

    pub fn tile(self) -> u8 {
        (self.0 & 15) as u8
    }

    pub fn timestamp(self) -> i64 {
        self.0.div_euclid(16)
    }

    pub fn packed(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp(), self.tile())
    }
}
