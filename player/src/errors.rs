use archive::ArchiveError;
use eventlog::EventLogError;
use structures::{RasterError, SnapshotKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error("invalid canvas geometry: {0}")]
    Geometry(#[from] RasterError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot {key} is older than the last applied time {last}")]
    OutOfOrder { key: SnapshotKey, last: i64 },

    #[error("tile {0} has no place on the canvas")]
    TileOutsideCanvas(u8),
}
