use structures::{RasterError, SnapshotKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("could not decode {entry}: {source}")]
    Decode {
        entry: String,
        #[source]
        source: png::DecodingError,
    },

    #[error("could not encode {entry}: {source}")]
    Encode {
        entry: String,
        #[source]
        source: png::EncodingError,
    },

    #[error("{entry} is not an indexed-color PNG")]
    NotIndexed { entry: String },

    #[error("{entry} decoded to an unusable raster: {source}")]
    BadRaster {
        entry: String,
        #[source]
        source: RasterError,
    },

    #[error("malformed entry name {name:?}: {reason}")]
    MalformedEntryName { name: String, reason: String },

    #[error("no snapshot {0}")]
    NotFound(SnapshotKey),

    #[error("invariant violated reconstructing {key}: {source}")]
    Invariant {
        key: SnapshotKey,
        #[source]
        source: RasterError,
    },

    #[error("delta chain for {0} is too deep")]
    ChainTooDeep(SnapshotKey),

    #[error("reconciliation failed for {entry}")]
    ReconciliationFailed { entry: String },

    #[error("ordered writer aborted: {0}")]
    Aborted(String),
}

impl ArchiveError {
    pub fn malformed(name: &str, reason: impl Into<String>) -> Self {
        ArchiveError::MalformedEntryName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True when a single stored payload could not be read or decoded.
    /// Every other error means the archives break a structural rule.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            ArchiveError::Io(_)
                | ArchiveError::Zip(_)
                | ArchiveError::Decode { .. }
                | ArchiveError::NotIndexed { .. }
                | ArchiveError::BadRaster { .. }
        )
    }
}
