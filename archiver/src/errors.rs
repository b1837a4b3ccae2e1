use archive::ArchiveError;
use thiserror::Error;

/// Failure to obtain one captured frame.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Worth trying again later: the frame exists but could not be read now.
    #[error("transient failure fetching {locator}: {reason}")]
    Transient { locator: String, reason: String },

    #[error("cannot fetch {locator}: {reason}")]
    Permanent { locator: String, reason: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame name {name:?} is not {{ts}}-{{tile}}...: {reason}")]
    FrameName { name: String, reason: String },

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("admission gate closed")]
    GateClosed(#[from] tokio::sync::AcquireError),

    #[error("output archive still referenced after drain")]
    WriterShared,
}

impl BuildError {
    /// Errors that only report another producer's failure.
    pub(crate) fn is_secondary(&self) -> bool {
        matches!(self, BuildError::Archive(ArchiveError::Aborted(_)))
    }
}
