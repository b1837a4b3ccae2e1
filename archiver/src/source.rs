use std::{
    fs::File,
    io::{self, BufReader},
    thread,
    time::Duration,
};

use archive::{codec::decode_png, ArchiveError};
use structures::Raster;
use tracing::warn;

use crate::FetchError;

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Somewhere captured frames can be loaded from. Called from blocking
/// worker threads.
pub trait FrameSource: Send + Sync {
    fn fetch(&self, location: &str) -> Result<Raster, FetchError>;
}

/// Frames stored as indexed PNG files on local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSource;

impl FrameSource for FileSource {
    fn fetch(&self, location: &str) -> Result<Raster, FetchError> {
        let file = File::open(location).map_err(|err| io_error(location, err))?;
        decode_png(BufReader::new(file), location).map_err(|err| match err {
            ArchiveError::Io(err) => io_error(location, err),
            other => FetchError::Permanent {
                locator: location.to_string(),
                reason: other.to_string(),
            },
        })
    }
}

fn io_error(location: &str, err: io::Error) -> FetchError {
    let locator = location.to_string();
    let reason = err.to_string();
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            FetchError::Transient { locator, reason }
        }
        _ => FetchError::Permanent { locator, reason },
    }
}

/// Retries transient failures of the wrapped source forever, sleeping a
/// fixed backoff between attempts. Permanent failures pass through.
pub struct Retrying<S> {
    inner: S,
    backoff: Duration,
}

impl<S: FrameSource> Retrying<S> {
    pub fn new(inner: S) -> Self {
        Self::with_backoff(inner, DEFAULT_RETRY_BACKOFF)
    }

    pub fn with_backoff(inner: S, backoff: Duration) -> Self {
        Retrying { inner, backoff }
    }
}

impl<S: FrameSource> FrameSource for Retrying<S> {
    fn fetch(&self, location: &str) -> Result<Raster, FetchError> {
        let mut attempt = 1u64;
        loop {
            match self.inner.fetch(location) {
                Err(err) if err.is_transient() => {
                    warn!(location, attempt, error = %err, backoff = ?self.backoff, "retrying fetch");
                    thread::sleep(self.backoff);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
