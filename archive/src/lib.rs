mod archive_reader;
mod archive_writer;
mod cache;
pub mod codec;
pub mod constants;
mod errors;
pub mod entry;

pub use crate::archive_reader::{CacheStats, SnapshotStore};
pub use crate::archive_writer::{EntrySink, OrderedWriter, ZipSink};
pub use crate::cache::FifoCache;
pub use crate::errors::ArchiveError;
