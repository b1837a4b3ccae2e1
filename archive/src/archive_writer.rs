use std::{
    io::{Seek, Write},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Datelike, Timelike};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::{entry::ArchiveEntry, ArchiveError};

/// Destination of committed payloads, written strictly one at a time.
pub trait EntrySink {
    type Entry;

    fn commit(&mut self, entry: Self::Entry) -> Result<(), ArchiveError>;
}

impl<T> EntrySink for Vec<T> {
    type Entry = T;

    fn commit(&mut self, entry: T) -> Result<(), ArchiveError> {
        self.push(entry);
        Ok(())
    }
}

pub struct ZipSink<W: Write + Seek> {
    zip: ZipWriter<W>,
    entries: usize,
}

impl<W: Write + Seek> ZipSink<W> {
    pub fn new(dest: W) -> Self {
        ZipSink {
            zip: ZipWriter::new(dest),
            entries: 0,
        }
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Writes the central directory and hands back the destination.
    pub fn finish(mut self) -> Result<W, ArchiveError> {
        Ok(self.zip.finish()?)
    }
}

impl<W: Write + Seek> EntrySink for ZipSink<W> {
    type Entry = ArchiveEntry;

    fn commit(&mut self, entry: ArchiveEntry) -> Result<(), ArchiveError> {
        // PNG payloads are already deflated
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(zip_time(entry.timestamp_ms));
        self.zip.start_file(entry.name.as_str(), options)?;
        self.zip.write_all(&entry.bytes)?;
        self.entries += 1;
        Ok(())
    }
}

fn zip_time(timestamp_ms: i64) -> zip::DateTime {
    DateTime::from_timestamp_millis(timestamp_ms)
        .and_then(|t| {
            zip::DateTime::from_date_and_time(
                u16::try_from(t.year()).ok()?,
                t.month() as u8,
                t.day() as u8,
                t.hour() as u8,
                t.minute() as u8,
                t.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

struct OrderedState<S> {
    sink: S,
    next: u64,
    aborted: Option<String>,
}

/// Serializes payloads computed by parallel producers into one sink, in the
/// order their sequence numbers were handed out.
///
/// A producer takes a number with [`OrderedWriter::next_sequence`] when it is
/// dispatched, computes its payload independently, then calls
/// [`OrderedWriter::add`], which blocks until every lower number has been
/// committed. A producer that fails must call [`OrderedWriter::abort`] so the
/// ones queued behind it are released instead of waiting forever; entries
/// committed before the abort stay in the sink.
pub struct OrderedWriter<S: EntrySink> {
    state: Mutex<OrderedState<S>>,
    turn: Condvar,
    dispatched: AtomicU64,
}

impl<S: EntrySink> OrderedWriter<S> {
    pub fn new(sink: S) -> Self {
        OrderedWriter {
            state: Mutex::new(OrderedState {
                sink,
                next: 0,
                aborted: None,
            }),
            turn: Condvar::new(),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.dispatched.fetch_add(1, Ordering::SeqCst)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> u64 {
        self.state.lock().next
    }

    pub fn add(&self, sequence: u64, entry: S::Entry) -> Result<(), ArchiveError> {
        let mut state = self.state.lock();
        while state.next != sequence && state.aborted.is_none() {
            self.turn.wait(&mut state);
        }
        if let Some(reason) = &state.aborted {
            return Err(ArchiveError::Aborted(reason.clone()));
        }

        let result = state.sink.commit(entry);
        match &result {
            Ok(()) => {
                state.next += 1;
                debug!(sequence, "committed entry");
            }
            Err(err) => {
                error!(sequence, error = %err, "commit failed");
                state.aborted = Some(err.to_string());
            }
        }
        drop(state);
        self.turn.notify_all();
        result
    }

    pub fn abort(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.aborted.is_none() {
            state.aborted = Some(reason.into());
        }
        drop(state);
        self.turn.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted.is_some()
    }

    /// Returns the sink once no producer holds a reference any more.
    pub fn into_inner(self) -> Result<S, ArchiveError> {
        let state = self.state.into_inner();
        match state.aborted {
            Some(reason) => Err(ArchiveError::Aborted(reason)),
            None => Ok(state.sink),
        }
    }
}
