//! The raw event log: `PIXELPAK`, a little-endian epoch in milliseconds,
//! then one fixed 8-byte record per changed pixel in time order.

use std::io::{self, Read, Write};

use structures::{PixelEvent, MAX_TIME_OFFSET, RECORD_LEN};

use crate::EventLogError;

pub const RAW_MAGIC: &[u8; 8] = b"PIXELPAK";

/// Reads the 16-byte header shared by every format in this crate.
pub(crate) fn read_header<R: Read>(reader: &mut R, magic: &[u8; 8]) -> Result<u64, EventLogError> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|err| eof_as(err, "header"))?;
    if &buf != magic {
        return Err(EventLogError::magic(magic, &buf));
    }
    reader
        .read_exact(&mut buf)
        .map_err(|err| eof_as(err, "header"))?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn eof_as(err: io::Error, what: &'static str) -> EventLogError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        EventLogError::Truncated(what)
    } else {
        EventLogError::Io(err)
    }
}

/// Offset of `timestamp_ms` from `epoch_ms` as stored in a record.
pub fn time_offset(epoch_ms: u64, timestamp_ms: i64) -> Result<u32, EventLogError> {
    let offset = timestamp_ms - epoch_ms as i64;
    if offset < 0 || offset > i64::from(MAX_TIME_OFFSET) {
        return Err(EventLogError::TimeOverflow { offset });
    }
    Ok(offset as u32)
}

/// Appends events to a raw log. The header is written lazily by
/// [`RawEventWriter::start`], or with epoch 0 when nothing was ever started.
pub struct RawEventWriter<W: Write> {
    out: W,
    epoch: Option<u64>,
    events: u64,
}

impl<W: Write> RawEventWriter<W> {
    pub fn new(out: W) -> Self {
        RawEventWriter {
            out,
            epoch: None,
            events: 0,
        }
    }

    /// Fixes the epoch and writes the header; later calls are no-ops.
    pub fn start(&mut self, epoch_ms: u64) -> Result<u64, EventLogError> {
        if let Some(epoch) = self.epoch {
            return Ok(epoch);
        }
        self.out.write_all(RAW_MAGIC)?;
        self.out.write_all(&epoch_ms.to_le_bytes())?;
        self.epoch = Some(epoch_ms);
        Ok(epoch_ms)
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn push(&mut self, event: &PixelEvent) -> Result<(), EventLogError> {
        self.start(0)?;
        self.out.write_all(&event.encode())?;
        self.events += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W, EventLogError> {
        self.start(0)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

pub struct RawEventReader<R: Read> {
    inner: R,
    epoch: u64,
}

impl<R: Read> RawEventReader<R> {
    pub fn open(mut inner: R) -> Result<Self, EventLogError> {
        let epoch = read_header(&mut inner, RAW_MAGIC)?;
        Ok(RawEventReader { inner, epoch })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn next_event(&mut self) -> Result<Option<PixelEvent>, EventLogError> {
        let mut buf = [0u8; RECORD_LEN];
        let mut filled = 0;
        while filled < RECORD_LEN {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(EventLogError::Truncated("event record")),
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Some(PixelEvent::decode(&buf)))
    }
}

impl<R: Read> Iterator for RawEventReader<R> {
    type Item = Result<PixelEvent, EventLogError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}
