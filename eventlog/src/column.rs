//! Per-pixel columnar history.
//!
//! Layout: `COLMPACK`, epoch (u64 LE), the absolute byte offset where run
//! data starts (u32 LE, `20 + table length`), one varint run length per
//! pixel in row-major order, then the runs themselves. A run is a sequence
//! of `varint(new_color | (time - previous time at this pixel) << 5)`.

use std::io::{Read, Write};

use structures::{varint, PixelEvent};
use tracing::debug;

use crate::{
    raw::{eof_as, read_header},
    EventLogError, RawEventReader,
};

pub const COLUMN_MAGIC: &[u8; 8] = b"COLMPACK";
const HEADER_LEN: usize = 20;

pub struct ColumnarBuilder {
    width: u32,
    height: u32,
    epoch: u64,
    last_time: Vec<u32>,
    runs: Vec<Vec<u8>>,
    events: u64,
}

impl ColumnarBuilder {
    pub fn new(width: u32, height: u32, epoch: u64) -> Self {
        let pixels = width as usize * height as usize;
        ColumnarBuilder {
            width,
            height,
            epoch,
            last_time: vec![0; pixels],
            runs: vec![Vec::new(); pixels],
            events: 0,
        }
    }

    /// Builds the index from a whole raw log.
    pub fn from_raw<R: Read>(
        reader: RawEventReader<R>,
        width: u32,
        height: u32,
    ) -> Result<Self, EventLogError> {
        let mut builder = ColumnarBuilder::new(width, height, reader.epoch());
        for event in reader {
            builder.push(&event?)?;
        }
        Ok(builder)
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn push(&mut self, event: &PixelEvent) -> Result<(), EventLogError> {
        let (x, y) = (u32::from(event.x), u32::from(event.y));
        if x >= self.width || y >= self.height {
            return Err(EventLogError::OutOfCanvas {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        let pixel = (y * self.width + x) as usize;
        let previous = self.last_time[pixel];
        let dt = event
            .time_offset
            .checked_sub(previous)
            .ok_or(EventLogError::OutOfOrder {
                x,
                y,
                previous,
                offset: event.time_offset,
            })?;
        self.last_time[pixel] = event.time_offset;

        let entry = u64::from(event.new_color & 31) | u64::from(dt) << 5;
        varint::put_uvarint(&mut self.runs[pixel], entry);
        self.events += 1;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> Result<(), EventLogError> {
        let mut table = Vec::with_capacity(self.runs.len());
        for run in &self.runs {
            varint::put_uvarint(&mut table, run.len() as u64);
        }
        let data_start = u32::try_from(HEADER_LEN + table.len())
            .map_err(|_| EventLogError::TableTooLarge(table.len()))?;

        out.write_all(COLUMN_MAGIC)?;
        out.write_all(&self.epoch.to_le_bytes())?;
        out.write_all(&data_start.to_le_bytes())?;
        out.write_all(&table)?;
        for run in &self.runs {
            out.write_all(run)?;
        }
        out.flush()?;
        debug!(events = self.events, table = table.len(), "wrote columnar index");
        Ok(())
    }
}

/// Random-access reader over a whole columnar file held in memory.
pub struct ColumnarIndex {
    width: u32,
    height: u32,
    epoch: u64,
    offsets: Vec<u64>,
    data: Vec<u8>,
}

impl ColumnarIndex {
    /// The file does not record the canvas size, so the caller supplies it.
    pub fn read<R: Read>(mut reader: R, width: u32, height: u32) -> Result<Self, EventLogError> {
        let epoch = read_header(&mut reader, COLUMN_MAGIC)?;
        let mut word = [0u8; 4];
        reader
            .read_exact(&mut word)
            .map_err(|e| eof_as(e, "header"))?;
        let data_start = u32::from_le_bytes(word) as usize;
        let table_len = data_start
            .checked_sub(HEADER_LEN)
            .ok_or(EventLogError::Truncated("offset table"))?;

        let mut table = Vec::new();
        (&mut reader).take(table_len as u64).read_to_end(&mut table)?;
        if table.len() < table_len {
            return Err(EventLogError::Truncated("offset table"));
        }

        let pixels = width as usize * height as usize;
        let mut offsets = Vec::with_capacity(pixels + 1);
        offsets.push(0u64);
        let mut pos = 0;
        let mut total = 0u64;
        for _ in 0..pixels {
            let (len, used) =
                varint::uvarint(&table[pos..]).ok_or(EventLogError::Truncated("offset table"))?;
            pos += used;
            total = total
                .checked_add(len)
                .ok_or(EventLogError::Truncated("offset table"))?;
            offsets.push(total);
        }

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        if (data.len() as u64) < total {
            return Err(EventLogError::Truncated("run data"));
        }

        Ok(ColumnarIndex {
            width,
            height,
            epoch,
            offsets,
            data,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Byte offset of every pixel's run relative to the start of run data;
    /// `width * height + 1` entries starting at 0.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn run(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let pixel = (y * self.width + x) as usize;
        let start = self.offsets[pixel] as usize;
        let end = self.offsets[pixel + 1] as usize;
        self.data.get(start..end)
    }

    /// `(time offset, color code)` of every change at the pixel, oldest first.
    pub fn pixel_history(&self, x: u32, y: u32) -> Option<Vec<(u32, u8)>> {
        let mut run = self.run(x, y)?;
        let mut history = Vec::new();
        let mut time = 0u64;
        while let Some((entry, used)) = varint::uvarint(run) {
            time = time.saturating_add(entry >> 5);
            history.push((time as u32, (entry & 31) as u8));
            run = &run[used..];
        }
        Some(history)
    }

    /// Color code of the last change at or before `time_offset`; `None`
    /// outside the canvas or before the pixel's first change.
    pub fn color_at(&self, x: u32, y: u32, time_offset: u32) -> Option<u8> {
        self.pixel_history(x, y)?
            .into_iter()
            .take_while(|(time, _)| *time <= time_offset)
            .last()
            .map(|(_, color)| color)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn ev(time_offset: u32, x: u16, y: u16, new_color: u8) -> PixelEvent {
        PixelEvent {
            time_offset,
            x,
            y,
            new_color,
            old_color: 31,
        }
    }

    fn build(events: &[PixelEvent]) -> Vec<u8> {
        let mut builder = ColumnarBuilder::new(4, 3, 77);
        for event in events {
            builder.push(event).unwrap();
        }
        let mut out = Vec::new();
        builder.write_to(&mut out).unwrap();
        out
    }

    #[test]
    fn layout_and_lookup() {
        let events = [ev(0, 1, 0, 5), ev(10, 3, 2, 6), ev(300, 1, 0, 7)];
        let bytes = build(&events);

        assert_eq!(&bytes[..8], COLUMN_MAGIC);
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 77);
        // 12 one-byte lengths
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 32);

        let index = ColumnarIndex::read(Cursor::new(bytes), 4, 3).unwrap();
        assert_eq!(index.epoch(), 77);
        assert_eq!(index.pixel_history(1, 0), Some(vec![(0, 5), (300, 7)]));
        assert_eq!(index.pixel_history(3, 2), Some(vec![(10, 6)]));
        assert_eq!(index.pixel_history(0, 0), Some(vec![]));
        assert_eq!(index.color_at(1, 0, 299), Some(5));
        assert_eq!(index.color_at(1, 0, 300), Some(7));
        assert_eq!(index.color_at(3, 2, 9), None);
        assert_eq!(index.pixel_history(4, 0), None);
    }

    #[test]
    fn offsets_prefix_sum_run_lengths() {
        let events = [ev(0, 1, 0, 5), ev(5_000, 1, 0, 6), ev(10, 3, 2, 6)];
        let index = ColumnarIndex::read(Cursor::new(build(&events)), 4, 3).unwrap();
        let offsets = index.offsets();
        assert_eq!(offsets.len(), 13);
        assert_eq!(offsets[0], 0);
        for pixel in 0..12u32 {
            let run = index.run(pixel % 4, pixel / 4).unwrap();
            let i = pixel as usize;
            assert_eq!(offsets[i + 1] - offsets[i], run.len() as u64);
        }
        // 5 | 0 << 5 then 6 | 5000 << 5 which needs three bytes
        assert_eq!(index.run(1, 0).unwrap().len(), 4);
    }

    fn header(table: &[u8]) -> Vec<u8> {
        let mut bytes = COLUMN_MAGIC.to_vec();
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&(HEADER_LEN as u32 + table.len() as u32).to_le_bytes());
        bytes.extend_from_slice(table);
        bytes
    }

    #[test]
    fn corrupt_length_table_is_reported() {
        let mut table = Vec::new();
        varint::put_uvarint(&mut table, u64::MAX);
        varint::put_uvarint(&mut table, u64::MAX);
        assert!(matches!(
            ColumnarIndex::read(Cursor::new(header(&table)), 2, 1),
            Err(EventLogError::Truncated("offset table"))
        ));

        // run lengths pointing past the end of the file
        let bytes = header(&[3, 4]);
        assert!(matches!(
            ColumnarIndex::read(Cursor::new(bytes), 2, 1),
            Err(EventLogError::Truncated("run data"))
        ));

        // table length claims more bytes than the file holds
        let mut bytes = header(&[0, 0]);
        bytes[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            ColumnarIndex::read(Cursor::new(bytes), 2, 1),
            Err(EventLogError::Truncated("offset table"))
        ));
    }

    #[test]
    fn rejects_backwards_time_at_a_pixel() {
        let mut builder = ColumnarBuilder::new(4, 3, 0);
        builder.push(&ev(10, 0, 0, 1)).unwrap();
        assert!(matches!(
            builder.push(&ev(5, 0, 0, 2)),
            Err(EventLogError::OutOfOrder { .. })
        ));
        assert!(matches!(
            builder.push(&ev(20, 9, 0, 2)),
            Err(EventLogError::OutOfCanvas { .. })
        ));
    }
}
