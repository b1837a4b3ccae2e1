//! Compacted event log. Events sharing a time offset and an octant of the
//! canvas are written as one group:
//!
//! ```text
//! varint(time - previous group time) varint(count << octant_bits | octant)
//! count * [local_x:10 | local_y:9 | new^old:5]  (3 bytes, little endian)
//! ```
//!
//! Output may be split into consecutive segment files, each starting with
//! its own `PIXLPACK` header carrying the original epoch.

use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use structures::{varint, CanvasGeometry, PixelEvent};
use tracing::{debug, info};

use crate::{
    raw::{eof_as, read_header},
    EventLogError,
};

pub const CRUNCH_MAGIC: &[u8; 8] = b"PIXLPACK";
const MICRO_RECORD_LEN: usize = 3;

/// `{out}.{index:03}.bin`
pub fn segment_path(out: &Path, index: usize) -> PathBuf {
    let mut name = out.as_os_str().to_owned();
    name.push(format!(".{:03}.bin", index));
    PathBuf::from(name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrunchSummary {
    pub segments: usize,
    pub groups: u64,
    pub events: u64,
    pub last_time: u32,
}

pub struct CrunchWriter<W: Write, F: FnMut(usize) -> io::Result<W>> {
    geometry: CanvasGeometry,
    octant_bits: u32,
    epoch: u64,
    open_segment: F,
    out: W,
    split_ms: Option<u64>,
    split_start: u64,
    segment_dirty: bool,
    last_flushed: u64,
    group: Option<(u32, u32)>,
    pending: Vec<u8>,
    count: u64,
    summary: CrunchSummary,
}

impl<W: Write, F: FnMut(usize) -> io::Result<W>> CrunchWriter<W, F> {
    /// `open_segment` is called with 0 right away and with the next index
    /// each time a split boundary is crossed.
    pub fn new(
        geometry: CanvasGeometry,
        epoch: u64,
        split_ms: Option<u64>,
        mut open_segment: F,
    ) -> Result<Self, EventLogError> {
        let out = open_segment(0)?;
        let mut writer = CrunchWriter {
            octant_bits: geometry.octant_bits(),
            geometry,
            epoch,
            open_segment,
            out,
            split_ms: split_ms.filter(|ms| *ms > 0),
            split_start: 0,
            segment_dirty: false,
            last_flushed: 0,
            group: None,
            pending: Vec::with_capacity(1024),
            count: 0,
            summary: CrunchSummary {
                segments: 1,
                ..CrunchSummary::default()
            },
        };
        writer.write_header()?;
        Ok(writer)
    }

    fn write_header(&mut self) -> Result<(), EventLogError> {
        self.out.write_all(CRUNCH_MAGIC)?;
        self.out.write_all(&self.epoch.to_le_bytes())?;
        self.last_flushed = 0;
        Ok(())
    }

    pub fn push(&mut self, event: &PixelEvent) -> Result<(), EventLogError> {
        let (x, y) = (u32::from(event.x), u32::from(event.y));
        if x >= self.geometry.width || y >= self.geometry.height {
            return Err(EventLogError::OutOfCanvas {
                x,
                y,
                width: self.geometry.width,
                height: self.geometry.height,
            });
        }
        let time = event.time_offset;
        if let Some((previous, _)) = self.group {
            if time < previous {
                return Err(EventLogError::OutOfOrder {
                    x,
                    y,
                    previous,
                    offset: time,
                });
            }
        }

        if let Some(split) = self.split_ms {
            let time = u64::from(time);
            if time >= self.split_start + split {
                self.flush_group()?;
                // jump straight to the window holding this event
                self.split_start += (time - self.split_start) / split * split;
                if self.segment_dirty {
                    self.next_segment()?;
                }
            }
        }

        let octant = self.geometry.octant_of(x, y);
        if self.group != Some((time, octant)) {
            self.flush_group()?;
            self.group = Some((time, octant));
        }

        let (ox, oy) = self.geometry.octant_origin(octant);
        let color_xor = u32::from((event.new_color ^ event.old_color) & 31);
        let repack = (x - ox) | (y - oy) << 10 | color_xor << 19;
        self.pending
            .extend_from_slice(&repack.to_le_bytes()[..MICRO_RECORD_LEN]);
        self.count += 1;
        self.summary.events += 1;
        Ok(())
    }

    fn flush_group(&mut self) -> Result<(), EventLogError> {
        let Some((time, octant)) = self.group else {
            return Ok(());
        };
        if self.count == 0 {
            return Ok(());
        }

        let mut head = Vec::with_capacity(2 * varint::MAX_VARINT_LEN);
        varint::put_uvarint(&mut head, u64::from(time) - self.last_flushed);
        varint::put_uvarint(&mut head, self.count << self.octant_bits | u64::from(octant));
        self.out.write_all(&head)?;
        self.out.write_all(&self.pending)?;

        self.last_flushed = u64::from(time);
        self.pending.clear();
        self.count = 0;
        self.segment_dirty = true;
        self.summary.groups += 1;
        self.summary.last_time = time;
        Ok(())
    }

    fn next_segment(&mut self) -> Result<(), EventLogError> {
        self.out.flush()?;
        let index = self.summary.segments;
        self.out = (self.open_segment)(index)?;
        self.summary.segments += 1;
        self.segment_dirty = false;
        debug!(segment = index, split_start = self.split_start, "new crunch segment");
        self.write_header()
    }

    pub fn finish(mut self) -> Result<CrunchSummary, EventLogError> {
        self.flush_group()?;
        self.out.flush()?;
        info!(
            segments = self.summary.segments,
            groups = self.summary.groups,
            events = self.summary.events,
            start = self.epoch,
            end = self.epoch + u64::from(self.summary.last_time),
            "crunched event log"
        );
        Ok(self.summary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicroRecord {
    pub local_x: u16,
    pub local_y: u16,
    pub color_xor: u8,
}

impl MicroRecord {
    fn decode(buf: &[u8]) -> Self {
        let packed = u32::from_le_bytes([buf[0], buf[1], buf[2], 0]);
        MicroRecord {
            local_x: (packed & 0x3ff) as u16,
            local_y: ((packed >> 10) & 0x1ff) as u16,
            color_xor: ((packed >> 19) & 31) as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrunchGroup {
    /// Milliseconds since the epoch.
    pub time_offset: u32,
    pub octant: u32,
    pub records: Vec<MicroRecord>,
}

/// Reads the groups of one crunch segment.
pub struct CrunchReader<R: Read> {
    inner: R,
    epoch: u64,
    octant_bits: u32,
    max_records: u64,
    time: u64,
}

impl<R: Read> CrunchReader<R> {
    pub fn open(mut inner: R, geometry: &CanvasGeometry) -> Result<Self, EventLogError> {
        let epoch = read_header(&mut inner, CRUNCH_MAGIC)?;
        Ok(CrunchReader {
            inner,
            epoch,
            octant_bits: geometry.octant_bits(),
            max_records: geometry.pixel_count() as u64,
            time: 0,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn next_group(&mut self) -> Result<Option<CrunchGroup>, EventLogError> {
        let Some(delta) = varint::read_uvarint(&mut self.inner).map_err(|e| eof_as(e, "group"))?
        else {
            return Ok(None);
        };
        let head = varint::read_uvarint(&mut self.inner)
            .map_err(|e| eof_as(e, "group header"))?
            .ok_or(EventLogError::Truncated("group header"))?;

        self.time += delta;
        let time_offset = u32::try_from(self.time).map_err(|_| EventLogError::TimeOverflow {
            offset: self.time as i64,
        })?;
        let count = head >> self.octant_bits;
        let octant = (head & ((1u64 << self.octant_bits) - 1)) as u32;
        if count > self.max_records {
            return Err(EventLogError::GroupTooLarge {
                count,
                limit: self.max_records,
            });
        }

        let mut buf = vec![0u8; count as usize * MICRO_RECORD_LEN];
        self.inner
            .read_exact(&mut buf)
            .map_err(|e| eof_as(e, "group records"))?;
        let records = buf
            .chunks_exact(MICRO_RECORD_LEN)
            .map(MicroRecord::decode)
            .collect();

        Ok(Some(CrunchGroup {
            time_offset,
            octant,
            records,
        }))
    }
}

impl<R: Read> Iterator for CrunchReader<R> {
    type Item = Result<CrunchGroup, EventLogError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_group().transpose()
    }
}

/// Recovers full events from crunch groups by tracking every pixel's
/// current color code, starting from the untouched code.
pub struct CrunchExpander {
    geometry: CanvasGeometry,
    state: Vec<u8>,
}

impl CrunchExpander {
    pub fn new(geometry: CanvasGeometry) -> Self {
        let state = vec![geometry.untouched_code(); geometry.pixel_count()];
        CrunchExpander { geometry, state }
    }

    pub fn expand(&mut self, group: &CrunchGroup) -> Result<Vec<PixelEvent>, EventLogError> {
        let (ox, oy) = self.geometry.octant_origin(group.octant);
        let mut events = Vec::with_capacity(group.records.len());
        for record in &group.records {
            let x = ox + u32::from(record.local_x);
            let y = oy + u32::from(record.local_y);
            if x >= self.geometry.width || y >= self.geometry.height {
                return Err(EventLogError::OutOfCanvas {
                    x,
                    y,
                    width: self.geometry.width,
                    height: self.geometry.height,
                });
            }
            let slot = &mut self.state[(y * self.geometry.width + x) as usize];
            let old_color = *slot;
            let new_color = old_color ^ record.color_xor;
            *slot = new_color;
            events.push(PixelEvent {
                time_offset: group.time_offset,
                x: x as u16,
                y: y as u16,
                new_color,
                old_color,
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io::Cursor, rc::Rc};

    use super::*;

    fn ev(time_offset: u32, x: u16, y: u16, new_color: u8, old_color: u8) -> PixelEvent {
        PixelEvent {
            time_offset,
            x,
            y,
            new_color,
            old_color,
        }
    }

    type Segments = Rc<RefCell<Vec<Vec<u8>>>>;

    /// Collects every segment into memory.
    fn crunch(events: &[PixelEvent], split_ms: Option<u64>) -> (Vec<Vec<u8>>, CrunchSummary) {
        let segments: Segments = Rc::new(RefCell::new(Vec::new()));
        struct SegmentOut(Segments, usize);
        impl Write for SegmentOut {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.borrow_mut()[self.1].extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let opener = {
            let segments = Rc::clone(&segments);
            move |index: usize| {
                segments.borrow_mut().push(Vec::new());
                Ok::<_, io::Error>(SegmentOut(Rc::clone(&segments), index))
            }
        };
        let mut writer =
            CrunchWriter::new(CanvasGeometry::place_2023(), 1_000, split_ms, opener).unwrap();
        for event in events {
            writer.push(event).unwrap();
        }
        let summary = writer.finish().unwrap();
        let segments = segments.borrow().clone();
        (segments, summary)
    }

    #[test]
    fn groups_by_time_and_octant() {
        let events = [
            ev(0, 3, 3, 7, 31),
            ev(0, 4, 3, 7, 31),
            ev(0, 1500, 3, 2, 31),
            ev(40, 3, 3, 9, 7),
        ];
        let (segments, summary) = crunch(&events, None);
        assert_eq!(summary.groups, 3);
        assert_eq!(summary.segments, 1);

        let bytes = &segments[0];
        assert_eq!(&bytes[..8], CRUNCH_MAGIC);
        assert_eq!(&bytes[8..16], &1_000u64.to_le_bytes());
        // first group: dt 0, two records in octant 0
        assert_eq!(bytes[16], 0);
        assert_eq!(bytes[17], 2 << 4);
        let first = 3 | 3 << 10 | (7 ^ 31) << 19;
        assert_eq!(&bytes[18..21], &(first as u32).to_le_bytes()[..3]);

        let geometry = CanvasGeometry::place_2023();
        let groups: Vec<CrunchGroup> = CrunchReader::open(Cursor::new(bytes.clone()), &geometry)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let keys: Vec<(u32, u32, usize)> = groups
            .iter()
            .map(|g| (g.time_offset, g.octant, g.records.len()))
            .collect();
        // x 1500 is the second octant column: 0 + 4 * 1
        assert_eq!(keys, vec![(0, 0, 2), (0, 4, 1), (40, 0, 1)]);

        let mut expander = CrunchExpander::new(geometry);
        let expanded: Vec<PixelEvent> = groups
            .iter()
            .flat_map(|g| expander.expand(g).unwrap())
            .collect();
        assert_eq!(expanded, events.to_vec());
    }

    #[test]
    fn splits_reset_time_and_skip_empty_windows() {
        let events = [
            ev(100, 1, 1, 1, 31),
            ev(900, 1, 2, 1, 31),
            // gap over several windows
            ev(4_200, 1, 3, 1, 31),
            ev(4_300, 1, 4, 1, 31),
        ];
        let (segments, summary) = crunch(&events, Some(1_000));
        assert_eq!(summary.segments, 2);
        assert_eq!(segments.len(), 2);

        let geometry = CanvasGeometry::place_2023();
        let times = |bytes: &Vec<u8>| -> Vec<u32> {
            let reader = CrunchReader::open(Cursor::new(bytes.clone()), &geometry).unwrap();
            assert_eq!(reader.epoch(), 1_000);
            reader.map(|g| g.unwrap().time_offset).collect()
        };
        assert_eq!(times(&segments[0]), vec![100, 900]);
        // the first group of a segment is relative to 0, so times stay absolute
        assert_eq!(times(&segments[1]), vec![4_200, 4_300]);
    }

    #[test]
    fn late_first_event_does_not_leave_an_empty_segment() {
        let (segments, _) = crunch(&[ev(5_500, 0, 0, 1, 31)], Some(1_000));
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn segment_names() {
        assert_eq!(
            segment_path(Path::new("/tmp/out.crunch"), 7),
            PathBuf::from("/tmp/out.crunch.007.bin")
        );
    }

    #[test]
    fn backwards_time_is_rejected() {
        let mut writer = CrunchWriter::new(CanvasGeometry::place_2023(), 0, None, |_| {
            Ok::<_, io::Error>(Vec::new())
        })
        .unwrap();
        writer.push(&ev(100, 1, 1, 1, 31)).unwrap();
        assert!(matches!(
            writer.push(&ev(50, 1, 2, 1, 31)),
            Err(EventLogError::OutOfOrder {
                previous: 100,
                offset: 50,
                ..
            })
        ));
        // the group in progress is untouched
        writer.push(&ev(100, 2, 2, 1, 31)).unwrap();
        let summary = writer.finish().unwrap();
        assert_eq!((summary.groups, summary.events), (1, 2));
    }

    #[test]
    fn oversized_group_count_is_rejected() {
        let geometry = CanvasGeometry::place_2023();
        let mut bytes = CRUNCH_MAGIC.to_vec();
        bytes.extend_from_slice(&0u64.to_le_bytes());
        varint::put_uvarint(&mut bytes, 0);
        varint::put_uvarint(&mut bytes, u64::MAX);

        let mut reader = CrunchReader::open(Cursor::new(bytes), &geometry).unwrap();
        assert!(matches!(
            reader.next_group(),
            Err(EventLogError::GroupTooLarge { .. })
        ));
    }

    #[test]
    fn truncated_group_is_reported() {
        let (segments, _) = crunch(&[ev(0, 3, 3, 7, 31)], None);
        let mut bytes = segments[0].clone();
        bytes.pop();
        let mut reader = CrunchReader::open(Cursor::new(bytes), &CanvasGeometry::place_2023()).unwrap();
        assert!(matches!(reader.next_group(), Err(EventLogError::Truncated(_))));
    }
}
