use std::io::{Read, Write};

use structures::{CanvasGeometry, Palette};

use crate::{EventLogError, RawEventReader};

#[derive(Debug, Serialize)]
struct CsvRow {
    timestamp_millis: u64,
    color: String,
    x: u16,
    y: u16,
}

/// Writes every event of a raw log as `timestamp_millis,color,x,y`, the
/// color being the palette's hex value for the event's new color.
pub fn dump_csv<R: Read, W: Write>(
    events: RawEventReader<R>,
    geometry: &CanvasGeometry,
    palette: &Palette,
    out: W,
) -> Result<u64, EventLogError> {
    let epoch = events.epoch();
    let mut writer = csv::Writer::from_writer(out);
    let mut rows = 0;
    for event in events {
        let event = event?;
        writer.serialize(CsvRow {
            timestamp_millis: epoch + u64::from(event.time_offset),
            color: palette
                .hex(geometry.decode_color(event.new_color))
                .unwrap_or_default(),
            x: event.x,
            y: event.y,
        })?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use structures::PixelEvent;

    use super::*;
    use crate::RawEventWriter;

    #[test]
    fn rows_carry_absolute_time_and_hex() {
        let mut log = RawEventWriter::new(Vec::new());
        log.start(1_000).unwrap();
        log.push(&PixelEvent {
            time_offset: 20,
            x: 3,
            y: 4,
            new_color: 2,
            old_color: 31,
        })
        .unwrap();
        let reader = RawEventReader::open(Cursor::new(log.finish().unwrap())).unwrap();

        let mut out = Vec::new();
        let rows = dump_csv(
            reader,
            &CanvasGeometry::place_2023(),
            &Palette::place(),
            &mut out,
        )
        .unwrap();
        assert_eq!(rows, 1);
        // code 2 is palette index 3
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "timestamp_millis,color,x,y\n1020,#FF4500,3,4\n"
        );
    }
}
