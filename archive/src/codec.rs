//! Indexed-color PNG payloads and content hashing of rasters.

use std::io::{Read, Write};

use structures::{Palette, Raster};

use crate::ArchiveError;

pub fn decode_png<R: Read>(reader: R, entry: &str) -> Result<Raster, ArchiveError> {
    let decode_err = |source| ArchiveError::Decode {
        entry: entry.to_string(),
        source,
    };

    let mut decoder = png::Decoder::new(reader);
    // keep palette indices, no expansion to RGB
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut png_reader = decoder.read_info().map_err(decode_err)?;

    let mut buf = vec![0; png_reader.output_buffer_size()];
    let frame = png_reader.next_frame(&mut buf).map_err(decode_err)?;
    if frame.color_type != png::ColorType::Indexed {
        return Err(ArchiveError::NotIndexed {
            entry: entry.to_string(),
        });
    }

    let info = png_reader.info();
    let rgb = info.palette.as_deref().ok_or_else(|| ArchiveError::NotIndexed {
        entry: entry.to_string(),
    })?;
    let alpha = info.trns.as_deref().unwrap_or(&[]);
    let colors = rgb
        .chunks_exact(3)
        .enumerate()
        .map(|(i, c)| [c[0], c[1], c[2], alpha.get(i).copied().unwrap_or(0xff)])
        .collect();

    let pixels = unpack_rows(
        &buf[..frame.buffer_size()],
        frame.width,
        frame.height,
        frame.line_size,
        frame.bit_depth as u8,
    );

    assemble(entry, frame.width, frame.height, Palette::new(colors), pixels)
}

fn assemble(
    entry: &str,
    width: u32,
    height: u32,
    palette: Palette,
    pixels: Vec<u8>,
) -> Result<Raster, ArchiveError> {
    Raster::from_pixels(width, height, palette, pixels).map_err(|source| ArchiveError::BadRaster {
        entry: entry.to_string(),
        source,
    })
}

/// Expands 1, 2, 4 or 8 bit packed rows into one byte per pixel.
fn unpack_rows(buf: &[u8], width: u32, height: u32, line_size: usize, depth: u8) -> Vec<u8> {
    let width = width as usize;
    let mut pixels = Vec::with_capacity(width * height as usize);
    for row in buf.chunks(line_size).take(height as usize) {
        if depth == 8 {
            pixels.extend_from_slice(&row[..width]);
            continue;
        }
        let depth = depth as usize;
        let mask = (1u8 << depth) - 1;
        for x in 0..width {
            let bit = x * depth;
            let shift = 8 - depth - bit % 8;
            pixels.push((row[bit / 8] >> shift) & mask);
        }
    }
    pixels
}

pub fn encode_png<W: Write>(raster: &Raster, writer: W, entry: &str) -> Result<(), ArchiveError> {
    let encode_err = |source| ArchiveError::Encode {
        entry: entry.to_string(),
        source,
    };

    let colors = raster.palette().colors();
    let rgb: Vec<u8> = colors.iter().flat_map(|c| [c[0], c[1], c[2]]).collect();
    let alpha: Vec<u8> = colors.iter().map(|c| c[3]).collect();

    let mut encoder = png::Encoder::new(writer, raster.width(), raster.height());
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(rgb);
    encoder.set_trns(alpha);

    let mut png_writer = encoder.write_header().map_err(encode_err)?;
    png_writer
        .write_image_data(raster.pixels())
        .map_err(encode_err)?;
    png_writer.finish().map_err(encode_err)
}

pub fn encode_png_to_vec(raster: &Raster, entry: &str) -> Result<Vec<u8>, ArchiveError> {
    let mut buf = Vec::new();
    encode_png(raster, &mut buf, entry)?;
    Ok(buf)
}

/// Hash of the colors a raster displays. Two rasters hash equal when every
/// pixel resolves to the same RGBA, whatever their palettes look like.
pub fn content_hash(raster: &Raster) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&raster.width().to_le_bytes());
    hasher.update(&raster.height().to_le_bytes());

    let mut row_buf = Vec::with_capacity(raster.width() as usize * 4);
    let palette = raster.palette();
    for y in 0..raster.height() {
        row_buf.clear();
        for &index in raster.row(y) {
            row_buf.extend_from_slice(&palette.get(index).unwrap_or([0, 0, 0, 0]));
        }
        hasher.update(&row_buf);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rand::{rngs::StdRng, Rng, SeedableRng};
    use structures::{Palette, RasterError};

    use super::*;

    #[test]
    fn png_keeps_indices_and_palette() {
        let mut rng = StdRng::seed_from_u64(7);
        let palette = Palette::place();
        let pixels = (0..40 * 30).map(|_| rng.gen_range(0..33u8)).collect();
        let raster = Raster::from_pixels(40, 30, palette, pixels).unwrap();

        let bytes = encode_png_to_vec(&raster, "t.png").unwrap();
        let decoded = decode_png(Cursor::new(bytes), "t.png").unwrap();
        assert_eq!(decoded, raster);
        assert!(decoded.palette().is_transparent(0));
    }

    #[test]
    fn unpacks_sub_byte_depths() {
        // two rows of 3 pixels at 2 bits: 0b00_01_10_00, 0b11_11_00_00
        let buf = [0b0001_1000, 0b1111_0000];
        assert_eq!(unpack_rows(&buf, 3, 2, 1, 2), vec![0, 1, 2, 3, 3, 0]);
    }

    #[test]
    fn rejects_garbage_payloads() {
        assert!(matches!(
            decode_png(Cursor::new(b"not a png".to_vec()), "x.png"),
            Err(ArchiveError::Decode { .. })
        ));
    }

    #[test]
    fn short_pixel_buffer_keeps_its_cause() {
        let err = assemble("short.png", 4, 4, Palette::place(), vec![0; 15]).unwrap_err();
        assert!(
            matches!(
                &err,
                ArchiveError::BadRaster {
                    source: RasterError::BufferLength {
                        expected: 16,
                        actual: 15
                    },
                    ..
                }
            ),
            "{err}"
        );
        assert!(err.is_decode_failure());
    }

    #[test]
    fn hash_ignores_palette_layout() {
        let palette = Palette::place();
        let mut a = Raster::new(4, 4, palette.clone());
        a.set(1, 1, 5);

        // same colors addressed through a shifted palette
        let shifted = palette.with_transparent_prefix();
        let mut b = Raster::filled(4, 4, shifted, 1);
        b.set(1, 1, 6);

        assert_eq!(content_hash(&a), content_hash(&b));
        b.set(2, 2, 7);
        assert_ne!(content_hash(&a), content_hash(&b));
    }
}
