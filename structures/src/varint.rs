//! Unsigned LEB128 integers, seven bits per byte, low groups first.

use std::io::{self, Read};

pub const MAX_VARINT_LEN: usize = 10;

pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) -> usize {
    let start = buf.len();
    while value >= 0x80 {
        buf.push(value as u8 | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
    buf.len() - start
}

/// Decodes one varint from the front of `buf`, returning it with the number
/// of bytes consumed. `None` when the buffer ends mid-value or it overflows.
pub fn uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Reads one varint. `Ok(None)` on a clean end of stream before the first
/// byte; a stream ending mid-value is an `UnexpectedEof` error.
pub fn read_uvarint<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    let mut value = u64::from(byte[0] & 0x7f);
    let mut i = 0;
    while byte[0] >= 0x80 {
        i += 1;
        if i == MAX_VARINT_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint too long"));
        }
        reader.read_exact(&mut byte)?;
        if i == MAX_VARINT_LEN - 1 && byte[0] > 1 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflows u64"));
        }
        value |= u64::from(byte[0] & 0x7f) << (7 * i);
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn known_encodings() {
        let mut buf = Vec::new();
        assert_eq!(put_uvarint(&mut buf, 1), 1);
        assert_eq!(put_uvarint(&mut buf, 300), 2);
        assert_eq!(buf, vec![0x01, 0xac, 0x02]);
        assert_eq!(uvarint(&buf[1..]), Some((300, 2)));
    }

    #[test]
    fn extremes() {
        let mut buf = Vec::new();
        assert_eq!(put_uvarint(&mut buf, u64::MAX), MAX_VARINT_LEN);
        assert_eq!(uvarint(&buf), Some((u64::MAX, MAX_VARINT_LEN)));
        assert_eq!(read_uvarint(&mut Cursor::new(&buf)).unwrap(), Some(u64::MAX));
    }

    #[test]
    fn truncated_values() {
        assert_eq!(uvarint(&[0x80, 0x80]), None);
        assert_eq!(read_uvarint(&mut Cursor::new(Vec::<u8>::new())).unwrap(), None);
        let err = read_uvarint(&mut Cursor::new(vec![0x80u8])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
