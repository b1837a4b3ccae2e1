use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown header {found:?}, expected {expected:?}")]
    UnknownMagic { expected: String, found: String },

    #[error("log ends inside {0}")]
    Truncated(&'static str),

    #[error("pixel ({x}, {y}) lies outside the {width}x{height} canvas")]
    OutOfCanvas {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },

    #[error("time offset {offset} ms does not fit a 31-bit record")]
    TimeOverflow { offset: i64 },

    #[error("event at ({x}, {y}) goes back in time from {previous} to {offset}")]
    OutOfOrder {
        x: u32,
        y: u32,
        previous: u32,
        offset: u32,
    },

    #[error("group of {count} records exceeds the {limit} pixels of the canvas")]
    GroupTooLarge { count: u64, limit: u64 },

    #[error("columnar table too large: {0} bytes")]
    TableTooLarge(usize),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EventLogError {
    pub(crate) fn magic(expected: &[u8; 8], found: &[u8; 8]) -> Self {
        EventLogError::UnknownMagic {
            expected: String::from_utf8_lossy(expected).into_owned(),
            found: String::from_utf8_lossy(found).into_owned(),
        }
    }
}
