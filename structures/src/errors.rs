use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RasterError {
    #[error("raster dimensions differ: {expected_width}x{expected_height} vs {actual_width}x{actual_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("palette mismatch: base has {base} entries, delta has {delta}")]
    PaletteMismatch { base: usize, delta: usize },

    #[error("delta palette entry 0 is not transparent")]
    OpaqueDeltaSentinel,

    #[error("pixel index {index} outside palette of {len} entries")]
    IndexOutOfRange { index: u8, len: usize },

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("could not parse color {0:?}")]
    BadColor(String),

    #[error("invalid canvas geometry: {0}")]
    Geometry(String),
}
