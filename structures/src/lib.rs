#[macro_use]
extern crate serde_derive;

mod errors;
mod event;
mod geometry;
mod key;
mod palette;
mod raster;
pub mod varint;

pub use crate::errors::RasterError;
pub use crate::event::{PixelEvent, MAX_TIME_OFFSET, RECORD_LEN};
pub use crate::geometry::{CanvasGeometry, TileClip, TileOrigin};
pub use crate::key::{SnapshotKey, MAX_TILES};
pub use crate::palette::{Palette, PALETTE_LEN, PLACE_HEX_COLORS};
pub use crate::raster::{DeltaEncoding, Raster};
