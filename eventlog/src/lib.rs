#[macro_use]
extern crate serde_derive;

pub mod column;
pub mod crunch;
mod dump;
mod errors;
pub mod raw;

pub use crate::column::{ColumnarBuilder, ColumnarIndex};
pub use crate::crunch::{
    segment_path, CrunchExpander, CrunchGroup, CrunchReader, CrunchSummary, CrunchWriter,
    MicroRecord,
};
pub use crate::dump::dump_csv;
pub use crate::errors::EventLogError;
pub use crate::raw::{time_offset, RawEventReader, RawEventWriter};
