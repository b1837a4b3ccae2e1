//! Replays snapshot archives onto one composite canvas: extracting pixel
//! events, rendering or averaging the canvas and checking archives against
//! a recorded event log.

mod average;
mod composite;
mod errors;
mod extract;
mod reconcile;
mod render;
mod replay;

pub use crate::average::{average, AverageOptions, Averaged};
pub use crate::composite::Composite;
pub use crate::errors::ReplayError;
pub use crate::extract::{extract_events, ExtractOptions, ExtractSummary};
pub use crate::reconcile::{reconcile, ReconcileSummary};
pub use crate::render::{render_at, RenderOptions, Rendered};
pub use crate::replay::{Applied, ReplayEngine, ReplayMode, ReplayOptions, ReplayStats};

pub(crate) fn human_time(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}
