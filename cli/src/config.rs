use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::Context as _;
use archive::constants::DEFAULT_CACHE_CAPACITY;
use archiver::{BuildOptions, TicksOptions, DEFAULT_RETRY_BACKOFF};
use player::{RenderOptions, ReplayOptions};
use structures::CanvasGeometry;

/// Settings read from the `--config` TOML file. Every section and field is
/// optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub geometry: CanvasGeometry,
    pub store: StoreConfig,
    pub build: BuildConfig,
    pub extract: ExtractConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the full, delta and ticks archives.
    pub data_dir: PathBuf,
    pub cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: PathBuf::from("."),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub base_interval_seconds: u64,
    pub permits: usize,
    pub ticks_permits: usize,
    pub ticks_per_archive: usize,
    pub retry_backoff_seconds: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let build = BuildOptions::default();
        let ticks = TicksOptions::default();
        BuildConfig {
            base_interval_seconds: (build.base_interval_ms / 1000) as u64,
            permits: build.permits,
            ticks_permits: ticks.permits,
            ticks_per_archive: ticks.rotate_every,
            retry_backoff_seconds: DEFAULT_RETRY_BACKOFF.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub slow_decode_ms: u64,
    pub burst_events: usize,
    pub progress_every: usize,
    pub render_window_seconds: i64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        let replay = ReplayOptions::default();
        ExtractConfig {
            slow_decode_ms: replay.slow_decode.as_millis() as u64,
            burst_events: replay.burst_events,
            progress_every: replay.progress_every,
            render_window_seconds: RenderOptions::default().window_ms / 1000,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("parse config '{}'", path.display()))?;
        config
            .geometry
            .validate()
            .with_context(|| format!("geometry in '{}'", path.display()))?;
        Ok(config)
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            base_interval_ms: self.build.base_interval_seconds as i64 * 1000,
            permits: self.build.permits,
        }
    }

    pub fn ticks_options(&self) -> TicksOptions {
        TicksOptions {
            rotate_every: self.build.ticks_per_archive,
            permits: self.build.ticks_permits,
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.build.retry_backoff_seconds)
    }

    pub fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            slow_decode: Duration::from_millis(self.extract.slow_decode_ms),
            burst_events: self.extract.burst_events,
            progress_every: self.extract.progress_every,
        }
    }

    pub fn render_window_ms(&self) -> i64 {
        self.extract.render_window_seconds * 1000
    }
}
