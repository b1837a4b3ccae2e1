#[macro_use]
extern crate serde_derive;

mod config;

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context as _};
use archive::{
    codec::encode_png,
    constants::{ticks_archive_name, DELTA_ARCHIVE, FULL_ARCHIVE},
    SnapshotStore,
};
use archiver::{
    build_archives, read_locator_list, scan_frames, write_ticks, FileSource, Retrying,
};
use byte_unit::Byte;
use clap::{Parser, Subcommand};
use eventlog::{
    dump_csv, segment_path, ColumnarBuilder, ColumnarIndex, CrunchWriter, RawEventReader,
    RawEventWriter,
};
use player::{
    average, extract_events, reconcile, render_at, AverageOptions, ExtractOptions,
    RenderOptions, ReplayEngine, ReplayMode,
};
use structures::Palette;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

type FileStore = SnapshotStore<BufReader<File>>;

#[derive(Parser, Debug)]
#[command(name = "canvas-history", author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// TOML file with [geometry], [store], [build] and [extract] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pack a directory of captured frames into the full and delta archives
    WriteDelta {
        frames_dir: PathBuf,
        /// Defaults to the configured data directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Append frames listed in a file (one location per line) to ticks archives
    WriteTicks { list: PathBuf },
    /// Replay the archives and write the raw event log
    Events {
        out_file: PathBuf,
        /// Only emit events from this time on (ms since the unix epoch)
        #[arg(long)]
        start: Option<i64>,
        /// Stop after this time (ms since the unix epoch)
        #[arg(long)]
        end: Option<i64>,
        #[arg(long)]
        max_images: Option<usize>,
    },
    /// Compact a raw event log
    Crunch {
        in_file: PathBuf,
        out_file: PathBuf,
        /// Start a new `{out}.NNN.bin` segment every this many seconds
        #[arg(long)]
        split_seconds: Option<u64>,
    },
    /// Build the per-pixel columnar index of a raw event log
    Column { in_file: PathBuf, out_file: PathBuf },
    /// Write a raw event log as CSV
    DumpCsv { in_file: PathBuf, out_file: PathBuf },
    /// Replay the archives checking each snapshot against the canvas so far
    Validate {
        /// Independently recorded raw event log to check against
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Render the canvas at a point in time to a PNG
    Render {
        /// ms since the unix epoch
        timestamp: i64,
        out_file: PathBuf,
        /// Trim transparent margins
        #[arg(long, default_value_t = false)]
        crop: bool,
    },
    /// Write the most frequent color of every pixel over a time window as an
    /// indexed PNG
    Average {
        out_file: PathBuf,
        /// ms since the unix epoch
        #[arg(long)]
        start: Option<i64>,
        /// ms since the unix epoch
        #[arg(long)]
        end: Option<i64>,
    },
    /// Print the change history of one pixel from a columnar index
    History {
        column_file: PathBuf,
        x: u32,
        y: u32,
        /// Only print the color at this time (ms since the unix epoch)
        #[arg(long)]
        at: Option<i64>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::WriteDelta { frames_dir, out_dir } => {
            let out_dir = out_dir.unwrap_or_else(|| config.store.data_dir.clone());
            let scan = scan_frames(&frames_dir)
                .with_context(|| format!("scan frames in '{}'", frames_dir.display()))?;
            let source = Arc::new(Retrying::with_backoff(FileSource, config.retry_backoff()));
            let summary = runtime()?
                .block_on(build_archives(scan, source, &out_dir, &config.build_options()))
                .context("building archives failed")?;
            info!(
                frames = summary.frames,
                input = %human_bytes(summary.input_bytes),
                full = summary.full_entries,
                full_size = %human_bytes(summary.full_bytes),
                delta = summary.delta_entries,
                delta_size = %human_bytes(summary.delta_bytes),
                "archives written"
            );
        }
        Commands::WriteTicks { list } => {
            let frames = read_locator_list(&list)
                .with_context(|| format!("read frame list '{}'", list.display()))?;
            let store = Arc::new(open_store(&config)?);
            let source = Arc::new(Retrying::with_backoff(FileSource, config.retry_backoff()));
            let summary = runtime()?
                .block_on(write_ticks(
                    store,
                    frames,
                    source,
                    &config.store.data_dir,
                    &config.ticks_options(),
                ))
                .context("writing ticks failed")?;
            info!(
                written = summary.written,
                already_archived = summary.already_archived,
                already_stored = summary.already_stored,
                no_base = summary.no_base,
                archives = summary.archives.len(),
                "ticks written"
            );
        }
        Commands::Events {
            out_file,
            start,
            end,
            max_images,
        } => {
            let store = open_store(&config)?;
            let options = ExtractOptions {
                start_ms: start,
                end_ms: end,
                max_images,
                replay: config.replay_options(),
            };
            let log = RawEventWriter::new(BufWriter::new(create(&out_file)?));
            let (summary, mut out) = extract_events(&store, &config.geometry, &options, log)
                .context("event extraction failed")?;
            out.flush()?;
            info!(
                snapshots = summary.snapshots,
                skipped = summary.skipped,
                events = summary.events,
                size = %human_bytes(out_file.metadata()?.len()),
                "event log written"
            );
        }
        Commands::Crunch {
            in_file,
            out_file,
            split_seconds,
        } => {
            let reader = open_raw(&in_file)?;
            let split_ms = split_seconds.map(|s| s * 1000);
            let mut writer = CrunchWriter::new(
                config.geometry.clone(),
                reader.epoch(),
                split_ms,
                |index| {
                    let path = match split_ms {
                        Some(_) => segment_path(&out_file, index),
                        None => out_file.clone(),
                    };
                    File::create(path).map(BufWriter::new)
                },
            )?;
            for event in reader {
                writer.push(&event?)?;
            }
            let summary = writer.finish()?;
            info!(
                segments = summary.segments,
                groups = summary.groups,
                events = summary.events,
                "crunch written"
            );
        }
        Commands::Column { in_file, out_file } => {
            let reader = open_raw(&in_file)?;
            let builder =
                ColumnarBuilder::from_raw(reader, config.geometry.width, config.geometry.height)
                    .with_context(|| format!("index '{}'", in_file.display()))?;
            let mut out = BufWriter::new(create(&out_file)?);
            builder.write_to(&mut out)?;
            out.flush()?;
            info!(
                events = builder.events(),
                size = %human_bytes(out_file.metadata()?.len()),
                "columnar index written"
            );
        }
        Commands::DumpCsv { in_file, out_file } => {
            let reader = open_raw(&in_file)?;
            let out = BufWriter::new(create(&out_file)?);
            let rows = dump_csv(reader, &config.geometry, &Palette::place(), out)?;
            info!(rows, "csv written");
        }
        Commands::Validate { events } => {
            let store = open_store(&config)?;
            match events {
                Some(path) => {
                    let summary =
                        reconcile(&store, &config.geometry, open_raw(&path)?, config.replay_options())?;
                    info!(
                        snapshots = summary.snapshots,
                        skipped = summary.skipped,
                        events = summary.events_applied,
                        mismatched_snapshots = summary.mismatched_snapshots,
                        mismatched_pixels = summary.mismatched_pixels,
                        "reconciled archives with event log"
                    );
                }
                None => {
                    let mut engine = ReplayEngine::new(
                        &store,
                        config.geometry.clone(),
                        ReplayMode::Validate,
                        config.replay_options(),
                    )?;
                    engine.run()?;
                }
            }
        }
        Commands::Render {
            timestamp,
            out_file,
            crop,
        } => {
            let store = open_store(&config)?;
            let options = RenderOptions {
                window_ms: config.render_window_ms(),
                crop,
            };
            let Some(rendered) = render_at(&store, &config.geometry, timestamp, &options)? else {
                eprintln!("no snapshot within the render window of {}", timestamp);
                return Ok(());
            };
            let image = image::RgbaImage::from_raw(rendered.width, rendered.height, rendered.rgba)
                .context("rendered buffer does not match its size")?;
            image
                .save(&out_file)
                .with_context(|| format!("write png '{}'", out_file.display()))?;
            info!(
                timestamp = rendered.timestamp,
                x0 = rendered.x0,
                y0 = rendered.y0,
                width = rendered.width,
                height = rendered.height,
                "rendered"
            );
        }
        Commands::Average {
            out_file,
            start,
            end,
        } => {
            let store = open_store(&config)?;
            let options = AverageOptions {
                start_ms: start,
                end_ms: end,
                replay: config.replay_options(),
            };
            let Some(averaged) = average(&store, &config.geometry, &options)? else {
                eprintln!("no snapshot inside the requested window");
                return Ok(());
            };
            let mut out = BufWriter::new(create(&out_file)?);
            encode_png(&averaged.raster, &mut out, &out_file.display().to_string())?;
            out.flush()?;
            info!(
                snapshots = averaged.snapshots,
                skipped = averaged.skipped,
                "average written"
            );
        }
        Commands::History {
            column_file,
            x,
            y,
            at,
        } => {
            let file = BufReader::new(
                File::open(&column_file)
                    .with_context(|| format!("open '{}'", column_file.display()))?,
            );
            let index = ColumnarIndex::read(file, config.geometry.width, config.geometry.height)?;
            let Some(history) = index.pixel_history(x, y) else {
                eprintln!("pixel {},{} is outside the canvas", x, y);
                return Ok(());
            };
            let epoch = index.epoch() as i64;
            let palette = Palette::place();
            let hex = |code: u8| {
                palette
                    .hex(config.geometry.decode_color(code))
                    .unwrap_or_else(|| "untouched".to_string())
            };
            match at {
                Some(at) => {
                    if at < epoch {
                        bail!("{} is before the index epoch {}", at, epoch);
                    }
                    match index.color_at(x, y, u32::try_from(at - epoch)?) {
                        Some(code) => println!("{}", hex(code)),
                        None => eprintln!("pixel {},{} has no change by {}", x, y, at),
                    }
                }
                None => {
                    for (time, code) in history {
                        println!("{}\t{}", epoch + i64::from(time), hex(code));
                    }
                }
            }
        }
    }

    Ok(())
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start tokio runtime")
}

/// Opens the full archive plus whichever delta and ticks archives exist.
fn open_store(config: &Config) -> anyhow::Result<FileStore> {
    let dir = &config.store.data_dir;
    let full = dir.join(FULL_ARCHIVE);
    let delta = Some(dir.join(DELTA_ARCHIVE)).filter(|p| p.exists());
    let ticks: Vec<PathBuf> = (0..)
        .map(|n| dir.join(ticks_archive_name(n)))
        .take_while(|p| p.exists())
        .collect();
    SnapshotStore::open(&full, delta.as_deref(), &ticks, config.store.cache_capacity)
        .with_context(|| format!("open archives in '{}'", dir.display()))
}

fn open_raw(path: &Path) -> anyhow::Result<RawEventReader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("open '{}'", path.display()))?;
    RawEventReader::open(BufReader::new(file))
        .with_context(|| format!("read event log '{}'", path.display()))
}

fn create(path: &Path) -> anyhow::Result<File> {
    File::create(path).with_context(|| format!("create '{}'", path.display()))
}

fn human_bytes(bytes: u64) -> String {
    Byte::from_bytes(u128::from(bytes))
        .get_appropriate_unit(true)
        .to_string()
}
