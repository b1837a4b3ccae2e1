use std::{
    fs,
    io::{BufRead, BufReader},
    path::Path,
};

use structures::{SnapshotKey, MAX_TILES};
use tracing::debug;

use crate::BuildError;

/// A captured frame somewhere a [`crate::FrameSource`] can reach, named
/// `{ts}-{tile}[-anything].png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLocator {
    pub timestamp: i64,
    pub tile: u8,
    pub location: String,
}

impl FrameLocator {
    pub fn parse(location: &str) -> Result<Self, BuildError> {
        let fail = |reason: &str| BuildError::FrameName {
            name: location.to_string(),
            reason: reason.to_string(),
        };

        let base_name = location.rsplit(['/', '\\']).next().unwrap_or(location);
        let mut comps = base_name.split('-');
        let timestamp = comps
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| fail("no timestamp"))?;
        let tile = comps
            .next()
            .map(|s| s.trim_end_matches(".png"))
            .and_then(|s| s.parse::<u8>().ok())
            .filter(|tile| *tile < MAX_TILES)
            .ok_or_else(|| fail("no tile"))?;

        Ok(FrameLocator {
            timestamp,
            tile,
            location: location.to_string(),
        })
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.tile, self.timestamp)
    }
}

pub struct FrameScan {
    /// Sorted by timestamp, then tile.
    pub frames: Vec<FrameLocator>,
    pub bytes: u64,
}

/// Lists the captured `.png` frames of a directory.
pub fn scan_frames(dir: &Path) -> Result<FrameScan, BuildError> {
    let mut frames = Vec::new();
    let mut bytes = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "png") {
            continue;
        }
        frames.push(FrameLocator::parse(&path.to_string_lossy())?);
        bytes += entry.metadata()?.len();
    }
    frames.sort_by_key(|frame| (frame.key(), frame.location.clone()));
    debug!(frames = frames.len(), bytes, dir = %dir.display(), "scanned frames");
    Ok(FrameScan { frames, bytes })
}

/// Reads one frame locator per non-empty line, keeping file order.
pub fn read_locator_list(path: &Path) -> Result<Vec<FrameLocator>, BuildError> {
    let file = fs::File::open(path)?;
    let mut frames = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            frames.push(FrameLocator::parse(line)?);
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capture_names() {
        let frame = FrameLocator::parse("/data/img/1648817087221-3-f-deadbeef.png").unwrap();
        assert_eq!((frame.timestamp, frame.tile), (1648817087221, 3));

        let bare = FrameLocator::parse("https://example.test/1648817100000-1.png").unwrap();
        assert_eq!((bare.timestamp, bare.tile), (1648817100000, 1));

        assert!(FrameLocator::parse("canvas.png").is_err());
        assert!(FrameLocator::parse("1648817087221-16.png").is_err());
    }

    #[test]
    fn scan_skips_other_files_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["2000-1.png", "1000-0.png", "2000-0.png", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let scan = scan_frames(dir.path()).unwrap();
        let keys: Vec<(i64, u8)> = scan.frames.iter().map(|f| (f.timestamp, f.tile)).collect();
        assert_eq!(keys, vec![(1000, 0), (2000, 0), (2000, 1)]);
        assert_eq!(scan.bytes, 3);
    }
}
