use std::{fmt, str::FromStr};

use structures::{SnapshotKey, MAX_TILES};

use crate::ArchiveError;

/// Parsed form of `{ts}-{tile}[-{base}[-{secondaryBase}]].png`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryName {
    pub timestamp: i64,
    pub tile: u8,
    pub base: Option<i64>,
    pub secondary_base: Option<i64>,
}

impl EntryName {
    pub fn full(timestamp: i64, tile: u8) -> Self {
        EntryName {
            timestamp,
            tile,
            base: None,
            secondary_base: None,
        }
    }

    pub fn delta(timestamp: i64, tile: u8, base: i64, secondary_base: Option<i64>) -> Self {
        EntryName {
            timestamp,
            tile,
            base: Some(base),
            secondary_base,
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.tile, self.timestamp)
    }

    pub fn base_key(&self) -> Option<SnapshotKey> {
        self.base.map(|ts| SnapshotKey::new(self.tile, ts))
    }

    pub fn secondary_base_key(&self) -> Option<SnapshotKey> {
        self.secondary_base.map(|ts| SnapshotKey::new(self.tile, ts))
    }
}

impl FromStr for EntryName {
    type Err = ArchiveError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        let stem = file_name
            .strip_suffix(".png")
            .ok_or_else(|| ArchiveError::malformed(name, "not a .png entry"))?;

        let comps: Vec<&str> = stem.split('-').collect();
        if comps.len() < 2 || comps.len() > 4 {
            return Err(ArchiveError::malformed(
                name,
                format!("expected 2 to 4 components, found {}", comps.len()),
            ));
        }

        let number = |s: &str| {
            s.parse::<i64>()
                .map_err(|_| ArchiveError::malformed(name, format!("{:?} is not a number", s)))
        };

        let timestamp = number(comps[0])?;
        let tile = comps[1]
            .parse::<u8>()
            .ok()
            .filter(|tile| *tile < MAX_TILES)
            .ok_or_else(|| ArchiveError::malformed(name, format!("bad tile {:?}", comps[1])))?;
        let base = comps.get(2).map(|s| number(s)).transpose()?;
        let secondary_base = comps.get(3).map(|s| number(s)).transpose()?;

        Ok(EntryName {
            timestamp,
            tile,
            base,
            secondary_base,
        })
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp, self.tile)?;
        if let Some(base) = self.base {
            write!(f, "-{}", base)?;
            if let Some(secondary) = self.secondary_base {
                write!(f, "-{}", secondary)?;
            }
        }
        write!(f, ".png")
    }
}

/// One indexed snapshot inside an archive source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: SnapshotKey,
    /// Index of the archive this entry lives in, in the order sources were added.
    pub source: usize,
    pub entry_name: String,
    pub base: Option<SnapshotKey>,
    pub secondary_base: Option<SnapshotKey>,
}

impl SnapshotRecord {
    pub fn is_full_frame(&self) -> bool {
        self.base.is_none()
    }

    pub fn timestamp(&self) -> i64 {
        self.key.timestamp()
    }

    pub fn tile(&self) -> u8 {
        self.key.tile()
    }
}

/// A finished payload ready to be committed to a zip archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub timestamp_ms: i64,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_shape() {
        let full: EntryName = "1648817087221-2.png".parse().unwrap();
        assert_eq!(full, EntryName::full(1648817087221, 2));

        let delta: EntryName = "canvas/1648817090000-2-1648817087221.png".parse().unwrap();
        assert_eq!(delta.base_key(), Some(SnapshotKey::new(2, 1648817087221)));
        assert_eq!(delta.secondary_base, None);

        let tick: EntryName = "1648817095000-1-1648817090000-1648817087221.png".parse().unwrap();
        assert_eq!(tick.base, Some(1648817090000));
        assert_eq!(tick.secondary_base_key(), Some(SnapshotKey::new(1, 1648817087221)));
        assert_eq!(tick.to_string(), "1648817095000-1-1648817090000-1648817087221.png");
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in [
            "meta",
            "123.png",
            "abc-1.png",
            "123-x.png",
            "123-16.png",
            "1-2-3-4-5.png",
            "123-1-zz.png",
        ] {
            assert!(
                matches!(bad.parse::<EntryName>(), Err(ArchiveError::MalformedEntryName { .. })),
                "{} should not parse",
                bad
            );
        }
    }
}
