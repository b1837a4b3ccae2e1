use colors_transform::Color;

use crate::RasterError;

/// Transparent sentinel plus the 32 drawable colors.
pub const PALETTE_LEN: usize = 33;

pub const PLACE_HEX_COLORS: [&str; 32] = [
    "#6D001A", "#BE0039", "#FF4500", "#FFA800", "#FFD635", "#FFF8B8", "#00A368", "#00CC78",
    "#7EED56", "#00756F", "#009EAA", "#00CCC0", "#2450A4", "#3690EA", "#51E9F4", "#493AC1",
    "#6A5CFF", "#94B3FF", "#811E9F", "#B44AC0", "#E4ABFF", "#DE107F", "#FF3881", "#FF99AA",
    "#6D482F", "#9C6926", "#FFB470", "#000000", "#515252", "#898D90", "#D4D7D9", "#FFFFFF",
];

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// RGBA entries of an indexed raster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Palette(Vec<[u8; 4]>);

impl Palette {
    pub fn new(colors: Vec<[u8; 4]>) -> Self {
        Palette(colors)
    }

    /// Parses `#RRGGBB` strings into opaque entries, prefixed with a
    /// transparent entry at index 0.
    pub fn from_hex<S: AsRef<str>>(colors: &[S]) -> Result<Self, RasterError> {
        let mut entries = Vec::with_capacity(colors.len() + 1);
        entries.push(TRANSPARENT);
        for color_str in colors {
            entries.push(parse_hex(color_str.as_ref())?);
        }
        Ok(Palette(entries))
    }

    /// The 33-entry palette used by the canvas captures.
    pub fn place() -> Self {
        let mut entries = vec![TRANSPARENT];
        entries.extend(PLACE_HEX_COLORS.iter().filter_map(|c| parse_hex(c).ok()));
        Palette(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn colors(&self) -> &[[u8; 4]] {
        &self.0
    }

    pub fn get(&self, index: u8) -> Option<[u8; 4]> {
        self.0.get(index as usize).copied()
    }

    pub fn is_transparent(&self, index: u8) -> bool {
        matches!(self.get(index), Some([_, _, _, 0]))
    }

    /// Palette of a shifted delta frame: a transparent "unchanged" entry in
    /// front of every base entry.
    pub fn with_transparent_prefix(&self) -> Palette {
        let mut entries = Vec::with_capacity(self.0.len() + 1);
        entries.push(TRANSPARENT);
        entries.extend_from_slice(&self.0);
        Palette(entries)
    }

    pub fn hex(&self, index: u8) -> Option<String> {
        self.get(index)
            .map(|[r, g, b, _]| format!("#{:02X}{:02X}{:02X}", r, g, b))
    }
}

fn parse_hex(color_str: &str) -> Result<[u8; 4], RasterError> {
    let color = colors_transform::Rgb::from_hex_str(color_str)
        .map_err(|_| RasterError::BadColor(color_str.to_string()))?;
    Ok([
        color.get_red() as u8,
        color.get_green() as u8,
        color.get_blue() as u8,
        0xff,
    ])
}
