/// Size of one raw event record on disk.
pub const RECORD_LEN: usize = 8;

/// The top bit of the time word carries x bit 11, leaving 31 bits of time.
pub const MAX_TIME_OFFSET: u32 = (1 << 31) - 1;

/// One pixel changing color. Colors are 5-bit event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelEvent {
    pub time_offset: u32,
    pub x: u16,
    pub y: u16,
    pub new_color: u8,
    pub old_color: u8,
}

impl PixelEvent {
    // 4B pos+color: 11b x, 11b y, 5b new color, 5b old color
    // 4B time offset, little endian; its top bit is x bit 11
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let x = u32::from(self.x);
        let packed = (x & 0x7ff)
            | (u32::from(self.y) & 0x7ff) << 11
            | (u32::from(self.new_color) & 31) << 22
            | (u32::from(self.old_color) & 31) << 27;

        let mut buf = [0u8; RECORD_LEN];
        buf[..4].copy_from_slice(&packed.to_le_bytes());
        buf[4..].copy_from_slice(&(self.time_offset & MAX_TIME_OFFSET).to_le_bytes());
        buf[7] = (buf[7] & 0x7f) | ((x >> 4) & 0x80) as u8;
        buf
    }

    pub fn decode(buf: &[u8; RECORD_LEN]) -> Self {
        let packed = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let time_offset = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7] & 0x7f]);

        PixelEvent {
            time_offset,
            x: ((packed & 0x7ff) | ((u32::from(buf[7]) << 4) & 0x800)) as u16,
            y: ((packed >> 11) & 0x7ff) as u16,
            new_color: ((packed >> 22) & 31) as u8,
            old_color: ((packed >> 27) & 31) as u8,
        }
    }
}
