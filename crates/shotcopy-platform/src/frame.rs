use std::fmt;

/// wl_shm format codes. ARGB/XRGB use the protocol's own enum values, the rest are DRM fourcc.
pub const SHM_FORMAT_ARGB8888: u32 = 0;
pub const SHM_FORMAT_XRGB8888: u32 = 1;
pub const SHM_FORMAT_ABGR8888: u32 = 0x3432_4241;
pub const SHM_FORMAT_XBGR8888: u32 = 0x3432_4258;

/// Bytes per source pixel for every supported format
pub const BYTES_PER_PIXEL: u32 = 4;

/// Memory byte order of a supported 32-bit little-endian format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFamily {
    /// Blue, Green, Red, Alpha/padding (ARGB8888, XRGB8888)
    Bgrx,
    /// Red, Green, Blue, Alpha/padding (ABGR8888, XBGR8888)
    Rgbx,
}

impl PixelFamily {
    pub fn from_format(format: u32) -> Option<Self> {
        match format {
            SHM_FORMAT_ARGB8888 | SHM_FORMAT_XRGB8888 => Some(PixelFamily::Bgrx),
            SHM_FORMAT_ABGR8888 | SHM_FORMAT_XBGR8888 => Some(PixelFamily::Rgbx),
            _ => None,
        }
    }

    /// Byte offsets of red, green and blue inside one source pixel
    pub fn rgb_offsets(self) -> [usize; 3] {
        match self {
            PixelFamily::Bgrx => [2, 1, 0],
            PixelFamily::Rgbx => [0, 1, 2],
        }
    }
}

/// Geometry of a shared buffer as the compositor sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    pub format: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

impl BufferGeometry {
    /// stride * height, or None on overflow
    pub fn byte_size(&self) -> Option<usize> {
        (self.stride as usize).checked_mul(self.height as usize)
    }
}

impl fmt::Display for BufferGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} stride={} format=0x{:08x}",
            self.width, self.height, self.stride, self.format
        )
    }
}

/// Frame metadata negotiated before pixel delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub format: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    /// Rows are stored bottom-to-top
    pub y_invert: bool,
}

impl FrameDescriptor {
    pub fn geometry(&self) -> BufferGeometry {
        BufferGeometry {
            format: self.format,
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }

    pub fn byte_size(&self) -> Option<usize> {
        self.geometry().byte_size()
    }
}

/// Presentation time carried by the ready event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTimestamp {
    pub secs: u64,
    pub nanos: u32,
}

impl FrameTimestamp {
    pub fn from_parts(tv_sec_hi: u32, tv_sec_lo: u32, tv_nsec: u32) -> Self {
        Self {
            secs: (u64::from(tv_sec_hi) << 32) | u64::from(tv_sec_lo),
            nanos: tv_nsec,
        }
    }
}

/// Events the compositor emits for a single frame capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    BufferDescribed {
        format: u32,
        width: u32,
        height: u32,
        stride: u32,
    },
    FlagsSet {
        y_invert: bool,
    },
    Ready {
        timestamp: FrameTimestamp,
    },
    Failed,
    Damage {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    BufferDone,
}

impl FrameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FrameEvent::BufferDescribed { .. } => "buffer",
            FrameEvent::FlagsSet { .. } => "flags",
            FrameEvent::Ready { .. } => "ready",
            FrameEvent::Failed => "failed",
            FrameEvent::Damage { .. } => "damage",
            FrameEvent::BufferDone => "buffer_done",
        }
    }
}

/// Row-major RGB image, 3 bytes per pixel, no row padding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbImage {
    /// Packed RGB bytes of row `y`, or `None` past the last row
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let row_len = self.width as usize * 3;
        let start = y as usize * row_len;
        self.data.get(start..start + row_len)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width {
            return None;
        }
        let offset = x as usize * 3;
        match self.row(y)?.get(offset..offset + 3)? {
            &[r, g, b] => Some([r, g, b]),
            _ => None,
        }
    }
}
