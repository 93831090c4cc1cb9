/// Pixel layout of a frame stored in a frame channel.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Gray8 = 0,
    Bgr8 = 1,
    Rgb8 = 2,
}

impl FrameFormat {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(FrameFormat::Gray8),
            1 => Some(FrameFormat::Bgr8),
            2 => Some(FrameFormat::Rgb8),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Gray8 => 1,
            FrameFormat::Bgr8 | FrameFormat::Rgb8 => 3,
        }
    }
}

/// Shape and type metadata of a frame; together with the byte range in the
/// channel header this fully describes the pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameShape {
    pub fn new(width: u32, height: u32, format: FrameFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// A zero-copy view of the current round's frame, borrowed from the
/// consumer's segment mapping.
///
/// The borrow is valid only for this round: the producer may overwrite the
/// pixel bytes once the next round opens. Use `to_owned` when the data must
/// outlive the round.
#[derive(Debug)]
pub struct FrameView<'a> {
    pub shape: FrameShape,
    pub frame_number: u64,
    pub timestamp_ns: u64,
    pub pixels: &'a [u8],
}

impl FrameView<'_> {
    pub fn to_owned(&self) -> OwnedFrame {
        OwnedFrame {
            shape: self.shape,
            frame_number: self.frame_number,
            timestamp_ns: self.timestamp_ns,
            pixels: self.pixels.to_vec(),
        }
    }
}

/// A frame whose pixel bytes have been cloned out of the shared segment.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedFrame {
    pub shape: FrameShape,
    pub frame_number: u64,
    pub timestamp_ns: u64,
    pub pixels: Vec<u8>,
}
