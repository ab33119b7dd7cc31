//! Frame Buffers
//!
//! Row-major, top-to-bottom RGBA buffers. Both frame kinds keep their pixels
//! as packed words so the kernel and the device see the same layout; byte
//! views are taken with `bytemuck` when uploading or presenting.

use crate::color::PackedColor;
use crate::error::FrameError;

/// The low-resolution surface produced by the compositor each tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicalFrame {
    width: u32,
    height: u32,
    words: Vec<u32>,
}

impl LogicalFrame {
    /// Wrap composited RGBA bytes. The length must be exactly `width*height*4`.
    pub fn from_rgba(width: u32, height: u32, bytes: &[u8]) -> Result<Self, FrameError> {
        let words = words_from_bytes(width, height, bytes)?;
        Ok(Self {
            width,
            height,
            words,
        })
    }

    pub fn from_pixels(width: u32, height: u32, pixels: &[PackedColor]) -> Result<Self, FrameError> {
        check_len(width, height, pixels.len() * 4)?;
        Ok(Self {
            width,
            height,
            words: pixels.iter().map(|p| p.0).collect(),
        })
    }

    pub fn filled(width: u32, height: u32, color: PackedColor) -> Self {
        Self {
            width,
            height,
            words: vec![color.0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn pixel(&self, x: u32, y: u32) -> PackedColor {
        PackedColor(self.words[x as usize + y as usize * self.width as usize])
    }
}

/// The upscaled dot image handed to the presenter. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpandedFrame {
    width: u32,
    height: u32,
    words: Vec<u32>,
}

impl ExpandedFrame {
    pub(crate) fn from_words(width: u32, height: u32, words: Vec<u32>) -> Result<Self, FrameError> {
        check_len(width, height, words.len() * 4)?;
        Ok(Self {
            width,
            height,
            words,
        })
    }

    pub fn from_rgba(width: u32, height: u32, bytes: &[u8]) -> Result<Self, FrameError> {
        let words = words_from_bytes(width, height, bytes)?;
        Ok(Self {
            width,
            height,
            words,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn pixel(&self, x: u32, y: u32) -> PackedColor {
        PackedColor(self.words[x as usize + y as usize * self.width as usize])
    }
}

fn check_len(width: u32, height: u32, actual: usize) -> Result<(), FrameError> {
    let expected = width as usize * height as usize * 4;
    if actual != expected {
        return Err(FrameError::SizeMismatch {
            width,
            height,
            expected,
            actual,
        });
    }
    Ok(())
}

fn words_from_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Vec<u32>, FrameError> {
    check_len(width, height, bytes.len())?;
    Ok(bytemuck::pod_collect_to_vec::<u8, u32>(bytes))
}
