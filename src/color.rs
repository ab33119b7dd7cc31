//! Packed Colors
//!
//! A DMD pixel travels through the pipeline as one 32-bit word: the four
//! RGBA bytes of the frame buffer read as a little-endian `u32`. The kernel
//! never reorders channels, so whatever packing goes in comes out.

use serde::{Deserialize, Serialize};

/// One pixel as the kernel sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackedColor(pub u32);

impl PackedColor {
    pub const fn from_rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self(u32::from_le_bytes([r, g, b, a]))
    }

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self::from_rgba(r, g, b, 255)
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub const fn r(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub const fn g(self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    pub const fn b(self) -> u8 {
        ((self.0 >> 16) & 0xff) as u8
    }

    /// Alpha always sits in bits 24-31.
    pub const fn a(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// True when every color channel is below `threshold`. Alpha is ignored.
    pub const fn is_darker_than(self, threshold: u8) -> bool {
        self.r() < threshold && self.g() < threshold && self.b() < threshold
    }

    // Panel palette
    /// Unlit dot glow of a physical panel.
    pub const DMD_OFF: Self = Self(0xFF0F_0F0F);
    pub const TRANSPARENT: Self = Self(0);
    pub const RED: Self = Self::from_rgb(255, 0, 0);
    pub const BLUE: Self = Self::from_rgb(0, 0, 255);
}
