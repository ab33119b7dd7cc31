//! Dot Geometry
//!
//! How one logical DMD pixel maps onto the output surface: a `dot_width` x
//! `dot_height` block followed by `h_gap` blank columns and `v_gap` blank rows.
//! A layout is validated once, at construction, so the kernel never has to
//! bounds-check a write.

use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Size of a dot and the spacing after it, in output pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DotGeometry {
    pub dot_width: u32,
    pub dot_height: u32,
    pub h_gap: u32,
    pub v_gap: u32,
}

impl DotGeometry {
    pub const fn new(dot_width: u32, dot_height: u32, h_gap: u32, v_gap: u32) -> Self {
        Self {
            dot_width,
            dot_height,
            h_gap,
            v_gap,
        }
    }

    /// One output pixel per logical pixel, no spacing.
    pub const fn copy() -> Self {
        Self::new(1, 1, 0, 0)
    }

    /// Horizontal distance between the left edges of neighbouring dots.
    pub const fn pitch_x(&self) -> u32 {
        self.dot_width + self.h_gap
    }

    /// Vertical distance between the top edges of neighbouring dots.
    pub const fn pitch_y(&self) -> u32 {
        self.dot_height + self.v_gap
    }
}

impl Default for DotGeometry {
    fn default() -> Self {
        Self::new(4, 4, 1, 1)
    }
}

/// A validated pairing of logical grid, dot geometry, and output surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmdLayout {
    logical: UVec2,
    output: UVec2,
    geometry: DotGeometry,
}

impl DmdLayout {
    /// Check that every dot block lands inside the output.
    ///
    /// The last block must end inside the surface:
    /// `(W_l-1)*(dw+hg) + dw <= W_o` and `(H_l-1)*(dh+vg) + dh <= H_o`.
    /// The trailing gap after the last dot may be clipped. The output must
    /// also be small enough for 32-bit byte addressing on the device.
    pub fn new(logical: UVec2, output: UVec2, geometry: DotGeometry) -> Result<Self, ConfigError> {
        let nonzero = [
            (logical.x, "logical width"),
            (logical.y, "logical height"),
            (output.x, "output width"),
            (output.y, "output height"),
            (geometry.dot_width, "dot width"),
            (geometry.dot_height, "dot height"),
        ];
        for (value, what) in nonzero {
            if value == 0 {
                return Err(ConfigError::ZeroDimension { what });
            }
        }

        let needed_x = last_block_end(logical.x, geometry.dot_width, geometry.h_gap);
        if needed_x > u64::from(output.x) {
            return Err(ConfigError::GeometryOverflow {
                axis: "horizontal",
                needed: needed_x,
                available: output.x,
            });
        }

        let needed_y = last_block_end(logical.y, geometry.dot_height, geometry.v_gap);
        if needed_y > u64::from(output.y) {
            return Err(ConfigError::GeometryOverflow {
                axis: "vertical",
                needed: needed_y,
                available: output.y,
            });
        }

        // Byte sizes must also fit, the device buffers are sized in bytes.
        let pixels = u64::from(output.x) * u64::from(output.y);
        if pixels * 4 > u64::from(u32::MAX) {
            return Err(ConfigError::OutputTooLarge { pixels });
        }

        Ok(Self {
            logical,
            output,
            geometry,
        })
    }

    /// The observed panel: 256x78 dots of 4x4 with 1 pixel gaps on 1280x390.
    pub fn observed() -> Self {
        Self {
            logical: UVec2::new(256, 78),
            output: UVec2::new(1280, 390),
            geometry: DotGeometry::default(),
        }
    }

    pub fn logical_width(&self) -> u32 {
        self.logical.x
    }

    pub fn logical_height(&self) -> u32 {
        self.logical.y
    }

    pub fn output_width(&self) -> u32 {
        self.output.x
    }

    pub fn output_height(&self) -> u32 {
        self.output.y
    }

    pub fn geometry(&self) -> DotGeometry {
        self.geometry
    }

    pub fn logical_pixels(&self) -> usize {
        self.logical.x as usize * self.logical.y as usize
    }

    pub fn output_pixels(&self) -> usize {
        self.output.x as usize * self.output.y as usize
    }

    pub fn logical_bytes(&self) -> u64 {
        self.logical_pixels() as u64 * 4
    }

    pub fn output_bytes(&self) -> u64 {
        self.output_pixels() as u64 * 4
    }

    /// Top-left output pixel of the block for logical pixel `(x, y)`.
    pub fn block_origin(&self, x: u32, y: u32) -> UVec2 {
        UVec2::new(x * self.geometry.pitch_x(), y * self.geometry.pitch_y())
    }

    /// Word index of the block's first output pixel:
    /// `x*dw + x*hg + y*W_o*(dh+vg)`.
    pub fn block_start(&self, x: u32, y: u32) -> usize {
        let origin = self.block_origin(x, y);
        origin.x as usize + origin.y as usize * self.output.x as usize
    }
}

/// Output pixels spanned along one axis, up to the end of the last dot.
fn last_block_end(count: u32, dot: u32, gap: u32) -> u64 {
    (u64::from(count) - 1) * (u64::from(dot) + u64::from(gap)) + u64::from(dot)
}
