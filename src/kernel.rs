//! Dot Expansion Kernel
//!
//! For each logical pixel: optionally swap near-black for the panel's unlit
//! color, then fill that pixel's dot block in the output. Every block is
//! disjoint from every other, so invocations can run in any order on any
//! number of lanes. The same arithmetic is emitted as WGSL for the device.
//!
//! Gap pixels are never written. Callers initialize the output first.

use serde::{Deserialize, Serialize};

use crate::color::PackedColor;
use crate::frame::LogicalFrame;
use crate::geometry::DmdLayout;

/// Workgroup edge, must match `@workgroup_size` in the shader.
pub const WORKGROUP_SIZE: u32 = 8;

/// Near-black replacement, simulating the glow of unlit dots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Substitution {
    /// Channels strictly below this count as dark.
    pub threshold: u8,
    pub off_color: PackedColor,
}

impl Default for Substitution {
    fn default() -> Self {
        Self {
            threshold: 15,
            off_color: PackedColor::DMD_OFF,
        }
    }
}

/// The per-pixel transform bound to one layout.
#[derive(Clone, Copy, Debug)]
pub struct Kernel {
    layout: DmdLayout,
    substitution: Option<Substitution>,
}

impl Kernel {
    pub fn new(layout: DmdLayout, substitution: Option<Substitution>) -> Self {
        Self {
            layout,
            substitution,
        }
    }

    pub fn layout(&self) -> &DmdLayout {
        &self.layout
    }

    /// Background substitution step.
    pub fn transform_pixel(&self, pixel: PackedColor) -> PackedColor {
        match self.substitution {
            Some(s) if pixel.is_darker_than(s.threshold) => s.off_color,
            _ => pixel,
        }
    }

    /// One kernel invocation for logical pixel `(x, y)`, written the way the
    /// shader walks the block: contiguous columns, then jump to the next row.
    ///
    /// `input` holds `W_l*H_l` words, `output` holds `W_o*H_o` words.
    pub fn invoke(&self, x: u32, y: u32, input: &[u32], output: &mut [u32]) {
        let g = self.layout.geometry();
        let out_width = self.layout.output_width() as usize;
        let index = x as usize + y as usize * self.layout.logical_width() as usize;
        let pixel = self.transform_pixel(PackedColor(input[index])).0;

        let mut out = self.layout.block_start(x, y);
        for _row in 0..g.dot_height {
            for _col in 0..g.dot_width {
                output[out] = pixel;
                out += 1;
            }
            out += out_width - g.dot_width as usize;
        }
    }

    /// Expand a whole frame into `output`, one band of output rows per
    /// logical row, bands spread across `lanes` scoped threads.
    pub fn transform_into(&self, frame: &LogicalFrame, output: &mut [u32], lanes: usize) {
        let g = self.layout.geometry();
        let out_width = self.layout.output_width() as usize;
        let band_len = out_width * g.pitch_y() as usize;
        let logical_width = self.layout.logical_width() as usize;

        let mut bands: Vec<(&[u32], &mut [u32])> = frame
            .words()
            .chunks(logical_width)
            .zip(output.chunks_mut(band_len))
            .collect();

        let per_lane = bands.len().div_ceil(lanes.max(1)).max(1);
        std::thread::scope(|scope| {
            for work in bands.chunks_mut(per_lane) {
                scope.spawn(move || {
                    for (row, band) in work.iter_mut() {
                        self.expand_row(row, band);
                    }
                });
            }
        });
    }

    fn expand_row(&self, row: &[u32], band: &mut [u32]) {
        let g = self.layout.geometry();
        let out_width = self.layout.output_width() as usize;
        let (dot_width, pitch_x) = (g.dot_width as usize, g.pitch_x() as usize);

        for (x, &word) in row.iter().enumerate() {
            let color = self.transform_pixel(PackedColor(word)).0;
            let left = x * pitch_x;
            for r in 0..g.dot_height as usize {
                let start = r * out_width + left;
                band[start..start + dot_width].fill(color);
            }
        }
    }

    /// WGSL source for this layout. Geometry is baked in as constants since
    /// it never changes after startup.
    pub fn wgsl(&self) -> String {
        let g = self.layout.geometry();
        let (substitute, threshold, off_color) = match self.substitution {
            Some(s) => (true, s.threshold, s.off_color.0),
            None => (false, 0, 0),
        };

        let mut src = String::with_capacity(KERNEL_SHADER.len() + 512);
        src.push_str(&format!("const LOGICAL_WIDTH: u32 = {}u;\n", self.layout.logical_width()));
        src.push_str(&format!("const LOGICAL_HEIGHT: u32 = {}u;\n", self.layout.logical_height()));
        src.push_str(&format!("const OUTPUT_WIDTH: u32 = {}u;\n", self.layout.output_width()));
        src.push_str(&format!("const DOT_WIDTH: u32 = {}u;\n", g.dot_width));
        src.push_str(&format!("const DOT_HEIGHT: u32 = {}u;\n", g.dot_height));
        src.push_str(&format!("const H_GAP: u32 = {}u;\n", g.h_gap));
        src.push_str(&format!("const V_GAP: u32 = {}u;\n", g.v_gap));
        src.push_str(&format!("const SUBSTITUTE: bool = {};\n", substitute));
        src.push_str(&format!("const DARK_THRESHOLD: u32 = {}u;\n", threshold));
        src.push_str(&format!("const OFF_COLOR: u32 = {}u;\n", off_color));
        src.push_str(KERNEL_SHADER);
        src
    }
}

const KERNEL_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> input_pixels: array<u32>;
@group(0) @binding(1) var<storage, read_write> output_pixels: array<u32>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    // Workgroups round the grid up
    if (id.x >= LOGICAL_WIDTH || id.y >= LOGICAL_HEIGHT) {
        return;
    }

    var pixel: u32 = input_pixels[id.x + id.y * LOGICAL_WIDTH];

    if (SUBSTITUTE) {
        let r = pixel & 255u;
        let g = (pixel >> 8u) & 255u;
        let b = (pixel >> 16u) & 255u;
        if (r < DARK_THRESHOLD && g < DARK_THRESHOLD && b < DARK_THRESHOLD) {
            pixel = OFF_COLOR;
        }
    }

    var index: u32 = id.x * DOT_WIDTH + id.x * H_GAP + id.y * OUTPUT_WIDTH * (DOT_HEIGHT + V_GAP);

    for (var row: u32 = 0u; row < DOT_HEIGHT; row = row + 1u) {
        for (var col: u32 = 0u; col < DOT_WIDTH; col = col + 1u) {
            output_pixels[index] = pixel;
            index = index + 1u;
        }
        index = index + OUTPUT_WIDTH - DOT_WIDTH;
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DotGeometry;
    use glam::UVec2;

    const GAP: u32 = 0xDEAD_BEEF;

    fn layout(lw: u32, lh: u32, ow: u32, oh: u32, g: DotGeometry) -> DmdLayout {
        DmdLayout::new(UVec2::new(lw, lh), UVec2::new(ow, oh), g).unwrap()
    }

    fn run(kernel: &Kernel, frame: &LogicalFrame, lanes: usize) -> Vec<u32> {
        let mut out = vec![GAP; kernel.layout().output_pixels()];
        kernel.transform_into(frame, &mut out, lanes);
        out
    }

    #[test]
    fn two_pixels_no_gap() {
        let kernel = Kernel::new(layout(2, 1, 4, 1, DotGeometry::new(2, 1, 0, 0)), None);
        let red = PackedColor::RED;
        let blue = PackedColor::BLUE;
        let frame = LogicalFrame::from_pixels(2, 1, &[red, blue]).unwrap();
        assert_eq!(run(&kernel, &frame, 1), vec![red.0, red.0, blue.0, blue.0]);
    }

    #[test]
    fn two_pixels_with_gap() {
        let kernel = Kernel::new(layout(2, 1, 5, 1, DotGeometry::new(2, 1, 1, 0)), None);
        let red = PackedColor::RED;
        let blue = PackedColor::BLUE;
        let frame = LogicalFrame::from_pixels(2, 1, &[red, blue]).unwrap();
        assert_eq!(
            run(&kernel, &frame, 2),
            vec![red.0, red.0, GAP, blue.0, blue.0]
        );
    }

    #[test]
    fn solid_frame_fills_every_dot_and_no_gap() {
        let l = DmdLayout::observed();
        let kernel = Kernel::new(l, None);
        let color = PackedColor::from_rgba(200, 100, 50, 128);
        let frame = LogicalFrame::filled(l.logical_width(), l.logical_height(), color);
        let out = run(&kernel, &frame, 4);

        let g = l.geometry();
        for oy in 0..l.output_height() {
            for ox in 0..l.output_width() {
                let in_dot = ox % g.pitch_x() < g.dot_width && oy % g.pitch_y() < g.dot_height;
                let word = out[(ox + oy * l.output_width()) as usize];
                if in_dot {
                    assert_eq!(word, color.0, "dot pixel ({ox}, {oy})");
                } else {
                    assert_eq!(word, GAP, "gap pixel ({ox}, {oy})");
                }
            }
        }
    }

    #[test]
    fn black_becomes_off_color_regardless_of_alpha() {
        let kernel = Kernel::new(
            layout(2, 1, 10, 5, DotGeometry::default()),
            Some(Substitution::default()),
        );
        let frame = LogicalFrame::from_pixels(
            2,
            1,
            &[PackedColor::from_rgba(0, 0, 0, 0), PackedColor::from_rgba(0, 0, 0, 255)],
        )
        .unwrap();
        let out = run(&kernel, &frame, 1);
        for x in 0..2 {
            for r in 0..4 {
                for c in 0..4 {
                    let i = (x * 5 + c + r * 10) as usize;
                    assert_eq!(out[i], PackedColor::DMD_OFF.0);
                }
            }
        }
    }

    #[test]
    fn dim_but_visible_pixels_pass_through() {
        let kernel = Kernel::new(DmdLayout::observed(), Some(Substitution::default()));
        let dim = PackedColor::from_rgb(20, 20, 20);
        assert_eq!(kernel.transform_pixel(dim), dim);
        let edge = PackedColor::from_rgb(14, 14, 15);
        assert_eq!(kernel.transform_pixel(edge), edge);
        let dark = PackedColor::from_rgb(14, 14, 14);
        assert_eq!(kernel.transform_pixel(dark), PackedColor::DMD_OFF);
    }

    #[test]
    fn blocks_are_disjoint_and_in_bounds() {
        let l = layout(5, 3, 17, 11, DotGeometry::new(3, 2, 0, 1));
        let kernel = Kernel::new(l, None);
        let mut owner = vec![None; l.output_pixels()];

        for y in 0..l.logical_height() {
            for x in 0..l.logical_width() {
                let id = x + y * l.logical_width();
                let input = vec![id; l.logical_pixels()];
                let mut out = vec![u32::MAX; l.output_pixels()];
                kernel.invoke(x, y, &input, &mut out);

                let written: Vec<usize> = (0..out.len()).filter(|&i| out[i] == id).collect();
                assert_eq!(written.len(), 6);
                for i in written {
                    assert!(owner[i].is_none(), "pixel {i} written twice");
                    owner[i] = Some(id);
                }
            }
        }
    }

    #[test]
    fn parallel_matches_single_invocations() {
        let l = layout(7, 5, 30, 21, DotGeometry::new(3, 3, 1, 1));
        let kernel = Kernel::new(l, Some(Substitution::default()));
        let pixels: Vec<PackedColor> = (0..l.logical_pixels() as u32)
            .map(|i| PackedColor::from_rgba((i * 3) as u8, (i * 7) as u8, (i * 11) as u8, 255))
            .collect();
        let frame = LogicalFrame::from_pixels(7, 5, &pixels).unwrap();

        let mut expected = vec![GAP; l.output_pixels()];
        for y in 0..5 {
            for x in 0..7 {
                kernel.invoke(x, y, frame.words(), &mut expected);
            }
        }

        for lanes in [1, 2, 3, 16] {
            assert_eq!(run(&kernel, &frame, lanes), expected, "lanes = {lanes}");
        }
    }

    #[test]
    fn copy_geometry_is_identity() {
        let kernel = Kernel::new(layout(3, 2, 3, 2, DotGeometry::copy()), None);
        let pixels: Vec<PackedColor> = (1..=6).map(|i| PackedColor(i * 0x0101_0101)).collect();
        let frame = LogicalFrame::from_pixels(3, 2, &pixels).unwrap();
        assert_eq!(run(&kernel, &frame, 2), frame.words());
    }

    #[test]
    fn wgsl_bakes_layout_constants() {
        let kernel = Kernel::new(DmdLayout::observed(), Some(Substitution::default()));
        let src = kernel.wgsl();
        assert!(src.contains("const LOGICAL_WIDTH: u32 = 256u;"));
        assert!(src.contains("const OUTPUT_WIDTH: u32 = 1280u;"));
        assert!(src.contains("const SUBSTITUTE: bool = true;"));
        assert!(src.contains("const OFF_COLOR: u32 = 4279176975u;"));
        assert!(src.contains("fn main("));
    }
}
