//! Simulated pinball dot-matrix display.
//!
//! Layered still and animated sources are composited onto a small logical
//! grid, then each logical pixel is expanded into a block of output pixels
//! with gaps between blocks. The expansion runs as a compute pass on the GPU
//! or as the same kernel on host threads.

pub mod asset;
pub mod color;
pub mod compositor;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod gpu;
pub mod kernel;
pub mod present;
pub mod tick;
