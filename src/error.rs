//! Error types
//!
//! One enum per concern. Configuration errors are fatal at startup, dispatch
//! errors are fatal for a single tick, asset errors only disable one layer.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Inconsistent or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{what} must be non-zero")]
    ZeroDimension { what: &'static str },

    /// A row or column of dot blocks does not fit the output surface.
    #[error("{axis} axis needs {needed} output pixels but the output has {available}")]
    GeometryOverflow {
        axis: &'static str,
        needed: u64,
        available: u32,
    },

    #[error("output of {pixels} pixels cannot be addressed by the kernel")]
    OutputTooLarge { pixels: u64 },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unknown log level: {0}")]
    LogLevel(String),
}

/// A pixel buffer whose length disagrees with its declared size.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected {expected} bytes for a {width}x{height} frame, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Failure of a single dispatch. The tick is abandoned, nothing is presented.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no compatible compute adapter found")]
    NoAdapter,

    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("device out of memory: {0}")]
    OutOfMemory(String),

    #[error("device validation error: {0}")]
    Validation(String),

    #[error("staging buffer mapping failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("staging buffer map callback was dropped")]
    MapDropped,

    #[error("device did not complete the dispatch within {0:?}")]
    Timeout(Duration),

    #[error("dispatch cancelled")]
    Cancelled,

    #[error("{what} needs {needed} bytes, device allows {max}")]
    Limits {
        what: &'static str,
        needed: u64,
        max: u64,
    },

    #[error("frame is {actual_width}x{actual_height}, dispatcher expects {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A visual source that could not be loaded.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("{path} contains no frames")]
    Empty { path: PathBuf },

    #[error("loader for {path} exited without a result")]
    LoaderGone { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages() {
        let err = ConfigError::GeometryOverflow {
            axis: "horizontal",
            needed: 1285,
            available: 1280,
        };
        assert_eq!(
            err.to_string(),
            "horizontal axis needs 1285 output pixels but the output has 1280"
        );

        let err = ConfigError::ZeroDimension { what: "dot width" };
        assert_eq!(err.to_string(), "dot width must be non-zero");
    }

    #[test]
    fn dispatch_error_wraps_frame_error() {
        let err: DispatchError = FrameError::SizeMismatch {
            width: 2,
            height: 1,
            expected: 8,
            actual: 4,
        }
        .into();
        assert!(err.to_string().contains("expected 8 bytes"));
    }
}
