//! Visual Sources
//!
//! Still images and looping animations, decoded and scaled to the logical
//! grid on a background thread. Until a load finishes the slot reports
//! "not ready" and the compositor draws nothing for that layer.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use image::codecs::webp::WebPDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AssetError;

/// Frames with no delay would spin; browsers fall back to roughly this.
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

/// How a layer's file should be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Still,
    /// Animated WebP played in a loop.
    Animation,
}

/// A decoded source, already scaled to the logical grid.
#[derive(Clone, Debug)]
pub enum Visual {
    Still(RgbaImage),
    Animation {
        frames: Vec<RgbaImage>,
        delays: Vec<Duration>,
        total: Duration,
    },
}

impl Visual {
    pub fn animation(frames: Vec<(RgbaImage, Duration)>) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        let (frames, delays): (Vec<_>, Vec<_>) = frames
            .into_iter()
            .map(|(img, d)| (img, if d.is_zero() { DEFAULT_FRAME_DELAY } else { d }))
            .unzip();
        let total = delays.iter().sum();
        Some(Self::Animation {
            frames,
            delays,
            total,
        })
    }

    /// The image to draw `elapsed` into playback. Animations loop.
    pub fn frame_at(&self, elapsed: Duration) -> &RgbaImage {
        match self {
            Self::Still(img) => img,
            Self::Animation {
                frames,
                delays,
                total,
            } => {
                let mut t = Duration::from_nanos((elapsed.as_nanos() % total.as_nanos()) as u64);
                for (frame, delay) in frames.iter().zip(delays) {
                    if t < *delay {
                        return frame;
                    }
                    t -= *delay;
                }
                // Unreachable unless rounding leaves a remainder
                &frames[frames.len() - 1]
            }
        }
    }
}

/// Decode `path` and scale every frame to exactly `width` x `height`.
pub fn load_visual(path: &Path, kind: SourceKind, width: u32, height: u32) -> Result<Visual, AssetError> {
    let scale = |img: RgbaImage| {
        if img.dimensions() == (width, height) {
            img
        } else {
            imageops::resize(&img, width, height, FilterType::Triangle)
        }
    };

    match kind {
        SourceKind::Still => {
            let img = image::open(path).map_err(|source| AssetError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Visual::Still(scale(img.to_rgba8())))
        }
        SourceKind::Animation => {
            let file = File::open(path).map_err(|source| AssetError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let decode_err = |source| AssetError::Decode {
                path: path.to_path_buf(),
                source,
            };
            let decoder = WebPDecoder::new(BufReader::new(file)).map_err(decode_err)?;
            let frames = decoder.into_frames().collect_frames().map_err(decode_err)?;

            let frames = frames
                .into_iter()
                .map(|frame| {
                    let delay = Duration::from(frame.delay());
                    (scale(frame.into_buffer()), delay)
                })
                .collect();
            Visual::animation(frames).ok_or_else(|| AssetError::Empty {
                path: path.to_path_buf(),
            })
        }
    }
}

enum SlotState {
    Loading(mpsc::Receiver<Result<Visual, AssetError>>),
    Ready(Visual),
    Failed,
}

/// One layer's source and its load progress.
pub struct AssetSlot {
    path: PathBuf,
    state: SlotState,
}

impl AssetSlot {
    /// Start loading on a background thread.
    pub fn spawn(path: PathBuf, kind: SourceKind, width: u32, height: u32) -> Self {
        let (tx, rx) = mpsc::channel();
        let thread_path = path.clone();
        std::thread::spawn(move || {
            let _ = tx.send(load_visual(&thread_path, kind, width, height));
        });
        Self {
            path,
            state: SlotState::Loading(rx),
        }
    }

    /// A slot whose source is already decoded.
    pub fn ready(path: impl Into<PathBuf>, visual: Visual) -> Self {
        Self {
            path: path.into(),
            state: SlotState::Ready(visual),
        }
    }

    /// A loading slot completed through the returned sender.
    pub fn pending(path: impl Into<PathBuf>) -> (Self, mpsc::Sender<Result<Visual, AssetError>>) {
        let (tx, rx) = mpsc::channel();
        let slot = Self {
            path: path.into(),
            state: SlotState::Loading(rx),
        };
        (slot, tx)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pick up a finished load, if any. Never blocks.
    pub fn poll(&mut self) {
        let SlotState::Loading(rx) = &self.state else {
            return;
        };
        let next = match rx.try_recv() {
            Ok(Ok(visual)) => {
                info!("Loaded {}", self.path.display());
                SlotState::Ready(visual)
            }
            Ok(Err(e)) => {
                warn!("Layer disabled: {}", e);
                SlotState::Failed
            }
            Err(mpsc::TryRecvError::Empty) => return,
            Err(mpsc::TryRecvError::Disconnected) => {
                warn!(
                    "Layer disabled: {}",
                    AssetError::LoaderGone {
                        path: self.path.clone()
                    }
                );
                SlotState::Failed
            }
        };
        self.state = next;
    }

    pub fn visual(&self) -> Option<&Visual> {
        match &self.state {
            SlotState::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, SlotState::Loading(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, SlotState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(px))
    }

    #[test]
    fn animation_loops_by_delay() {
        let anim = Visual::animation(vec![
            (solid(1, 1, [1, 0, 0, 255]), Duration::from_millis(50)),
            (solid(1, 1, [2, 0, 0, 255]), Duration::from_millis(150)),
        ])
        .unwrap();

        let first = |ms| anim.frame_at(Duration::from_millis(ms)).get_pixel(0, 0)[0];
        assert_eq!(first(0), 1);
        assert_eq!(first(49), 1);
        assert_eq!(first(50), 2);
        assert_eq!(first(199), 2);
        assert_eq!(first(200), 1);
        assert_eq!(first(1_060), 2);
    }

    #[test]
    fn zero_delays_fall_back() {
        let anim = Visual::animation(vec![
            (solid(1, 1, [1, 0, 0, 255]), Duration::ZERO),
            (solid(1, 1, [2, 0, 0, 255]), Duration::ZERO),
        ])
        .unwrap();
        assert_eq!(anim.frame_at(DEFAULT_FRAME_DELAY).get_pixel(0, 0)[0], 2);
        assert!(Visual::animation(Vec::new()).is_none());
    }

    #[test]
    fn still_is_scaled_to_grid() {
        let dir = std::env::temp_dir().join(format!("dmd-sim-asset-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("still.png");
        solid(8, 4, [10, 20, 30, 255]).save(&path).unwrap();

        let visual = load_visual(&path, SourceKind::Still, 4, 2).unwrap();
        let img = visual.frame_at(Duration::ZERO);
        assert_eq!(img.dimensions(), (4, 2));
        let px = img.get_pixel(3, 1).0;
        for (got, want) in px.iter().zip([10u8, 20, 30, 255]) {
            assert!(got.abs_diff(want) <= 1, "{px:?}");
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn animated_webp_keeps_frame_delays() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/two-frames.webp");
        let visual = load_visual(&path, SourceKind::Animation, 8, 4).unwrap();

        let Visual::Animation {
            frames,
            delays,
            total,
        } = &visual
        else {
            panic!("expected an animation, got {visual:?}");
        };
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.dimensions() == (8, 4)));
        assert_eq!(delays, &[Duration::from_millis(70), Duration::from_millis(130)]);
        assert_eq!(*total, Duration::from_millis(200));

        assert!(std::ptr::eq(visual.frame_at(Duration::from_millis(69)), &frames[0]));
        assert!(std::ptr::eq(visual.frame_at(Duration::from_millis(70)), &frames[1]));
        assert!(std::ptr::eq(visual.frame_at(Duration::from_millis(205)), &frames[0]));
    }

    #[test]
    fn missing_file_disables_layer() {
        let mut slot = AssetSlot::spawn(
            PathBuf::from("/definitely/not/here.webp"),
            SourceKind::Animation,
            4,
            2,
        );
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while slot.is_loading() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
            slot.poll();
        }
        assert!(slot.is_failed());
        assert!(slot.visual().is_none());
    }

    #[test]
    fn pending_slot_becomes_ready() {
        let (mut slot, tx) = AssetSlot::pending("later.webp");
        slot.poll();
        assert!(slot.is_loading());
        tx.send(Ok(Visual::Still(solid(1, 1, [0; 4])))).unwrap();
        slot.poll();
        assert!(slot.visual().is_some());
    }
}
