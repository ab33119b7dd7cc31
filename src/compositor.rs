//! Frame Compositor
//!
//! Layers visual sources bottom to top onto a transparent surface the size
//! of the logical grid, with straight-alpha source-over blending, and hands
//! the result over as a `LogicalFrame`.

use std::time::Duration;

use image::RgbaImage;
use instant::Instant;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asset::AssetSlot;
use crate::frame::LogicalFrame;

/// What to do when a layer's source has not finished loading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetPolicy {
    /// Draw nothing for that layer this tick.
    #[default]
    Skip,
    /// Abandon the whole tick until every layer is ready or has failed.
    Wait,
}

/// Playback position of animated layers.
#[derive(Clone, Copy, Debug, Default)]
struct PlaybackClock {
    started: Option<Instant>,
}

impl PlaybackClock {
    fn elapsed(&self, now: Instant) -> Duration {
        match self.started {
            Some(start) => now.saturating_duration_since(start),
            None => Duration::ZERO,
        }
    }
}

/// The offscreen drawing surface and its layer stack.
pub struct Compositor {
    width: u32,
    height: u32,
    layers: Vec<AssetSlot>,
    policy: AssetPolicy,
    clock: PlaybackClock,
    surface: Vec<u8>,
}

impl Compositor {
    pub fn new(width: u32, height: u32, layers: Vec<AssetSlot>, policy: AssetPolicy) -> Self {
        Self {
            width,
            height,
            layers,
            policy,
            clock: PlaybackClock::default(),
            surface: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Start animated layers playing.
    pub fn start(&mut self, now: Instant) {
        if self.clock.started.is_none() {
            self.clock.started = Some(now);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.clock.started.is_some()
    }

    /// Composite the current state of every layer. Returns `None` only under
    /// `AssetPolicy::Wait` while a layer is still loading.
    pub fn compose(&mut self, now: Instant) -> Option<LogicalFrame> {
        for layer in &mut self.layers {
            layer.poll();
        }

        if self.policy == AssetPolicy::Wait {
            if let Some(pending) = self.layers.iter().find(|l| l.is_loading()) {
                debug!("Waiting on {}", pending.path().display());
                return None;
            }
        }

        self.surface.fill(0);
        let elapsed = self.clock.elapsed(now);
        for layer in &self.layers {
            if let Some(visual) = layer.visual() {
                blend_over(&mut self.surface, visual.frame_at(elapsed));
            }
        }

        // The surface is allocated at exactly width*height*4
        LogicalFrame::from_rgba(self.width, self.height, &self.surface).ok()
    }
}

/// Source-over of `src` onto `dst`, both straight-alpha RGBA of equal size.
fn blend_over(dst: &mut [u8], src: &RgbaImage) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.as_raw().chunks_exact(4)) {
        let sa = s[3] as f32 / 255.0;
        if sa >= 1.0 {
            d.copy_from_slice(s);
        } else if sa > 0.0 {
            let da = d[3] as f32 / 255.0 * (1.0 - sa);
            let out_a = sa + da;
            for c in 0..3 {
                d[c] = ((s[c] as f32 * sa + d[c] as f32 * da) / out_a).round() as u8;
            }
            d[3] = (out_a * 255.0).round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Visual;
    use crate::color::PackedColor;
    use image::Rgba;

    fn still(px: [u8; 4]) -> Visual {
        Visual::Still(RgbaImage::from_pixel(2, 2, Rgba(px)))
    }

    #[test]
    fn top_layer_wins_where_opaque() {
        let mut top = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        top.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
        let layers = vec![
            AssetSlot::ready("bottom", still([255, 0, 0, 255])),
            AssetSlot::ready("top", Visual::Still(top)),
        ];
        let mut compositor = Compositor::new(2, 2, layers, AssetPolicy::Skip);
        let frame = compositor.compose(Instant::now()).unwrap();

        assert_eq!(frame.pixel(0, 0), PackedColor::from_rgba(255, 0, 0, 255));
        assert_eq!(frame.pixel(1, 0), PackedColor::from_rgba(0, 255, 0, 255));
    }

    #[test]
    fn translucent_layer_mixes() {
        let layers = vec![
            AssetSlot::ready("bottom", still([0, 0, 200, 255])),
            AssetSlot::ready("top", still([200, 0, 0, 128])),
        ];
        let mut compositor = Compositor::new(2, 2, layers, AssetPolicy::Skip);
        let px = compositor.compose(Instant::now()).unwrap().pixel(0, 0);
        assert_eq!(px.a(), 255);
        assert!((99..=101).contains(&px.r()), "{px:?}");
        assert!((98..=100).contains(&px.b()), "{px:?}");
    }

    #[test]
    fn loading_layer_is_skipped() {
        let (loading, _tx) = AssetSlot::pending("slow.webp");
        let layers = vec![AssetSlot::ready("bottom", still([9, 9, 9, 255])), loading];
        let mut compositor = Compositor::new(2, 2, layers, AssetPolicy::Skip);
        let frame = compositor.compose(Instant::now()).unwrap();
        assert_eq!(frame.pixel(1, 1), PackedColor::from_rgba(9, 9, 9, 255));
    }

    #[test]
    fn nothing_ready_is_transparent() {
        let (loading, _tx) = AssetSlot::pending("slow.webp");
        let mut compositor = Compositor::new(2, 2, vec![loading], AssetPolicy::Skip);
        let frame = compositor.compose(Instant::now()).unwrap();
        assert!(frame.words().iter().all(|&w| w == 0));
    }

    #[test]
    fn wait_policy_holds_the_tick() {
        let (loading, tx) = AssetSlot::pending("slow.webp");
        let mut compositor = Compositor::new(2, 2, vec![loading], AssetPolicy::Wait);
        assert!(compositor.compose(Instant::now()).is_none());

        tx.send(Ok(still([1, 2, 3, 255]))).unwrap();
        let frame = compositor.compose(Instant::now()).unwrap();
        assert_eq!(frame.pixel(0, 0), PackedColor::from_rgba(1, 2, 3, 255));
    }

    #[test]
    fn wait_policy_gives_up_on_failed_layers() {
        let (loading, tx) = AssetSlot::pending("broken.webp");
        drop(tx);
        let mut compositor = Compositor::new(2, 2, vec![loading], AssetPolicy::Wait);
        assert!(compositor.compose(Instant::now()).is_some());
    }

    #[test]
    fn animation_advances_only_after_start() {
        let anim = Visual::animation(vec![
            (RgbaImage::from_pixel(2, 2, Rgba([1, 0, 0, 255])), Duration::from_millis(100)),
            (RgbaImage::from_pixel(2, 2, Rgba([2, 0, 0, 255])), Duration::from_millis(100)),
        ])
        .unwrap();
        let mut compositor =
            Compositor::new(2, 2, vec![AssetSlot::ready("clouds", anim)], AssetPolicy::Skip);

        let t0 = Instant::now();
        let later = t0 + Duration::from_millis(150);
        assert_eq!(compositor.compose(later).unwrap().pixel(0, 0).r(), 1);

        compositor.start(t0);
        assert!(compositor.is_playing());
        assert_eq!(compositor.compose(later).unwrap().pixel(0, 0).r(), 2);
    }
}
