//! Tick Loop
//!
//! One tick: compose the layers, dispatch the kernel, present the result.
//! Ticks never overlap; the caller schedules the next one only after this one
//! returns. A failed tick leaves the previous frame in place and the loop
//! carries on. Rates count only frames that reached the screen.

use std::fmt;

use instant::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::compositor::Compositor;
use crate::diagnostics::{TickRate, TickStats};
use crate::dispatch::Dispatcher;
use crate::error::DispatchError;
use crate::frame::ExpandedFrame;

/// What happened during one tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// A new frame is on screen.
    Presented(TickRate),
    /// Layers still loading under the wait policy.
    AssetsPending,
    /// Dispatch failed; the last good frame stays up.
    Failed(DispatchError),
    /// The frame was expanded but could not be shown.
    NotShown,
}

/// Owns everything a tick touches.
pub struct TickLoop {
    compositor: Compositor,
    dispatcher: Box<dyn Dispatcher>,
    stats: TickStats,
    /// Parent of every tick's token.
    shutdown: CancellationToken,
    last_frame: Option<ExpandedFrame>,
}

impl TickLoop {
    pub fn new(compositor: Compositor, dispatcher: Box<dyn Dispatcher>, warmup_ticks: u64) -> Self {
        Self {
            compositor,
            dispatcher,
            stats: TickStats::new(warmup_ticks),
            shutdown: CancellationToken::new(),
            last_frame: None,
        }
    }

    /// The user trigger: start playback. Animations stay on their first
    /// frame until this is called.
    pub fn start(&mut self, now: Instant) {
        self.compositor.start(now);
    }

    pub fn is_started(&self) -> bool {
        self.compositor.is_playing()
    }

    /// Cancelling this aborts the in-flight dispatch, if any, and every
    /// later tick. Safe to hand to another thread.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run one tick and hand the expanded frame to `present`.
    pub fn tick<E: fmt::Display>(
        &mut self,
        now: Instant,
        present: impl FnOnce(&ExpandedFrame) -> Result<(), E>,
    ) -> TickOutcome {
        let Some(logical) = self.compositor.compose(now) else {
            return TickOutcome::AssetsPending;
        };

        let cancel = self.shutdown.child_token();
        let expanded = match self.dispatcher.dispatch(&logical, &cancel) {
            Ok(expanded) => expanded,
            Err(e) => {
                warn!("Tick {} dropped ({}): {}", self.stats.ticks(), self.dispatcher.name(), e);
                return TickOutcome::Failed(e);
            }
        };

        let shown = present(&expanded);
        self.last_frame = Some(expanded);
        if let Err(e) = shown {
            warn!("Tick {} not shown: {}", self.stats.ticks(), e);
            return TickOutcome::NotShown;
        }

        let rate = self.stats.record(now);
        debug!("{}", rate);
        TickOutcome::Presented(rate)
    }

    /// Most recent successfully expanded frame.
    pub fn last_frame(&self) -> Option<&ExpandedFrame> {
        self.last_frame.as_ref()
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }
}
