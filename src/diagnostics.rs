//! Tick Diagnostics
//!
//! Rolling tick-rate statistics, updated once per presented tick. The minimum
//! only starts accumulating after a warm-up so startup hitches don't pin it.

use std::fmt;

use instant::Instant;

/// Snapshot of the tick rate after one update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TickRate {
    pub min: u32,
    pub max: u32,
    pub current: u32,
}

impl fmt::Display for TickRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Min = {} / Max = {} / current = {}",
            self.min, self.max, self.current
        )
    }
}

/// Tick counter and rate extremes, owned by the tick loop.
#[derive(Clone, Debug)]
pub struct TickStats {
    warmup: u64,
    ticks: u64,
    last: Option<Instant>,
    rate: TickRate,
}

impl TickStats {
    pub fn new(warmup: u64) -> Self {
        Self {
            warmup,
            ticks: 0,
            last: None,
            rate: TickRate::default(),
        }
    }

    /// Record a tick completing at `now`.
    pub fn record(&mut self, now: Instant) -> TickRate {
        let current = match self.last {
            Some(last) => {
                let dt = now.saturating_duration_since(last).as_secs_f64();
                if dt > 0.0 {
                    (1.0 / dt).round() as u32
                } else {
                    0
                }
            }
            None => 0,
        };
        self.last = Some(now);

        self.rate.min = if self.ticks > self.warmup {
            self.rate.min.min(current)
        } else {
            current
        };
        self.rate.max = self.rate.max.max(current);
        self.rate.current = current;
        self.ticks += 1;

        self.rate
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn rate(&self) -> TickRate {
        self.rate
    }
}
