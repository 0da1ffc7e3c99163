use crate::core::ticker::{SharedTicker, TICKS_PER_SECOND};
use crate::domain::ports::TickSource;
use std::sync::Arc;

/// Longest supported averaging window (one hour).
pub const MAX_WINDOW_SECONDS: usize = 3600;

/// Sliding-window throughput estimator (units per second).
///
/// One slot per 250ms tick holds the running total seen up to that tick. The
/// rate is the difference between the newest slot and the slot one full
/// window behind it, so each sample costs O(1) apart from catching up on
/// skipped ticks, which is bounded by the window size.
pub struct SpeedEstimator {
    ticker: Arc<dyn TickSource>,
    slots: Vec<u64>,
    pointer: usize,
    filled: usize,
    last: u16,
}

impl SpeedEstimator {
    /// The window is clamped to `1..=MAX_WINDOW_SECONDS`.
    pub fn new(window_seconds: usize, ticker: Arc<dyn TickSource>) -> Self {
        let size = window_seconds.clamp(1, MAX_WINDOW_SECONDS) * TICKS_PER_SECOND;
        let last = ticker.now().wrapping_sub(1);
        Self {
            ticker,
            slots: vec![0; size],
            pointer: 0,
            filled: 1,
            last,
        }
    }

    /// Window given in milliseconds, rounded up to whole seconds.
    pub fn from_millis(window_ms: u64, ticker: Arc<dyn TickSource>) -> Self {
        let seconds = window_ms.div_ceil(1000).clamp(1, MAX_WINDOW_SECONDS as u64);
        Self::new(seconds as usize, ticker)
    }

    /// 使用全域 ticker
    pub fn shared(window_ms: u64) -> Self {
        Self::from_millis(window_ms, Arc::new(SharedTicker::get()))
    }

    pub fn window_slots(&self) -> usize {
        self.slots.len()
    }

    /// Record `delta` units and return the current rate. A zero delta is a
    /// keep-alive sample that only lets idle time decay the window.
    pub fn sample(&mut self, delta: u64) -> f64 {
        let size = self.slots.len();
        let now = self.ticker.now();
        let elapsed = usize::from(now.wrapping_sub(self.last)).min(size);
        self.last = now;

        for _ in 0..elapsed {
            let total = self.slots[self.pointer];
            self.pointer = (self.pointer + 1) % size;
            self.slots[self.pointer] = total;
            self.filled = (self.filled + 1).min(size);
        }

        let current = self.slots[self.pointer].saturating_add(delta);
        self.slots[self.pointer] = current;

        // 暖機期間尚未寫入的 slot 視為 0
        let behind = if self.filled < size {
            0
        } else {
            self.slots[(self.pointer + 1) % size]
        };

        current.saturating_sub(behind) as f64 * TICKS_PER_SECOND as f64 / self.filled as f64
    }
}

impl std::fmt::Debug for SpeedEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedEstimator")
            .field("slots", &self.slots.len())
            .field("pointer", &self.pointer)
            .field("filled", &self.filled)
            .field("last", &self.last)
            .finish()
    }
}
