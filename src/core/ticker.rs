use crate::domain::ports::TickSource;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

/// 每個 tick 的長度
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);
pub const TICKS_PER_SECOND: usize = 4;

static TICK: AtomicU16 = AtomicU16::new(1);
static START: Once = Once::new();

/// Process-wide tick counter advanced every 250ms, wrapping at 65536.
///
/// The background thread is started on first use and never joined, so it
/// does not keep the process alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedTicker;

impl SharedTicker {
    pub fn get() -> Self {
        START.call_once(|| {
            let spawned = std::thread::Builder::new()
                .name("small-flow-ticker".to_string())
                .spawn(|| loop {
                    std::thread::sleep(TICK_INTERVAL);
                    TICK.fetch_add(1, Ordering::Relaxed);
                });
            match spawned {
                Ok(_) => tracing::debug!("Shared speed ticker started"),
                Err(e) => tracing::warn!("Failed to start speed ticker: {}", e),
            }
        });
        SharedTicker
    }
}

impl TickSource for SharedTicker {
    fn now(&self) -> u16 {
        TICK.load(Ordering::Relaxed)
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualTicker {
    tick: Arc<AtomicU16>,
}

impl ManualTicker {
    pub fn new(start: u16) -> Self {
        Self {
            tick: Arc::new(AtomicU16::new(start)),
        }
    }

    pub fn advance(&self, ticks: u16) {
        self.tick.fetch_add(ticks, Ordering::Relaxed);
    }

    pub fn set(&self, tick: u16) {
        self.tick.store(tick, Ordering::Relaxed);
    }
}

impl Default for ManualTicker {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TickSource for ManualTicker {
    fn now(&self) -> u16 {
        self.tick.load(Ordering::Relaxed)
    }
}
