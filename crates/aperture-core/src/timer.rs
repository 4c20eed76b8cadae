//! Switch timers (specification §4.5 "Accessory Coordinator" — timed
//! switch/relay outputs such as dew heaters).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// State of a single timed switch.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    pub switch_index: u8,
    pub start_instant: Instant,
    pub duration_ms: u64,
    pub active: bool,
}

impl Timer {
    pub fn new(switch_index: u8, duration_ms: u64) -> Self {
        Self {
            switch_index,
            start_instant: Instant::now(),
            duration_ms,
            active: true,
        }
    }

    pub fn remaining(&self) -> Duration {
        let elapsed = self.start_instant.elapsed();
        let total = Duration::from_millis(self.duration_ms);
        total.saturating_sub(elapsed)
    }

    pub fn is_expired(&self) -> bool {
        self.start_instant.elapsed() >= Duration::from_millis(self.duration_ms)
    }
}

/// Indexed set of active switch timers, keyed by switch index. Expired
/// timers are pruned lazily on access rather than by a background task.
#[derive(Default)]
pub struct TimerSet {
    timers: Mutex<HashMap<u8, Timer>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn start(&self, switch_index: u8, duration_ms: u64) {
        self.timers
            .lock()
            .insert(switch_index, Timer::new(switch_index, duration_ms));
    }

    pub fn cancel(&self, switch_index: u8) -> bool {
        self.timers.lock().remove(&switch_index).is_some()
    }

    /// Remove and return switch indices whose timers have expired.
    pub fn reap_expired(&self) -> Vec<u8> {
        let mut guard = self.timers.lock();
        let expired: Vec<u8> = guard
            .values()
            .filter(|t| t.is_expired())
            .map(|t| t.switch_index)
            .collect();
        for idx in &expired {
            guard.remove(idx);
        }
        expired
    }

    pub fn is_active(&self, switch_index: u8) -> bool {
        self.timers
            .lock()
            .get(&switch_index)
            .map(|t| t.active && !t.is_expired())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.timers.lock().len()
    }
}
