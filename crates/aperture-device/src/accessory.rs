//! Accessory Coordinator (specification §4.5): filter wheel and focuser
//! control on behalf of the camera Device Core, including retrying filter
//! moves and running coordinated focus/filter sequences.

use crate::adapter::ProtocolAdapter;
use crate::core::DeviceCore;
use aperture_core::{Capabilities, Component, CoreError, CoreResult, DeviceState, FilterDescriptor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
const WHEEL_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
const FOCUSER_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Callback invoked by a coordinated sequence: `(target_position, completed)`.
/// Called once with `completed = false` before the move, once with
/// `completed = true` after it settles.
pub type SequenceCallback = dyn Fn(i64, bool) + Send + Sync;

/// Filter wheel + focuser control for one camera.
pub struct AccessoryCoordinator {
    core: Weak<DeviceCore>,
    adapter: Arc<dyn ProtocolAdapter>,
    filters: Mutex<Vec<FilterDescriptor>>,
    current_filter: Mutex<Option<String>>,
    max_retries: u32,
}

impl AccessoryCoordinator {
    pub fn new(core: Weak<DeviceCore>, adapter: Arc<dyn ProtocolAdapter>, filters: Vec<FilterDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            core,
            adapter,
            filters: Mutex::new(filters),
            current_filter: Mutex::new(None),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    fn core(&self) -> CoreResult<Arc<DeviceCore>> {
        self.core.upgrade().ok_or_else(|| CoreError::Fatal("device core dropped".into()))
    }

    fn require_connected(&self) -> CoreResult<Arc<DeviceCore>> {
        let core = self.core()?;
        if !core.is_connected() {
            return Err(CoreError::NotConnected);
        }
        Ok(core)
    }

    pub fn filters(&self) -> Vec<FilterDescriptor> {
        self.filters.lock().clone()
    }

    pub fn current_filter(&self) -> Option<String> {
        self.current_filter.lock().clone()
    }

    fn find_filter(&self, name: &str) -> CoreResult<FilterDescriptor> {
        self.filters
            .lock()
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .ok_or_else(|| CoreError::InvalidArgument(format!("unknown filter '{name}'")))
    }

    /// No-op if `name` is already current; otherwise moves with up to
    /// `max_retries` attempts at a 1 s backoff.
    pub fn change_filter(&self, name: &str) -> CoreResult<()> {
        self.require_connected()?;
        if self.current_filter.lock().as_deref() == Some(name) {
            return Ok(());
        }
        let descriptor = self.find_filter(name)?;
        self.move_wheel_with_retry(descriptor.position)?;
        *self.current_filter.lock() = Some(name.to_string());
        Ok(())
    }

    pub fn change_to_position(&self, index: u8) -> CoreResult<()> {
        self.require_connected()?;
        let name = self
            .filters
            .lock()
            .iter()
            .find(|f| f.position == index)
            .map(|f| f.name.clone());
        self.move_wheel_with_retry(index)?;
        *self.current_filter.lock() = name;
        Ok(())
    }

    fn move_wheel_with_retry(&self, position: u8) -> CoreResult<()> {
        let mut attempt = 0;
        loop {
            let outcome = self
                .adapter
                .move_wheel(position)
                .and_then(|()| self.wait_for_wheel(WHEEL_SETTLE_TIMEOUT.as_secs_f64()))
                .and_then(|()| self.verify_wheel_position(position));
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "filter wheel move failed, retrying");
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Confirms the wheel actually landed at `expected` after it reports no
    /// longer moving; a stall or off-by-one fault would otherwise be
    /// reported as a successful move.
    fn verify_wheel_position(&self, expected: u8) -> CoreResult<()> {
        let actual = self.adapter.wheel_position()?;
        if actual != expected {
            return Err(CoreError::AdapterError {
                code: -1,
                message: format!("wheel settled at position {actual}, expected {expected}"),
            });
        }
        Ok(())
    }

    pub fn wait_for_wheel(&self, timeout_s: f64) -> CoreResult<()> {
        let deadline = Instant::now() + Duration::from_secs_f64(timeout_s);
        loop {
            if !self.adapter.wheel_moving()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CoreError::Timeout);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn move_focuser_to(&self, position: i32) -> CoreResult<()> {
        self.require_connected()?;
        let max_step = self.adapter.focuser_max_step()?;
        if !(0..=max_step).contains(&position) {
            return Err(CoreError::InvalidArgument(format!(
                "focuser position {position} outside [0, {max_step}]"
            )));
        }
        self.adapter.move_focuser(position)
    }

    pub fn stop_focuser(&self) -> CoreResult<()> {
        self.adapter.stop_focuser()
    }

    pub fn home_focuser(&self) -> CoreResult<()> {
        self.adapter.home_focuser()
    }

    pub fn calibrate_focuser(&self) -> CoreResult<()> {
        self.adapter.calibrate_focuser()
    }

    pub fn focuser_temperature(&self) -> CoreResult<f64> {
        self.adapter.focuser_temperature()
    }

    pub fn is_focuser_moving(&self) -> CoreResult<bool> {
        self.adapter.focuser_moving()
    }

    fn wait_for_focuser(&self, timeout: Duration) -> CoreResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.adapter.focuser_moving()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CoreError::Timeout);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Runs each focuser target in order, waiting up to 30 s for it to
    /// settle, invoking `callback(position, false)` before the move and
    /// `callback(position, true)` after. Aborts the remaining sequence on
    /// the first failure.
    pub fn perform_focus_sequence(&self, positions: &[i32], callback: &SequenceCallback) -> CoreResult<()> {
        for &position in positions {
            callback(position as i64, false);
            if let Err(e) = self.move_focuser_to(position).and_then(|_| self.wait_for_focuser(FOCUSER_SETTLE_TIMEOUT)) {
                callback(position as i64, false);
                return Err(e);
            }
            callback(position as i64, true);
        }
        Ok(())
    }

    /// Same contract as [`Self::perform_focus_sequence`] but for filter
    /// wheel positions.
    pub fn perform_filter_sequence(&self, positions: &[u8], callback: &SequenceCallback) -> CoreResult<()> {
        for &position in positions {
            callback(position as i64, false);
            if let Err(e) = self.change_to_position(position) {
                callback(position as i64, false);
                return Err(e);
            }
            callback(position as i64, true);
        }
        Ok(())
    }
}

impl Component for AccessoryCoordinator {
    fn name(&self) -> &str {
        "accessory-coordinator"
    }

    fn initialize(&self) -> CoreResult<()> {
        Ok(())
    }

    fn destroy(&self) {}

    /// Per specification §4.5 "Coordination with exposure": the Coordinator
    /// does not block accessory movement during exposure, it only logs a
    /// warning if one is already in flight when exposure starts.
    fn on_state_changed(&self, _previous: DeviceState, current: DeviceState) {
        if current != DeviceState::Exposing {
            return;
        }
        let wheel_moving = self.adapter.wheel_moving().unwrap_or(false);
        let focuser_moving = self.adapter.focuser_moving().unwrap_or(false);
        if wheel_moving || focuser_moving {
            warn!(wheel_moving, focuser_moving, "exposure started while an accessory is still moving");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedAdapter;
    use aperture_core::FilterType;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    fn coordinator() -> (Arc<DeviceCore>, Arc<AccessoryCoordinator>, Arc<SimulatedAdapter>) {
        let sim = Arc::new(SimulatedAdapter::new());
        let adapter: Arc<dyn ProtocolAdapter> = sim.clone();
        let core = DeviceCore::new(adapter.clone());
        core.initialize().unwrap();
        core.connect("SimCam", StdDuration::from_secs(1), 0).unwrap();
        let filters = vec![
            FilterDescriptor::new("L", FilterType::Luminance, 0),
            FilterDescriptor::new("Ha", FilterType::Halpha, 1),
        ];
        let coordinator = AccessoryCoordinator::new(core.weak(), adapter, filters);
        (core, coordinator, sim)
    }

    #[test]
    fn change_to_unknown_filter_fails_without_moving() {
        let (_core, coordinator, _sim) = coordinator();
        assert!(coordinator.change_filter("OIII").is_err());
        assert!(coordinator.current_filter().is_none());
    }

    #[test]
    fn change_filter_to_same_name_is_a_no_op() {
        let (_core, coordinator, _sim) = coordinator();
        coordinator.change_filter("Ha").unwrap();
        coordinator.change_filter("Ha").unwrap();
        assert_eq!(coordinator.current_filter().as_deref(), Some("Ha"));
    }

    #[test]
    fn change_filter_retries_then_succeeds() {
        let (_core, coordinator, sim) = coordinator();
        sim.fail_next_wheel_moves(1);
        coordinator.change_filter("Ha").unwrap();
        assert_eq!(coordinator.current_filter().as_deref(), Some("Ha"));
    }

    #[test]
    fn focuser_position_out_of_range_is_rejected() {
        let (_core, coordinator, _sim) = coordinator();
        assert!(coordinator.move_focuser_to(-1).is_err());
        assert!(coordinator.move_focuser_to(SimulatedAdapter::FOCUSER_MAX_STEP + 1).is_err());
    }

    #[test]
    fn focus_sequence_invokes_callback_before_and_after_each_step() {
        let (_core, coordinator, _sim) = coordinator();
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = events.clone();
        let callback = move |pos: i64, completed: bool| {
            recorder.lock().push((pos, completed));
        };
        coordinator
            .perform_focus_sequence(&[100, 200], &callback)
            .unwrap();
        let recorded = events.lock().clone();
        assert_eq!(
            recorded,
            vec![(100, false), (100, true), (200, false), (200, true)]
        );
    }

    #[test]
    fn filter_sequence_completes_each_step() {
        let (_core, coordinator, _sim) = coordinator();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let callback = move |_pos: i64, completed: bool| {
            if completed {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        };
        coordinator
            .perform_filter_sequence(&[0, 1], &callback)
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn filter_sequence_aborts_on_first_failure() {
        let (_core, coordinator, sim) = coordinator();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let callback = move |_pos: i64, completed: bool| {
            if completed {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        };
        // Exhaust every retry attempt so the first step never settles.
        sim.fail_next_wheel_moves(DEFAULT_MAX_RETRIES + 1);
        coordinator
            .perform_filter_sequence(&[0, 1], &callback)
            .unwrap_err();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
