//! Thermal Controller (specification §4.4): cooler/fan/heater control plus
//! a 2 s monitor loop that maintains a bounded temperature history.

use crate::adapter::ProtocolAdapter;
use crate::core::DeviceCore;
use aperture_core::{Capabilities, Component, CoreError, CoreResult, TemperatureHistory, TemperatureSample, TemperatureStats, TimerSet};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const MONITOR_PERIOD: Duration = Duration::from_secs(2);
const MIN_TARGET_C: f64 = -60.0;
const MAX_TARGET_C: f64 = 60.0;
const AUTO_FAN_THRESHOLD_PCT: f64 = 50.0;
/// Switch index used for the anti-dew heater's timed-activation entry in
/// [`TimerSet`]; this controller only ever drives one timed switch.
const ANTI_DEW_SWITCH: u8 = 0;

/// Cooler/fan/anti-dew control plus rolling temperature history for a
/// camera with `CAN_COOL`.
pub struct ThermalController {
    core: Weak<DeviceCore>,
    adapter: Arc<dyn ProtocolAdapter>,
    history: TemperatureHistory,
    cooling_power: Mutex<f64>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    stop_requested: Arc<AtomicBool>,
    timers: TimerSet,
}

impl ThermalController {
    pub fn new(core: Weak<DeviceCore>, adapter: Arc<dyn ProtocolAdapter>) -> Arc<Self> {
        Arc::new(Self {
            core,
            adapter,
            history: TemperatureHistory::with_default_capacity(),
            cooling_power: Mutex::new(0.0),
            monitor: Mutex::new(None),
            stop_requested: Arc::new(AtomicBool::new(false)),
            timers: TimerSet::new(),
        })
    }

    fn core(&self) -> CoreResult<Arc<DeviceCore>> {
        self.core.upgrade().ok_or_else(|| CoreError::Fatal("device core dropped".into()))
    }

    pub fn start_cooling(self: &Arc<Self>, target_c: f64) -> CoreResult<()> {
        let core = self.core()?;
        if !core.is_connected() {
            return Err(CoreError::NotConnected);
        }
        if !core.capabilities().contains(Capabilities::CAN_COOL) {
            return Err(CoreError::InvalidArgument("device cannot cool".into()));
        }
        if !(MIN_TARGET_C..=MAX_TARGET_C).contains(&target_c) {
            return Err(CoreError::InvalidArgument(format!(
                "target {target_c} outside [{MIN_TARGET_C}, {MAX_TARGET_C}]"
            )));
        }
        self.adapter.set_control("cooler_enable", 1.0, false)?;
        self.adapter.set_control("cooler_target", target_c, false)?;
        self.ensure_monitor_running();
        Ok(())
    }

    pub fn stop_cooling(&self) -> CoreResult<()> {
        self.adapter.set_control("cooler_enable", 0.0, false)?;
        self.adapter.set_control("fan_enable", 0.0, false)?;
        *self.cooling_power.lock() = 0.0;
        Ok(())
    }

    pub fn temperature(&self) -> Option<f64> {
        self.history.latest().map(|s| s.celsius)
    }

    pub fn cooling_power(&self) -> f64 {
        *self.cooling_power.lock()
    }

    pub fn set_fan(&self, on: bool) -> CoreResult<()> {
        let core = self.core()?;
        if !core.capabilities().contains(Capabilities::HAS_FAN) {
            return Err(CoreError::InvalidArgument("device has no fan".into()));
        }
        self.adapter
            .set_control("fan_enable", if on { 1.0 } else { 0.0 }, false)
    }

    pub fn set_anti_dew_heater(&self, on: bool) -> CoreResult<()> {
        let core = self.core()?;
        if !core.capabilities().contains(Capabilities::HAS_ANTI_DEW) {
            return Err(CoreError::InvalidArgument("device has no anti-dew heater".into()));
        }
        self.adapter
            .set_control("anti_dew_enable", if on { 1.0 } else { 0.0 }, false)
    }

    /// Enables the anti-dew heater for `duration_ms`, after which the
    /// monitor loop's tick turns it back off automatically.
    pub fn set_anti_dew_heater_timed(&self, duration_ms: u64) -> CoreResult<()> {
        self.set_anti_dew_heater(true)?;
        self.timers.start(ANTI_DEW_SWITCH, duration_ms);
        Ok(())
    }

    pub fn anti_dew_timer_active(&self) -> bool {
        self.timers.is_active(ANTI_DEW_SWITCH)
    }

    pub fn history(&self) -> Vec<TemperatureSample> {
        self.history.snapshot()
    }

    pub fn stats(&self) -> Option<TemperatureStats> {
        self.history.stats()
    }

    fn ensure_monitor_running(self: &Arc<Self>) {
        let mut guard = self.monitor.lock();
        if guard.is_some() {
            return;
        }
        let this = self.clone();
        *guard = Some(thread::spawn(move || this.monitor_loop()));
    }

    fn monitor_loop(self: Arc<Self>) {
        while !self.stop_requested.load(Ordering::SeqCst) {
            self.tick();
            thread::sleep(MONITOR_PERIOD);
        }
    }

    fn tick(&self) {
        let raw_tenths = match self.adapter.get_control("temperature") {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "temperature read failed, skipping tick");
                return;
            }
        };
        let celsius = raw_tenths / 10.0;
        self.history.push(TemperatureSample {
            timestamp: Utc::now(),
            celsius,
        });

        if self.timers.reap_expired().contains(&ANTI_DEW_SWITCH) {
            if let Err(e) = self.set_anti_dew_heater(false) {
                debug!(error = %e, "auto-disable anti-dew heater failed");
            }
        }

        let cooler_on = self.adapter.get_control("cooler_enable").unwrap_or(0.0) != 0.0;
        let power = if cooler_on {
            self.adapter.get_control("cooling_power").unwrap_or(0.0)
        } else {
            0.0
        };
        *self.cooling_power.lock() = power;

        if let Ok(core) = self.core() {
            let fan_on = self.adapter.get_control("fan_enable").unwrap_or(0.0) != 0.0;
            if cooler_on
                && power > AUTO_FAN_THRESHOLD_PCT
                && !fan_on
                && core.capabilities().contains(Capabilities::HAS_FAN)
            {
                if let Err(e) = self.adapter.set_control("fan_enable", 1.0, false) {
                    warn!(error = %e, "auto-enable fan failed");
                }
            }
        }
    }
}

impl Component for ThermalController {
    fn name(&self) -> &str {
        "thermal-controller"
    }

    fn initialize(&self) -> CoreResult<()> {
        Ok(())
    }

    fn destroy(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.monitor.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedAdapter;
    use std::time::Duration as StdDuration;

    fn connected_core() -> (Arc<DeviceCore>, Arc<dyn ProtocolAdapter>) {
        let adapter: Arc<dyn ProtocolAdapter> = Arc::new(SimulatedAdapter::new());
        adapter.set_control("temperature", -100.0, false).unwrap();
        let core = DeviceCore::new(adapter.clone());
        core.initialize().unwrap();
        core.connect("SimCam", StdDuration::from_secs(1), 0).unwrap();
        (core, adapter)
    }

    #[test]
    fn start_cooling_without_capability_fails() {
        let adapter: Arc<dyn ProtocolAdapter> = Arc::new(SimulatedAdapter::new());
        let core = DeviceCore::new(adapter.clone());
        // Not connected: no capabilities discovered yet.
        let thermal = ThermalController::new(core.weak(), adapter);
        let err = thermal.start_cooling(-10.0).unwrap_err();
        assert!(matches!(err, CoreError::NotConnected));
    }

    #[test]
    fn start_cooling_rejects_out_of_range_target() {
        let (core, adapter) = connected_core();
        let thermal = ThermalController::new(core.weak(), adapter);
        assert!(thermal.start_cooling(-100.0).is_err());
    }

    #[test]
    fn start_cooling_records_history() {
        let (core, adapter) = connected_core();
        let thermal = ThermalController::new(core.weak(), adapter);
        thermal.start_cooling(-10.0).unwrap();
        thread::sleep(StdDuration::from_millis(50));
        thermal.tick();
        assert!(!thermal.history().is_empty());
        thermal.destroy();
    }

    #[test]
    fn timed_anti_dew_heater_turns_off_after_expiry() {
        let (core, adapter) = connected_core();
        let thermal = ThermalController::new(core.weak(), adapter.clone());
        // SimulatedAdapter grants HAS_ANTI_DEW on connect.
        thermal.set_anti_dew_heater_timed(1).unwrap();
        assert!(thermal.anti_dew_timer_active());
        thread::sleep(StdDuration::from_millis(20));
        thermal.tick();
        assert!(!thermal.anti_dew_timer_active());
        assert_eq!(adapter.get_control("anti_dew_enable").unwrap(), 0.0);
    }

    #[test]
    fn fan_without_capability_is_rejected() {
        let adapter: Arc<dyn ProtocolAdapter> = Arc::new(SimulatedAdapter::new());
        let core = DeviceCore::new(adapter.clone());
        let thermal = ThermalController::new(core.weak(), adapter);
        assert!(thermal.set_fan(true).is_err());
    }
}
