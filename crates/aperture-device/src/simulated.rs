//! A simulated `ProtocolAdapter` standing in for a real vendor SDK/INDI
//! connection, in the spirit of the teacher's `daq-driver-mock` crate: no
//! hardware required, deterministic timing, injectable failures for
//! exercising retry paths.

use crate::adapter::{AdapterIdentity, ControlCaps, ExposureStatus, ProtocolAdapter};
use aperture_core::{Capabilities, CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const WHEEL_MOVE_TIME: Duration = Duration::from_millis(150);
const FOCUSER_STEP_TIME_US: u64 = 200;

struct SimState {
    connected: bool,
    device_name: String,
    capabilities: Capabilities,
    controls: HashMap<String, f64>,

    exposing: bool,
    exposure_start: Option<Instant>,
    exposure_duration: Duration,

    wheel_position: u8,
    wheel_move_deadline: Option<Instant>,

    focuser_position: i32,
    focuser_move_deadline: Option<Instant>,
    focuser_temperature: f64,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            connected: false,
            device_name: String::new(),
            capabilities: Capabilities::NONE,
            controls: HashMap::new(),
            exposing: false,
            exposure_start: None,
            exposure_duration: Duration::ZERO,
            wheel_position: 0,
            wheel_move_deadline: None,
            focuser_position: 0,
            focuser_move_deadline: None,
            focuser_temperature: 20.0,
        }
    }
}

/// A single simulated camera, "SimCam": 1000x1000 mono, cooler + fan,
/// 5-position filter wheel, focuser with a 50,000-step range.
pub struct SimulatedAdapter {
    state: Mutex<SimState>,
    /// Number of subsequent `move_wheel` calls that should fail with
    /// `AdapterError{Busy}` before succeeding — lets tests exercise the
    /// Accessory Coordinator's retry path deterministically.
    wheel_failures_remaining: AtomicU32,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            wheel_failures_remaining: AtomicU32::new(0),
        }
    }

    /// Configure the next `n` `move_wheel` calls to fail before succeeding.
    pub fn fail_next_wheel_moves(&self, n: u32) {
        self.wheel_failures_remaining.store(n, Ordering::SeqCst);
    }

    pub const FRAME_WIDTH: u32 = 1000;
    pub const FRAME_HEIGHT: u32 = 1000;
    pub const FRAME_BIT_DEPTH: u8 = 16;
    pub const FOCUSER_MAX_STEP: i32 = 50_000;
    pub const WHEEL_POSITIONS: u8 = 5;
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for SimulatedAdapter {
    fn initialize(&self) -> CoreResult<()> {
        Ok(())
    }

    fn destroy(&self) {
        let mut state = self.state.lock();
        state.connected = false;
    }

    fn scan(&self) -> Vec<String> {
        vec!["SimCam".to_string()]
    }

    fn open(&self, device_name: &str, _timeout: Duration) -> CoreResult<Capabilities> {
        if device_name != "SimCam" {
            return Err(CoreError::NotFound(device_name.to_string()));
        }
        let mut state = self.state.lock();
        state.connected = true;
        state.device_name = device_name.to_string();
        state.capabilities = Capabilities::CAN_COOL
            | Capabilities::HAS_FAN
            | Capabilities::HAS_ANTI_DEW
            | Capabilities::HAS_FILTER_WHEEL
            | Capabilities::HAS_AUTO_FOCUSER;
        Ok(state.capabilities)
    }

    fn close(&self) {
        self.state.lock().connected = false;
    }

    fn set_control(&self, ctrl: &str, value: f64, _auto: bool) -> CoreResult<()> {
        self.state.lock().controls.insert(ctrl.to_string(), value);
        Ok(())
    }

    fn get_control(&self, ctrl: &str) -> CoreResult<f64> {
        self.state
            .lock()
            .controls
            .get(ctrl)
            .copied()
            .ok_or_else(|| CoreError::InvalidArgument(format!("unknown control '{ctrl}'")))
    }

    fn get_control_caps(&self, _ctrl: &str) -> CoreResult<ControlCaps> {
        Ok(ControlCaps {
            min: 0.0,
            max: 100.0,
            default: 0.0,
            is_auto_supported: true,
        })
    }

    fn start_exposure(&self, duration_s: f64) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.exposing = true;
        state.exposure_start = Some(Instant::now());
        state.exposure_duration = Duration::from_secs_f64(duration_s);
        Ok(())
    }

    fn abort_exposure(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.exposing = false;
        state.exposure_start = None;
        Ok(())
    }

    fn exposure_status(&self) -> CoreResult<ExposureStatus> {
        let state = self.state.lock();
        match state.exposure_start {
            Some(start) if state.exposing && start.elapsed() < state.exposure_duration => {
                Ok(ExposureStatus::InProgress)
            }
            _ => Ok(ExposureStatus::Complete),
        }
    }

    fn read_frame(&self, width: u32, height: u32, bit_depth: u8) -> CoreResult<Vec<u8>> {
        let bytes_per_pixel = if bit_depth > 8 { 2usize } else { 1 };
        let len = width as usize * height as usize * bytes_per_pixel;
        // Deterministic synthetic pattern: no real sensor to read from.
        Ok((0..len).map(|i| (i % 256) as u8).collect())
    }

    fn move_wheel(&self, position: u8) -> CoreResult<()> {
        if self.wheel_failures_remaining.load(Ordering::SeqCst) > 0 {
            self.wheel_failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(CoreError::AdapterError {
                code: 409,
                message: "wheel busy".into(),
            });
        }
        let mut state = self.state.lock();
        state.wheel_position = position;
        state.wheel_move_deadline = Some(Instant::now() + WHEEL_MOVE_TIME);
        Ok(())
    }

    fn wheel_position(&self) -> CoreResult<u8> {
        Ok(self.state.lock().wheel_position)
    }

    fn wheel_moving(&self) -> CoreResult<bool> {
        let state = self.state.lock();
        Ok(state
            .wheel_move_deadline
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false))
    }

    fn move_focuser(&self, position: i32) -> CoreResult<()> {
        let mut state = self.state.lock();
        let distance = (position - state.focuser_position).unsigned_abs() as u64;
        state.focuser_position = position;
        state.focuser_move_deadline =
            Some(Instant::now() + Duration::from_micros(FOCUSER_STEP_TIME_US * distance.max(1)));
        Ok(())
    }

    fn stop_focuser(&self) -> CoreResult<()> {
        self.state.lock().focuser_move_deadline = None;
        Ok(())
    }

    fn home_focuser(&self) -> CoreResult<()> {
        self.move_focuser(0)
    }

    fn calibrate_focuser(&self) -> CoreResult<()> {
        self.state.lock().focuser_move_deadline = None;
        Ok(())
    }

    fn focuser_position(&self) -> CoreResult<i32> {
        Ok(self.state.lock().focuser_position)
    }

    fn focuser_moving(&self) -> CoreResult<bool> {
        let state = self.state.lock();
        Ok(state
            .focuser_move_deadline
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false))
    }

    fn focuser_temperature(&self) -> CoreResult<f64> {
        Ok(self.state.lock().focuser_temperature)
    }

    fn focuser_max_step(&self) -> CoreResult<i32> {
        Ok(Self::FOCUSER_MAX_STEP)
    }

    fn frame_dimensions(&self) -> (u32, u32, u8) {
        (Self::FRAME_WIDTH, Self::FRAME_HEIGHT, Self::FRAME_BIT_DEPTH)
    }

    fn identity(&self) -> AdapterIdentity {
        AdapterIdentity {
            sdk_version: "sim-1.0".into(),
            firmware_version: "sim-fw-1.0".into(),
            camera_model: "SimCam".into(),
            serial_number: "SIM0001".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_lists_simcam() {
        let adapter = SimulatedAdapter::new();
        assert_eq!(adapter.scan(), vec!["SimCam".to_string()]);
    }

    #[test]
    fn open_unknown_device_fails() {
        let adapter = SimulatedAdapter::new();
        let err = adapter.open("NoSuchCam", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn open_simcam_reports_capabilities() {
        let adapter = SimulatedAdapter::new();
        let caps = adapter.open("SimCam", Duration::from_secs(1)).unwrap();
        assert!(caps.contains(Capabilities::HAS_FILTER_WHEEL));
        assert!(caps.contains(Capabilities::HAS_AUTO_FOCUSER));
    }

    #[test]
    fn read_frame_matches_expected_size() {
        let adapter = SimulatedAdapter::new();
        let buf = adapter
            .read_frame(SimulatedAdapter::FRAME_WIDTH, SimulatedAdapter::FRAME_HEIGHT, 16)
            .unwrap();
        assert_eq!(buf.len(), 1000 * 1000 * 2);
    }

    #[test]
    fn wheel_move_fails_configured_number_of_times() {
        let adapter = SimulatedAdapter::new();
        adapter.fail_next_wheel_moves(1);
        assert!(adapter.move_wheel(2).is_err());
        assert!(adapter.move_wheel(2).is_ok());
    }

    #[test]
    fn exposure_completes_after_duration_elapses() {
        let adapter = SimulatedAdapter::new();
        adapter.start_exposure(0.01).unwrap();
        assert_eq!(adapter.exposure_status().unwrap(), ExposureStatus::InProgress);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(adapter.exposure_status().unwrap(), ExposureStatus::Complete);
    }
}
