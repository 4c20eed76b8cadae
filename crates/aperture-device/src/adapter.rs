//! Protocol Adapter (specification §4.8): the only place vendor/INDI-specific
//! names or encodings are allowed to appear. Everything above this trait is
//! vendor-agnostic.

use aperture_core::{Capabilities, CoreError, CoreResult};
use std::time::Duration;

/// Current status of an in-progress hardware exposure, as reported by
/// [`ProtocolAdapter::exposure_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureStatus {
    InProgress,
    Complete,
}

/// Capability metadata for a single named control (e.g. gain, offset,
/// cooler target), mirroring `get_control_caps` in the original adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlCaps {
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub is_auto_supported: bool,
}

/// Informational identity fields exposed by the adapter. Vendor SDKs are
/// out of scope for this workspace, so these are carried as plain fields on
/// the adapter's identity response rather than real SDK calls.
#[derive(Debug, Clone, Default)]
pub struct AdapterIdentity {
    pub sdk_version: String,
    pub firmware_version: String,
    pub camera_model: String,
    pub serial_number: String,
}

/// Translates a property-oriented or callback-oriented vendor API into the
/// Device Core's model. Implementations must not leak vendor-specific names
/// or encodings past this trait boundary.
pub trait ProtocolAdapter: Send + Sync {
    fn initialize(&self) -> CoreResult<()>;
    fn destroy(&self);

    /// Snapshot list of device names currently visible.
    fn scan(&self) -> Vec<String>;

    /// Open `device_name`, waiting up to `timeout` for required properties
    /// to appear. Returns the capability bitmap discovered on connect.
    fn open(&self, device_name: &str, timeout: Duration) -> CoreResult<Capabilities>;
    fn close(&self);

    fn set_control(&self, ctrl: &str, value: f64, auto: bool) -> CoreResult<()>;
    fn get_control(&self, ctrl: &str) -> CoreResult<f64>;
    fn get_control_caps(&self, ctrl: &str) -> CoreResult<ControlCaps>;

    fn start_exposure(&self, duration_s: f64) -> CoreResult<()>;
    fn abort_exposure(&self) -> CoreResult<()>;
    fn exposure_status(&self) -> CoreResult<ExposureStatus>;
    /// Read `width * height` pixels at `bit_depth` into a fresh buffer.
    fn read_frame(&self, width: u32, height: u32, bit_depth: u8) -> CoreResult<Vec<u8>>;
    /// Sensor geometry used to size the buffer passed to `read_frame` and
    /// to populate `FrameMetadata`: `(width, height, bit_depth)`.
    fn frame_dimensions(&self) -> (u32, u32, u8);

    /// Move the filter wheel to `position`. Asynchronous: callers poll
    /// [`ProtocolAdapter::wheel_position`] / `wheel_moving` afterward.
    fn move_wheel(&self, position: u8) -> CoreResult<()>;
    fn wheel_position(&self) -> CoreResult<u8>;
    fn wheel_moving(&self) -> CoreResult<bool>;

    fn move_focuser(&self, position: i32) -> CoreResult<()>;
    fn stop_focuser(&self) -> CoreResult<()>;
    fn home_focuser(&self) -> CoreResult<()>;
    fn calibrate_focuser(&self) -> CoreResult<()>;
    fn focuser_position(&self) -> CoreResult<i32>;
    fn focuser_moving(&self) -> CoreResult<bool>;
    fn focuser_temperature(&self) -> CoreResult<f64>;
    fn focuser_max_step(&self) -> CoreResult<i32>;

    fn identity(&self) -> AdapterIdentity;
}

/// Maps a vendor/adapter error string onto the shared taxonomy. Adapters
/// should prefer constructing [`CoreError`] variants directly; this helper
/// exists for the common "opaque vendor code" case.
pub fn adapter_error(code: i32, message: impl Into<String>) -> CoreError {
    CoreError::AdapterError {
        code,
        message: message.into(),
    }
}
