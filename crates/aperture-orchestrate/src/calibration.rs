//! Calibration Orchestrator (specification §4.7): captures dark, flat, and
//! bias calibration frames. Gates dark/flat captures on thermal stability
//! and closed-loop-adjusts flat exposure time toward a target signal level.

use aperture_core::{CoreError, CoreResult, Frame};
use aperture_device::{ExposurePipeline, ThermalController};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const TEMPERATURE_GATE_TOLERANCE_C: f64 = 1.0;
const TEMPERATURE_GATE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const TEMPERATURE_GATE_POLL: Duration = Duration::from_secs(2);

const AUTO_FLAT_INITIAL_EXPOSURE_S: f64 = 0.1;
const AUTO_FLAT_TARGET_ADU: f64 = 25_000.0;
const AUTO_FLAT_MIN_EXPOSURE_S: f64 = 0.001;
const AUTO_FLAT_MAX_EXPOSURE_S: f64 = 60.0;
const AUTO_FLAT_MAX_ITERATIONS: u32 = 10;
const AUTO_FLAT_ACCEPT_TOLERANCE_PCT: f64 = 0.10;

/// Minimum exposure used for bias frames: short enough that no light
/// accumulates, bounded by the same floor the Exposure Pipeline enforces.
const BIAS_EXPOSURE_S: f64 = 0.001;

/// Which calibration set a request captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CalibrationKind {
    Dark,
    Flat,
    Bias,
}

/// A request to capture one set of calibration frames. `exposure_s` is
/// required for [`CalibrationKind::Dark`] (must match a light-frame
/// exposure to be useful); ignored for `Bias`; used as the starting guess
/// for `Flat`'s closed-loop adjustment when present.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CalibrationRequest {
    pub kind: CalibrationKind,
    pub count: u32,
    pub exposure_s: Option<f64>,
}

/// Outcome of one flat-frame auto-exposure search.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct AutoFlatResult {
    pub exposure_s: f64,
    pub measured_adu: f64,
    pub iterations: u32,
}

pub struct CalibrationOrchestrator {
    thermal: Option<Arc<ThermalController>>,
    exposure: Arc<ExposurePipeline>,
}

impl CalibrationOrchestrator {
    pub fn new(thermal: Option<Arc<ThermalController>>, exposure: Arc<ExposurePipeline>) -> Self {
        Self { thermal, exposure }
    }

    /// Captures `request.count` frames for `request.kind`, gating on
    /// thermal stability for darks and flats when a Thermal Controller and
    /// `target_c` are both available.
    pub fn capture(
        &self,
        request: &CalibrationRequest,
        target_c: Option<f64>,
    ) -> CoreResult<Vec<Frame>> {
        if request.kind != CalibrationKind::Bias {
            if let (Some(thermal), Some(target_c)) = (&self.thermal, target_c) {
                if let Err(CoreError::Timeout) = self.wait_for_temperature(thermal, target_c) {
                    warn!(
                        target_c,
                        "thermal gate timed out after {:?}, continuing with calibration capture",
                        TEMPERATURE_GATE_TIMEOUT
                    );
                }
            }
        }

        match request.kind {
            CalibrationKind::Dark => {
                let exposure_s = request.exposure_s.ok_or_else(|| {
                    CoreError::InvalidArgument("dark calibration requires exposure_s".into())
                })?;
                self.capture_n(exposure_s, request.count)
            }
            CalibrationKind::Bias => self.capture_n(BIAS_EXPOSURE_S, request.count),
            CalibrationKind::Flat => {
                let starting_guess = request.exposure_s.unwrap_or(AUTO_FLAT_INITIAL_EXPOSURE_S);
                let auto = self.auto_flat_exposure(starting_guess)?;
                info!(
                    exposure_s = auto.exposure_s,
                    measured_adu = auto.measured_adu,
                    iterations = auto.iterations,
                    "auto-flat exposure converged"
                );
                let mut frames = vec![self.capture_one(auto.exposure_s)?];
                frames.extend(self.capture_n(auto.exposure_s, request.count.saturating_sub(1))?);
                Ok(frames)
            }
        }
    }

    /// Polls the Thermal Controller until its temperature is within
    /// [`TEMPERATURE_GATE_TOLERANCE_C`] of `target_c`, or [`CoreError::Timeout`]
    /// after [`TEMPERATURE_GATE_TIMEOUT`].
    fn wait_for_temperature(&self, thermal: &ThermalController, target_c: f64) -> CoreResult<()> {
        let deadline = Instant::now() + TEMPERATURE_GATE_TIMEOUT;
        loop {
            if let Some(current) = thermal.temperature() {
                if (current - target_c).abs() <= TEMPERATURE_GATE_TOLERANCE_C {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(CoreError::Timeout);
            }
            thread::sleep(TEMPERATURE_GATE_POLL);
        }
    }

    fn capture_one(&self, exposure_s: f64) -> CoreResult<Frame> {
        self.exposure.start_exposure(exposure_s)?;
        while self.exposure.is_exposing() {
            thread::sleep(Duration::from_millis(50));
        }
        self.exposure
            .current_result()
            .ok_or_else(|| CoreError::Fatal("exposure completed without a frame".into()))
    }

    fn capture_n(&self, exposure_s: f64, count: u32) -> CoreResult<Vec<Frame>> {
        (0..count).map(|_| self.capture_one(exposure_s)).collect()
    }

    /// Closed-loop search for the exposure time that lands mean signal near
    /// [`AUTO_FLAT_TARGET_ADU`]: capture, measure, scale the exposure by
    /// `target / measured`, clamp to `[AUTO_FLAT_MIN_EXPOSURE_S,
    /// AUTO_FLAT_MAX_EXPOSURE_S]`, and repeat up to
    /// [`AUTO_FLAT_MAX_ITERATIONS`] times or until within
    /// [`AUTO_FLAT_ACCEPT_TOLERANCE_PCT`] of the target.
    fn auto_flat_exposure(&self, starting_guess: f64) -> CoreResult<AutoFlatResult> {
        let mut exposure_s = starting_guess.clamp(AUTO_FLAT_MIN_EXPOSURE_S, AUTO_FLAT_MAX_EXPOSURE_S);
        let mut measured_adu = 0.0;
        for iteration in 1..=AUTO_FLAT_MAX_ITERATIONS {
            let frame = self.capture_one(exposure_s)?;
            measured_adu = mean_adu(&frame);
            if measured_adu <= 0.0 {
                return Err(CoreError::Fatal("flat frame measured zero signal".into()));
            }
            let error_pct = (measured_adu - AUTO_FLAT_TARGET_ADU).abs() / AUTO_FLAT_TARGET_ADU;
            if error_pct <= AUTO_FLAT_ACCEPT_TOLERANCE_PCT {
                return Ok(AutoFlatResult {
                    exposure_s,
                    measured_adu,
                    iterations: iteration,
                });
            }
            let scale = AUTO_FLAT_TARGET_ADU / measured_adu;
            exposure_s = (exposure_s * scale).clamp(AUTO_FLAT_MIN_EXPOSURE_S, AUTO_FLAT_MAX_EXPOSURE_S);
        }
        Ok(AutoFlatResult {
            exposure_s,
            measured_adu,
            iterations: AUTO_FLAT_MAX_ITERATIONS,
        })
    }
}

/// Mean pixel value of a frame, in the camera's native ADU range.
fn mean_adu(frame: &Frame) -> f64 {
    let pixels = &frame.pixels;
    if frame.metadata.bit_depth > 8 {
        let count = pixels.len() / 2;
        if count == 0 {
            return 0.0;
        }
        let sum: u64 = pixels
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]) as u64)
            .sum();
        sum as f64 / count as f64
    } else {
        if pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = pixels.iter().map(|&b| b as u64).sum();
        sum as f64 / pixels.len() as f64
    }
}
