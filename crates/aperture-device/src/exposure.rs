//! Exposure Pipeline (specification §4.3): schedules a single exposure
//! worker thread per pipeline instance, polls the adapter for completion,
//! downloads pixel data, and publishes the current frame.

use crate::adapter::{ExposureStatus, ProtocolAdapter};
use aperture_core::{Binning, Component, CoreError, CoreResult, DeviceState, Frame, FrameMetadata};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::core::DeviceCore;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MIN_DURATION_S: f64 = 1e-6;
const MAX_DURATION_S: f64 = 3600.0;

struct ExposureRun {
    start: Instant,
    duration_s: f64,
}

/// Per-camera exposure scheduler. Registered as a [`Component`] so the
/// Device Core can notify it of state changes, though it drives state
/// transitions itself rather than reacting to them.
pub struct ExposurePipeline {
    core: Weak<DeviceCore>,
    adapter: Arc<dyn ProtocolAdapter>,
    run: Mutex<Option<ExposureRun>>,
    abort_requested: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    current_frame: Mutex<Option<Frame>>,
    exposure_count: AtomicU64,
    last_exposure_duration_s: Mutex<f64>,
}

impl ExposurePipeline {
    pub fn new(core: Weak<DeviceCore>, adapter: Arc<dyn ProtocolAdapter>) -> Arc<Self> {
        Arc::new(Self {
            core,
            adapter,
            run: Mutex::new(None),
            abort_requested: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            current_frame: Mutex::new(None),
            exposure_count: AtomicU64::new(0),
            last_exposure_duration_s: Mutex::new(0.0),
        })
    }

    fn core(&self) -> CoreResult<Arc<DeviceCore>> {
        self.core.upgrade().ok_or_else(|| CoreError::Fatal("device core dropped".into()))
    }

    pub fn is_exposing(&self) -> bool {
        self.run.lock().is_some()
    }

    pub fn progress(&self) -> f64 {
        match self.run.lock().as_ref() {
            Some(run) => (run.start.elapsed().as_secs_f64() / run.duration_s).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    pub fn remaining_s(&self) -> f64 {
        match self.run.lock().as_ref() {
            Some(run) => (run.duration_s - run.start.elapsed().as_secs_f64()).max(0.0),
            None => 0.0,
        }
    }

    pub fn current_result(&self) -> Option<Frame> {
        if self.is_exposing() {
            return None;
        }
        self.current_frame.lock().clone()
    }

    pub fn exposure_count(&self) -> u64 {
        self.exposure_count.load(Ordering::SeqCst)
    }

    pub fn last_exposure_duration_s(&self) -> f64 {
        *self.last_exposure_duration_s.lock()
    }

    pub fn start_exposure(self: &Arc<Self>, duration_s: f64) -> CoreResult<()> {
        if !(MIN_DURATION_S..=MAX_DURATION_S).contains(&duration_s) {
            return Err(CoreError::InvalidArgument(format!(
                "exposure duration {duration_s} outside [{MIN_DURATION_S}, {MAX_DURATION_S}]"
            )));
        }
        let core = self.core()?;
        if !core.is_connected() {
            return Err(CoreError::NotConnected);
        }
        if self.is_exposing() {
            return Err(CoreError::InvalidArgument("exposure already in progress".into()));
        }

        // The previous worker, if any, must already be joined before a new
        // one starts (specification §4.3 "Ordering").
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }

        self.adapter.start_exposure(duration_s)?;
        *self.run.lock() = Some(ExposureRun {
            start: Instant::now(),
            duration_s,
        });
        self.abort_requested.store(false, Ordering::SeqCst);
        core.update_state(DeviceState::Exposing);

        let this = self.clone();
        let handle = thread::spawn(move || this.run_worker(duration_s));
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Signals the worker to stop and joins it. Safe to call when idle.
    pub fn abort_exposure(&self) -> CoreResult<()> {
        if !self.is_exposing() {
            return Ok(());
        }
        self.abort_requested.store(true, Ordering::SeqCst);
        let _ = self.adapter.abort_exposure();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn run_worker(self: Arc<Self>, duration_s: f64) {
        let core = match self.core() {
            Ok(core) => core,
            Err(_) => return,
        };

        loop {
            if self.abort_requested.load(Ordering::SeqCst) {
                *self.run.lock() = None;
                core.update_state(DeviceState::Aborted);
                info!("exposure aborted");
                return;
            }
            match self.adapter.exposure_status() {
                Ok(ExposureStatus::Complete) => break,
                Ok(ExposureStatus::InProgress) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    warn!(error = %e, "exposure status poll failed");
                    *self.run.lock() = None;
                    core.update_state(DeviceState::Error);
                    return;
                }
            }
        }

        core.update_state(DeviceState::Downloading);
        let (width, height, bit_depth) = self.adapter.frame_dimensions();
        let result = self
            .adapter
            .read_frame(width, height, bit_depth)
            .map_err(|e| e.to_string())
            .and_then(|pixels| {
                let metadata = FrameMetadata {
                    width,
                    height,
                    bit_depth,
                    is_bayer: false,
                    pixel_pitch_um: 3.76,
                    binning: Binning::ONE_BY_ONE,
                    exposure_duration_s: duration_s,
                    start_timestamp: Utc::now(),
                };
                Frame::new(metadata, bytes::Bytes::from(pixels))
            });

        *self.run.lock() = None;
        match result {
            Ok(frame) => {
                *self.current_frame.lock() = Some(frame);
                self.exposure_count.fetch_add(1, Ordering::SeqCst);
                *self.last_exposure_duration_s.lock() = duration_s;
                core.update_state(DeviceState::Idle);
            }
            Err(e) => {
                error!(error = %e, "exposure worker failed to build frame");
                core.update_state(DeviceState::Error);
            }
        }
    }
}

impl Component for ExposurePipeline {
    fn name(&self) -> &str {
        "exposure-pipeline"
    }

    fn initialize(&self) -> CoreResult<()> {
        Ok(())
    }

    fn destroy(&self) {
        let _ = self.abort_exposure();
    }
}
