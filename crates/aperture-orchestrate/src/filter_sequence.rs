//! Filter-Sequence Orchestrator (specification §4.6): runs ordered or
//! interleaved color sequences (LRGB, HOS narrowband, custom) through a
//! camera's Accessory Coordinator and Exposure Pipeline. Lives outside the
//! Device Core, calling into it only through its public capability surface.

use aperture_core::CoreError;
use aperture_core::CoreResult;
use aperture_device::{AccessoryCoordinator, ExposurePipeline};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

const DEFAULT_SETTLING_TIME: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One step of a filter sequence: capture `count` frames of `exposure_s`
/// through `filter`. `gain`/`offset` are recorded in the history event for
/// downstream metadata but this workspace has no generic camera control
/// surface to apply them through beyond the Protocol Adapter, which is
/// already driven by the Exposure Pipeline for duration/ROI.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SequenceStep {
    pub filter: String,
    pub exposure_s: f64,
    pub count: u32,
    pub gain: Option<f64>,
    pub offset: Option<f64>,
}

/// One captured-frame event, for progress history / logging.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryEvent {
    pub step_index: usize,
    pub frame_index: u32,
    pub filter: String,
    pub timestamp: DateTime<Utc>,
}

/// Runs a sequence of [`SequenceStep`]s, settling after each filter change
/// and supporting cooperative pause/resume/cancel.
pub struct FilterSequenceOrchestrator {
    accessory: Arc<AccessoryCoordinator>,
    exposure: Arc<ExposurePipeline>,
    settling_time: Duration,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    completed_frames: AtomicU32,
    total_frames: AtomicU32,
    history: Mutex<Vec<HistoryEvent>>,
}

impl FilterSequenceOrchestrator {
    pub fn new(accessory: Arc<AccessoryCoordinator>, exposure: Arc<ExposurePipeline>) -> Self {
        Self {
            accessory,
            exposure,
            settling_time: DEFAULT_SETTLING_TIME,
            paused: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            completed_frames: AtomicU32::new(0),
            total_frames: AtomicU32::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_settling_time(mut self, settling_time: Duration) -> Self {
        self.settling_time = settling_time;
        self
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn progress_percent(&self) -> f64 {
        let total = self.total_frames.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        self.completed_frames.load(Ordering::SeqCst) as f64 / total as f64 * 100.0
    }

    pub fn history(&self) -> Vec<HistoryEvent> {
        self.history.lock().clone()
    }

    pub fn run(&self, steps: &[SequenceStep]) -> CoreResult<()> {
        self.cancelled.store(false, Ordering::SeqCst);
        self.completed_frames.store(0, Ordering::SeqCst);
        self.total_frames
            .store(steps.iter().map(|s| s.count).sum(), Ordering::SeqCst);
        self.history.lock().clear();

        for (step_index, step) in steps.iter().enumerate() {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(CoreError::Cancelled);
            }
            self.accessory.change_filter(&step.filter)?;
            info!(filter = %step.filter, gain = ?step.gain, offset = ?step.offset, "settling after filter change");
            thread::sleep(self.settling_time);

            for frame_index in 0..step.count {
                self.wait_while_paused();
                if self.cancelled.load(Ordering::SeqCst) {
                    self.exposure.abort_exposure()?;
                    return Err(CoreError::Cancelled);
                }
                self.exposure.start_exposure(step.exposure_s)?;
                self.wait_for_exposure_or_cancel()?;

                self.completed_frames.fetch_add(1, Ordering::SeqCst);
                self.history.lock().push(HistoryEvent {
                    step_index,
                    frame_index,
                    filter: step.filter.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(())
    }

    fn wait_while_paused(&self) {
        while self.paused.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_for_exposure_or_cancel(&self) -> CoreResult<()> {
        while self.exposure.is_exposing() {
            if self.cancelled.load(Ordering::SeqCst) {
                self.exposure.abort_exposure()?;
                return Err(CoreError::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aperture_core::FilterDescriptor;
    use aperture_core::FilterType;
    use aperture_device::{DeviceCore, ProtocolAdapter, SimulatedAdapter};
    use std::time::Duration as StdDuration;

    fn orchestrator() -> (Arc<DeviceCore>, FilterSequenceOrchestrator) {
        let adapter: Arc<dyn ProtocolAdapter> = Arc::new(SimulatedAdapter::new());
        let core = DeviceCore::new(adapter.clone());
        core.initialize().unwrap();
        core.connect("SimCam", StdDuration::from_secs(1), 0).unwrap();
        let accessory = AccessoryCoordinator::new(
            core.weak(),
            adapter.clone(),
            vec![
                FilterDescriptor::new("L", FilterType::Luminance, 0),
                FilterDescriptor::new("Ha", FilterType::Halpha, 1),
            ],
        );
        let exposure = ExposurePipeline::new(core.weak(), adapter);
        let orchestrator =
            FilterSequenceOrchestrator::new(accessory, exposure).with_settling_time(Duration::ZERO);
        (core, orchestrator)
    }

    #[test]
    fn runs_every_step_and_tracks_progress() {
        let (_core, orchestrator) = orchestrator();
        let steps = vec![
            SequenceStep {
                filter: "L".into(),
                exposure_s: 0.01,
                count: 2,
                gain: None,
                offset: None,
            },
            SequenceStep {
                filter: "Ha".into(),
                exposure_s: 0.01,
                count: 1,
                gain: Some(100.0),
                offset: Some(10.0),
            },
        ];
        orchestrator.run(&steps).unwrap();
        assert_eq!(orchestrator.progress_percent(), 100.0);
        assert_eq!(orchestrator.history().len(), 3);
    }

    #[test]
    fn cancel_before_run_starts_reports_cancelled() {
        let (_core, orchestrator) = orchestrator();
        orchestrator.cancel();
        let steps = vec![SequenceStep {
            filter: "L".into(),
            exposure_s: 0.01,
            count: 1,
            gain: None,
            offset: None,
        }];
        let err = orchestrator.run(&steps).unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[test]
    fn cancel_during_run_aborts_remaining_frames() {
        let (_core, orchestrator) = orchestrator();
        let orchestrator = Arc::new(orchestrator);
        let canceller = orchestrator.clone();
        let handle = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(50));
            canceller.cancel();
        });
        let steps = vec![SequenceStep {
            filter: "L".into(),
            exposure_s: 10.0,
            count: 5,
            gain: None,
            offset: None,
        }];
        let result = orchestrator.run(&steps);
        handle.join().unwrap();
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(orchestrator.progress_percent() < 100.0);
    }
}
