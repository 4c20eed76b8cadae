//! Task-level orchestrators layered over the device-control substrate:
//! multi-filter imaging sequences and calibration-frame capture. Neither
//! module touches the Device Core directly; both drive it only through
//! `aperture-device`'s Component APIs.

pub mod calibration;
pub mod filter_sequence;

pub use calibration::{AutoFlatResult, CalibrationKind, CalibrationOrchestrator, CalibrationRequest};
pub use filter_sequence::{FilterSequenceOrchestrator, HistoryEvent, SequenceStep};
