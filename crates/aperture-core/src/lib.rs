//! Core data model for the device-control substrate: the error taxonomy,
//! parameter store, capability bitmap, device lifecycle state, frame
//! representation, thermal history, filter descriptors, switch timers, and
//! the `Component` plugin trait shared by every higher-level crate in the
//! workspace.

pub mod capability;
pub mod component;
pub mod error;
pub mod filter;
pub mod frame;
pub mod parameter;
pub mod state;
pub mod temperature;
pub mod timer;

pub use capability::Capabilities;
pub use component::Component;
pub use error::{CoreError, CoreResult, ResourceKind};
pub use filter::{FilterDescriptor, FilterType};
pub use frame::{Binning, Frame, FrameMetadata};
pub use parameter::{ParameterStore, ParameterValue};
pub use state::DeviceState;
pub use temperature::{TemperatureHistory, TemperatureSample, TemperatureStats};
pub use timer::{Timer, TimerSet};
