//! Device-control substrate: the Device Core, its pluggable Components
//! (Exposure Pipeline, Thermal Controller, Accessory Coordinator), the
//! Protocol Adapter boundary, a simulated adapter for hardware-free
//! testing, and per-device session persistence.

pub mod accessory;
pub mod adapter;
pub mod core;
pub mod exposure;
pub mod session;
pub mod simulated;
pub mod thermal;

pub use accessory::{AccessoryCoordinator, SequenceCallback};
pub use adapter::{AdapterIdentity, ControlCaps, ExposureStatus, ProtocolAdapter};
pub use core::DeviceCore;
pub use exposure::ExposurePipeline;
pub use session::SessionState;
pub use simulated::SimulatedAdapter;
pub use thermal::ThermalController;
