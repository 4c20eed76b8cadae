//! The Device Core (specification §4.1): per-device lifecycle, capability
//! registry, parameter store, state machine, and component fan-out.
//!
//! Components hold a [`Weak`] back-reference to their owning core rather
//! than an owning pointer (specification §9 "Callbacks and
//! back-references"), so there is never an ownership cycle between a
//! `DeviceCore` and the `Arc<dyn Component>`s it registers.

use crate::adapter::ProtocolAdapter;
use aperture_core::{Capabilities, Component, CoreError, CoreResult, DeviceState, ParameterStore, ParameterValue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Per-device coordinator: owns the protocol adapter, the registered
/// components, the parameter store, and the lifecycle state cell.
pub struct DeviceCore {
    adapter: Arc<dyn ProtocolAdapter>,
    components: Mutex<Vec<Arc<dyn Component>>>,
    state: Mutex<DeviceState>,
    parameters: ParameterStore,
    capabilities: Mutex<Capabilities>,
    device_name: Mutex<Option<String>>,
    initialized: AtomicBool,
    connected: AtomicBool,
}

impl DeviceCore {
    pub fn new(adapter: Arc<dyn ProtocolAdapter>) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            components: Mutex::new(Vec::new()),
            state: Mutex::new(DeviceState::Idle),
            parameters: ParameterStore::new(),
            capabilities: Mutex::new(Capabilities::NONE),
            device_name: Mutex::new(None),
            initialized: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        })
    }

    pub fn adapter(&self) -> &Arc<dyn ProtocolAdapter> {
        &self.adapter
    }

    pub fn weak(self: &Arc<Self>) -> Weak<Self> {
        Arc::downgrade(self)
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn capabilities(&self) -> Capabilities {
        *self.capabilities.lock()
    }

    pub fn device_name(&self) -> Option<String> {
        self.device_name.lock().clone()
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    /// Register a component in the current registration order. Safe to call
    /// before or after `initialize()`; only components registered before
    /// `initialize()` is called are initialized by it.
    pub fn register_component(&self, component: Arc<dyn Component>) {
        self.components.lock().push(component);
    }

    /// Unregister a component. Comparing by `Arc::ptr_eq`; skips silently if
    /// the component was already removed (e.g. concurrently, or twice).
    pub fn unregister_component(&self, component: &Arc<dyn Component>) {
        self.components
            .lock()
            .retain(|c| !Arc::ptr_eq(c, component));
    }

    /// Idempotent: returns `Ok(())` both the first time and on subsequent
    /// calls (`AlreadyInitialized` is a success per specification §4.1).
    pub fn initialize(&self) -> CoreResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.adapter.initialize() {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(CoreError::AdapterInitFailed(e.to_string()));
        }

        let components = self.components.lock().clone();
        let mut started: Vec<Arc<dyn Component>> = Vec::with_capacity(components.len());
        for component in &components {
            match component.initialize() {
                Ok(()) => {
                    debug!(component = component.name(), "component initialized");
                    started.push(component.clone());
                }
                Err(e) => {
                    warn!(component = component.name(), error = %e, "component init failed, rolling back");
                    for done in started.iter().rev() {
                        done.destroy();
                    }
                    self.adapter.destroy();
                    self.initialized.store(false, Ordering::SeqCst);
                    return Err(CoreError::ComponentInitFailed {
                        name: component.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(components = started.len(), "device core initialized");
        Ok(())
    }

    /// The inverse of `initialize`: disconnect if connected, destroy
    /// components in reverse registration order (failures are logged, not
    /// propagated — a component that panics on destroy is a bug in that
    /// component, not a reason to leak the rest), then release the adapter.
    pub fn destroy(&self) {
        if self.connected.load(Ordering::SeqCst) {
            self.disconnect();
        }
        let components = self.components.lock().clone();
        for component in components.iter().rev() {
            component.destroy();
        }
        self.adapter.destroy();
        self.initialized.store(false, Ordering::SeqCst);
        info!("device core destroyed");
    }

    /// Attempts to locate and open `device_name`, retrying with a 1 s
    /// backoff up to `max_retry` times.
    pub fn connect(&self, device_name: &str, timeout: Duration, max_retry: u32) -> CoreResult<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(CoreError::NotInitialized);
        }
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.update_state(DeviceState::Connecting);
        let mut attempt = 0u32;
        loop {
            match self.adapter.open(device_name, timeout) {
                Ok(caps) => {
                    *self.capabilities.lock() = caps;
                    *self.device_name.lock() = Some(device_name.to_string());
                    self.connected.store(true, Ordering::SeqCst);
                    self.update_state(DeviceState::Idle);
                    return Ok(());
                }
                Err(e) if attempt < max_retry && e.is_transient() => {
                    attempt += 1;
                    warn!(attempt, device_name, error = %e, "connect attempt failed, retrying");
                    thread::sleep(CONNECT_BACKOFF);
                }
                Err(e) => {
                    self.update_state(DeviceState::Error);
                    return Err(e);
                }
            }
        }
    }

    pub fn disconnect(&self) {
        self.adapter.close();
        self.connected.store(false, Ordering::SeqCst);
        *self.device_name.lock() = None;
        self.update_state(DeviceState::Idle);
    }

    pub fn scan(&self) -> Vec<String> {
        self.adapter.scan()
    }

    /// Atomic read-modify-compare: only notifies components if the state
    /// actually changed.
    pub fn update_state(&self, new_state: DeviceState) {
        let previous = {
            let mut guard = self.state.lock();
            if *guard == new_state {
                return;
            }
            let previous = *guard;
            *guard = new_state;
            previous
        };
        let subscribers = self.components.lock().clone();
        for component in &subscribers {
            // A panicking observer must not prevent the rest of the
            // fan-out from running.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                component.on_state_changed(previous, new_state);
            }));
            if result.is_err() {
                error!(component = component.name(), "panicked handling state change");
            }
        }
    }

    pub fn set_parameter(&self, name: &str, value: f64) {
        let committed = self.parameters.set(name, value);
        let subscribers = self.components.lock().clone();
        for component in &subscribers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                component.on_parameter_changed(name, committed);
            }));
            if result.is_err() {
                error!(component = component.name(), parameter = name, "panicked handling parameter change");
            }
        }
    }

    pub fn get_parameter(&self, name: &str) -> Option<ParameterValue> {
        self.parameters.get(name)
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.has(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedAdapter;
    use aperture_core::DeviceState;
    use std::sync::atomic::AtomicUsize;

    struct CountingComponent {
        init_calls: AtomicUsize,
        destroy_calls: AtomicUsize,
        state_events: Mutex<Vec<(DeviceState, DeviceState)>>,
        fail_init: bool,
    }

    impl CountingComponent {
        fn new(fail_init: bool) -> Self {
            Self {
                init_calls: AtomicUsize::new(0),
                destroy_calls: AtomicUsize::new(0),
                state_events: Mutex::new(Vec::new()),
                fail_init,
            }
        }
    }

    impl Component for CountingComponent {
        fn name(&self) -> &str {
            "counting"
        }

        fn initialize(&self) -> CoreResult<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                Err(CoreError::Fatal("boom".into()))
            } else {
                Ok(())
            }
        }

        fn destroy(&self) {
            self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn on_state_changed(&self, previous: DeviceState, current: DeviceState) {
            self.state_events.lock().push((previous, current));
        }
    }

    fn core_with_adapter() -> Arc<DeviceCore> {
        DeviceCore::new(Arc::new(SimulatedAdapter::new()))
    }

    #[test]
    fn initialize_is_idempotent() {
        let core = core_with_adapter();
        assert!(core.initialize().is_ok());
        assert!(core.initialize().is_ok());
    }

    #[test]
    fn failed_component_init_rolls_back_previous_components() {
        let core = core_with_adapter();
        let good = Arc::new(CountingComponent::new(false));
        let bad = Arc::new(CountingComponent::new(true));
        core.register_component(good.clone());
        core.register_component(bad.clone());

        let err = core.initialize().unwrap_err();
        assert!(matches!(err, CoreError::ComponentInitFailed { .. }));
        assert_eq!(good.destroy_calls.load(Ordering::SeqCst), 1);
        assert!(!core.is_initialized());
    }

    #[test]
    fn connect_requires_initialize_first() {
        let core = core_with_adapter();
        let err = core.connect("SimCam", Duration::from_secs(1), 0).unwrap_err();
        assert!(matches!(err, CoreError::NotInitialized));
    }

    #[test]
    fn connect_unknown_device_transitions_to_error() {
        let core = core_with_adapter();
        core.initialize().unwrap();
        let err = core.connect("NoSuchCam", Duration::from_secs(1), 0).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert_eq!(core.state(), DeviceState::Error);
    }

    #[test]
    fn connect_then_disconnect_then_connect_ends_idle() {
        let core = core_with_adapter();
        core.initialize().unwrap();
        core.connect("SimCam", Duration::from_secs(1), 0).unwrap();
        assert_eq!(core.state(), DeviceState::Idle);
        core.disconnect();
        core.connect("SimCam", Duration::from_secs(1), 0).unwrap();
        assert_eq!(core.state(), DeviceState::Idle);
    }

    #[test]
    fn second_connect_while_connected_is_a_no_op_success() {
        let core = core_with_adapter();
        core.initialize().unwrap();
        core.connect("SimCam", Duration::from_secs(1), 0).unwrap();
        assert!(core.connect("SimCam", Duration::from_secs(1), 0).is_ok());
    }

    #[test]
    fn state_changes_fan_out_to_components() {
        let core = core_with_adapter();
        let recorder = Arc::new(CountingComponent::new(false));
        core.register_component(recorder.clone());
        core.initialize().unwrap();
        core.update_state(DeviceState::Exposing);
        assert_eq!(
            recorder.state_events.lock().last().copied(),
            Some((DeviceState::Idle, DeviceState::Exposing))
        );
    }

    #[test]
    fn set_parameter_commits_and_is_readable() {
        let core = core_with_adapter();
        core.set_parameter("gain", 42.0);
        assert_eq!(core.get_parameter("gain").unwrap().value, 42.0);
        assert!(core.has_parameter("gain"));
    }
}
