//! The `Component` plugin trait (specification §3 "Components", §4.1,
//! §4.2).
//!
//! Components are non-owning: a Device Core holds `Box<dyn Component>`
//! instances registered at `initialize()` time (or dynamically afterward)
//! and calls back into them on state and parameter changes. Notification
//! calls always happen after the originating lock (parameter store, state
//! cell) has been released, so a component's callback is free to call back
//! into the Device Core — including registering or unregistering other
//! components — without deadlocking.

use crate::error::CoreResult;
use crate::parameter::ParameterValue;
use crate::state::DeviceState;

/// A pluggable unit of device behavior (exposure pipeline, thermal
/// controller, accessory coordinator, or a user-supplied extension).
///
/// Implementors should treat `initialize`/`destroy` as symmetric: anything
/// started in `initialize` (threads, timers, subscriptions) must be torn
/// down in `destroy`.
pub trait Component: Send + Sync {
    /// Stable identifier used in logs and in `ComponentInitFailed` errors.
    fn name(&self) -> &str;

    /// Called once by the Device Core when the component is registered.
    /// Failing here does not unregister the component; the Device Core
    /// surfaces the error and leaves registration decisions to the caller.
    fn initialize(&self) -> CoreResult<()>;

    /// Called once when the component is unregistered or the owning Device
    /// Core is destroyed. Must not panic or block indefinitely.
    fn destroy(&self);

    /// Invoked after the Device Core's state cell transitions, with the
    /// previous and new state. Default implementation ignores the event.
    fn on_state_changed(&self, _previous: DeviceState, _current: DeviceState) {}

    /// Invoked after a parameter write commits in the Device Core's
    /// `ParameterStore`. Default implementation ignores the event.
    fn on_parameter_changed(&self, _name: &str, _value: ParameterValue) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingComponent {
        state_events: Mutex<Vec<(DeviceState, DeviceState)>>,
        param_events: Mutex<Vec<(String, ParameterValue)>>,
    }

    impl RecordingComponent {
        fn new() -> Self {
            Self {
                state_events: Mutex::new(Vec::new()),
                param_events: Mutex::new(Vec::new()),
            }
        }
    }

    impl Component for RecordingComponent {
        fn name(&self) -> &str {
            "recording"
        }

        fn initialize(&self) -> CoreResult<()> {
            Ok(())
        }

        fn destroy(&self) {}

        fn on_state_changed(&self, previous: DeviceState, current: DeviceState) {
            self.state_events.lock().push((previous, current));
        }

        fn on_parameter_changed(&self, name: &str, value: ParameterValue) {
            self.param_events.lock().push((name.to_string(), value));
        }
    }

    #[test]
    fn records_state_transitions() {
        let component = RecordingComponent::new();
        component.on_state_changed(DeviceState::Idle, DeviceState::Connecting);
        assert_eq!(
            component.state_events.lock()[0],
            (DeviceState::Idle, DeviceState::Connecting)
        );
    }

    #[test]
    fn default_callbacks_are_no_ops() {
        struct Bare;
        impl Component for Bare {
            fn name(&self) -> &str {
                "bare"
            }
            fn initialize(&self) -> CoreResult<()> {
                Ok(())
            }
            fn destroy(&self) {}
        }
        let bare = Bare;
        bare.on_state_changed(DeviceState::Idle, DeviceState::Error);
        bare.on_parameter_changed("x", ParameterValue { value: 1.0, version: 1 });
    }
}
