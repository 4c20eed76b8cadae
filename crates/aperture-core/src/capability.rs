//! Device capability bitmap (specification §3 "Device identity").
//!
//! Capabilities are determined once on connect and never change during a
//! session. Represented as a `bitflags`-style set over a `u32` so a whole
//! device's capability set fits in one word and can be copied freely.

use std::fmt;

macro_rules! capability_flags {
    ($(($name:ident, $bit:expr, $doc:literal)),+ $(,)?) => {
        /// Bitmap of hardware capabilities a device declares on connect.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct Capabilities(u32);

        impl Capabilities {
            pub const NONE: Capabilities = Capabilities(0);

            $(
                #[doc = $doc]
                pub const $name: Capabilities = Capabilities(1 << $bit);
            )+

            pub fn contains(self, other: Capabilities) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Capabilities) {
                self.0 |= other.0;
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn names(self) -> Vec<&'static str> {
                let mut out = Vec::new();
                $(
                    if self.contains(Capabilities::$name) {
                        out.push(stringify!($name));
                    }
                )+
                out
            }
        }

        impl std::ops::BitOr for Capabilities {
            type Output = Capabilities;
            fn bitor(self, rhs: Capabilities) -> Capabilities {
                Capabilities(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for Capabilities {
            fn bitor_assign(&mut self, rhs: Capabilities) {
                self.0 |= rhs.0;
            }
        }
    };
}

capability_flags! {
    (CAN_COOL, 0, "Camera has an active cooler."),
    (HAS_FAN, 1, "Camera has a cooler-assist fan."),
    (HAS_ANTI_DEW, 2, "Camera has an anti-dew heater."),
    (HAS_FILTER_WHEEL, 3, "An attached filter wheel is present."),
    (HAS_AUTO_FOCUSER, 4, "An attached auto-focuser is present."),
    (HAS_PIER_SIDE, 5, "Mount reports pier side."),
    (HAS_TRACK_MODE, 6, "Mount supports selectable tracking modes."),
    (CAN_PARK, 7, "Mount supports park/unpark."),
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}
