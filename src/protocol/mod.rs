//! Controller protocol identification and initialization.

pub mod detect;
pub mod init;

use std::fmt;

pub use detect::detect;

/// Wire protocol spoken by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// Xbox One / Series Gaming Input Protocol.
    Gip,
    /// Legacy Xbox 360 protocol, 8-byte reports.
    XInput,
    /// DualShock 4.
    Ds4,
    /// DualSense.
    Ds5,
    /// Switch Pro over USB HID.
    SwitchHid,
    /// Anything else with a HID report stream.
    GenericHid,
}

impl ProtocolKind {
    /// Shortest report the protocol's parser accepts.
    pub fn min_report_len(self) -> usize {
        match self {
            Self::Gip => 15,
            Self::XInput => 8,
            Self::Ds4 | Self::Ds5 => 8,
            Self::SwitchHid => 8,
            Self::GenericHid => 8,
        }
    }

    /// Read-buffer size for the session's interrupt-IN loop.
    pub fn max_report_len(self) -> usize {
        match self {
            Self::Gip => 64,
            Self::XInput => 32,
            Self::Ds4 | Self::Ds5 => 64,
            Self::SwitchHid => 64,
            Self::GenericHid => 64,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gip => "GIP",
            Self::XInput => "XInput",
            Self::Ds4 => "DualShock 4",
            Self::Ds5 => "DualSense",
            Self::SwitchHid => "Switch HID",
            Self::GenericHid => "Generic HID",
        };
        write!(f, "{}", name)
    }
}
