//! Normalized input event model.
//!
//! Every protocol parser decodes raw interrupt reports into this shared
//! vocabulary. Identifiers have a canonical string form used by profile
//! mappings; the mapping engine parses those strings once per profile, so
//! event dispatch itself never allocates.

use std::fmt;

/// Milliseconds since the owning session started reading.
pub type Timestamp = u64;

/// Hat-switch value meaning "no direction pressed".
pub const HAT_NEUTRAL: u16 = u16::MAX;

/// Symbolic button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonId {
    A,
    B,
    X,
    Y,
    LShoulder,
    RShoulder,
    LTrigger,
    RTrigger,
    Back,
    Start,
    LStick,
    RStick,
    Guide,
    Share,
    View,
    Mute,
    Custom(u8),
}

impl ButtonId {
    /// Parses the canonical identifier string back into a button id.
    pub fn from_identifier(s: &str) -> Option<Self> {
        Some(match s {
            "A" => Self::A,
            "B" => Self::B,
            "X" => Self::X,
            "Y" => Self::Y,
            "LB" => Self::LShoulder,
            "RB" => Self::RShoulder,
            "LT" => Self::LTrigger,
            "RT" => Self::RTrigger,
            "Back" => Self::Back,
            "Start" => Self::Start,
            "LS_Click" => Self::LStick,
            "RS_Click" => Self::RStick,
            "Guide" => Self::Guide,
            "Share" => Self::Share,
            "View" => Self::View,
            "Mute" => Self::Mute,
            _ => {
                let n = s.strip_prefix("Button")?.parse().ok()?;
                Self::Custom(n)
            }
        })
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::X => write!(f, "X"),
            Self::Y => write!(f, "Y"),
            Self::LShoulder => write!(f, "LB"),
            Self::RShoulder => write!(f, "RB"),
            Self::LTrigger => write!(f, "LT"),
            Self::RTrigger => write!(f, "RT"),
            Self::Back => write!(f, "Back"),
            Self::Start => write!(f, "Start"),
            Self::LStick => write!(f, "LS_Click"),
            Self::RStick => write!(f, "RS_Click"),
            Self::Guide => write!(f, "Guide"),
            Self::Share => write!(f, "Share"),
            Self::View => write!(f, "View"),
            Self::Mute => write!(f, "Mute"),
            Self::Custom(n) => write!(f, "Button{}", n),
        }
    }
}

/// Symbolic axis identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    LStickX,
    LStickY,
    RStickX,
    RStickY,
    LTrigger,
    RTrigger,
    Custom(u8),
}

impl AxisId {
    /// Index into dense per-parser state arrays. Custom axes share a
    /// single overflow scheme past the six fixed slots.
    #[inline]
    pub fn slot(self) -> usize {
        match self {
            Self::LStickX => 0,
            Self::LStickY => 1,
            Self::RStickX => 2,
            Self::RStickY => 3,
            Self::LTrigger => 4,
            Self::RTrigger => 5,
            Self::Custom(n) => 6 + (n as usize % (crate::parsers::MAX_AXES - 6)),
        }
    }

    /// The paired stick axis, if this axis is one half of a stick.
    #[inline]
    pub fn stick_partner(self) -> Option<AxisId> {
        match self {
            Self::LStickX => Some(Self::LStickY),
            Self::LStickY => Some(Self::LStickX),
            Self::RStickX => Some(Self::RStickY),
            Self::RStickY => Some(Self::RStickX),
            _ => None,
        }
    }

    /// Parses the canonical identifier string back into an axis id.
    pub fn from_identifier(s: &str) -> Option<Self> {
        Some(match s {
            "LSX" => Self::LStickX,
            "LSY" => Self::LStickY,
            "RSX" => Self::RStickX,
            "RSY" => Self::RStickY,
            "LT" => Self::LTrigger,
            "RT" => Self::RTrigger,
            _ => {
                let n = s.strip_prefix("Axis")?.parse().ok()?;
                Self::Custom(n)
            }
        })
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LStickX => write!(f, "LSX"),
            Self::LStickY => write!(f, "LSY"),
            Self::RStickX => write!(f, "RSX"),
            Self::RStickY => write!(f, "RSY"),
            Self::LTrigger => write!(f, "LT"),
            Self::RTrigger => write!(f, "RT"),
            Self::Custom(n) => write!(f, "Axis{}", n),
        }
    }
}

/// Symbolic trigger identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerId {
    Left,
    Right,
    Custom(u8),
}

impl TriggerId {
    #[inline]
    pub fn slot(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Custom(n) => 2 + (n as usize % (crate::parsers::MAX_TRIGGERS - 2)),
        }
    }

    pub fn from_identifier(s: &str) -> Option<Self> {
        Some(match s {
            "LT" => Self::Left,
            "RT" => Self::Right,
            _ => {
                let n = s.strip_prefix("Trigger")?.parse().ok()?;
                Self::Custom(n)
            }
        })
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "LT"),
            Self::Right => write!(f, "RT"),
            Self::Custom(n) => write!(f, "Trigger{}", n),
        }
    }
}

/// Horizontal d-pad component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DpadHorizontal {
    Left,
    #[default]
    Neutral,
    Right,
}

/// Vertical d-pad component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DpadVertical {
    Up,
    #[default]
    Neutral,
    Down,
}

/// A single normalized input event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    ButtonPress {
        button: ButtonId,
        timestamp: Timestamp,
    },
    ButtonRelease {
        button: ButtonId,
        timestamp: Timestamp,
    },
    AxisMove {
        axis: AxisId,
        normalized: f32,
        raw: i16,
        timestamp: Timestamp,
    },
    TriggerMove {
        trigger: TriggerId,
        normalized: f32,
        raw: u8,
        is_pressed: bool,
        timestamp: Timestamp,
    },
    DPadMove {
        dpad: u8,
        horizontal: DpadHorizontal,
        vertical: DpadVertical,
        timestamp: Timestamp,
    },
    HatSwitch {
        hat: u8,
        angle_degrees: u16,
        timestamp: Timestamp,
    },
}

impl InputEvent {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::ButtonPress { timestamp, .. }
            | Self::ButtonRelease { timestamp, .. }
            | Self::AxisMove { timestamp, .. }
            | Self::TriggerMove { timestamp, .. }
            | Self::DPadMove { timestamp, .. }
            | Self::HatSwitch { timestamp, .. } => *timestamp,
        }
    }
}

/// Normalizes a signed 16-bit axis value into `[-1, 1]`.
///
/// `32767` maps to exactly `1.0`; `-32768` clamps to `-1.0`.
#[inline]
pub fn normalize_signed_16(v: i16) -> f32 {
    (v as f32 / 32767.0).clamp(-1.0, 1.0)
}

/// Normalizes an unsigned 8-bit trigger value into `[0, 1]`.
#[inline]
pub fn normalize_unsigned_8(v: u8) -> f32 {
    v as f32 / 255.0
}

/// Normalizes a signed 8-bit axis value into `[-1, 1]`.
#[inline]
pub fn normalize_signed_8(v: i8) -> f32 {
    (v as f32 / 127.0).clamp(-1.0, 1.0)
}

/// Normalizes an 8-bit axis centered at 128 into `[-1, 1]`.
#[inline]
pub fn normalize_centered_8(v: u8) -> f32 {
    ((v as i16 - 128) as f32 / 127.0).clamp(-1.0, 1.0)
}
