//! Virtual gamepad output path.
//!
//! Optionally mirrors the parsed input stream back out as a synthetic HID
//! gamepad: 14 buttons, a 4-bit hat, four 8-bit axes and two 8-bit
//! triggers. Platform registration sits behind [`VirtualGamepadHost`];
//! the loopback host serves tests and hosts without a user-space HID
//! facility.

use std::collections::HashMap;

use crate::error::OutputError;
use crate::events::{AxisId, ButtonId, InputEvent, TriggerId};

/// Report descriptor registered with the host: 14-bit button field plus
/// two padding bits, 4-bit hat plus padding, X/Y/Z/Rz as u8, brake and
/// accelerator as the two triggers.
pub const GAMEPAD_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Gamepad)
    0xA1, 0x01, // Collection (Application)
    0x05, 0x09, // Usage Page (Button)
    0x19, 0x01, // Usage Minimum (1)
    0x29, 0x0E, // Usage Maximum (14)
    0x15, 0x00, // Logical Minimum (0)
    0x25, 0x01, // Logical Maximum (1)
    0x75, 0x01, // Report Size (1)
    0x95, 0x0E, // Report Count (14)
    0x81, 0x02, // Input (Data, Var, Abs)
    0x75, 0x01, // Report Size (1)
    0x95, 0x02, // Report Count (2)
    0x81, 0x01, // Input (Const), padding
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x39, // Usage (Hat Switch)
    0x15, 0x00, // Logical Minimum (0)
    0x25, 0x07, // Logical Maximum (7)
    0x75, 0x04, // Report Size (4)
    0x95, 0x01, // Report Count (1)
    0x81, 0x42, // Input (Data, Var, Abs, Null State)
    0x75, 0x04, // Report Size (4)
    0x95, 0x01, // Report Count (1)
    0x81, 0x01, // Input (Const), padding
    0x09, 0x30, // Usage (X)
    0x09, 0x31, // Usage (Y)
    0x09, 0x32, // Usage (Z)
    0x09, 0x35, // Usage (Rz)
    0x15, 0x00, // Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, // Report Size (8)
    0x95, 0x04, // Report Count (4)
    0x81, 0x02, // Input (Data, Var, Abs)
    0x05, 0x02, // Usage Page (Simulation Controls)
    0x09, 0xC5, // Usage (Brake)
    0x09, 0xC4, // Usage (Accelerator)
    0x15, 0x00, // Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, // Report Size (8)
    0x95, 0x02, // Report Count (2)
    0x81, 0x02, // Input (Data, Var, Abs)
    0xC0, // End Collection
];

/// Set-report id the host uses for rumble.
pub const RUMBLE_REPORT_ID: u8 = 0x03;

/// Button order inside the 14-bit field.
pub const VIRTUAL_BUTTON_ORDER: [ButtonId; 14] = [
    ButtonId::A,
    ButtonId::B,
    ButtonId::X,
    ButtonId::Y,
    ButtonId::LShoulder,
    ButtonId::RShoulder,
    ButtonId::Back,
    ButtonId::Start,
    ButtonId::LStick,
    ButtonId::RStick,
    ButtonId::Guide,
    ButtonId::Share,
    ButtonId::View,
    ButtonId::Mute,
];

/// Hat nibble meaning "nothing pressed".
const HAT_NULL: u8 = 0x08;

/// Handle to one registered virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualDeviceId(pub u32);

/// LED patterns the host side understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Off,
    Player(u8),
    Blink,
}

/// Rumble request decoded from a host set-report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RumbleRequest {
    pub left_motor: f32,
    pub right_motor: f32,
}

impl RumbleRequest {
    /// Decodes `[id, left, right]`; `None` for foreign reports.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 3 || data[0] != RUMBLE_REPORT_ID {
            return None;
        }
        Some(Self {
            left_motor: data[1] as f32 / 255.0,
            right_motor: data[2] as f32 / 255.0,
        })
    }
}

/// One 9-byte input report: buttons LE, hat nibble, axes, triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputReport {
    pub buttons: u16,
    pub hat: u8,
    pub axes: [u8; 4],
    pub triggers: [u8; 2],
}

impl Default for InputReport {
    fn default() -> Self {
        Self {
            buttons: 0,
            hat: HAT_NULL,
            axes: [0x80; 4],
            triggers: [0; 2],
        }
    }
}

impl InputReport {
    pub fn pack(&self) -> [u8; 9] {
        let buttons = self.buttons & 0x3FFF;
        [
            (buttons & 0xFF) as u8,
            (buttons >> 8) as u8,
            self.hat & 0x0F,
            self.axes[0],
            self.axes[1],
            self.axes[2],
            self.axes[3],
            self.triggers[0],
            self.triggers[1],
        ]
    }
}

/// Host-side registration contract.
pub trait VirtualGamepadHost: Send {
    fn create(
        &mut self,
        vendor_id: u16,
        product_id: u16,
        product_name: &str,
    ) -> Result<VirtualDeviceId, OutputError>;
    fn destroy(&mut self, id: VirtualDeviceId) -> Result<(), OutputError>;
    fn send_input_report(
        &mut self,
        id: VirtualDeviceId,
        buttons: u16,
        axes: [u8; 4],
        triggers: [u8; 2],
    ) -> Result<(), OutputError>;
    fn send_rumble(&mut self, id: VirtualDeviceId, left: f32, right: f32)
        -> Result<(), OutputError>;
    fn send_led(&mut self, id: VirtualDeviceId, pattern: LedPattern) -> Result<(), OutputError>;
}

/// In-memory host: registers nothing with the OS, records everything.
pub struct LoopbackGamepadHost {
    next_id: u32,
    devices: HashMap<VirtualDeviceId, String>,
    reports: HashMap<VirtualDeviceId, Vec<[u8; 9]>>,
    rumble: HashMap<VirtualDeviceId, Vec<RumbleRequest>>,
    leds: HashMap<VirtualDeviceId, LedPattern>,
}

impl LoopbackGamepadHost {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            devices: HashMap::new(),
            reports: HashMap::new(),
            rumble: HashMap::new(),
            leds: HashMap::new(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn reports_for(&self, id: VirtualDeviceId) -> &[[u8; 9]] {
        self.reports.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Simulates the host issuing a set-report; decoded rumble becomes
    /// visible through `pending_rumble`.
    pub fn host_set_report(&mut self, id: VirtualDeviceId, data: &[u8]) {
        if let Some(request) = RumbleRequest::parse(data) {
            self.rumble.entry(id).or_default().push(request);
        }
    }

    pub fn pending_rumble(&mut self, id: VirtualDeviceId) -> Vec<RumbleRequest> {
        self.rumble.remove(&id).unwrap_or_default()
    }

    pub fn led_for(&self, id: VirtualDeviceId) -> Option<LedPattern> {
        self.leds.get(&id).copied()
    }
}

impl Default for LoopbackGamepadHost {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualGamepadHost for LoopbackGamepadHost {
    fn create(
        &mut self,
        _vendor_id: u16,
        _product_id: u16,
        product_name: &str,
    ) -> Result<VirtualDeviceId, OutputError> {
        let id = VirtualDeviceId(self.next_id);
        self.next_id += 1;
        self.devices.insert(id, product_name.to_string());
        Ok(id)
    }

    fn destroy(&mut self, id: VirtualDeviceId) -> Result<(), OutputError> {
        self.devices
            .remove(&id)
            .map(|_| ())
            .ok_or(OutputError::EventCreationFailed)
    }

    fn send_input_report(
        &mut self,
        id: VirtualDeviceId,
        buttons: u16,
        axes: [u8; 4],
        triggers: [u8; 2],
    ) -> Result<(), OutputError> {
        if !self.devices.contains_key(&id) {
            return Err(OutputError::EventCreationFailed);
        }
        let report = InputReport {
            buttons,
            hat: HAT_NULL,
            axes,
            triggers,
        };
        self.reports.entry(id).or_default().push(report.pack());
        Ok(())
    }

    fn send_rumble(
        &mut self,
        id: VirtualDeviceId,
        left: f32,
        right: f32,
    ) -> Result<(), OutputError> {
        self.rumble.entry(id).or_default().push(RumbleRequest {
            left_motor: left.clamp(0.0, 1.0),
            right_motor: right.clamp(0.0, 1.0),
        });
        Ok(())
    }

    fn send_led(&mut self, id: VirtualDeviceId, pattern: LedPattern) -> Result<(), OutputError> {
        self.leds.insert(id, pattern);
        Ok(())
    }
}

/// Folds the parsed event stream into the current virtual report.
///
/// D-pad and hat events are ignored here: the host contract transmits
/// buttons, axes, and triggers only, so the report's hat nibble stays at
/// its null value and a d-pad transition must not mark the report dirty.
pub struct VirtualPadMirror {
    report: InputReport,
    dirty: bool,
}

impl VirtualPadMirror {
    pub fn new() -> Self {
        Self {
            report: InputReport::default(),
            dirty: false,
        }
    }

    pub fn report(&self) -> InputReport {
        self.report
    }

    /// Applies one event to the report state.
    pub fn update(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::ButtonPress { button, .. } => self.set_button(button, true),
            InputEvent::ButtonRelease { button, .. } => self.set_button(button, false),
            InputEvent::AxisMove { axis, normalized, .. } => {
                let value = ((normalized.clamp(-1.0, 1.0) * 127.0) as i16 + 128).clamp(0, 255) as u8;
                let slot = match axis {
                    AxisId::LStickX => 0,
                    AxisId::LStickY => 1,
                    AxisId::RStickX => 2,
                    AxisId::RStickY => 3,
                    _ => return,
                };
                if self.report.axes[slot] != value {
                    self.report.axes[slot] = value;
                    self.dirty = true;
                }
            }
            InputEvent::TriggerMove {
                trigger, normalized, ..
            } => {
                let value = (normalized.clamp(0.0, 1.0) * 255.0) as u8;
                let slot = match trigger {
                    TriggerId::Left => 0,
                    TriggerId::Right => 1,
                    TriggerId::Custom(_) => return,
                };
                if self.report.triggers[slot] != value {
                    self.report.triggers[slot] = value;
                    self.dirty = true;
                }
            }
            // Not representable through `send_input_report`; see the
            // struct docs.
            InputEvent::DPadMove { .. } | InputEvent::HatSwitch { .. } => {}
        }
    }

    fn set_button(&mut self, button: ButtonId, pressed: bool) {
        let Some(index) = VIRTUAL_BUTTON_ORDER.iter().position(|&b| b == button) else {
            return;
        };
        let mask = 1u16 << index;
        let next = if pressed {
            self.report.buttons | mask
        } else {
            self.report.buttons & !mask
        };
        if next != self.report.buttons {
            self.report.buttons = next;
            self.dirty = true;
        }
    }

    /// Sends the current report when anything changed since the last
    /// flush.
    pub fn flush(
        &mut self,
        host: &mut dyn VirtualGamepadHost,
        id: VirtualDeviceId,
    ) -> Result<(), OutputError> {
        if !self.dirty {
            return Ok(());
        }
        self.dirty = false;
        host.send_input_report(id, self.report.buttons, self.report.axes, self.report.triggers)
    }
}

impl Default for VirtualPadMirror {
    fn default() -> Self {
        Self::new()
    }
}
