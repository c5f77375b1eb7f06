//! Per-protocol report parsers.
//!
//! One parser per protocol kind behind a sum type; dispatch is a plain
//! match so the hot path carries no vtable and no allocation. Every parser
//! owns previous-state memory and emits events only on change: buttons on
//! any flip, axes and triggers past a normalized threshold, d-pad and hat
//! on component change.

pub mod descriptor;
pub mod ds4;
pub mod generic;
pub mod gip;
pub mod xinput;

use smallvec::SmallVec;

use crate::events::{
    AxisId, ButtonId, DpadHorizontal, DpadVertical, InputEvent, Timestamp, TriggerId, HAT_NEUTRAL,
};
use crate::protocol::ProtocolKind;

/// Axis state slots, fixed plus custom overflow.
pub const MAX_AXES: usize = 8;
/// Trigger state slots.
pub const MAX_TRIGGERS: usize = 4;

/// Normalized change below which axis and trigger moves are suppressed.
pub const AXIS_EMIT_THRESHOLD: f32 = 0.01;
/// Normalized trigger travel at which `is_pressed` becomes true.
pub const TRIGGER_PRESS_THRESHOLD: f32 = 0.1;

/// Event buffer sized for a full-state report without spilling.
pub type EventBuffer = SmallVec<[InputEvent; 16]>;

/// Previous-state memory shared by the fixed-layout parsers.
///
/// Axis state is keyed by `(protocol, identifier)` through [`AxisId::slot`];
/// there are no sentinel indices.
#[derive(Debug, Clone)]
pub struct ParserState {
    buttons: u32,
    axes: [f32; MAX_AXES],
    triggers: [f32; MAX_TRIGGERS],
    triggers_pressed: [bool; MAX_TRIGGERS],
    dpad: (DpadHorizontal, DpadVertical),
    hat: u16,
}

impl Default for ParserState {
    fn default() -> Self {
        Self {
            buttons: 0,
            axes: [0.0; MAX_AXES],
            triggers: [0.0; MAX_TRIGGERS],
            triggers_pressed: [false; MAX_TRIGGERS],
            dpad: (DpadHorizontal::Neutral, DpadVertical::Neutral),
            hat: HAT_NEUTRAL,
        }
    }
}

impl ParserState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diffs a fresh button bit vector against the stored one. Bit `i`
    /// corresponds to `layout[i]`.
    pub fn diff_buttons(
        &mut self,
        new_bits: u32,
        layout: &[ButtonId],
        timestamp: Timestamp,
        out: &mut EventBuffer,
    ) {
        let changed = self.buttons ^ new_bits;
        if changed == 0 {
            return;
        }
        for (i, &button) in layout.iter().enumerate() {
            let mask = 1u32 << i;
            if changed & mask == 0 {
                continue;
            }
            if new_bits & mask != 0 {
                out.push(InputEvent::ButtonPress { button, timestamp });
            } else {
                out.push(InputEvent::ButtonRelease { button, timestamp });
            }
        }
        self.buttons = new_bits;
    }

    /// Emits an axis move when the normalized value moved past the
    /// hysteresis threshold.
    pub fn update_axis(
        &mut self,
        axis: AxisId,
        raw: i16,
        normalized: f32,
        timestamp: Timestamp,
        out: &mut EventBuffer,
    ) {
        let slot = axis.slot();
        if (normalized - self.axes[slot]).abs() > AXIS_EMIT_THRESHOLD {
            self.axes[slot] = normalized;
            out.push(InputEvent::AxisMove {
                axis,
                normalized,
                raw,
                timestamp,
            });
        }
    }

    /// Emits a trigger move on threshold-crossing travel or on a press
    /// state flip.
    pub fn update_trigger(
        &mut self,
        trigger: TriggerId,
        raw: u8,
        normalized: f32,
        timestamp: Timestamp,
        out: &mut EventBuffer,
    ) {
        let slot = trigger.slot();
        let is_pressed = normalized >= TRIGGER_PRESS_THRESHOLD;
        let moved = (normalized - self.triggers[slot]).abs() > AXIS_EMIT_THRESHOLD;
        if moved || is_pressed != self.triggers_pressed[slot] {
            self.triggers[slot] = normalized;
            self.triggers_pressed[slot] = is_pressed;
            out.push(InputEvent::TriggerMove {
                trigger,
                normalized,
                raw,
                is_pressed,
                timestamp,
            });
        }
    }

    /// Emits a d-pad move when either component changed.
    pub fn update_dpad(
        &mut self,
        horizontal: DpadHorizontal,
        vertical: DpadVertical,
        timestamp: Timestamp,
        out: &mut EventBuffer,
    ) {
        if self.dpad != (horizontal, vertical) {
            self.dpad = (horizontal, vertical);
            out.push(InputEvent::DPadMove {
                dpad: 0,
                horizontal,
                vertical,
                timestamp,
            });
        }
    }

    /// Emits a hat-switch move when the angle changed.
    pub fn update_hat(&mut self, angle_degrees: u16, timestamp: Timestamp, out: &mut EventBuffer) {
        if self.hat != angle_degrees {
            self.hat = angle_degrees;
            out.push(InputEvent::HatSwitch {
                hat: 0,
                angle_degrees,
                timestamp,
            });
        }
    }
}

/// Strips the report-id byte when the parser expects one.
///
/// Returns `None` when the id does not match, which makes `can_parse`
/// reject foreign reports instead of misreading them.
pub fn strip_report_id(report: &[u8], expected_id: u8) -> Option<&[u8]> {
    match report.first() {
        Some(&id) if id == expected_id => Some(&report[1..]),
        _ => None,
    }
}

/// Sum type over all parsers. Constructed once per session by the device
/// manager and owned by the session's read loop.
pub enum ReportParser {
    Gip(gip::GipParser),
    XInput(xinput::XInputParser),
    Ds4(ds4::Ds4Parser),
    Generic(generic::GenericParser),
    Descriptor(descriptor::DescriptorParser),
}

impl ReportParser {
    /// Fixed-layout parser for a protocol. DualSense shares the DS4
    /// layout; Switch and unknown devices use the generic fallback.
    pub fn for_protocol(kind: ProtocolKind) -> Self {
        match kind {
            ProtocolKind::Gip => Self::Gip(gip::GipParser::new()),
            ProtocolKind::XInput => Self::XInput(xinput::XInputParser::new()),
            ProtocolKind::Ds4 | ProtocolKind::Ds5 => Self::Ds4(ds4::Ds4Parser::new()),
            ProtocolKind::SwitchHid | ProtocolKind::GenericHid => {
                Self::Generic(generic::GenericParser::new())
            }
        }
    }

    /// Descriptor-driven parser when the device yields a usable HID
    /// report descriptor; `None` means the caller should fall back to
    /// `for_protocol`.
    pub fn from_report_descriptor(bytes: &[u8]) -> Option<Self> {
        descriptor::DescriptorParser::from_bytes(bytes).map(Self::Descriptor)
    }

    pub fn can_parse(&self, report: &[u8]) -> bool {
        match self {
            Self::Gip(p) => p.can_parse(report),
            Self::XInput(p) => p.can_parse(report),
            Self::Ds4(p) => p.can_parse(report),
            Self::Generic(p) => p.can_parse(report),
            Self::Descriptor(p) => p.can_parse(report),
        }
    }

    /// Decodes one report into zero or more events. Reports shorter than
    /// the protocol minimum produce nothing.
    pub fn parse(&mut self, report: &[u8], timestamp: Timestamp) -> EventBuffer {
        match self {
            Self::Gip(p) => p.parse(report, timestamp),
            Self::XInput(p) => p.parse(report, timestamp),
            Self::Ds4(p) => p.parse(report, timestamp),
            Self::Generic(p) => p.parse(report, timestamp),
            Self::Descriptor(p) => p.parse(report, timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_reports_emit_once() {
        // Invariant: parsers are monotone in change. Feeding the same
        // bytes twice emits on the first call only.
        let reports: &[(ProtocolKind, &[u8])] = &[
            (
                ProtocolKind::Gip,
                &[
                    0x01, 0x00, 0x00, 0x00, 0xFF, 0x7F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40,
                    0x00, 0x01, 0x00,
                ],
            ),
            (ProtocolKind::XInput, &[0x01, 0x80, 0x80, 0x80, 0x80, 0x00, 0x00, 0x00]),
            (ProtocolKind::Ds4, &[0x01, 0x00, 0xFF, 0x00, 0x80, 0x80, 0x02, 0x00]),
            (ProtocolKind::GenericHid, &[0x11, 0x7F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
        ];
        for &(kind, report) in reports {
            let mut parser = ReportParser::for_protocol(kind);
            let first = parser.parse(report, 0);
            assert!(!first.is_empty(), "{:?} produced nothing", kind);
            let second = parser.parse(report, 1);
            assert!(
                second.is_empty(),
                "{:?} re-emitted on identical report: {:?}",
                kind,
                second
            );
        }
    }

    #[test]
    fn test_short_report_yields_nothing() {
        let mut parser = ReportParser::for_protocol(ProtocolKind::Gip);
        assert!(parser.parse(&[0x01, 0x02], 0).is_empty());
        assert!(parser.parse(&[], 0).is_empty());
    }

    #[test]
    fn test_strip_report_id() {
        assert_eq!(strip_report_id(&[0x01, 0xAA, 0xBB], 0x01), Some(&[0xAA, 0xBB][..]));
        assert_eq!(strip_report_id(&[0x02, 0xAA], 0x01), None);
        assert_eq!(strip_report_id(&[], 0x01), None);
    }

    #[test]
    fn test_trigger_press_flip_emits_even_on_small_travel() {
        let mut state = ParserState::new();
        let mut out = EventBuffer::new();
        // Just under the press threshold.
        state.update_trigger(TriggerId::Left, 25, 25.0 / 255.0, 0, &mut out);
        assert_eq!(out.len(), 1);
        out.clear();
        // Tiny travel, but it crosses the press threshold.
        state.update_trigger(TriggerId::Left, 26, 26.0 / 255.0, 1, &mut out);
        assert_eq!(out.len(), 1);
        match out[0] {
            InputEvent::TriggerMove { is_pressed, .. } => assert!(is_pressed),
            ref other => panic!("unexpected event: {:?}", other),
        }
    }
}
