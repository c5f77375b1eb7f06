//! XInput (Xbox 360) report parser.
//!
//! Eight-byte reports: byte 0 packs all buttons, bytes 1-4 carry the
//! sticks as u8 centered at 128, bytes 5-6 the triggers, byte 7 (and 8,
//! when the pad sends it) the d-pad as signed i8.

use crate::events::{
    normalize_centered_8, normalize_unsigned_8, AxisId, ButtonId, DpadHorizontal, DpadVertical,
    Timestamp, TriggerId,
};
use crate::parsers::{EventBuffer, ParserState};

const MIN_REPORT_LEN: usize = 8;

const BUTTON_LAYOUT: [ButtonId; 8] = [
    ButtonId::A,
    ButtonId::B,
    ButtonId::X,
    ButtonId::Y,
    ButtonId::LShoulder,
    ButtonId::RShoulder,
    ButtonId::Back,
    ButtonId::Start,
];

pub struct XInputParser {
    state: ParserState,
}

impl XInputParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::new(),
        }
    }

    pub fn can_parse(&self, report: &[u8]) -> bool {
        report.len() >= MIN_REPORT_LEN
    }

    pub fn parse(&mut self, report: &[u8], timestamp: Timestamp) -> EventBuffer {
        let mut out = EventBuffer::new();
        if !self.can_parse(report) {
            return out;
        }

        self.state
            .diff_buttons(report[0] as u32, &BUTTON_LAYOUT, timestamp, &mut out);

        for (axis, offset) in [
            (AxisId::LStickX, 1),
            (AxisId::LStickY, 2),
            (AxisId::RStickX, 3),
            (AxisId::RStickY, 4),
        ] {
            let raw = report[offset] as i16 - 128;
            self.state.update_axis(
                axis,
                raw,
                normalize_centered_8(report[offset]),
                timestamp,
                &mut out,
            );
        }

        for (trigger, offset) in [(TriggerId::Left, 5), (TriggerId::Right, 6)] {
            let raw = report[offset];
            self.state.update_trigger(
                trigger,
                raw,
                normalize_unsigned_8(raw),
                timestamp,
                &mut out,
            );
        }

        let horizontal = match report[7] as i8 {
            v if v < 0 => DpadHorizontal::Left,
            v if v > 0 => DpadHorizontal::Right,
            _ => DpadHorizontal::Neutral,
        };
        let vertical = if report.len() > 8 {
            match report[8] as i8 {
                v if v < 0 => DpadVertical::Up,
                v if v > 0 => DpadVertical::Down,
                _ => DpadVertical::Neutral,
            }
        } else {
            DpadVertical::Neutral
        };
        self.state
            .update_dpad(horizontal, vertical, timestamp, &mut out);

        out
    }
}

impl Default for XInputParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InputEvent;

    const IDLE: [u8; 8] = [0x00, 0x80, 0x80, 0x80, 0x80, 0x00, 0x00, 0x00];

    #[test]
    fn test_a_button_tap() {
        let mut parser = XInputParser::new();
        let mut pressed = IDLE;
        pressed[0] = 0x01;

        let events = parser.parse(&pressed, 0);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::ButtonPress {
                button: ButtonId::A,
                timestamp: 0
            }]
        );

        let events = parser.parse(&IDLE, 1);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::ButtonRelease {
                button: ButtonId::A,
                timestamp: 1
            }]
        );
    }

    #[test]
    fn test_all_button_bits() {
        let mut parser = XInputParser::new();
        let mut r = IDLE;
        r[0] = 0xFF;
        let events = parser.parse(&r, 0);
        assert_eq!(events.len(), 8);
        let buttons: Vec<ButtonId> = events
            .iter()
            .map(|e| match e {
                InputEvent::ButtonPress { button, .. } => *button,
                other => panic!("unexpected event: {:?}", other),
            })
            .collect();
        assert_eq!(buttons, BUTTON_LAYOUT.to_vec());
    }

    #[test]
    fn test_centered_axes() {
        let mut parser = XInputParser::new();
        // Idle first so only the moved axis emits afterwards.
        let _ = parser.parse(&IDLE, 0);

        let mut r = IDLE;
        r[1] = 0xFF; // LSX full right
        r[2] = 0x00; // LSY full up
        let events = parser.parse(&r, 1);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            InputEvent::AxisMove {
                axis: AxisId::LStickX,
                normalized: 1.0,
                raw: 127,
                timestamp: 1
            }
        );
        assert_eq!(
            events[1],
            InputEvent::AxisMove {
                axis: AxisId::LStickY,
                normalized: -1.0,
                raw: -128,
                timestamp: 1
            }
        );
    }

    #[test]
    fn test_trigger_bytes() {
        let mut parser = XInputParser::new();
        let mut r = IDLE;
        r[5] = 0xFF;
        let events = parser.parse(&r, 0);
        assert_eq!(events.len(), 1);
        match events[0] {
            InputEvent::TriggerMove {
                trigger: TriggerId::Left,
                normalized,
                is_pressed,
                ..
            } => {
                assert_eq!(normalized, 1.0);
                assert!(is_pressed);
            }
            ref other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_dpad_signed_byte() {
        let mut parser = XInputParser::new();
        let mut r = IDLE;
        r[7] = 0xFF; // -1: left
        let events = parser.parse(&r, 0);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::DPadMove {
                dpad: 0,
                horizontal: DpadHorizontal::Left,
                vertical: DpadVertical::Neutral,
                timestamp: 0
            }]
        );

        // Nine-byte report carries the vertical component.
        let mut r9 = [0u8; 9];
        r9[1..5].copy_from_slice(&[0x80; 4]);
        r9[7] = 0x01;
        r9[8] = 0xFF;
        let events = parser.parse(&r9, 1);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::DPadMove {
                dpad: 0,
                horizontal: DpadHorizontal::Right,
                vertical: DpadVertical::Up,
                timestamp: 1
            }]
        );
    }

    #[test]
    fn test_zero_length_read_yields_nothing() {
        let mut parser = XInputParser::new();
        assert!(parser.parse(&[], 0).is_empty());
    }
}
