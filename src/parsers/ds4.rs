//! DualShock 4 / DualSense report parser.
//!
//! Face buttons sit in byte 0 bits 0-3 (Cross, Circle, Square, Triangle,
//! mapped onto A, B, X, Y), the trigger click bits in byte 1, the bumpers
//! in byte 7. Sticks are u8 centered at 128 in bytes 2-5, and byte 6
//! carries an 8-way hat value with 8 meaning neutral.

use crate::events::{
    normalize_centered_8, AxisId, ButtonId, DpadHorizontal, DpadVertical, Timestamp,
};
use crate::parsers::{EventBuffer, ParserState};

const MIN_REPORT_LEN: usize = 8;
const HAT_NEUTRAL_VALUE: u8 = 8;

/// Cross, Circle, Square, Triangle, L2, R2, L1, R1.
const BUTTON_LAYOUT: [ButtonId; 8] = [
    ButtonId::A,
    ButtonId::B,
    ButtonId::X,
    ButtonId::Y,
    ButtonId::LTrigger,
    ButtonId::RTrigger,
    ButtonId::LShoulder,
    ButtonId::RShoulder,
];

pub struct Ds4Parser {
    state: ParserState,
}

impl Ds4Parser {
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

        let face = (report[0] & 0x0F) as u32;
        let triggers = (report[1] & 0x03) as u32;
        let bumpers = (report[7] & 0x03) as u32;
        let bits = face | triggers << 4 | bumpers << 6;
        self.state
            .diff_buttons(bits, &BUTTON_LAYOUT, timestamp, &mut out);

        for (axis, offset) in [
            (AxisId::LStickX, 2),
            (AxisId::LStickY, 3),
            (AxisId::RStickX, 4),
            (AxisId::RStickY, 5),
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

        let (horizontal, vertical) = decode_hat(report[6]);
        self.state
            .update_dpad(horizontal, vertical, timestamp, &mut out);

        out
    }
}

impl Default for Ds4Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes the 8-way hat nibble: 0 = up, clockwise through 7 = up-left.
fn decode_hat(value: u8) -> (DpadHorizontal, DpadVertical) {
    match value & 0x0F {
        0 => (DpadHorizontal::Neutral, DpadVertical::Up),
        1 => (DpadHorizontal::Right, DpadVertical::Up),
        2 => (DpadHorizontal::Right, DpadVertical::Neutral),
        3 => (DpadHorizontal::Right, DpadVertical::Down),
        4 => (DpadHorizontal::Neutral, DpadVertical::Down),
        5 => (DpadHorizontal::Left, DpadVertical::Down),
        6 => (DpadHorizontal::Left, DpadVertical::Neutral),
        7 => (DpadHorizontal::Left, DpadVertical::Up),
        _ => (DpadHorizontal::Neutral, DpadVertical::Neutral),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InputEvent;

    const IDLE: [u8; 8] = [0x00, 0x00, 0x80, 0x80, 0x80, 0x80, HAT_NEUTRAL_VALUE, 0x00];

    #[test]
    fn test_idle_report_emits_nothing() {
        let mut parser = Ds4Parser::new();
        assert!(parser.parse(&IDLE, 0).is_empty());
    }

    #[test]
    fn test_face_buttons_map_to_xbox_names() {
        let mut parser = Ds4Parser::new();
        let mut r = IDLE;
        r[0] = 0b0000_1001; // Cross + Triangle
        let events = parser.parse(&r, 0);
        assert_eq!(
            events.as_slice(),
            &[
                InputEvent::ButtonPress {
                    button: ButtonId::A,
                    timestamp: 0
                },
                InputEvent::ButtonPress {
                    button: ButtonId::Y,
                    timestamp: 0
                },
            ]
        );
    }

    #[test]
    fn test_trigger_clicks_and_bumpers() {
        let mut parser = Ds4Parser::new();
        let mut r = IDLE;
        r[1] = 0b0000_0001; // L2 click
        r[7] = 0b0000_0010; // R1
        let events = parser.parse(&r, 0);
        assert_eq!(
            events.as_slice(),
            &[
                InputEvent::ButtonPress {
                    button: ButtonId::LTrigger,
                    timestamp: 0
                },
                InputEvent::ButtonPress {
                    button: ButtonId::RShoulder,
                    timestamp: 0
                },
            ]
        );
    }

    #[test]
    fn test_stick_extremes() {
        let mut parser = Ds4Parser::new();
        let mut r = IDLE;
        r[2] = 0xFF; // LSX right
        r[3] = 0x00; // LSY up
        let events = parser.parse(&r, 0);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            InputEvent::AxisMove {
                axis: AxisId::LStickX,
                normalized: 1.0,
                raw: 127,
                timestamp: 0
            }
        );
        assert_eq!(
            events[1],
            InputEvent::AxisMove {
                axis: AxisId::LStickY,
                normalized: -1.0,
                raw: -128,
                timestamp: 0
            }
        );
    }

    #[test]
    fn test_small_drift_is_suppressed() {
        let mut parser = Ds4Parser::new();
        let mut r = IDLE;
        r[2] = 129; // +1/127 ≈ 0.008, below threshold
        assert!(parser.parse(&r, 0).is_empty());
        r[2] = 131; // +3/127 ≈ 0.024
        assert_eq!(parser.parse(&r, 1).len(), 1);
    }

    #[test]
    fn test_hat_decoding() {
        let mut parser = Ds4Parser::new();
        let mut r = IDLE;
        r[6] = 1; // up-right
        let events = parser.parse(&r, 0);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::DPadMove {
                dpad: 0,
                horizontal: DpadHorizontal::Right,
                vertical: DpadVertical::Up,
                timestamp: 0
            }]
        );

        r[6] = 5; // down-left
        let events = parser.parse(&r, 1);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::DPadMove {
                dpad: 0,
                horizontal: DpadHorizontal::Left,
                vertical: DpadVertical::Down,
                timestamp: 1
            }]
        );

        r[6] = HAT_NEUTRAL_VALUE;
        let events = parser.parse(&r, 2);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::DPadMove {
                dpad: 0,
                horizontal: DpadHorizontal::Neutral,
                vertical: DpadVertical::Neutral,
                timestamp: 2
            }]
        );
    }
}
