//! GIP (Xbox One / Series) report parser.
//!
//! Layout (after the session's init script has enabled input):
//!
//! | field | location |
//! |---|---|
//! | A, B, X, Y | byte 0, bits 0-3 |
//! | d-pad bits | byte 0, bits 4-7 (Up, Down, Left, Right) |
//! | LB, RB, Back, Start | byte 1, bits 0-3 |
//! | LSX, LSY, RSX, RSY | bytes 4-11, i16 LE |
//! | LT, RT | bytes 12, 13, u8 |
//! | d-pad h, v | bytes 14, 15, i8 in {-1, 0, 1} |
//!
//! Reports of exactly the 15-byte minimum carry no vertical d-pad byte;
//! the nibble bits cover that case.

use crate::events::{
    normalize_signed_16, normalize_unsigned_8, AxisId, ButtonId, DpadHorizontal, DpadVertical,
    Timestamp, TriggerId,
};
use crate::parsers::{EventBuffer, ParserState};

const MIN_REPORT_LEN: usize = 15;

/// Bit order of the button vector handed to `diff_buttons`.
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

pub struct GipParser {
    state: ParserState,
}

impl GipParser {
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

        let face = report[0] & 0x0F;
        let system = report[1] & 0x0F;
        let bits = face as u32 | (system as u32) << 4;
        self.state
            .diff_buttons(bits, &BUTTON_LAYOUT, timestamp, &mut out);

        for (axis, offset) in [
            (AxisId::LStickX, 4),
            (AxisId::LStickY, 6),
            (AxisId::RStickX, 8),
            (AxisId::RStickY, 10),
        ] {
            let raw = i16::from_le_bytes([report[offset], report[offset + 1]]);
            self.state
                .update_axis(axis, raw, normalize_signed_16(raw), timestamp, &mut out);
        }

        for (trigger, offset) in [(TriggerId::Left, 12), (TriggerId::Right, 13)] {
            let raw = report[offset];
            self.state.update_trigger(
                trigger,
                raw,
                normalize_unsigned_8(raw),
                timestamp,
                &mut out,
            );
        }

        let (horizontal, vertical) = self.decode_dpad(report);
        self.state
            .update_dpad(horizontal, vertical, timestamp, &mut out);

        out
    }

    /// Prefers the dedicated d-pad bytes; a bare minimum-length report
    /// falls back to the byte-0 nibble bits.
    fn decode_dpad(&self, report: &[u8]) -> (DpadHorizontal, DpadVertical) {
        if report.len() > 15 {
            let horizontal = match report[14] as i8 {
                v if v < 0 => DpadHorizontal::Left,
                v if v > 0 => DpadHorizontal::Right,
                _ => DpadHorizontal::Neutral,
            };
            let vertical = match report[15] as i8 {
                v if v < 0 => DpadVertical::Up,
                v if v > 0 => DpadVertical::Down,
                _ => DpadVertical::Neutral,
            };
            return (horizontal, vertical);
        }

        let nibble = report[0] >> 4;
        let vertical = if nibble & 0x01 != 0 {
            DpadVertical::Up
        } else if nibble & 0x02 != 0 {
            DpadVertical::Down
        } else {
            DpadVertical::Neutral
        };
        let horizontal = if nibble & 0x04 != 0 {
            DpadHorizontal::Left
        } else if nibble & 0x08 != 0 {
            DpadHorizontal::Right
        } else {
            DpadHorizontal::Neutral
        };
        (horizontal, vertical)
    }
}

impl Default for GipParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InputEvent;

    fn report(bytes: &[(usize, u8)]) -> Vec<u8> {
        let mut r = vec![0u8; 16];
        for &(i, b) in bytes {
            r[i] = b;
        }
        r
    }

    #[test]
    fn test_face_buttons() {
        let mut parser = GipParser::new();
        let events = parser.parse(&report(&[(0, 0b0000_0101)]), 10);
        assert_eq!(
            events.as_slice(),
            &[
                InputEvent::ButtonPress {
                    button: ButtonId::A,
                    timestamp: 10
                },
                InputEvent::ButtonPress {
                    button: ButtonId::X,
                    timestamp: 10
                },
            ]
        );

        let events = parser.parse(&report(&[(0, 0b0000_0100)]), 11);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::ButtonRelease {
                button: ButtonId::A,
                timestamp: 11
            }]
        );
    }

    #[test]
    fn test_shoulder_and_menu_buttons() {
        let mut parser = GipParser::new();
        let events = parser.parse(&report(&[(1, 0b0000_1010)]), 0);
        assert_eq!(
            events.as_slice(),
            &[
                InputEvent::ButtonPress {
                    button: ButtonId::RShoulder,
                    timestamp: 0
                },
                InputEvent::ButtonPress {
                    button: ButtonId::Start,
                    timestamp: 0
                },
            ]
        );
    }

    #[test]
    fn test_stick_axes_are_le_i16() {
        let mut parser = GipParser::new();
        let events = parser.parse(&report(&[(4, 0xFF), (5, 0x7F), (10, 0x00), (11, 0x80)]), 0);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            InputEvent::AxisMove {
                axis: AxisId::LStickX,
                normalized: 1.0,
                raw: 32767,
                timestamp: 0
            }
        );
        assert_eq!(
            events[1],
            InputEvent::AxisMove {
                axis: AxisId::RStickY,
                normalized: -1.0,
                raw: -32768,
                timestamp: 0
            }
        );
    }

    #[test]
    fn test_triggers() {
        let mut parser = GipParser::new();
        let events = parser.parse(&report(&[(12, 0xFF), (13, 0x10)]), 0);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            InputEvent::TriggerMove {
                trigger: TriggerId::Left,
                normalized: 1.0,
                raw: 0xFF,
                is_pressed: true,
                timestamp: 0
            }
        );
        match events[1] {
            InputEvent::TriggerMove {
                trigger: TriggerId::Right,
                is_pressed,
                raw,
                ..
            } => {
                assert_eq!(raw, 0x10);
                // 16/255 is below the 0.1 press threshold.
                assert!(!is_pressed);
            }
            ref other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_dpad_bytes() {
        let mut parser = GipParser::new();
        let events = parser.parse(&report(&[(14, 0xFF), (15, 0x01)]), 0);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::DPadMove {
                dpad: 0,
                horizontal: DpadHorizontal::Left,
                vertical: DpadVertical::Down,
                timestamp: 0
            }]
        );

        // Back to neutral emits exactly one more event.
        let events = parser.parse(&report(&[]), 1);
        assert_eq!(
            events.as_slice(),
            &[InputEvent::DPadMove {
                dpad: 0,
                horizontal: DpadHorizontal::Neutral,
                vertical: DpadVertical::Neutral,
                timestamp: 1
            }]
        );
    }

    #[test]
    fn test_dpad_nibble_fallback_on_minimum_report() {
        let mut parser = GipParser::new();
        let mut r = vec![0u8; 15];
        r[0] = 0b1001_0000; // Up + Right nibble bits
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
    }

    #[test]
    fn test_axis_hysteresis() {
        let mut parser = GipParser::new();
        // 200/32767 ≈ 0.006: below the 0.01 emit threshold.
        let events = parser.parse(&report(&[(4, 200 & 0xFF), (5, 0)]), 0);
        assert!(events.is_empty());
        // 500/32767 ≈ 0.015: above it.
        let events = parser.parse(&report(&[(4, 0xF4), (5, 0x01)]), 1);
        assert_eq!(events.len(), 1);
    }
}
