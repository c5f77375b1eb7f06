//! Fixed-layout fallback parser for unidentified HID devices.
//!
//! Used when no report descriptor can be fetched or interpreted. Byte 0
//! packs four buttons and two 2-bit d-pad fields; bytes 1-4 are treated as
//! signed 8-bit axes mapped positionally onto the two sticks.
//!
//! The 2-bit d-pad fields encode 1 → Right, 2 → Down, 3 → Left. Up is not
//! representable in this coding; devices that need it should be parsed
//! through their report descriptor instead.

use crate::events::{
    normalize_signed_8, AxisId, ButtonId, DpadHorizontal, DpadVertical, Timestamp,
};
use crate::parsers::{EventBuffer, ParserState};

const MIN_REPORT_LEN: usize = 8;

const BUTTON_LAYOUT: [ButtonId; 4] = [ButtonId::A, ButtonId::B, ButtonId::X, ButtonId::Y];

pub struct GenericParser {
    state: ParserState,
}

impl GenericParser {
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
            .diff_buttons((report[0] & 0x0F) as u32, &BUTTON_LAYOUT, timestamp, &mut out);

        for (axis, offset) in [
            (AxisId::LStickX, 1),
            (AxisId::LStickY, 2),
            (AxisId::RStickX, 3),
            (AxisId::RStickY, 4),
        ] {
            let raw = report[offset] as i8;
            self.state.update_axis(
                axis,
                raw as i16,
                normalize_signed_8(raw),
                timestamp,
                &mut out,
            );
        }

        let horizontal = match (report[0] >> 4) & 0x03 {
            1 => DpadHorizontal::Right,
            3 => DpadHorizontal::Left,
            _ => DpadHorizontal::Neutral,
        };
        let vertical = match (report[0] >> 6) & 0x03 {
            2 => DpadVertical::Down,
            _ => DpadVertical::Neutral,
        };
        self.state
            .update_dpad(horizontal, vertical, timestamp, &mut out);

        out
    }
}

impl Default for GenericParser {
    fn default() -> Self {
        Self::new()
    }
}
