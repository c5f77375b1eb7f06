//! Descriptor-driven HID parser.
//!
//! Interprets a device's report descriptor into a flat list of input
//! fields, then decodes reports by extracting each field's bits. This is
//! the preferred path for generic and Switch-class devices; the fixed
//! fallback layout in `generic.rs` only applies when no descriptor can be
//! fetched or understood.

use std::collections::HashMap;

use crate::events::{AxisId, ButtonId, Timestamp, TriggerId, HAT_NEUTRAL};
use crate::parsers::{EventBuffer, ParserState};

const USAGE_PAGE_GENERIC_DESKTOP: u16 = 0x01;
const USAGE_PAGE_BUTTON: u16 = 0x09;

const USAGE_X: u16 = 0x30;
const USAGE_Y: u16 = 0x31;
const USAGE_Z: u16 = 0x32;
const USAGE_RX: u16 = 0x33;
const USAGE_RY: u16 = 0x34;
const USAGE_RZ: u16 = 0x35;
const USAGE_HAT: u16 = 0x39;

/// Buttons 1..16 in HID usage order.
const BUTTON_USAGE_TABLE: [ButtonId; 16] = [
    ButtonId::A,
    ButtonId::B,
    ButtonId::X,
    ButtonId::Y,
    ButtonId::LShoulder,
    ButtonId::RShoulder,
    ButtonId::LTrigger,
    ButtonId::RTrigger,
    ButtonId::Back,
    ButtonId::Start,
    ButtonId::LStick,
    ButtonId::RStick,
    ButtonId::Guide,
    ButtonId::Share,
    ButtonId::View,
    ButtonId::Mute,
];

/// One input field of the report, as laid out by the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub usage_page: u16,
    pub usage: u16,
    pub report_id: Option<u8>,
    pub bit_offset: u32,
    pub bit_length: u32,
    pub logical_min: i32,
    pub logical_max: i32,
    pub is_signed: bool,
}

/// What the pipeline does with a decoded field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldRole {
    Button(ButtonId),
    Axis(AxisId),
    Trigger(TriggerId),
    Hat,
}

fn role_for(usage_page: u16, usage: u16) -> Option<FieldRole> {
    match usage_page {
        USAGE_PAGE_BUTTON => {
            let index = usage.checked_sub(1)? as usize;
            let button = BUTTON_USAGE_TABLE
                .get(index)
                .copied()
                .unwrap_or(ButtonId::Custom(index as u8));
            Some(FieldRole::Button(button))
        }
        USAGE_PAGE_GENERIC_DESKTOP => match usage {
            USAGE_X => Some(FieldRole::Axis(AxisId::LStickX)),
            USAGE_Y => Some(FieldRole::Axis(AxisId::LStickY)),
            USAGE_RX => Some(FieldRole::Axis(AxisId::RStickX)),
            USAGE_RY => Some(FieldRole::Axis(AxisId::RStickY)),
            USAGE_Z => Some(FieldRole::Trigger(TriggerId::Left)),
            USAGE_RZ => Some(FieldRole::Trigger(TriggerId::Right)),
            USAGE_HAT => Some(FieldRole::Hat),
            _ => None,
        },
        _ => None,
    }
}

/// Walks the descriptor's global/local/main items and collects every
/// variable input field. Returns `None` on a malformed descriptor.
pub fn parse_report_descriptor(bytes: &[u8]) -> Option<Vec<FieldDef>> {
    #[derive(Default, Clone, Copy)]
    struct Globals {
        usage_page: u16,
        logical_min: i32,
        logical_max: i32,
        report_size: u32,
        report_count: u32,
        report_id: Option<u8>,
    }

    #[derive(Default)]
    struct Locals {
        usages: Vec<(Option<u16>, u16)>,
        usage_min: Option<u16>,
        usage_max: Option<u16>,
    }

    let mut globals = Globals::default();
    let mut locals = Locals::default();
    let mut offsets: HashMap<Option<u8>, u32> = HashMap::new();
    let mut fields = Vec::new();

    let mut pos = 0usize;
    while pos < bytes.len() {
        let prefix = bytes[pos];
        pos += 1;
        if prefix == 0xFE {
            // Long item: second byte is the data size.
            let size = *bytes.get(pos)? as usize;
            pos = pos.checked_add(size + 2)?;
            continue;
        }
        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let data = bytes.get(pos..pos + size)?;
        pos += size;

        let mut unsigned = 0u32;
        for (i, &b) in data.iter().enumerate() {
            unsigned |= (b as u32) << (8 * i);
        }
        let signed = match size {
            1 => data[0] as i8 as i32,
            2 => i16::from_le_bytes([data[0], data[1]]) as i32,
            4 => unsigned as i32,
            _ => 0,
        };

        let item_type = (prefix >> 2) & 0x03;
        let tag = prefix >> 4;
        match (item_type, tag) {
            // Global items
            (1, 0x0) => globals.usage_page = unsigned as u16,
            (1, 0x1) => globals.logical_min = signed,
            (1, 0x2) => globals.logical_max = signed,
            (1, 0x7) => globals.report_size = unsigned,
            (1, 0x8) => globals.report_id = Some(unsigned as u8),
            (1, 0x9) => globals.report_count = unsigned,
            // Local items
            (2, 0x0) => {
                // A four-byte usage carries its own page in the high word.
                if size == 4 {
                    locals
                        .usages
                        .push((Some((unsigned >> 16) as u16), unsigned as u16));
                } else {
                    locals.usages.push((None, unsigned as u16));
                }
            }
            (2, 0x1) => locals.usage_min = Some(unsigned as u16),
            (2, 0x2) => locals.usage_max = Some(unsigned as u16),
            // Main items
            (0, 0x8) => {
                // Input item.
                let offset = offsets.entry(globals.report_id).or_insert(0);
                let is_constant = unsigned & 0x01 != 0;
                let is_variable = unsigned & 0x02 != 0;
                let total_bits = globals.report_size.checked_mul(globals.report_count)?;
                if is_constant || !is_variable {
                    // Padding and array fields only advance the cursor.
                    *offset += total_bits;
                } else {
                    for i in 0..globals.report_count {
                        let (page, usage) = if let Some(&(page, usage)) =
                            locals.usages.get(i as usize).or(locals.usages.last())
                        {
                            (page.unwrap_or(globals.usage_page), usage)
                        } else if let (Some(min), Some(max)) = (locals.usage_min, locals.usage_max)
                        {
                            (globals.usage_page, (min + i as u16).min(max))
                        } else {
                            (globals.usage_page, 0)
                        };
                        fields.push(FieldDef {
                            usage_page: page,
                            usage,
                            report_id: globals.report_id,
                            bit_offset: *offset,
                            bit_length: globals.report_size,
                            logical_min: globals.logical_min,
                            logical_max: globals.logical_max,
                            is_signed: globals.logical_min < 0,
                        });
                        *offset += globals.report_size;
                    }
                }
                locals = Locals::default();
            }
            (0, _) => {
                // Output, feature, collection, end-collection: locals reset.
                locals = Locals::default();
            }
            _ => {}
        }
    }

    if fields.is_empty() { None } else { Some(fields) }
}

/// Extracts `bit_length` bits starting at `bit_offset`, little-endian bit
/// order as HID packs them.
fn extract_bits(data: &[u8], bit_offset: u32, bit_length: u32) -> Option<u32> {
    if bit_length == 0 || bit_length > 32 {
        return None;
    }
    let last_byte = ((bit_offset + bit_length - 1) / 8) as usize;
    if last_byte >= data.len() {
        return None;
    }
    let mut value = 0u32;
    for i in 0..bit_length {
        let bit = bit_offset + i;
        if data[(bit / 8) as usize] >> (bit % 8) & 1 == 1 {
            value |= 1 << i;
        }
    }
    Some(value)
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    if bits == 0 || bits >= 32 {
        return value as i32;
    }
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Parser over descriptor-derived fields with the usual previous-state
/// change detection.
pub struct DescriptorParser {
    fields: Vec<(FieldDef, FieldRole)>,
    /// Layout for `diff_buttons`: one bit per button field, in field order.
    button_layout: Vec<ButtonId>,
    known_ids: Vec<u8>,
    state: ParserState,
}

impl DescriptorParser {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let parsed = parse_report_descriptor(bytes)?;
        let mut fields = Vec::new();
        let mut button_layout = Vec::new();
        let mut known_ids = Vec::new();
        for def in parsed {
            if let Some(id) = def.report_id {
                if !known_ids.contains(&id) {
                    known_ids.push(id);
                }
            }
            let Some(role) = role_for(def.usage_page, def.usage) else {
                continue;
            };
            if def.logical_max == def.logical_min {
                continue;
            }
            if let FieldRole::Button(button) = role {
                if button_layout.len() >= 32 {
                    continue;
                }
                button_layout.push(button);
            }
            fields.push((def, role));
        }
        if fields.is_empty() {
            return None;
        }
        Some(Self {
            fields,
            button_layout,
            known_ids,
            state: ParserState::new(),
        })
    }

    fn requires_report_id(&self) -> bool {
        !self.known_ids.is_empty()
    }

    pub fn can_parse(&self, report: &[u8]) -> bool {
        if self.requires_report_id() {
            matches!(report.first(), Some(id) if self.known_ids.contains(id))
        } else {
            !report.is_empty()
        }
    }

    pub fn parse(&mut self, report: &[u8], timestamp: Timestamp) -> EventBuffer {
        let mut out = EventBuffer::new();
        if !self.can_parse(report) {
            return out;
        }

        let (active_id, data) = if self.requires_report_id() {
            (Some(report[0]), &report[1..])
        } else {
            (None, report)
        };

        let mut button_bits = self.state.buttons;
        let mut button_index = 0usize;
        let mut axis_updates: EventBuffer = EventBuffer::new();

        let fields = std::mem::take(&mut self.fields);
        for (def, role) in &fields {
            if let FieldRole::Button(_) = role {
                // Button bit positions stay stable even for skipped ids.
                if def.report_id != active_id {
                    button_index += 1;
                    continue;
                }
            } else if def.report_id != active_id {
                continue;
            }

            let Some(bits) = extract_bits(data, def.bit_offset, def.bit_length) else {
                continue;
            };
            let value = if def.is_signed {
                sign_extend(bits, def.bit_length)
            } else {
                bits as i32
            };
            let span = (def.logical_max - def.logical_min) as f32;
            let norm01 = ((value - def.logical_min) as f32 / span).clamp(0.0, 1.0);

            match role {
                FieldRole::Button(_) => {
                    let mask = 1u32 << button_index;
                    if value != 0 {
                        button_bits |= mask;
                    } else {
                        button_bits &= !mask;
                    }
                    button_index += 1;
                }
                FieldRole::Axis(axis) => {
                    let normalized = (norm01 * 2.0 - 1.0).clamp(-1.0, 1.0);
                    let raw = value.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                    self.state
                        .update_axis(*axis, raw, normalized, timestamp, &mut axis_updates);
                }
                FieldRole::Trigger(trigger) => {
                    let raw = (norm01 * 255.0).round() as u8;
                    self.state
                        .update_trigger(*trigger, raw, norm01, timestamp, &mut axis_updates);
                }
                FieldRole::Hat => {
                    let angle = if value >= def.logical_min && value <= def.logical_max {
                        let positions = (def.logical_max - def.logical_min + 1) as u32;
                        ((value - def.logical_min) as u32 * 360 / positions) as u16
                    } else {
                        HAT_NEUTRAL
                    };
                    self.state.update_hat(angle, timestamp, &mut axis_updates);
                }
            }
        }
        self.fields = fields;

        let layout = std::mem::take(&mut self.button_layout);
        self.state
            .diff_buttons(button_bits, &layout, timestamp, &mut out);
        self.button_layout = layout;
        out.extend(axis_updates);
        out
    }
}
