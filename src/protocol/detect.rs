//! Protocol detection.
//!
//! Pure and side-effect free: the decision uses only the enumeration-time
//! identity and descriptor snapshot. Order matters: exact VID/PID matches
//! win over vendor-class rules, which win over the interface-class probe,
//! and everything else falls back to the generic HID path.

use crate::device::{DeviceDescriptor, DeviceIdentity};
use crate::protocol::ProtocolKind;

/// Microsoft.
pub const VENDOR_MICROSOFT: u16 = 0x045E;
/// Sony.
pub const VENDOR_SONY: u16 = 0x054C;
/// Nintendo.
pub const VENDOR_NINTENDO: u16 = 0x057E;

/// GIP vendor-specific interface class triple.
const GIP_INTERFACE_CLASS: (u8, u8, u8) = (0xFF, 0x47, 0xD0);

/// Xbox One / Series product ids (the GIP generations).
const GIP_PIDS: &[u16] = &[0x02D1, 0x02DD, 0x02E3, 0x02EA, 0x02FD, 0x0B00, 0x0B12, 0x0B13];

/// DualShock 4 generations (including the wireless adapter).
const DS4_PIDS: &[u16] = &[0x05C4, 0x09CC, 0x0BA0];

/// DualSense.
const DS5_PID: u16 = 0x0CE6;

/// Exact matches for known controllers, checked before any vendor rule.
/// Covers the major third-party pads that masquerade under their own ids.
const EXACT_TABLE: &[(u16, u16, ProtocolKind)] = &[
    // Xbox 360 family
    (VENDOR_MICROSOFT, 0x028E, ProtocolKind::XInput),
    (VENDOR_MICROSOFT, 0x028F, ProtocolKind::XInput),
    (VENDOR_MICROSOFT, 0x0291, ProtocolKind::XInput),
    // Xbox One / Series family
    (VENDOR_MICROSOFT, 0x02D1, ProtocolKind::Gip),
    (VENDOR_MICROSOFT, 0x02DD, ProtocolKind::Gip),
    (VENDOR_MICROSOFT, 0x02EA, ProtocolKind::Gip),
    (VENDOR_MICROSOFT, 0x0B12, ProtocolKind::Gip),
    // PlayStation
    (VENDOR_SONY, 0x05C4, ProtocolKind::Ds4),
    (VENDOR_SONY, 0x09CC, ProtocolKind::Ds4),
    (VENDOR_SONY, DS5_PID, ProtocolKind::Ds5),
    // Switch Pro (both generations)
    (VENDOR_NINTENDO, 0x2009, ProtocolKind::SwitchHid),
    (VENDOR_NINTENDO, 0x2069, ProtocolKind::SwitchHid),
    // Third-party XInput pads
    (0x0F0D, 0x00C1, ProtocolKind::XInput), // Hori Horipad
    (0x2DC8, 0x3106, ProtocolKind::XInput), // 8BitDo
    (0x046D, 0xC21D, ProtocolKind::XInput), // Logitech F310
];

/// Identifies the protocol for a device.
pub fn detect(identity: &DeviceIdentity, descriptor: &DeviceDescriptor) -> ProtocolKind {
    // 1. Exact VID/PID table.
    for &(vid, pid, kind) in EXACT_TABLE {
        if identity.vendor_id == vid && identity.product_id == pid {
            return kind;
        }
    }

    // 2. Vendor-class rules.
    match identity.vendor_id {
        VENDOR_MICROSOFT => {
            if GIP_PIDS.contains(&identity.product_id) {
                return ProtocolKind::Gip;
            }
            return ProtocolKind::XInput;
        }
        VENDOR_SONY => {
            if DS4_PIDS.contains(&identity.product_id) {
                return ProtocolKind::Ds4;
            }
            if identity.product_id == DS5_PID {
                return ProtocolKind::Ds5;
            }
            return ProtocolKind::GenericHid;
        }
        VENDOR_NINTENDO => return ProtocolKind::SwitchHid,
        _ => {}
    }

    // 3. Interface-class rule: a GIP vendor interface marks clones that
    // ship under their own vendor id.
    let (class, sub, proto) = GIP_INTERFACE_CLASS;
    if descriptor.has_interface_class(class, sub, proto) {
        return ProtocolKind::Gip;
    }

    // 4. Fallback.
    ProtocolKind::GenericHid
}
