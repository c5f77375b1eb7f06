//! Device identity and descriptor snapshots.
//!
//! A `DeviceDescriptor` is captured once at enumeration time and never
//! mutated afterwards; endpoint lists are walked eagerly so later layers
//! never touch the USB library just to answer layout questions.

use std::fmt;

use crate::util::{fnv1a_hash_u64, fnv64};

/// Identifies a controller model plus the physical port it is plugged into.
///
/// Equality considers vendor and product only; two controllers of the same
/// model compare equal. Use [`DeviceIdentity::same_port`] to distinguish
/// physical instances.
#[derive(Debug, Clone, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default)]
    pub bus: u8,
    #[serde(default)]
    pub address: u8,
    #[serde(default)]
    pub serial: Option<String>,
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.vendor_id == other.vendor_id && self.product_id == other.product_id
    }
}

// Hash mirrors equality: vendor and product only.
impl std::hash::Hash for DeviceIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.vendor_id.hash(state);
        self.product_id.hash(state);
    }
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            bus: 0,
            address: 0,
            serial: None,
        }
    }

    /// True when both identities refer to the same physical plug position.
    pub fn same_port(&self, other: &Self) -> bool {
        self == other && self.bus == other.bus && self.address == other.address
    }

    /// Stable hash used as the session key in the coordinator registry.
    pub fn stable_id(&self) -> u64 {
        let mut hash = fnv64::OFFSET_BASIS;
        hash = fnv1a_hash_u64(hash, self.vendor_id as u64);
        hash = fnv1a_hash_u64(hash, self.product_id as u64);
        hash = fnv1a_hash_u64(hash, self.bus as u64);
        fnv1a_hash_u64(hash, self.address as u64)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}:{:04X} (bus {} addr {})",
            self.vendor_id, self.product_id, self.bus, self.address
        )
    }
}

/// Endpoint direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

/// USB transfer type of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Bulk,
    Interrupt,
    Isochronous,
}

/// Negotiated bus speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsbSpeed {
    Low,
    Full,
    High,
    Super,
    SuperPlus,
    #[default]
    Unknown,
}

/// One endpoint of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: EndpointDirection,
    pub transfer: TransferKind,
    pub max_packet_size: u16,
}

/// One interface with its class triple and endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub class_code: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointInfo>,
}

impl InterfaceInfo {
    /// First interrupt endpoint in the given direction, if any.
    pub fn interrupt_endpoint(&self, direction: EndpointDirection) -> Option<&EndpointInfo> {
        self.endpoints
            .iter()
            .find(|ep| ep.transfer == TransferKind::Interrupt && ep.direction == direction)
    }
}

/// Immutable metadata captured at enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub identity: DeviceIdentity,
    pub product: String,
    pub manufacturer: String,
    pub speed: UsbSpeed,
    pub interfaces: Vec<InterfaceInfo>,
}

impl DeviceDescriptor {
    /// Looks up an interface by number.
    pub fn interface(&self, number: u8) -> Option<&InterfaceInfo> {
        self.interfaces.iter().find(|i| i.number == number)
    }

    /// True when any interface matches the given class triple.
    pub fn has_interface_class(&self, class_code: u8, sub_class: u8, protocol: u8) -> bool {
        self.interfaces.iter().any(|i| {
            i.class_code == class_code && i.sub_class == sub_class && i.protocol == protocol
        })
    }
}
