//! Error taxonomy for the driver core.
//!
//! Four families: transport, protocol, profile, and output. The read loop
//! and the init engine branch on the transport kinds, so the mapping from
//! the USB library is total and loss-free.

use thiserror::Error;

/// USB transport failures (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("i/o error")]
    Io,
    #[error("operation timed out")]
    Timeout,
    #[error("endpoint stalled (pipe error)")]
    Pipe,
    #[error("transfer overflow")]
    Overflow,
    #[error("device is gone")]
    NoDevice,
    #[error("entity not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("access denied")]
    Access,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("operation not supported")]
    NotSupported,
}

impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => Self::Timeout,
            rusb::Error::Pipe => Self::Pipe,
            rusb::Error::Overflow => Self::Overflow,
            rusb::Error::NoDevice => Self::NoDevice,
            rusb::Error::NotFound => Self::NotFound,
            rusb::Error::Busy => Self::Busy,
            rusb::Error::Access => Self::Access,
            rusb::Error::InvalidParam => Self::InvalidParam,
            rusb::Error::NotSupported => Self::NotSupported,
            _ => Self::Io,
        }
    }
}

impl TransportError {
    /// True for errors that mean the device is physically unreachable and
    /// the session must be torn down.
    #[inline]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::NoDevice | Self::NotFound)
    }

    /// True for errors the read loop answers with a `clear_halt` and a
    /// stall record rather than a teardown.
    #[inline]
    pub fn is_stall(self) -> bool {
        matches!(self, Self::Io | Self::Pipe | Self::Overflow)
    }
}

/// Protocol-level failures (C2/C3/C4).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("report of {got} bytes is shorter than the {expected}-byte minimum")]
    InvalidReportSize { expected: usize, got: usize },
    #[error("init script failed at step {step}: {source}")]
    InitScriptFailed {
        step: usize,
        #[source]
        source: TransportError,
    },
    #[error("device {vendor_id:04x}:{product_id:04x} is not supported")]
    UnsupportedDevice { vendor_id: u16, product_id: u16 },
}

/// Profile-store failures.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile `{0}` not found")]
    NotFound(String),
    #[error("profile `{0}` already exists")]
    AlreadyExists(String),
    #[error("profile data is corrupted: {0}")]
    Corrupted(String),
    #[error("profile version {0} is not supported")]
    UnsupportedVersion(u32),
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),
    #[error("profile i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output-synthesis failures (C8/C9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OutputError {
    #[error("input injection permission denied")]
    PermissionDenied,
    #[error("event creation failed")]
    EventCreationFailed,
    #[error("position outside display bounds")]
    PositionOutOfBounds,
}
