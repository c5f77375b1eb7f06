//! USB/HID transport layer.
//!
//! The rest of the pipeline talks to two small traits: [`UsbBackend`]
//! (enumeration, open, hot-plug) and [`UsbDeviceIo`] (per-handle I/O).
//! `usb.rs` implements them over libusb via rusb; `mock.rs` provides a
//! scriptable in-memory backend used by the integration tests.

pub mod mock;
pub mod session;
pub mod usb;

use std::time::Duration;

use crossbeam_channel::Sender;

use crate::device::{DeviceDescriptor, DeviceIdentity};
use crate::error::TransportError;

/// bmRequestType for a standard IN request aimed at an interface.
const REQUEST_TYPE_INTERFACE_IN: u8 = 0x81;
/// GET_DESCRIPTOR standard request.
const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
/// HID report descriptor type in the high byte of wValue.
const DESCRIPTOR_TYPE_REPORT: u16 = 0x22;

/// Hot-plug notification delivered over the coordinator channel.
#[derive(Debug, Clone)]
pub enum HotplugEvent {
    Attached(DeviceDescriptor),
    Detached(DeviceIdentity),
}

/// I/O operations on one opened device handle.
///
/// `interrupt_in` returns the number of bytes actually transferred; the
/// buffer beyond that length is unspecified. All errors use the transport
/// taxonomy in `error.rs`, with timeouts surfaced as their own kind.
pub trait UsbDeviceIo: Send {
    fn set_configuration(&mut self, config: u8) -> Result<(), TransportError>;
    fn claim_interface(&mut self, number: u8) -> Result<(), TransportError>;
    fn release_interface(&mut self, number: u8) -> Result<(), TransportError>;
    /// Best-effort: "no kernel driver bound" and platforms without the
    /// concept both count as success.
    fn detach_kernel_driver(&mut self, number: u8) -> Result<(), TransportError>;
    fn interrupt_in(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
    fn interrupt_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
    #[allow(clippy::too_many_arguments)]
    fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
    #[allow(clippy::too_many_arguments)]
    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError>;
    fn reset(&mut self) -> Result<(), TransportError>;
}

/// Process-wide transport entry points.
pub trait UsbBackend: Send + Sync {
    /// Snapshot of every visible device. Safe to call at any time.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Opens the device matching `identity` (bus/address are honored when
    /// nonzero, so a specific physical instance can be reopened).
    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn UsbDeviceIo>, TransportError>;

    /// Subscribes `tx` to hot-plug events. Devices already present are
    /// delivered as `Attached` before any live notification, so the
    /// stream has no gap against a preceding `enumerate`.
    fn subscribe_hotplug(&self, tx: Sender<HotplugEvent>) -> Result<(), TransportError>;

    /// Drains the USB library's pending events for at most `timeout`.
    /// Called in a loop by the dedicated pump thread.
    fn pump_events(&self, timeout: Duration) -> Result<(), TransportError>;
}

/// Fetches the HID report descriptor of `interface` over the control pipe.
pub fn read_report_descriptor(
    io: &mut dyn UsbDeviceIo,
    interface: u8,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; 4096];
    let len = io.control_in(
        REQUEST_TYPE_INTERFACE_IN,
        REQUEST_GET_DESCRIPTOR,
        DESCRIPTOR_TYPE_REPORT << 8,
        interface as u16,
        &mut buf,
        timeout,
    )?;
    buf.truncate(len);
    Ok(buf)
}
