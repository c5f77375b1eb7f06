//! rusb (libusb) backend.
//!
//! One process-wide `rusb::Context` lives here. The coordinator constructs
//! the backend once, hands clones of the `Arc` around, and drops it on
//! shutdown; every transport call receives the context through that handle
//! rather than a global.

use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, warn};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};

use crate::device::{
    DeviceDescriptor, DeviceIdentity, EndpointDirection, EndpointInfo, InterfaceInfo, TransferKind,
    UsbSpeed,
};
use crate::error::TransportError;
use crate::transport::{HotplugEvent, UsbBackend, UsbDeviceIo};

/// Poll period of the fallback hot-plug scanner on platforms where libusb
/// has no native hot-plug support.
const HOTPLUG_POLL_PERIOD: Duration = Duration::from_millis(1000);

/// Backend over a single libusb context.
pub struct RusbBackend {
    context: Context,
    registration: Mutex<Option<Registration<Context>>>,
}

impl RusbBackend {
    pub fn new() -> Result<Self, TransportError> {
        let context = Context::new()?;
        Ok(Self {
            context,
            registration: Mutex::new(None),
        })
    }

    fn find_device(&self, identity: &DeviceIdentity) -> Result<Device<Context>, TransportError> {
        let devices = self.context.devices()?;
        let mut fallback = None;
        for device in devices.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if desc.vendor_id() != identity.vendor_id || desc.product_id() != identity.product_id {
                continue;
            }
            if identity.bus != 0 || identity.address != 0 {
                if device.bus_number() == identity.bus && device.address() == identity.address {
                    return Ok(device);
                }
                fallback.get_or_insert(device);
            } else {
                return Ok(device);
            }
        }
        fallback.ok_or(TransportError::NotFound)
    }
}

impl UsbBackend for RusbBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let devices = self.context.devices()?;
        let mut out = Vec::new();
        for device in devices.iter() {
            match snapshot(&device) {
                Ok(desc) => out.push(desc),
                Err(err) => {
                    debug!(
                        "skipping device on bus {} addr {}: {}",
                        device.bus_number(),
                        device.address(),
                        err
                    );
                }
            }
        }
        Ok(out)
    }

    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn UsbDeviceIo>, TransportError> {
        let device = self.find_device(identity)?;
        let handle = device.open()?;
        Ok(Box::new(RusbDeviceIo { handle }))
    }

    fn subscribe_hotplug(&self, tx: Sender<HotplugEvent>) -> Result<(), TransportError> {
        if rusb::has_hotplug() {
            let mut builder = HotplugBuilder::new();
            builder.enumerate(true);
            let registration =
                builder.register(&self.context, Box::new(HotplugForwarder { tx }))?;
            *self.registration.lock().unwrap() = Some(registration);
            return Ok(());
        }

        // No native hot-plug (e.g. libusb on Windows): fall back to a
        // polling scanner that diffs enumeration snapshots. The thread
        // exits when the receiving side hangs up.
        warn!("libusb hot-plug unavailable; falling back to periodic enumeration");
        let context = self.context.clone();
        thread::Builder::new()
            .name("usb_hotplug_poll".to_string())
            .spawn(move || poll_hotplug(context, tx))
            .map_err(|_| TransportError::Io)?;
        Ok(())
    }

    fn pump_events(&self, timeout: Duration) -> Result<(), TransportError> {
        self.context.handle_events(Some(timeout))?;
        Ok(())
    }
}

impl Drop for RusbBackend {
    fn drop(&mut self) {
        // Deregister the hot-plug callback before the context goes away.
        self.registration.lock().unwrap().take();
    }
}

struct HotplugForwarder {
    tx: Sender<HotplugEvent>,
}

impl Hotplug<Context> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        match snapshot(&device) {
            Ok(desc) => {
                let _ = self.tx.send(HotplugEvent::Attached(desc));
            }
            Err(err) => warn!("ignoring arrived device, descriptor read failed: {}", err),
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        if let Ok(desc) = device.device_descriptor() {
            let identity = DeviceIdentity {
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                bus: device.bus_number(),
                address: device.address(),
                serial: None,
            };
            let _ = self.tx.send(HotplugEvent::Detached(identity));
        }
    }
}

fn poll_hotplug(context: Context, tx: Sender<HotplugEvent>) {
    let mut known: HashSet<(u8, u8, u16, u16)> = HashSet::new();
    loop {
        let mut seen = HashSet::new();
        if let Ok(devices) = context.devices() {
            for device in devices.iter() {
                let Ok(desc) = device.device_descriptor() else {
                    continue;
                };
                let key = (
                    device.bus_number(),
                    device.address(),
                    desc.vendor_id(),
                    desc.product_id(),
                );
                seen.insert(key);
                if !known.contains(&key) {
                    if let Ok(descriptor) = snapshot(&device) {
                        if tx.send(HotplugEvent::Attached(descriptor)).is_err() {
                            return;
                        }
                    }
                }
            }
        }
        for &(bus, address, vendor_id, product_id) in known.difference(&seen) {
            let identity = DeviceIdentity {
                vendor_id,
                product_id,
                bus,
                address,
                serial: None,
            };
            if tx.send(HotplugEvent::Detached(identity)).is_err() {
                return;
            }
        }
        known = seen;
        thread::sleep(HOTPLUG_POLL_PERIOD);
    }
}

/// Captures the immutable descriptor snapshot for one device, including
/// the full interface/endpoint walk of the active configuration.
fn snapshot(device: &Device<Context>) -> Result<DeviceDescriptor, TransportError> {
    let desc = device.device_descriptor()?;
    let mut identity = DeviceIdentity {
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        bus: device.bus_number(),
        address: device.address(),
        serial: None,
    };

    let config = device
        .active_config_descriptor()
        .or_else(|_| device.config_descriptor(0))?;
    let mut interfaces = Vec::new();
    for interface in config.interfaces() {
        // First alternate setting carries the endpoints we care about.
        let Some(idesc) = interface.descriptors().next() else {
            continue;
        };
        let endpoints = idesc
            .endpoint_descriptors()
            .map(|ep| EndpointInfo {
                address: ep.address(),
                direction: match ep.direction() {
                    rusb::Direction::In => EndpointDirection::In,
                    rusb::Direction::Out => EndpointDirection::Out,
                },
                transfer: match ep.transfer_type() {
                    rusb::TransferType::Control => TransferKind::Control,
                    rusb::TransferType::Bulk => TransferKind::Bulk,
                    rusb::TransferType::Interrupt => TransferKind::Interrupt,
                    rusb::TransferType::Isochronous => TransferKind::Isochronous,
                },
                max_packet_size: ep.max_packet_size(),
            })
            .collect();
        interfaces.push(InterfaceInfo {
            number: interface.number(),
            class_code: idesc.class_code(),
            sub_class: idesc.sub_class_code(),
            protocol: idesc.protocol_code(),
            endpoints,
        });
    }

    // String descriptors need an open handle; enumeration must not fail
    // just because we lack permission to read them.
    let mut product = String::new();
    let mut manufacturer = String::new();
    if let Ok(handle) = device.open() {
        product = handle.read_product_string_ascii(&desc).unwrap_or_default();
        manufacturer = handle
            .read_manufacturer_string_ascii(&desc)
            .unwrap_or_default();
        identity.serial = handle.read_serial_number_string_ascii(&desc).ok();
    }

    Ok(DeviceDescriptor {
        identity,
        product,
        manufacturer,
        speed: match device.speed() {
            rusb::Speed::Low => UsbSpeed::Low,
            rusb::Speed::Full => UsbSpeed::Full,
            rusb::Speed::High => UsbSpeed::High,
            rusb::Speed::Super => UsbSpeed::Super,
            rusb::Speed::SuperPlus => UsbSpeed::SuperPlus,
            _ => UsbSpeed::Unknown,
        },
        interfaces,
    })
}

struct RusbDeviceIo {
    handle: DeviceHandle<Context>,
}

impl UsbDeviceIo for RusbDeviceIo {
    fn set_configuration(&mut self, config: u8) -> Result<(), TransportError> {
        self.handle.set_active_configuration(config)?;
        Ok(())
    }

    fn claim_interface(&mut self, number: u8) -> Result<(), TransportError> {
        self.handle.claim_interface(number)?;
        Ok(())
    }

    fn release_interface(&mut self, number: u8) -> Result<(), TransportError> {
        self.handle.release_interface(number)?;
        Ok(())
    }

    fn detach_kernel_driver(&mut self, number: u8) -> Result<(), TransportError> {
        match self.handle.kernel_driver_active(number) {
            Ok(true) => match self.handle.detach_kernel_driver(number) {
                Ok(()) => Ok(()),
                Err(rusb::Error::NotFound) | Err(rusb::Error::NotSupported) => Ok(()),
                Err(err) => Err(err.into()),
            },
            // No driver bound counts as success, as does a platform
            // without the concept.
            Ok(false) => Ok(()),
            Err(rusb::Error::NotSupported) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn interrupt_in(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        Ok(self.handle.read_interrupt(endpoint, buf, timeout)?)
    }

    fn interrupt_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        Ok(self.handle.write_interrupt(endpoint, data, timeout)?)
    }

    fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        Ok(self
            .handle
            .read_control(request_type, request, value, index, buf, timeout)?)
    }

    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        Ok(self
            .handle
            .write_control(request_type, request, value, index, data, timeout)?)
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError> {
        self.handle.clear_halt(endpoint)?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.handle.reset()?;
        Ok(())
    }
}
