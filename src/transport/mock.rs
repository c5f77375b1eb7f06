//! Scriptable in-memory transport backend.
//!
//! Integration tests drive the full pipeline against this backend: queued
//! interrupt reports, recorded writes with timestamps, injectable errors,
//! and synthetic hot-plug events. It deliberately mirrors the timing
//! contract of the real backend (empty queues behave like a blocking read
//! that times out).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::device::{
    DeviceDescriptor, DeviceIdentity, EndpointDirection, EndpointInfo, InterfaceInfo, TransferKind,
    UsbSpeed,
};
use crate::error::TransportError;
use crate::transport::{HotplugEvent, UsbBackend, UsbDeviceIo};

/// Builds a plausible controller descriptor: one vendor-specific interface
/// with an interrupt IN/OUT endpoint pair.
pub fn gamepad_descriptor(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        identity: DeviceIdentity {
            vendor_id,
            product_id,
            bus: 1,
            address: 4,
            serial: None,
        },
        product: "Mock Controller".to_string(),
        manufacturer: "Mock Works".to_string(),
        speed: UsbSpeed::Full,
        interfaces: vec![InterfaceInfo {
            number: 0,
            class_code: 0xFF,
            sub_class: 0x47,
            protocol: 0xD0,
            endpoints: vec![
                EndpointInfo {
                    address: 0x01,
                    direction: EndpointDirection::Out,
                    transfer: TransferKind::Interrupt,
                    max_packet_size: 64,
                },
                EndpointInfo {
                    address: 0x81,
                    direction: EndpointDirection::In,
                    transfer: TransferKind::Interrupt,
                    max_packet_size: 64,
                },
            ],
        }],
    }
}

/// One recorded interrupt-OUT transfer.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub endpoint: u8,
    pub data: Vec<u8>,
    pub at: Instant,
}

/// One recorded control transfer (OUT direction).
#[derive(Debug, Clone)]
pub struct ControlRecord {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

enum ReadStep {
    Report(Vec<u8>),
    Error(TransportError),
}

struct MockDeviceState {
    reads: Mutex<VecDeque<ReadStep>>,
    writes: Mutex<Vec<WriteRecord>>,
    control_writes: Mutex<Vec<ControlRecord>>,
    claimed: Mutex<Vec<u8>>,
    released: Mutex<Vec<u8>>,
    cleared_halts: Mutex<Vec<u8>>,
    detached_drivers: Mutex<Vec<u8>>,
    configured: Mutex<Option<u8>>,
    report_descriptor: Mutex<Option<Vec<u8>>>,
    idle_error: Mutex<TransportError>,
}

impl MockDeviceState {
    fn new() -> Self {
        Self {
            reads: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            control_writes: Mutex::new(Vec::new()),
            claimed: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            cleared_halts: Mutex::new(Vec::new()),
            detached_drivers: Mutex::new(Vec::new()),
            configured: Mutex::new(None),
            report_descriptor: Mutex::new(None),
            idle_error: Mutex::new(TransportError::Timeout),
        }
    }
}

/// Test-side handle onto one mock device. Cloneable; all clones observe
/// the same state, including across close/reopen cycles.
#[derive(Clone)]
pub struct MockDeviceHandle {
    state: Arc<MockDeviceState>,
}

impl MockDeviceHandle {
    /// Queues an interrupt-IN report.
    pub fn push_report(&self, bytes: &[u8]) {
        self.state
            .reads
            .lock()
            .unwrap()
            .push_back(ReadStep::Report(bytes.to_vec()));
    }

    /// Queues a one-shot read error delivered in sequence with reports.
    pub fn push_read_error(&self, err: TransportError) {
        self.state
            .reads
            .lock()
            .unwrap()
            .push_back(ReadStep::Error(err));
    }

    /// Sets the error returned once the read queue is drained
    /// (`Timeout` by default).
    pub fn set_idle_error(&self, err: TransportError) {
        *self.state.idle_error.lock().unwrap() = err;
    }

    pub fn set_report_descriptor(&self, bytes: &[u8]) {
        *self.state.report_descriptor.lock().unwrap() = Some(bytes.to_vec());
    }

    pub fn interrupt_writes(&self) -> Vec<WriteRecord> {
        self.state.writes.lock().unwrap().clone()
    }

    pub fn control_writes(&self) -> Vec<ControlRecord> {
        self.state.control_writes.lock().unwrap().clone()
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.state.claimed.lock().unwrap().clone()
    }

    pub fn released_interfaces(&self) -> Vec<u8> {
        self.state.released.lock().unwrap().clone()
    }

    pub fn cleared_halts(&self) -> Vec<u8> {
        self.state.cleared_halts.lock().unwrap().clone()
    }

    pub fn detached_drivers(&self) -> Vec<u8> {
        self.state.detached_drivers.lock().unwrap().clone()
    }

    pub fn configured(&self) -> Option<u8> {
        *self.state.configured.lock().unwrap()
    }

    /// True once every queued read step has been consumed.
    pub fn drained(&self) -> bool {
        self.state.reads.lock().unwrap().is_empty()
    }
}

struct MockEntry {
    descriptor: DeviceDescriptor,
    state: Arc<MockDeviceState>,
}

/// The backend itself. Wrap in an `Arc` to share with the coordinator.
pub struct MockBackend {
    devices: Mutex<Vec<MockEntry>>,
    hotplug_tx: Mutex<Option<Sender<HotplugEvent>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            hotplug_tx: Mutex::new(None),
        }
    }

    /// Adds a device without emitting a hot-plug event.
    pub fn add_device(&self, descriptor: DeviceDescriptor) -> MockDeviceHandle {
        let state = Arc::new(MockDeviceState::new());
        let handle = MockDeviceHandle {
            state: state.clone(),
        };
        self.devices
            .lock()
            .unwrap()
            .push(MockEntry { descriptor, state });
        handle
    }

    /// Adds a device and notifies any hot-plug subscriber.
    pub fn attach(&self, descriptor: DeviceDescriptor) -> MockDeviceHandle {
        let handle = self.add_device(descriptor.clone());
        if let Some(tx) = self.hotplug_tx.lock().unwrap().as_ref() {
            let _ = tx.send(HotplugEvent::Attached(descriptor));
        }
        handle
    }

    /// Removes the device and notifies any hot-plug subscriber. Open
    /// handles keep their shared state but start failing with `NoDevice`
    /// only if the test scripted it.
    pub fn detach(&self, identity: &DeviceIdentity) {
        self.devices
            .lock()
            .unwrap()
            .retain(|entry| !entry.descriptor.identity.same_port(identity));
        if let Some(tx) = self.hotplug_tx.lock().unwrap().as_ref() {
            let _ = tx.send(HotplugEvent::Detached(identity.clone()));
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbBackend for MockBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.descriptor.clone())
            .collect())
    }

    fn open(&self, identity: &DeviceIdentity) -> Result<Box<dyn UsbDeviceIo>, TransportError> {
        let devices = self.devices.lock().unwrap();
        let entry = devices
            .iter()
            .find(|entry| {
                let candidate = &entry.descriptor.identity;
                if identity.bus != 0 || identity.address != 0 {
                    candidate.same_port(identity)
                } else {
                    candidate == identity
                }
            })
            .ok_or(TransportError::NotFound)?;
        Ok(Box::new(MockDeviceIo {
            state: entry.state.clone(),
        }))
    }

    fn subscribe_hotplug(&self, tx: Sender<HotplugEvent>) -> Result<(), TransportError> {
        // Deliver already-present devices first so subscribers see no gap.
        for entry in self.devices.lock().unwrap().iter() {
            let _ = tx.send(HotplugEvent::Attached(entry.descriptor.clone()));
        }
        *self.hotplug_tx.lock().unwrap() = Some(tx);
        Ok(())
    }

    fn pump_events(&self, timeout: Duration) -> Result<(), TransportError> {
        thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(())
    }
}

struct MockDeviceIo {
    state: Arc<MockDeviceState>,
}

impl UsbDeviceIo for MockDeviceIo {
    fn set_configuration(&mut self, config: u8) -> Result<(), TransportError> {
        *self.state.configured.lock().unwrap() = Some(config);
        Ok(())
    }

    fn claim_interface(&mut self, number: u8) -> Result<(), TransportError> {
        self.state.claimed.lock().unwrap().push(number);
        Ok(())
    }

    fn release_interface(&mut self, number: u8) -> Result<(), TransportError> {
        self.state.released.lock().unwrap().push(number);
        Ok(())
    }

    fn detach_kernel_driver(&mut self, number: u8) -> Result<(), TransportError> {
        self.state.detached_drivers.lock().unwrap().push(number);
        Ok(())
    }

    fn interrupt_in(
        &mut self,
        _endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let step = self.state.reads.lock().unwrap().pop_front();
        match step {
            Some(ReadStep::Report(bytes)) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            Some(ReadStep::Error(err)) => Err(err),
            None => {
                // Emulate a blocking read that waits out its timeout.
                thread::sleep(timeout.min(Duration::from_millis(10)));
                Err(*self.state.idle_error.lock().unwrap())
            }
        }
    }

    fn interrupt_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.state.writes.lock().unwrap().push(WriteRecord {
            endpoint,
            data: data.to_vec(),
            at: Instant::now(),
        });
        Ok(data.len())
    }

    fn control_in(
        &mut self,
        _request_type: u8,
        _request: u8,
        value: u16,
        _index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        if value >> 8 == 0x22 {
            let guard = self.state.report_descriptor.lock().unwrap();
            let Some(bytes) = guard.as_ref() else {
                return Err(TransportError::NotSupported);
            };
            let len = bytes.len().min(buf.len());
            buf[..len].copy_from_slice(&bytes[..len]);
            return Ok(len);
        }
        Err(TransportError::NotSupported)
    }

    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.state.control_writes.lock().unwrap().push(ControlRecord {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError> {
        self.state.cleared_halts.lock().unwrap().push(endpoint);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
