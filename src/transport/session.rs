//! Per-device session state.
//!
//! A `DeviceSession` owns the opened handle and walks the lifecycle
//! `Opened → Configured → Claimed → Identified → Ready → Closed`. Every
//! transition is idempotent. Closing releases every claimed interface
//! before the handle drops, on all paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use smallvec::SmallVec;

use crate::device::{DeviceIdentity, EndpointInfo};
use crate::error::TransportError;
use crate::protocol::ProtocolKind;
use crate::transport::UsbDeviceIo;
use crate::util::monotonic_millis;

/// Lifecycle state of a session. Ordering follows the handshake diagram;
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Opened,
    Configured,
    Claimed,
    Identified,
    Ready,
    Closed,
}

/// Mutable state for one opened controller.
pub struct DeviceSession {
    io: Box<dyn UsbDeviceIo>,
    identity: DeviceIdentity,
    protocol: ProtocolKind,
    state: SessionState,
    claimed_interfaces: SmallVec<[u8; 2]>,
    in_endpoint: Option<EndpointInfo>,
    out_endpoint: Option<EndpointInfo>,
    last_activity: Arc<AtomicU64>,
    stall_count: u32,
}

impl DeviceSession {
    pub fn new(io: Box<dyn UsbDeviceIo>, identity: DeviceIdentity, protocol: ProtocolKind) -> Self {
        Self {
            io,
            identity,
            protocol,
            state: SessionState::Opened,
            claimed_interfaces: SmallVec::new(),
            in_endpoint: None,
            out_endpoint: None,
            last_activity: Arc::new(AtomicU64::new(monotonic_millis())),
            stall_count: 0,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn claimed_interfaces(&self) -> &[u8] {
        &self.claimed_interfaces
    }

    /// Shared handle to the activity timestamp, read by the watchdog.
    pub fn activity_handle(&self) -> Arc<AtomicU64> {
        self.last_activity.clone()
    }

    /// Records I/O activity now.
    pub fn touch(&self) {
        self.last_activity
            .store(monotonic_millis(), Ordering::Relaxed);
    }

    /// Replaces the activity cell with one shared by an earlier session,
    /// so watchdog bookkeeping survives a reconnect.
    pub fn adopt_activity(&mut self, handle: Arc<AtomicU64>) {
        handle.store(monotonic_millis(), Ordering::Relaxed);
        self.last_activity = handle;
    }

    pub fn record_stall(&mut self) -> u32 {
        self.stall_count += 1;
        self.stall_count
    }

    pub fn reset_stalls(&mut self) {
        self.stall_count = 0;
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }

    /// Selected interrupt endpoints; set by `select_endpoints`.
    pub fn in_endpoint(&self) -> Option<EndpointInfo> {
        self.in_endpoint
    }

    pub fn out_endpoint(&self) -> Option<EndpointInfo> {
        self.out_endpoint
    }

    pub fn select_endpoints(&mut self, input: Option<EndpointInfo>, output: Option<EndpointInfo>) {
        self.in_endpoint = input;
        self.out_endpoint = output;
    }

    /// Applies configuration 1. No-op on an already configured session.
    pub fn configure(&mut self) -> Result<(), TransportError> {
        if self.state >= SessionState::Configured {
            return Ok(());
        }
        self.io.set_configuration(1)?;
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Detaches any kernel driver (best-effort) and claims `number`.
    pub fn claim(&mut self, number: u8) -> Result<(), TransportError> {
        if self.claimed_interfaces.contains(&number) {
            return Ok(());
        }
        self.io.detach_kernel_driver(number)?;
        self.io.claim_interface(number)?;
        self.claimed_interfaces.push(number);
        if self.state < SessionState::Claimed {
            self.state = SessionState::Claimed;
        }
        Ok(())
    }

    /// Marks the init script as completed.
    pub fn mark_identified(&mut self) {
        if self.state < SessionState::Identified {
            self.state = SessionState::Identified;
        }
    }

    /// Marks the session ready for the read loop.
    pub fn mark_ready(&mut self) {
        if self.state != SessionState::Closed && self.state < SessionState::Ready {
            self.state = SessionState::Ready;
        }
    }

    pub fn interrupt_in(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let len = self.io.interrupt_in(endpoint, buf, timeout)?;
        self.touch();
        Ok(len)
    }

    pub fn interrupt_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let written = self.io.interrupt_out(endpoint, data, timeout)?;
        self.touch();
        Ok(written)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.io
            .control_in(request_type, request, value, index, buf, timeout)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.io
            .control_out(request_type, request, value, index, data, timeout)
    }

    pub fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError> {
        self.io.clear_halt(endpoint)
    }

    pub fn reset(&mut self) -> Result<(), TransportError> {
        self.io.reset()
    }

    /// Direct access to the underlying handle, used by the init engine and
    /// the descriptor fetch.
    pub fn io_mut(&mut self) -> &mut dyn UsbDeviceIo {
        self.io.as_mut()
    }

    /// Releases every claimed interface and closes the session. Safe to
    /// call more than once. Release failures are ignored; the device may
    /// already be gone.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        while let Some(number) = self.claimed_interfaces.pop() {
            let _ = self.io.release_interface(number);
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
