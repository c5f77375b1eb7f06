//! Initialization scripts.
//!
//! Some controllers stay silent until they are told to stream. Each
//! protocol kind carries an ordered script of handshake steps; a device
//! table can override the script for a specific VID/PID. The runner
//! retries individual steps on transient transport errors.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::device::DeviceIdentity;
use crate::error::{ProtocolError, TransportError};
use crate::protocol::ProtocolKind;
use crate::transport::session::DeviceSession;

/// Attempts per step before the script fails.
const STEP_ATTEMPTS: usize = 3;
/// Back-off between attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);
/// Transfer timeout for script I/O.
const STEP_TIMEOUT: Duration = Duration::from_millis(250);

/// One step of an init script.
#[derive(Debug, Clone, Copy)]
pub enum InitStep {
    /// Control transfer to the default pipe.
    Control {
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        payload: &'static [u8],
    },
    /// Interrupt-OUT write on the selected output endpoint.
    InterruptOut { payload: &'static [u8] },
    /// Interrupt-IN read; the payload is discarded.
    InterruptIn { len: usize },
    /// Fixed pause in milliseconds.
    Delay { millis: u64 },
    /// Reads until a report starting with `prefix` arrives or the budget
    /// runs out.
    WaitForAck {
        prefix: &'static [u8],
        timeout_millis: u64,
    },
}

/// GIP handshake: three interrupt-OUT packets with 50 ms spacing.
///
/// | packet | meaning |
/// |---|---|
/// | `05 20 00 01 00` | handshake, sequence 1 |
/// | `0A 20 00 03 00 01 14` | identification, controller id 0x14 |
/// | `06 20 00 02 01 00` | enable input, 8 ms poll rate |
pub const GIP_INIT_SCRIPT: &[InitStep] = &[
    InitStep::InterruptOut {
        payload: &[0x05, 0x20, 0x00, 0x01, 0x00],
    },
    InitStep::Delay { millis: 50 },
    InitStep::InterruptOut {
        payload: &[0x0A, 0x20, 0x00, 0x03, 0x00, 0x01, 0x14],
    },
    InitStep::Delay { millis: 50 },
    InitStep::InterruptOut {
        payload: &[0x06, 0x20, 0x00, 0x02, 0x01, 0x00],
    },
];

/// Switch Pro USB setup: the writes that move the pad from its mute state
/// into continuous input streaming.
pub const SWITCH_INIT_SCRIPT: &[InitStep] = &[
    InitStep::InterruptOut {
        payload: &[
            0x03, 0x91, 0x00, 0x0D, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFF,
        ],
    },
    InitStep::Delay { millis: 10 },
    InitStep::InterruptOut {
        payload: &[0x07, 0x91, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
    },
    InitStep::Delay { millis: 10 },
    InitStep::InterruptOut {
        payload: &[0x16, 0x91, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
    },
];

/// Second-generation Pro Controller wants an acknowledgment before the
/// stream starts; used through the override table.
pub const SWITCH2_INIT_SCRIPT: &[InitStep] = &[
    InitStep::InterruptOut {
        payload: &[
            0x03, 0x91, 0x00, 0x0D, 0x00, 0x08, 0x00, 0x00, 0x01, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFF,
        ],
    },
    InitStep::Delay { millis: 10 },
    InitStep::InterruptOut {
        payload: &[0x07, 0x91, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
    },
    InitStep::WaitForAck {
        prefix: &[0x07, 0x91],
        timeout_millis: 200,
    },
    InitStep::InterruptOut {
        payload: &[0x16, 0x91, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
    },
];

/// Per-device overrides, checked before the protocol default.
const SCRIPT_OVERRIDES: &[(u16, u16, &[InitStep])] =
    &[(super::detect::VENDOR_NINTENDO, 0x2069, SWITCH2_INIT_SCRIPT)];

/// Looks up the init script for a device.
pub fn script_for(kind: ProtocolKind, identity: &DeviceIdentity) -> &'static [InitStep] {
    for &(vid, pid, script) in SCRIPT_OVERRIDES {
        if identity.vendor_id == vid && identity.product_id == pid {
            return script;
        }
    }
    match kind {
        ProtocolKind::Gip => GIP_INIT_SCRIPT,
        ProtocolKind::SwitchHid => SWITCH_INIT_SCRIPT,
        ProtocolKind::XInput
        | ProtocolKind::Ds4
        | ProtocolKind::Ds5
        | ProtocolKind::GenericHid => &[],
    }
}

/// Runs `script` against an opened, claimed session. Steps failing with
/// `timeout` or `io` are retried with back-off; anything else, or retry
/// exhaustion, fails the script.
pub fn run_script(
    session: &mut DeviceSession,
    script: &[InitStep],
) -> Result<(), ProtocolError> {
    for (step_index, step) in script.iter().enumerate() {
        let mut last_err = None;
        let mut done = false;
        for attempt in 0..STEP_ATTEMPTS {
            match execute_step(session, step) {
                Ok(()) => {
                    done = true;
                    break;
                }
                Err(err @ (TransportError::Timeout | TransportError::Io)) => {
                    debug!(
                        "init step {} attempt {} failed for {}: {}",
                        step_index,
                        attempt + 1,
                        session.identity(),
                        err
                    );
                    last_err = Some(err);
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(err) => {
                    return Err(ProtocolError::InitScriptFailed {
                        step: step_index,
                        source: err,
                    });
                }
            }
        }
        if !done {
            return Err(ProtocolError::InitScriptFailed {
                step: step_index,
                source: last_err.unwrap_or(TransportError::Io),
            });
        }
    }
    trace!("init script completed for {}", session.identity());
    Ok(())
}

fn execute_step(session: &mut DeviceSession, step: &InitStep) -> Result<(), TransportError> {
    match *step {
        InitStep::Control {
            request_type,
            request,
            value,
            index,
            payload,
        } => {
            session.control_out(request_type, request, value, index, payload, STEP_TIMEOUT)?;
            Ok(())
        }
        InitStep::InterruptOut { payload } => {
            let endpoint = session.out_endpoint().ok_or(TransportError::NotFound)?;
            session.interrupt_out(endpoint.address, payload, STEP_TIMEOUT)?;
            Ok(())
        }
        InitStep::InterruptIn { len } => {
            let endpoint = session.in_endpoint().ok_or(TransportError::NotFound)?;
            let mut buf = vec![0u8; len];
            session.interrupt_in(endpoint.address, &mut buf, STEP_TIMEOUT)?;
            Ok(())
        }
        InitStep::Delay { millis } => {
            thread::sleep(Duration::from_millis(millis));
            Ok(())
        }
        InitStep::WaitForAck {
            prefix,
            timeout_millis,
        } => {
            let endpoint = session.in_endpoint().ok_or(TransportError::NotFound)?;
            let deadline = Instant::now() + Duration::from_millis(timeout_millis);
            let mut buf = [0u8; 64];
            while Instant::now() < deadline {
                match session.interrupt_in(endpoint.address, &mut buf, STEP_TIMEOUT) {
                    Ok(len) if len >= prefix.len() && buf[..prefix.len()] == *prefix => {
                        return Ok(());
                    }
                    Ok(_) => continue,
                    Err(TransportError::Timeout) => continue,
                    Err(err) => return Err(err),
                }
            }
            Err(TransportError::Timeout)
        }
    }
}
