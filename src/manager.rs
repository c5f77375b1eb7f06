//! Per-device lifecycle management.
//!
//! For every attached controller the manager opens a session, runs the
//! protocol handshake, and spawns a dedicated read-loop thread that owns
//! the whole per-device pipeline: parser, processor, mapping engine, and
//! output synthesizer. A single watchdog thread monitors all sessions and
//! forces a reconnect after sustained silence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use log::{debug, info, warn};
use smallvec::SmallVec;

use crate::device::{DeviceDescriptor, DeviceIdentity, EndpointDirection, EndpointInfo};
use crate::error::{ProtocolError, TransportError};
use crate::events::{AxisId, InputEvent};
use crate::mapping::MappingEngine;
use crate::output::{InputSink, Synthesizer};
use crate::parsers::ReportParser;
use crate::processor::{AxisCalibration, DeadzoneConfig, InputProcessor};
use crate::profile::Profile;
use crate::protocol::{self, ProtocolKind, init};
use crate::transport::session::DeviceSession;
use crate::transport::{self, UsbBackend};
use crate::util::{likely, monotonic_millis, unlikely};
use crate::virtual_pad::{VirtualDeviceId, VirtualGamepadHost, VirtualPadMirror};

/// Timing and processing knobs, derived from the runtime config.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub read_timeout: Duration,
    pub stall_timeout: Duration,
    pub watchdog_interval: Duration,
    pub max_watchdog_stalls: u32,
    pub deadzones: DeadzoneConfig,
    pub calibration: Vec<(AxisId, AxisCalibration)>,
    pub scroll_sensitivity: f32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            stall_timeout: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(1),
            max_watchdog_stalls: 3,
            deadzones: DeadzoneConfig::default(),
            calibration: Vec::new(),
            scroll_sensitivity: 1.0,
        }
    }
}

impl ManagerSettings {
    /// Builds a fresh input processor carrying the configured deadzones
    /// and calibration table. Sessions call this at attach and again on
    /// reconnect so recovered devices keep their calibration.
    pub fn input_processor(&self) -> InputProcessor {
        let mut processor = InputProcessor::new(self.deadzones);
        for &(axis, calibration) in &self.calibration {
            processor.set_calibration(axis, calibration);
        }
        processor
    }
}

/// Why an attach failed.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Commands delivered to a session's read loop between reads.
pub enum SessionCommand {
    ApplyProfile(Profile),
    Reconnect,
    Shutdown,
}

/// Events the manager surfaces to the coordinator.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The session closed: unplugged, shut down, or abandoned.
    SessionClosed { identity: DeviceIdentity },
    /// Something went wrong that the user should see.
    DeviceError {
        identity: DeviceIdentity,
        message: String,
    },
}

/// Registry entry for one live session.
pub struct SessionHandle {
    pub identity: DeviceIdentity,
    pub protocol: ProtocolKind,
    command_tx: Sender<SessionCommand>,
    activity: Arc<AtomicU64>,
    watchdog_stalls: Arc<AtomicU32>,
    thread: Option<JoinHandle<()>>,
}

/// Resources a new session's read loop takes ownership of.
pub struct SessionOutputs {
    pub sink: Box<dyn InputSink>,
    pub virtual_pad: Option<(
        Arc<std::sync::Mutex<dyn VirtualGamepadHost>>,
        VirtualDeviceId,
    )>,
}

pub struct DeviceManager {
    backend: Arc<dyn UsbBackend>,
    sessions: Arc<scc::HashMap<u64, SessionHandle>>,
    events_tx: Sender<DeviceEvent>,
    settings: ManagerSettings,
    should_exit: Arc<AtomicBool>,
}

impl DeviceManager {
    pub fn new(
        backend: Arc<dyn UsbBackend>,
        events_tx: Sender<DeviceEvent>,
        settings: ManagerSettings,
        should_exit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            sessions: Arc::new(scc::HashMap::new()),
            events_tx,
            settings,
            should_exit,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, identity: &DeviceIdentity) -> bool {
        self.sessions.contains_sync(&identity.stable_id())
    }

    /// Opens, initializes, and starts a read loop for a newly attached
    /// device. Returns once the session is `Ready` and the loop runs.
    pub fn attach(
        &self,
        descriptor: &DeviceDescriptor,
        profile: &Profile,
        outputs: SessionOutputs,
    ) -> Result<(), AttachError> {
        let identity = descriptor.identity.clone();
        let kind = protocol::detect(&identity, descriptor);
        info!("attaching {} as {}", identity, kind);

        let mut session = self.open_session(&identity, kind, descriptor)?;

        // Generic devices try the descriptor-driven parser first.
        let parser = self.build_parser(&mut session, kind);

        init::run_script(&mut session, init::script_for(kind, &identity))?;
        session.mark_identified();
        session.mark_ready();

        let activity = session.activity_handle();
        let watchdog_stalls = Arc::new(AtomicU32::new(0));
        let (command_tx, command_rx) = crossbeam_channel::unbounded();

        let worker = SessionWorker {
            backend: self.backend.clone(),
            sessions: self.sessions.clone(),
            events_tx: self.events_tx.clone(),
            settings: self.settings.clone(),
            should_exit: self.should_exit.clone(),
            identity: identity.clone(),
            kind,
            descriptor: descriptor.clone(),
            command_rx,
            activity: activity.clone(),
        };
        let profile = profile.clone();
        let thread = thread::Builder::new()
            .name(format!(
                "joymap_read_{:04x}_{:04x}",
                identity.vendor_id, identity.product_id
            ))
            .spawn(move || worker.run(session, parser, profile, outputs))
            .map_err(|_| AttachError::Transport(TransportError::Io))?;

        let handle = SessionHandle {
            identity: identity.clone(),
            protocol: kind,
            command_tx,
            activity,
            watchdog_stalls,
            thread: Some(thread),
        };
        let _ = self.sessions.insert_sync(identity.stable_id(), handle);
        Ok(())
    }

    fn open_session(
        &self,
        identity: &DeviceIdentity,
        kind: ProtocolKind,
        descriptor: &DeviceDescriptor,
    ) -> Result<DeviceSession, TransportError> {
        let io = self.backend.open(identity)?;
        let mut session = DeviceSession::new(io, identity.clone(), kind);
        session.configure()?;
        session.claim(0)?;
        let (input, output) = interface_endpoints(descriptor);
        session.select_endpoints(input, output);
        Ok(session)
    }

    fn build_parser(&self, session: &mut DeviceSession, kind: ProtocolKind) -> ReportParser {
        if matches!(kind, ProtocolKind::GenericHid | ProtocolKind::SwitchHid) {
            match transport::read_report_descriptor(session.io_mut(), 0, Duration::from_millis(250))
            {
                Ok(bytes) => {
                    if let Some(parser) = ReportParser::from_report_descriptor(&bytes) {
                        debug!("using descriptor-driven parser for {}", session.identity());
                        return parser;
                    }
                }
                Err(err) => {
                    debug!(
                        "report descriptor unavailable for {}: {}",
                        session.identity(),
                        err
                    );
                }
            }
        }
        ReportParser::for_protocol(kind)
    }

    /// Sends a command to one session. Unknown sessions are ignored.
    pub fn send_command(&self, identity: &DeviceIdentity, command: SessionCommand) {
        if let Some(entry) = self.sessions.get_sync(&identity.stable_id()) {
            let _ = entry.get().command_tx.send(command);
        }
    }

    /// Pushes a profile to every session the filter accepts.
    pub fn push_profile(&self, profile: &Profile, accept: impl Fn(&DeviceIdentity) -> bool) {
        self.sessions.iter_sync(|_, handle| {
            if accept(&handle.identity) {
                let _ = handle
                    .command_tx
                    .send(SessionCommand::ApplyProfile(profile.clone()));
            }
            true
        });
    }

    /// Asks a session's loop to shut down (hot-unplug path). The loop
    /// removes itself from the registry when it exits.
    pub fn detach(&self, identity: &DeviceIdentity) {
        self.send_command(identity, SessionCommand::Shutdown);
    }

    /// Starts the periodic watchdog. Returns its join handle.
    pub fn spawn_watchdog(&self) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let settings = self.settings.clone();
        let should_exit = self.should_exit.clone();
        thread::Builder::new()
            .name("joymap_watchdog".to_string())
            .spawn(move || {
                while !should_exit.load(Ordering::Relaxed) {
                    thread::sleep(settings.watchdog_interval);
                    let stall_millis = settings.stall_timeout.as_millis() as u64;
                    let now = monotonic_millis();
                    sessions.iter_sync(|_, handle| {
                        let last = handle.activity.load(Ordering::Relaxed);
                        if now.saturating_sub(last) > stall_millis {
                            let stalls = handle.watchdog_stalls.fetch_add(1, Ordering::Relaxed) + 1;
                            debug!(
                                "session {} stalled ({}/{})",
                                handle.identity, stalls, settings.max_watchdog_stalls
                            );
                            if stalls >= settings.max_watchdog_stalls {
                                handle.watchdog_stalls.store(0, Ordering::Relaxed);
                                warn!("session {} unresponsive, reconnecting", handle.identity);
                                let _ = handle.command_tx.send(SessionCommand::Reconnect);
                            }
                        } else {
                            handle.watchdog_stalls.store(0, Ordering::Relaxed);
                        }
                        true
                    });
                }
            })
            .expect("failed to spawn watchdog thread")
    }

    /// Signals every read loop and joins them within the grace period.
    pub fn shutdown(&self, grace: Duration) {
        let mut keys = Vec::new();
        self.sessions.iter_sync(|key, handle| {
            keys.push(*key);
            let _ = handle.command_tx.send(SessionCommand::Shutdown);
            true
        });
        let deadline = Instant::now() + grace;
        for key in keys {
            if let Some((_, mut handle)) = self.sessions.remove_sync(&key) {
                if let Some(thread) = handle.thread.take() {
                    if Instant::now() < deadline {
                        let _ = thread.join();
                    }
                }
            }
        }
    }
}

fn interface_endpoints(
    descriptor: &DeviceDescriptor,
) -> (Option<EndpointInfo>, Option<EndpointInfo>) {
    let Some(iface) = descriptor.interface(0) else {
        return (None, None);
    };
    (
        iface.interrupt_endpoint(EndpointDirection::In).copied(),
        iface.interrupt_endpoint(EndpointDirection::Out).copied(),
    )
}

/// Everything one read loop needs, moved onto its thread.
struct SessionWorker {
    backend: Arc<dyn UsbBackend>,
    sessions: Arc<scc::HashMap<u64, SessionHandle>>,
    events_tx: Sender<DeviceEvent>,
    settings: ManagerSettings,
    should_exit: Arc<AtomicBool>,
    identity: DeviceIdentity,
    kind: ProtocolKind,
    descriptor: DeviceDescriptor,
    command_rx: Receiver<SessionCommand>,
    activity: Arc<AtomicU64>,
}

impl SessionWorker {
    fn run(
        self,
        mut session: DeviceSession,
        mut parser: ReportParser,
        profile: Profile,
        outputs: SessionOutputs,
    ) {
        let mut synth = Synthesizer::new(outputs.sink);
        synth.set_scroll_sensitivity(self.settings.scroll_sensitivity);
        let mut engine = MappingEngine::new(&profile);
        let mut processor = self.settings.input_processor();
        let mut mirror = VirtualPadMirror::new();

        let epoch = Instant::now();
        let mut buf = vec![0u8; self.kind.max_report_len()];
        let in_endpoint = session.in_endpoint().map(|ep| ep.address);

        'main: loop {
            if unlikely(self.should_exit.load(Ordering::Relaxed)) {
                break;
            }

            // Profile pushes and control traffic are serialized with the
            // report stream here, between reads.
            while let Ok(command) = self.command_rx.try_recv() {
                match command {
                    SessionCommand::ApplyProfile(profile) => {
                        info!("session {}: applying profile `{}`", self.identity, profile.name);
                        engine.apply_profile(&profile, &mut synth);
                    }
                    SessionCommand::Reconnect => {
                        match self.reconnect(&mut session, &mut engine, &mut synth) {
                            Ok(fresh_parser) => {
                                parser = fresh_parser;
                                processor = self.settings.input_processor();
                                continue;
                            }
                            Err(err) => {
                                let _ = self.events_tx.send(DeviceEvent::DeviceError {
                                    identity: self.identity.clone(),
                                    message: format!("reconnect failed: {}", err),
                                });
                                break 'main;
                            }
                        }
                    }
                    SessionCommand::Shutdown => break 'main,
                }
            }

            let Some(endpoint) = in_endpoint else {
                warn!("session {} has no interrupt-IN endpoint", self.identity);
                break;
            };

            match session.interrupt_in(endpoint, &mut buf, self.settings.read_timeout) {
                Ok(len) => {
                    self.activity.store(monotonic_millis(), Ordering::Relaxed);
                    if unlikely(len == 0) {
                        continue;
                    }
                    let timestamp = epoch.elapsed().as_millis() as u64;
                    let raw_events = parser.parse(&buf[..len], timestamp);
                    let mut processed: SmallVec<[InputEvent; 16]> = SmallVec::new();
                    for event in raw_events {
                        if let Some(event) = processor.process(event) {
                            processed.push(event);
                        }
                    }
                    engine.process_report(&processed, &mut synth);
                    if let Some((host, id)) = &outputs.virtual_pad {
                        for event in &processed {
                            mirror.update(event);
                        }
                        if let Ok(mut host) = host.lock() {
                            let _ = mirror.flush(&mut *host, *id);
                        }
                    }
                }
                Err(TransportError::Timeout) => {
                    // Benign: controllers go quiet between inputs.
                    continue;
                }
                Err(err) if likely(err.is_stall()) => {
                    let stalls = session.record_stall();
                    debug!(
                        "session {}: {} (stall #{}), clearing halt",
                        self.identity, err, stalls
                    );
                    let _ = session.clear_halt(endpoint);
                }
                Err(err) if err.is_fatal() => {
                    info!("session {} gone: {}", self.identity, err);
                    break;
                }
                Err(err) => {
                    debug!("session {}: read error {}", self.identity, err);
                    session.record_stall();
                }
            }
        }

        // Teardown: no key stays held, interfaces release before close.
        engine.release_all(&mut synth);
        session.close();
        let _ = self.sessions.remove_sync(&self.identity.stable_id());
        let _ = self.events_tx.send(DeviceEvent::SessionClosed {
            identity: self.identity.clone(),
        });
    }

    /// Watchdog-triggered recovery: close, reopen the same physical
    /// device, re-run the init script. Held keys never survive this.
    fn reconnect(
        &self,
        session: &mut DeviceSession,
        engine: &mut MappingEngine,
        synth: &mut Synthesizer,
    ) -> Result<ReportParser, TransportError> {
        engine.release_all(synth);
        // A port reset gives wedged firmware its best chance before the
        // handle goes away.
        let _ = session.reset();
        session.close();

        let io = self.backend.open(&self.identity)?;
        let mut fresh = DeviceSession::new(io, self.identity.clone(), self.kind);
        fresh.adopt_activity(self.activity.clone());
        fresh.configure()?;
        fresh.claim(0)?;
        let (input, output) = interface_endpoints(&self.descriptor);
        fresh.select_endpoints(input, output);

        init::run_script(&mut fresh, init::script_for(self.kind, &self.identity)).map_err(
            |err| match err {
                ProtocolError::InitScriptFailed { source, .. } => source,
                _ => TransportError::Io,
            },
        )?;
        fresh.mark_identified();
        fresh.mark_ready();
        info!("session {} reconnected", self.identity);
        *session = fresh;
        Ok(ReportParser::for_protocol(self.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::recording::{RecordingSink, SinkEvent};
    use crate::profile::{ButtonMapping, KeyModifier, PROFILE_VERSION};
    use crate::transport::mock::{MockBackend, MockDeviceHandle, gamepad_descriptor};

    fn xinput_profile() -> Profile {
        Profile {
            name: "xinput".to_string(),
            version: PROFILE_VERSION,
            device_id: None,
            button_mappings: vec![ButtonMapping::new("A", 0x39)],
        }
    }

    fn fast_settings() -> ManagerSettings {
        ManagerSettings {
            read_timeout: Duration::from_millis(5),
            stall_timeout: Duration::from_millis(40),
            watchdog_interval: Duration::from_millis(10),
            max_watchdog_stalls: 3,
            deadzones: DeadzoneConfig::default(),
            calibration: Vec::new(),
            scroll_sensitivity: 1.0,
        }
    }

    struct Rig {
        backend: Arc<MockBackend>,
        manager: DeviceManager,
        events_rx: Receiver<DeviceEvent>,
        should_exit: Arc<AtomicBool>,
    }

    fn rig() -> Rig {
        let backend = Arc::new(MockBackend::new());
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let should_exit = Arc::new(AtomicBool::new(false));
        let manager = DeviceManager::new(
            backend.clone(),
            events_tx,
            fast_settings(),
            should_exit.clone(),
        );
        Rig {
            backend,
            manager,
            events_rx,
            should_exit,
        }
    }

    fn attach_xinput(rig: &Rig) -> (MockDeviceHandle, DeviceDescriptor, RecordingSink) {
        let descriptor = gamepad_descriptor(0x045E, 0x028E);
        let device = rig.backend.add_device(descriptor.clone());
        let sink = RecordingSink::new();
        rig.manager
            .attach(
                &descriptor,
                &xinput_profile(),
                SessionOutputs {
                    sink: Box::new(sink.clone()),
                    virtual_pad: None,
                },
            )
            .unwrap();
        (device, descriptor, sink)
    }

    fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn test_attach_processes_reports_end_to_end() {
        let rig = rig();
        let (device, descriptor, sink) = attach_xinput(&rig);
        assert!(rig.manager.has_session(&descriptor.identity));

        device.push_report(&[0x01, 0x80, 0x80, 0x80, 0x80, 0x00, 0x00, 0x00]);
        device.push_report(&[0x00, 0x80, 0x80, 0x80, 0x80, 0x00, 0x00, 0x00]);

        assert!(wait_for(
            || sink.key_events().len() == 2,
            Duration::from_secs(2)
        ));
        assert_eq!(
            sink.key_events(),
            vec![
                SinkEvent::KeyDown(0x39, KeyModifier::None),
                SinkEvent::KeyUp(0x39, KeyModifier::None),
            ]
        );

        rig.manager.shutdown(Duration::from_secs(1));
        assert_eq!(rig.manager.session_count(), 0);
    }

    #[test]
    fn test_pipe_error_clears_halt_and_continues() {
        let rig = rig();
        let (device, _descriptor, sink) = attach_xinput(&rig);

        device.push_read_error(TransportError::Pipe);
        device.push_report(&[0x01, 0x80, 0x80, 0x80, 0x80, 0x00, 0x00, 0x00]);

        assert!(wait_for(
            || !device.cleared_halts().is_empty() && sink.key_events().len() == 1,
            Duration::from_secs(2)
        ));
        assert_eq!(device.cleared_halts(), vec![0x81]);

        rig.manager.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_no_device_tears_down_and_releases_keys() {
        let rig = rig();
        let (device, descriptor, sink) = attach_xinput(&rig);

        // Hold A, then yank the device.
        device.push_report(&[0x01, 0x80, 0x80, 0x80, 0x80, 0x00, 0x00, 0x00]);
        device.push_read_error(TransportError::NoDevice);

        let closed = rig
            .events_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("expected SessionClosed");
        match closed {
            DeviceEvent::SessionClosed { identity } => {
                assert_eq!(identity, descriptor.identity);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // The held key was released and the interface freed.
        assert_eq!(
            sink.key_events().last(),
            Some(&SinkEvent::KeyUp(0x39, KeyModifier::None))
        );
        assert_eq!(device.released_interfaces(), vec![0]);
        assert!(!rig.manager.has_session(&descriptor.identity));
    }

    #[test]
    fn test_calibration_reaches_the_read_loop() {
        let rig = {
            let backend = Arc::new(MockBackend::new());
            let (events_tx, events_rx) = crossbeam_channel::unbounded();
            let should_exit = Arc::new(AtomicBool::new(false));
            // A worn stick whose full right travel only reaches raw +40.
            let mut settings = fast_settings();
            settings.deadzones = DeadzoneConfig {
                left_stick: 0.0,
                right_stick: 0.0,
                trigger: 0.0,
            };
            settings.calibration = vec![(
                AxisId::LStickX,
                AxisCalibration {
                    min: -128,
                    max: 40,
                    center: 0,
                },
            )];
            let manager = DeviceManager::new(backend.clone(), events_tx, settings, should_exit.clone());
            Rig {
                backend,
                manager,
                events_rx,
                should_exit,
            }
        };

        let descriptor = gamepad_descriptor(0x045E, 0x028E);
        let device = rig.backend.add_device(descriptor.clone());
        let sink = RecordingSink::new();
        let profile = Profile {
            name: "stick".to_string(),
            version: PROFILE_VERSION,
            device_id: None,
            button_mappings: vec![ButtonMapping::new("LSX+", 0x20)],
        };
        rig.manager
            .attach(
                &descriptor,
                &profile,
                SessionOutputs {
                    sink: Box::new(sink.clone()),
                    virtual_pad: None,
                },
            )
            .unwrap();

        // Raw +40 normalizes to ~0.31 uncalibrated, which would miss the
        // 0.5 press threshold; the calibrated extent maps it to 1.0.
        device.push_report(&[0x00, 0xA8, 0x80, 0x80, 0x80, 0x00, 0x00, 0x00]);
        assert!(wait_for(
            || sink.key_events() == vec![SinkEvent::KeyDown(0x20, KeyModifier::None)],
            Duration::from_secs(2)
        ));

        rig.manager.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_profile_push_swaps_binding() {
        let rig = rig();
        let (device, descriptor, sink) = attach_xinput(&rig);

        device.push_report(&[0x01, 0x80, 0x80, 0x80, 0x80, 0x00, 0x00, 0x00]);
        assert!(wait_for(
            || sink.key_events().len() == 1,
            Duration::from_secs(2)
        ));

        let mut profile = xinput_profile();
        profile.button_mappings[0].key_code = 0x1F;
        rig.manager
            .send_command(&descriptor.identity, SessionCommand::ApplyProfile(profile));

        // Old key released on swap, new key pressed with the next report.
        device.push_report(&[0x01, 0x80, 0x80, 0x80, 0x80, 0x00, 0x00, 0x01]);
        assert!(wait_for(
            || sink.key_events().len() >= 3,
            Duration::from_secs(2)
        ));
        let events = sink.key_events();
        assert_eq!(events[1], SinkEvent::KeyUp(0x39, KeyModifier::None));
        assert_eq!(events[2], SinkEvent::KeyDown(0x1F, KeyModifier::None));

        rig.manager.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_watchdog_reconnect_reruns_init() {
        let rig = rig();
        let descriptor = gamepad_descriptor(0x045E, 0x02EA); // GIP: has an init script
        let device = rig.backend.add_device(descriptor.clone());
        let sink = RecordingSink::new();
        rig.manager
            .attach(
                &descriptor,
                &xinput_profile(),
                SessionOutputs {
                    sink: Box::new(sink.clone()),
                    virtual_pad: None,
                },
            )
            .unwrap();
        let watchdog = rig.manager.spawn_watchdog();
        let handshake_writes = device.interrupt_writes().len();
        assert_eq!(handshake_writes, 3);

        // Total silence: stall timeout 40 ms × 3 strikes at 10 ms ticks.
        assert!(wait_for(
            || device.interrupt_writes().len() >= handshake_writes * 2,
            Duration::from_secs(5)
        ));
        // The reconnect re-claimed the interface and re-ran the script.
        assert!(device.claimed_interfaces().len() >= 2);

        rig.should_exit.store(true, Ordering::Relaxed);
        rig.manager.shutdown(Duration::from_secs(1));
        let _ = watchdog.join();
    }

    #[test]
    fn test_shutdown_idles_cleanly_without_sessions() {
        let rig = rig();
        rig.manager.shutdown(Duration::from_millis(100));
        assert_eq!(rig.manager.session_count(), 0);
        assert!(rig.events_rx.is_empty());
    }
}
