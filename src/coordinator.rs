//! Top-level orchestration.
//!
//! The coordinator owns the transport backend (and with it the process
//! wide USB context), the hot-plug channel, the device manager, and the
//! profile cache. Sessions are tracked by stable identifier; nothing in
//! the pipeline points back at the coordinator; everything downstream is
//! reached over channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, select};
use log::{error, info, warn};

use crate::config::AppConfig;
use crate::device::{DeviceDescriptor, DeviceIdentity, EndpointDirection};
use crate::manager::{DeviceEvent, DeviceManager, SessionOutputs};
use crate::output::{platform_sink, InputSink};
use crate::profile::{Profile, ProfileStore};
use crate::protocol::{self, ProtocolKind};
use crate::transport::{HotplugEvent, UsbBackend};
use crate::virtual_pad::{VirtualDeviceId, VirtualGamepadHost};

/// USB event-pump period.
const PUMP_PERIOD: Duration = Duration::from_millis(100);
/// Grace given to read loops on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Produces one output sink per session.
pub type SinkFactory = Box<dyn Fn() -> Box<dyn InputSink> + Send + Sync>;

pub struct Coordinator {
    backend: Arc<dyn UsbBackend>,
    manager: DeviceManager,
    store: Arc<dyn ProfileStore>,
    config: AppConfig,
    should_exit: Arc<AtomicBool>,
    hotplug_rx: Receiver<HotplugEvent>,
    device_events_rx: Receiver<DeviceEvent>,
    profiles: Vec<Profile>,
    sink_factory: SinkFactory,
    virtual_host: Option<Arc<Mutex<dyn VirtualGamepadHost>>>,
    virtual_ids: HashMap<u64, VirtualDeviceId>,
    pump_thread: Option<JoinHandle<()>>,
    watchdog_thread: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Builds the coordinator and primes the profile cache. A corrupted
    /// profile inventory degrades to the default profile instead of
    /// failing startup.
    pub fn new(
        backend: Arc<dyn UsbBackend>,
        store: Arc<dyn ProfileStore>,
        config: AppConfig,
    ) -> anyhow::Result<Self> {
        let (device_events_tx, device_events_rx) = crossbeam_channel::unbounded();
        let (hotplug_tx, hotplug_rx) = crossbeam_channel::unbounded();
        let should_exit = Arc::new(AtomicBool::new(false));

        let manager = DeviceManager::new(
            backend.clone(),
            device_events_tx,
            config.manager_settings(),
            should_exit.clone(),
        );

        let profiles = match store.load_all() {
            Ok(profiles) => profiles,
            Err(err) => {
                warn!("profile inventory unreadable ({}), using default", err);
                vec![store.create_default()?]
            }
        };

        backend
            .subscribe_hotplug(hotplug_tx)
            .map_err(|err| anyhow::anyhow!("hot-plug subscription failed: {}", err))?;

        Ok(Self {
            backend,
            manager,
            store,
            config,
            should_exit,
            hotplug_rx,
            device_events_rx,
            profiles,
            sink_factory: Box::new(platform_sink),
            virtual_host: None,
            virtual_ids: HashMap::new(),
            pump_thread: None,
            watchdog_thread: None,
        })
    }

    /// Replaces the per-session sink factory (tests, embedding).
    pub fn set_sink_factory(&mut self, factory: SinkFactory) {
        self.sink_factory = factory;
    }

    /// Wires a virtual-gamepad host; sessions attached afterwards mirror
    /// their input stream onto it.
    pub fn set_virtual_host(&mut self, host: Arc<Mutex<dyn VirtualGamepadHost>>) {
        self.virtual_host = Some(host);
    }

    pub fn should_exit_flag(&self) -> Arc<AtomicBool> {
        self.should_exit.clone()
    }

    pub fn session_count(&self) -> usize {
        self.manager.session_count()
    }

    /// Runs the event loop until the exit flag is raised.
    pub fn run(&mut self) {
        self.pump_thread = Some(spawn_pump(self.backend.clone(), self.should_exit.clone()));
        self.watchdog_thread = Some(self.manager.spawn_watchdog());

        let hotplug_rx = self.hotplug_rx.clone();
        let device_events_rx = self.device_events_rx.clone();
        while !self.should_exit.load(Ordering::Relaxed) {
            select! {
                recv(hotplug_rx) -> event => match event {
                    Ok(HotplugEvent::Attached(descriptor)) => self.on_attached(descriptor),
                    Ok(HotplugEvent::Detached(identity)) => self.on_detached(identity),
                    Err(_) => break,
                },
                recv(device_events_rx) -> event => match event {
                    Ok(event) => self.on_device_event(event),
                    Err(_) => break,
                },
                default(Duration::from_millis(100)) => {}
            }
        }

        self.shutdown();
    }

    /// Processes everything currently queued without blocking. Drives the
    /// coordinator from tests and embedders that own the loop.
    pub fn poll(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(event) = self.hotplug_rx.try_recv() {
                progressed = true;
                match event {
                    HotplugEvent::Attached(descriptor) => self.on_attached(descriptor),
                    HotplugEvent::Detached(identity) => self.on_detached(identity),
                }
            }
            while let Ok(event) = self.device_events_rx.try_recv() {
                progressed = true;
                self.on_device_event(event);
            }
            if !progressed {
                return;
            }
        }
    }

    fn on_attached(&mut self, descriptor: DeviceDescriptor) {
        let identity = descriptor.identity.clone();
        if self.manager.has_session(&identity) {
            return;
        }
        let kind = protocol::detect(&identity, &descriptor);
        if !is_supported(&descriptor, kind) {
            return;
        }

        let profile = self.choose_profile(&identity);
        info!(
            "device {} attached ({}), profile `{}`",
            identity, kind, profile.name
        );

        let virtual_pad = self.create_virtual_pad(&descriptor);
        let outputs = SessionOutputs {
            sink: (self.sink_factory)(),
            virtual_pad,
        };
        if let Err(err) = self.manager.attach(&descriptor, &profile, outputs) {
            error!("failed to attach {}: {}", identity, err);
            self.destroy_virtual_pad(&identity);
        }
    }

    fn on_detached(&mut self, identity: DeviceIdentity) {
        info!("device {} detached", identity);
        self.manager.detach(&identity);
    }

    fn on_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::SessionClosed { identity } => {
                self.destroy_virtual_pad(&identity);
            }
            DeviceEvent::DeviceError { identity, message } => {
                error!("device {}: {}", identity, message);
            }
        }
    }

    fn create_virtual_pad(
        &mut self,
        descriptor: &DeviceDescriptor,
    ) -> Option<(Arc<Mutex<dyn VirtualGamepadHost>>, VirtualDeviceId)> {
        let host = self.virtual_host.clone()?;
        let identity = &descriptor.identity;
        let id = {
            let mut guard = host.lock().ok()?;
            guard
                .create(
                    identity.vendor_id,
                    identity.product_id,
                    &format!("joymap: {}", descriptor.product),
                )
                .ok()?
        };
        self.virtual_ids.insert(identity.stable_id(), id);
        Some((host, id))
    }

    fn destroy_virtual_pad(&mut self, identity: &DeviceIdentity) {
        let Some(id) = self.virtual_ids.remove(&identity.stable_id()) else {
            return;
        };
        if let Some(host) = &self.virtual_host {
            if let Ok(mut guard) = host.lock() {
                let _ = guard.destroy(id);
            }
        }
    }

    /// Profile choice: device-specific, then the configured wildcard, then
    /// any wildcard, then the store default.
    fn choose_profile(&mut self, identity: &DeviceIdentity) -> Profile {
        if let Some(profile) = self
            .profiles
            .iter()
            .find(|p| p.is_device_specific(identity))
        {
            return profile.clone();
        }
        if let Some(profile) = self
            .profiles
            .iter()
            .find(|p| p.device_id.is_none() && p.name == self.config.active_profile)
        {
            return profile.clone();
        }
        if let Some(profile) = self.profiles.iter().find(|p| p.device_id.is_none()) {
            return profile.clone();
        }
        match self.store.create_default() {
            Ok(profile) => {
                self.profiles.push(profile.clone());
                profile
            }
            Err(err) => {
                warn!("default profile unavailable ({}), using built-in", err);
                Profile::default_profile()
            }
        }
    }

    /// Called when the profile store reports a save: refreshes the cache
    /// and pushes the profile to every matching session.
    pub fn notify_profile_saved(&mut self, profile: Profile) {
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(slot) => *slot = profile.clone(),
            None => self.profiles.push(profile.clone()),
        }
        self.manager
            .push_profile(&profile, |identity| profile.matches_device(identity));
    }

    /// Raises the exit flag, stops every read loop, and joins the helper
    /// threads.
    pub fn shutdown(&mut self) {
        self.should_exit.store(true, Ordering::Relaxed);
        self.manager.shutdown(SHUTDOWN_GRACE);
        // Read loops emitted their close events; virtual devices go last.
        self.poll();
        if let Some(thread) = self.pump_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.watchdog_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if !self.should_exit.load(Ordering::Relaxed) {
            self.shutdown();
        }
    }
}

fn spawn_pump(backend: Arc<dyn UsbBackend>, should_exit: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("joymap_usb_pump".to_string())
        .spawn(move || {
            while !should_exit.load(Ordering::Relaxed) {
                if let Err(err) = backend.pump_events(PUMP_PERIOD) {
                    warn!("usb event pump error: {}", err);
                    std::thread::sleep(PUMP_PERIOD);
                }
            }
        })
        .expect("failed to spawn usb pump thread")
}

/// Filters enumeration noise. Known protocols always attach; generic HID
/// devices must look like a game controller: a HID interface with an
/// interrupt-IN endpoint that is not a boot keyboard or mouse.
fn is_supported(descriptor: &DeviceDescriptor, kind: ProtocolKind) -> bool {
    if kind != ProtocolKind::GenericHid {
        return true;
    }
    descriptor.interfaces.iter().any(|iface| {
        iface.class_code == 0x03
            && !(iface.sub_class == 0x01 && matches!(iface.protocol, 0x01 | 0x02))
            && iface.interrupt_endpoint(EndpointDirection::In).is_some()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{EndpointInfo, InterfaceInfo, TransferKind, UsbSpeed};
    use crate::output::recording::RecordingSink;
    use crate::profile::{ButtonMapping, MemoryProfileStore, PROFILE_VERSION};
    use crate::transport::mock::{MockBackend, gamepad_descriptor};
    use crate::virtual_pad::LoopbackGamepadHost;

    fn coordinator_with(
        backend: Arc<MockBackend>,
        store: Arc<MemoryProfileStore>,
    ) -> (Coordinator, RecordingSink) {
        let sink = RecordingSink::new();
        let mut coordinator = Coordinator::new(backend, store, AppConfig::default()).unwrap();
        let factory_sink = sink.clone();
        coordinator.set_sink_factory(Box::new(move || Box::new(factory_sink.clone())));
        (coordinator, sink)
    }

    #[test]
    fn test_attach_and_detach_lifecycle() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryProfileStore::new());
        let (mut coordinator, _sink) = coordinator_with(backend.clone(), store);

        backend.attach(gamepad_descriptor(0x045E, 0x028E));
        coordinator.poll();
        assert_eq!(coordinator.session_count(), 1);

        let identity = gamepad_descriptor(0x045E, 0x028E).identity;
        backend.detach(&identity);
        coordinator.poll();
        // Give the read loop a beat to drain the shutdown command.
        std::thread::sleep(Duration::from_millis(100));
        coordinator.poll();
        assert_eq!(coordinator.session_count(), 0);

        coordinator.shutdown();
    }

    #[test]
    fn test_duplicate_attach_is_ignored() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryProfileStore::new());
        let (mut coordinator, _sink) = coordinator_with(backend.clone(), store);

        backend.attach(gamepad_descriptor(0x045E, 0x028E));
        backend.attach(gamepad_descriptor(0x045E, 0x028E));
        coordinator.poll();
        assert_eq!(coordinator.session_count(), 1);

        coordinator.shutdown();
    }

    #[test]
    fn test_device_specific_profile_wins() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryProfileStore::new());

        let mut specific = Profile {
            name: "xbox-only".to_string(),
            version: PROFILE_VERSION,
            device_id: Some(DeviceIdentity::new(0x045E, 0x028E)),
            button_mappings: vec![ButtonMapping::new("A", 0x2C)],
        };
        specific.validate().unwrap();
        store.save(&specific).unwrap();
        store.create_default().unwrap();

        let (mut coordinator, _sink) = coordinator_with(backend.clone(), store);
        let identity = DeviceIdentity::new(0x045E, 0x028E);
        assert_eq!(coordinator.choose_profile(&identity).name, "xbox-only");

        let other = DeviceIdentity::new(0x054C, 0x0CE6);
        assert_eq!(coordinator.choose_profile(&other).name, "default");

        coordinator.shutdown();
    }

    #[test]
    fn test_profile_cache_falls_back_when_store_is_empty() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryProfileStore::new());
        let (mut coordinator, _sink) = coordinator_with(backend.clone(), store.clone());

        let identity = DeviceIdentity::new(0x046D, 0xC21D);
        let profile = coordinator.choose_profile(&identity);
        assert_eq!(profile.name, "default");
        // The default was materialized into the store.
        assert!(store.exists("default").unwrap());

        coordinator.shutdown();
    }

    #[test]
    fn test_virtual_pad_created_and_destroyed_with_session() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryProfileStore::new());
        let (mut coordinator, _sink) = coordinator_with(backend.clone(), store);
        let host = Arc::new(Mutex::new(LoopbackGamepadHost::new()));
        coordinator.set_virtual_host(host.clone());

        let descriptor = gamepad_descriptor(0x045E, 0x028E);
        backend.attach(descriptor.clone());
        coordinator.poll();
        assert_eq!(host.lock().unwrap().device_count(), 1);

        backend.detach(&descriptor.identity);
        coordinator.poll();
        std::thread::sleep(Duration::from_millis(100));
        coordinator.poll();
        assert_eq!(host.lock().unwrap().device_count(), 0);

        coordinator.shutdown();
    }

    #[test]
    fn test_unsupported_generic_device_is_skipped() {
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryProfileStore::new());
        let (mut coordinator, _sink) = coordinator_with(backend.clone(), store);

        // A boot keyboard: HID class, boot sub-class, keyboard protocol.
        let mut keyboard = gamepad_descriptor(0x1A2B, 0x0001);
        keyboard.interfaces = vec![InterfaceInfo {
            number: 0,
            class_code: 0x03,
            sub_class: 0x01,
            protocol: 0x01,
            endpoints: vec![EndpointInfo {
                address: 0x81,
                direction: EndpointDirection::In,
                transfer: TransferKind::Interrupt,
                max_packet_size: 8,
            }],
        }];
        backend.attach(keyboard);
        coordinator.poll();
        assert_eq!(coordinator.session_count(), 0);

        coordinator.shutdown();
    }

    #[test]
    fn test_is_supported_accepts_hid_gamepad() {
        let descriptor = DeviceDescriptor {
            identity: DeviceIdentity::new(0x1A2B, 0x0002),
            product: String::new(),
            manufacturer: String::new(),
            speed: UsbSpeed::Full,
            interfaces: vec![InterfaceInfo {
                number: 0,
                class_code: 0x03,
                sub_class: 0x00,
                protocol: 0x00,
                endpoints: vec![EndpointInfo {
                    address: 0x81,
                    direction: EndpointDirection::In,
                    transfer: TransferKind::Interrupt,
                    max_packet_size: 64,
                }],
            }],
        };
        assert!(is_supported(&descriptor, ProtocolKind::GenericHid));
        assert!(is_supported(&descriptor, ProtocolKind::Gip));
    }
}
