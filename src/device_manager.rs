// === SOUND DEVICE MANAGER ===
// Single entry point of the crate: enumerates sources, activates exactly one,
// handles the priority override and relays PCM/errors to subscribers.
// Every activation path goes through `transition()`: stop all → start one → hook.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::audio::backend::{create_sources, SoundSource};
use crate::audio::error::{Result, SoundDeviceError};
use crate::audio::signal::SignalHub;
use crate::audio::types::*;
use crate::config::ManagerConfig;
use crate::registry::DeviceRegistry;

/// Outcome of a selection request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The device is now running
    Activated,
    /// Already the requested device: nothing was touched
    Unchanged,
    /// A priority device is active, normal selection is ignored
    Suppressed,
    /// Another transition is in progress (e.g. called from the activation hook)
    Busy,
}

/// Called after every successful activation with the new device
pub type ActivationHook = Box<dyn FnMut(&DeviceDescriptor) + Send>;

/// Owns every source and the lease on the one that may run
struct SourceBank {
    sources: Vec<Box<dyn SoundSource>>,
    active: Option<DeviceKind>,
}

impl SourceBank {
    fn source_mut(&mut self, kind: DeviceKind) -> Option<&mut Box<dyn SoundSource>> {
        self.sources.iter_mut().find(|s| s.kind() == kind)
    }

    /// Leased kind, if its source is still producing
    fn running(&self) -> Option<DeviceKind> {
        let kind = self.active?;
        self.sources
            .iter()
            .any(|s| s.kind() == kind && s.is_active())
            .then_some(kind)
    }

    fn stop_all(&mut self) {
        let leased = self.active.take();
        for source in self.sources.iter_mut() {
            if source.is_active() || Some(source.kind()) == leased {
                source.stop();
                tracing::info!(source = source.name(), "source stopped");
            }
        }
    }

    /// Starts the source for `device`; on error nothing is left running
    fn start(
        &mut self,
        device: &DeviceDescriptor,
        hub: &Arc<SignalHub>,
        default_format: AudioFormat,
    ) -> Result<AudioFormat> {
        let kind = device.kind();
        if kind == DeviceKind::None {
            return Ok(default_format);
        }

        let source = self
            .source_mut(kind)
            .ok_or_else(|| SoundDeviceError::activation(device.name(), format!("no {kind} source available")))?;

        match source.start(device, hub.sink(kind, device.name())) {
            Ok(format) => {
                tracing::info!(
                    source = source.name(),
                    device = %device,
                    rate = format.sample_rate,
                    channels = format.channels,
                    "source activated"
                );
                self.active = Some(kind);
                Ok(format)
            }
            Err(e) => {
                source.stop();
                Err(e)
            }
        }
    }
}

struct ManagerInner {
    current: DeviceDescriptor,
    priority: DeviceDescriptor,
    active_format: AudioFormat,
}

/// Resets the transition flag when the transition ends, early returns included
struct TransitionGuard<'a>(&'a AtomicBool);

impl<'a> TransitionGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SoundDeviceManager {
    config: ManagerConfig,
    registry: DeviceRegistry,
    hub: Arc<SignalHub>,
    bank: Mutex<SourceBank>,
    inner: Mutex<ManagerInner>,
    transitioning: AtomicBool,
    hook: Mutex<Option<ActivationHook>>,
    /// Bumped on every hook (re)registration
    hook_generation: AtomicU64,
}

impl SoundDeviceManager {
    /// Manager over the sources enabled at compile time
    pub fn new(config: ManagerConfig) -> Self {
        let config = config.normalized();
        let sources = create_sources(&config);
        Self::with_sources(config, sources)
    }

    /// Manager over caller supplied sources
    ///
    /// Refreshes the registry and activates the startup device: the last input
    /// capture device, else the `startup_fallback` kind.
    pub fn with_sources(config: ManagerConfig, sources: Vec<Box<dyn SoundSource>>) -> Self {
        let config = config.normalized();
        let hub = Arc::new(SignalHub::new(
            config.subscriber_capacity,
            config.default_format.sample_layout,
        ));
        let default_format = config.default_format;

        let manager = Self {
            config,
            registry: DeviceRegistry::new(),
            hub,
            bank: Mutex::new(SourceBank {
                sources,
                active: None,
            }),
            inner: Mutex::new(ManagerInner {
                current: DeviceDescriptor::none(),
                priority: DeviceDescriptor::none(),
                active_format: default_format,
            }),
            transitioning: AtomicBool::new(false),
            hook: Mutex::new(None),
            hook_generation: AtomicU64::new(0),
        };

        manager.refresh_devices();
        manager.activate_startup_device();
        manager
    }

    fn activate_startup_device(&self) {
        if let Some(input) = self.registry.last_of_kind(DeviceKind::InputCapture) {
            match self.select(&input) {
                Ok(_) => return,
                Err(e) => tracing::warn!("startup device unavailable, falling back: {}", e),
            }
        } else {
            tracing::debug!("no input capture device at startup");
        }

        let fallback_kind = self.config.startup_fallback;
        let fallback = match fallback_kind {
            DeviceKind::None => DeviceDescriptor::none(),
            kind => match self.registry.last_of_kind(kind) {
                Some(device) => device,
                None => {
                    tracing::warn!(kind = %kind, "no startup fallback device");
                    return;
                }
            },
        };
        if let Err(e) = self.select(&fallback) {
            tracing::warn!("startup fallback failed: {}", e);
        }
    }

    // === REGISTRY ===

    /// Re-enumerates every source
    pub fn refresh_devices(&self) {
        let bank = self.bank.lock();
        self.registry.refresh(&bank.sources);
    }

    /// Devices of a kind (`DeviceKind::None` = all), in enumeration order
    pub fn list_devices(&self, filter: DeviceKind) -> Vec<DeviceDescriptor> {
        self.registry.list_devices(filter)
    }

    // === SELECTION ===

    /// Switches to `device` unless it is current or a priority device is active
    pub fn select(&self, device: &DeviceDescriptor) -> Result<Selection> {
        {
            let inner = self.inner.lock();
            if *device == inner.current {
                tracing::debug!(device = %device, "already selected");
                return Ok(Selection::Unchanged);
            }
            if inner.priority.is_valid() {
                tracing::debug!(device = %device, priority = %inner.priority, "selection suppressed by priority device");
                return Ok(Selection::Suppressed);
            }
        }

        let Some(_guard) = TransitionGuard::acquire(&self.transitioning) else {
            tracing::debug!(device = %device, "transition in progress, selection ignored");
            return Ok(Selection::Busy);
        };

        if let Err(e) = self.transition(device) {
            self.hub.report(&e);
            return Err(e);
        }
        self.inner.lock().current = device.clone();
        self.notify_activation(device);
        Ok(Selection::Activated)
    }

    /// Activates an override device, or clears it when `device` is invalid
    ///
    /// Clearing brings the current device back. A failed override leaves the
    /// previous priority in place and does not restore the current device.
    pub fn set_priority(&self, device: &DeviceDescriptor) -> Result<Selection> {
        if *device == self.inner.lock().priority {
            tracing::debug!(device = %device, "priority unchanged");
            return Ok(Selection::Unchanged);
        }

        let Some(_guard) = TransitionGuard::acquire(&self.transitioning) else {
            tracing::debug!(device = %device, "transition in progress, priority ignored");
            return Ok(Selection::Busy);
        };

        if device.is_valid() {
            if let Err(e) = self.transition(device) {
                self.hub.report(&e);
                return Err(e);
            }
            let was_active = {
                let mut inner = self.inner.lock();
                let was_active = inner.priority.is_valid();
                inner.priority = device.clone();
                was_active
            };
            if !was_active {
                self.hub.publish_priority(true);
            }
            self.notify_activation(device);
            return Ok(Selection::Activated);
        }

        let current = {
            let mut inner = self.inner.lock();
            inner.priority = DeviceDescriptor::none();
            inner.current.clone()
        };
        self.hub.publish_priority(false);
        tracing::info!(device = %current, "priority cleared, restoring");

        if let Err(e) = self.transition(&current) {
            let error = SoundDeviceError::RestoreFailed {
                device: current.name().to_string(),
                reason: e.reason(),
            };
            tracing::error!("{}", error);
            self.hub.report(&error);
            return Err(error);
        }
        self.notify_activation(&current);
        Ok(Selection::Activated)
    }

    pub fn clear_priority(&self) -> Result<Selection> {
        self.set_priority(&DeviceDescriptor::none())
    }

    /// Stop everything, start `device`, record its format
    fn transition(&self, device: &DeviceDescriptor) -> Result<()> {
        let format = {
            let mut bank = self.bank.lock();
            bank.stop_all();
            bank.start(device, &self.hub, self.config.default_format)
        };

        match format {
            Ok(format) => {
                self.inner.lock().active_format = format;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(device = %device, "activation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Runs the hook outside of every lock, so it may query the manager
    fn notify_activation(&self, device: &DeviceDescriptor) {
        let (hook, generation) = {
            let mut slot = self.hook.lock();
            (slot.take(), self.hook_generation.load(Ordering::Acquire))
        };
        let Some(mut hook) = hook else {
            return;
        };

        hook(device);

        // put it back unless the hook was replaced or cleared meanwhile
        let mut slot = self.hook.lock();
        if slot.is_none() && self.hook_generation.load(Ordering::Acquire) == generation {
            *slot = Some(hook);
        }
    }

    // === STATE ===

    pub fn current(&self) -> DeviceDescriptor {
        self.inner.lock().current.clone()
    }

    pub fn priority(&self) -> DeviceDescriptor {
        self.inner.lock().priority.clone()
    }

    pub fn is_priority_active(&self) -> bool {
        self.inner.lock().priority.is_valid()
    }

    /// Format of the last activated source
    pub fn active_format(&self) -> AudioFormat {
        self.inner.lock().active_format
    }

    /// Kind of the running source, if any
    ///
    /// A source that ended on its own (decoder at end of stream) is not running.
    pub fn active_kind(&self) -> Option<DeviceKind> {
        self.bank.lock().running()
    }

    pub fn state(&self) -> ManagerState {
        if self.transitioning.load(Ordering::Acquire) {
            return ManagerState::Transitioning;
        }
        match self.active_kind() {
            Some(kind) => ManagerState::Active(kind),
            None => ManagerState::Idle,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // === HOOK & SUBSCRIPTIONS ===

    /// Replaces the activation hook (single slot)
    pub fn register_activation_hook(&self, hook: impl FnMut(&DeviceDescriptor) + Send + 'static) {
        let mut slot = self.hook.lock();
        *slot = Some(Box::new(hook));
        self.hook_generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn clear_activation_hook(&self) {
        let mut slot = self.hook.lock();
        *slot = None;
        self.hook_generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn subscribe_buffers(&self) -> Receiver<PcmBuffer> {
        self.hub.subscribe_buffers()
    }

    pub fn subscribe_errors(&self) -> Receiver<ErrorEvent> {
        self.hub.subscribe_errors()
    }

    pub fn subscribe_priority(&self) -> Receiver<bool> {
        self.hub.subscribe_priority()
    }

    /// Stops every source. Idempotent.
    pub fn shutdown(&self) {
        self.bank.lock().stop_all();
    }
}

impl Drop for SoundDeviceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LiveCounter, Probe, ScriptedSource};
    use std::sync::Weak;

    struct Rig {
        counter: Arc<LiveCounter>,
        input: Arc<Probe>,
        loopback: Arc<Probe>,
        midi: Arc<Probe>,
        stub: Arc<Probe>,
        decoder: Arc<Probe>,
        sources: Vec<Box<dyn SoundSource>>,
    }

    /// Mic1/Mic2, Speakers loopback, a MIDI port, the stub and a decoder
    fn rig(inputs: &[&str]) -> Rig {
        let counter = Arc::new(LiveCounter::default());
        let input = ScriptedSource::new(DeviceKind::InputCapture)
            .with_devices(inputs.iter().map(|n| DeviceDescriptor::input_capture(*n)).collect())
            .with_format(48000, 1)
            .with_counter(&counter);
        let loopback = ScriptedSource::new(DeviceKind::Loopback)
            .with_devices(vec![DeviceDescriptor::loopback("Speakers")])
            .with_format(48000, 2)
            .with_counter(&counter);
        let midi = ScriptedSource::new(DeviceKind::Midi)
            .with_devices(vec![DeviceDescriptor::midi(0, "Keys")])
            .with_counter(&counter);
        let stub = ScriptedSource::new(DeviceKind::Stub)
            .with_devices(vec![DeviceDescriptor::stub("Stub")])
            .with_counter(&counter);
        let decoder = ScriptedSource::new(DeviceKind::Decoder)
            .with_format(22050, 2)
            .with_counter(&counter);

        Rig {
            input: input.probe(),
            loopback: loopback.probe(),
            midi: midi.probe(),
            stub: stub.probe(),
            decoder: decoder.probe(),
            counter,
            sources: vec![
                Box::new(input),
                Box::new(loopback),
                Box::new(midi),
                Box::new(stub),
                Box::new(decoder),
            ],
        }
    }

    fn setup(inputs: &[&str]) -> (SoundDeviceManager, Rig) {
        let mut rig = rig(inputs);
        let sources = std::mem::take(&mut rig.sources);
        (SoundDeviceManager::with_sources(ManagerConfig::default(), sources), rig)
    }

    fn mic(name: &str) -> DeviceDescriptor {
        DeviceDescriptor::input_capture(name)
    }

    #[test]
    fn test_startup_selects_last_input() {
        let (manager, rig) = setup(&["Mic1"]);
        assert_eq!(manager.current(), mic("Mic1"));
        assert_eq!(manager.state(), ManagerState::Active(DeviceKind::InputCapture));
        assert_eq!(manager.active_format().sample_rate, 48000);
        assert!(rig.input.is_active());

        let (manager, _rig) = setup(&["Mic1", "Mic2"]);
        assert_eq!(manager.current(), mic("Mic2"));
    }

    #[test]
    fn test_startup_falls_back_to_stub() {
        let (manager, rig) = setup(&[]);
        assert_eq!(manager.current(), DeviceDescriptor::stub("Stub"));
        assert!(rig.stub.is_active());
        assert_eq!(manager.active_format(), AudioFormat::default());
    }

    #[test]
    fn test_startup_failure_is_reported_then_falls_back() {
        let mut rig = rig(&["Mic1"]);
        rig.input.fail_start(true);
        let sources = std::mem::take(&mut rig.sources);
        let manager = SoundDeviceManager::with_sources(ManagerConfig::default(), sources);

        assert_eq!(manager.current(), DeviceDescriptor::stub("Stub"));
        assert!(!rig.input.is_active());
        assert!(rig.stub.is_active());
    }

    #[test]
    fn test_startup_fallback_none_stays_idle() {
        let mut config = ManagerConfig::default();
        config.startup_fallback = DeviceKind::None;
        let mut rig = rig(&[]);
        let manager = SoundDeviceManager::with_sources(config, std::mem::take(&mut rig.sources));

        assert_eq!(manager.current(), DeviceDescriptor::none());
        assert_eq!(manager.state(), ManagerState::Idle);
        assert_eq!(rig.counter.live(), 0);
    }

    #[test]
    fn test_enumeration_order() {
        let (manager, _rig) = setup(&["Mic1", "Mic2"]);
        let names: Vec<_> = manager
            .list_devices(DeviceKind::None)
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["Mic1", "Mic2", "Speakers", "Keys", "Stub"]);
        assert_eq!(manager.list_devices(DeviceKind::Midi), vec![DeviceDescriptor::midi(0, "Keys")]);
    }

    #[test]
    fn test_single_active_source() {
        let (manager, rig) = setup(&["Mic1"]);

        manager.select(&DeviceDescriptor::loopback("Speakers")).unwrap();
        manager.select(&DeviceDescriptor::midi(0, "Keys")).unwrap();
        manager.select(&DeviceDescriptor::stub("Stub")).unwrap();
        manager.select(&DeviceDescriptor::decoder("song.flac", 1500)).unwrap();
        manager.select(&mic("Mic1")).unwrap();

        assert!(!rig.counter.overlapped());
        assert_eq!(rig.counter.live(), 1);
        assert!(rig.input.is_active());
        assert_eq!(rig.loopback.stops(), 1);
        assert_eq!(rig.midi.stops(), 1);
        assert_eq!(rig.decoder.last_started(), Some(DeviceDescriptor::decoder("song.flac", 1500)));
    }

    #[test]
    fn test_select_same_device_is_noop() {
        let (manager, rig) = setup(&["Mic1"]);
        let (starts, stops) = (rig.input.starts(), rig.input.stops());

        assert_eq!(manager.select(&mic("Mic1")).unwrap(), Selection::Unchanged);
        assert_eq!(rig.input.starts(), starts);
        assert_eq!(rig.input.stops(), stops);
    }

    #[test]
    fn test_select_reports_format() {
        let (manager, _rig) = setup(&["Mic1"]);
        assert_eq!(
            manager.select(&DeviceDescriptor::decoder("clip.wav", 0)).unwrap(),
            Selection::Activated
        );
        assert_eq!(manager.active_format().sample_rate, 22050);
        assert_eq!(manager.state(), ManagerState::Active(DeviceKind::Decoder));
    }

    #[test]
    fn test_select_none_stops_everything() {
        let (manager, rig) = setup(&["Mic1"]);
        assert_eq!(manager.select(&DeviceDescriptor::none()).unwrap(), Selection::Activated);

        assert_eq!(manager.current(), DeviceDescriptor::none());
        assert_eq!(manager.state(), ManagerState::Idle);
        assert_eq!(manager.active_format(), AudioFormat::default());
        assert_eq!(rig.counter.live(), 0);
    }

    #[test]
    fn test_failure_keeps_current_and_reports_once() {
        let (manager, rig) = setup(&["Mic1"]);
        let errors = manager.subscribe_errors();
        rig.loopback.fail_start(true);

        let speakers = DeviceDescriptor::loopback("Speakers");
        let err = manager.select(&speakers).unwrap_err();
        assert!(matches!(err, SoundDeviceError::ActivationFailed { .. }));

        assert_eq!(manager.current(), mic("Mic1"));
        assert_eq!(rig.counter.live(), 0);
        assert_eq!(manager.active_kind(), None);

        let event = errors.try_recv().unwrap();
        assert_eq!(event.device.as_deref(), Some("Speakers"));
        assert_eq!(event.message, "Error, can't open: Speakers (scripted failure)");
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_vanished_device_keeps_current() {
        let (manager, rig) = setup(&["Mic1", "Mic2"]);
        let errors = manager.subscribe_errors();
        rig.input.vanish(true);

        let err = manager.select(&mic("Mic1")).unwrap_err();
        assert_eq!(err, SoundDeviceError::DeviceNotFound("Mic1".to_string()));
        assert_eq!(manager.current(), mic("Mic2"));
        assert_eq!(rig.counter.live(), 0);

        let event = errors.try_recv().unwrap();
        assert_eq!(event.device.as_deref(), Some("Mic1"));
        assert_eq!(event.message, "Error, can't open: Mic1 (device not found)");
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_source_ending_on_its_own_is_not_active() {
        let (manager, rig) = setup(&["Mic1"]);
        manager.select(&DeviceDescriptor::decoder("clip.wav", 0)).unwrap();
        assert_eq!(manager.state(), ManagerState::Active(DeviceKind::Decoder));

        // end of stream
        rig.decoder.finish();
        assert_eq!(manager.active_kind(), None);
        assert_eq!(manager.state(), ManagerState::Idle);
        assert_eq!(manager.current(), DeviceDescriptor::decoder("clip.wav", 0));

        manager.select(&mic("Mic1")).unwrap();
        assert_eq!(manager.state(), ManagerState::Active(DeviceKind::InputCapture));
        assert!(!rig.counter.overlapped());
    }

    #[test]
    fn test_zero_frames_config_is_clamped() {
        let mut config = ManagerConfig::default();
        config.buffer_frames = 0;
        config.subscriber_capacity = 0;
        config.default_format.channels = 0;
        let mut rig = rig(&[]);
        let manager = SoundDeviceManager::with_sources(config, std::mem::take(&mut rig.sources));

        assert_eq!(manager.config().buffer_frames, 1);
        assert_eq!(manager.config().default_format.channels, 1);
        // stub fallback still activates and can deliver
        assert_eq!(manager.current(), DeviceDescriptor::stub("Stub"));
        let buffers = manager.subscribe_buffers();
        let sink = rig.stub.sink().unwrap();
        sink.push_samples(&manager.active_format(), &[0.5, 0.5]);
        assert!(buffers.try_recv().is_ok());

        manager.shutdown();
        assert_eq!(rig.counter.live(), 0);
    }

    #[test]
    fn test_missing_source_kind_fails() {
        let counter = Arc::new(LiveCounter::default());
        let stub = ScriptedSource::new(DeviceKind::Stub)
            .with_devices(vec![DeviceDescriptor::stub("Stub")])
            .with_counter(&counter);
        let manager = SoundDeviceManager::with_sources(ManagerConfig::default(), vec![Box::new(stub)]);
        let errors = manager.subscribe_errors();

        let err = manager.select(&DeviceDescriptor::midi(0, "Keys")).unwrap_err();
        assert_eq!(err.device(), Some("Keys"));
        assert_eq!(errors.try_iter().count(), 1);
        assert_eq!(manager.current(), DeviceDescriptor::stub("Stub"));
    }

    #[test]
    fn test_priority_suppresses_selection() {
        let (manager, rig) = setup(&["Mic1", "Mic2"]);
        let keys = DeviceDescriptor::midi(0, "Keys");

        assert_eq!(manager.set_priority(&keys).unwrap(), Selection::Activated);
        assert!(manager.is_priority_active());
        assert_eq!(manager.priority(), keys);

        let starts = rig.input.starts();
        assert_eq!(manager.select(&mic("Mic1")).unwrap(), Selection::Suppressed);
        assert_eq!(rig.input.starts(), starts);
        assert!(rig.midi.is_active());
        assert_eq!(manager.current(), mic("Mic2"));
    }

    #[test]
    fn test_priority_same_device_is_noop() {
        let (manager, rig) = setup(&["Mic1"]);
        let keys = DeviceDescriptor::midi(0, "Keys");
        manager.set_priority(&keys).unwrap();

        assert_eq!(manager.set_priority(&keys).unwrap(), Selection::Unchanged);
        assert_eq!(rig.midi.starts(), 1);
        // nothing to clear twice
        manager.clear_priority().unwrap();
        assert_eq!(manager.clear_priority().unwrap(), Selection::Unchanged);
    }

    #[test]
    fn test_clear_priority_restores_current_and_format() {
        let (manager, rig) = setup(&["Mic1"]);
        let before = manager.active_format();

        manager.set_priority(&DeviceDescriptor::decoder("intro.mp3", 0)).unwrap();
        assert_eq!(manager.active_format().sample_rate, 22050);

        assert_eq!(manager.clear_priority().unwrap(), Selection::Activated);
        assert!(!manager.is_priority_active());
        assert_eq!(manager.priority(), DeviceDescriptor::none());
        assert_eq!(manager.current(), mic("Mic1"));
        assert_eq!(manager.active_format(), before);
        assert!(rig.input.is_active());
        assert!(!rig.decoder.is_active());
        assert_eq!(rig.input.starts(), 2);
    }

    #[test]
    fn test_priority_notifications() {
        let (manager, _rig) = setup(&["Mic1"]);
        let notifications = manager.subscribe_priority();

        manager.set_priority(&DeviceDescriptor::midi(0, "Keys")).unwrap();
        manager.set_priority(&DeviceDescriptor::loopback("Speakers")).unwrap();
        manager.clear_priority().unwrap();

        assert_eq!(notifications.try_iter().collect::<Vec<_>>(), vec![true, false]);
    }

    #[test]
    fn test_failed_priority_keeps_previous_priority() {
        let (manager, rig) = setup(&["Mic1"]);
        let keys = DeviceDescriptor::midi(0, "Keys");
        manager.set_priority(&keys).unwrap();

        rig.loopback.fail_start(true);
        let errors = manager.subscribe_errors();
        assert!(manager.set_priority(&DeviceDescriptor::loopback("Speakers")).is_err());

        assert_eq!(manager.priority(), keys);
        assert!(manager.is_priority_active());
        assert_eq!(errors.try_iter().count(), 1);
        // no rollback: neither the old priority nor the current device runs
        assert_eq!(rig.counter.live(), 0);
        assert!(!rig.input.is_active());
    }

    #[test]
    fn test_restore_failure() {
        let (manager, rig) = setup(&["Mic1"]);
        manager.set_priority(&DeviceDescriptor::stub("Stub")).unwrap();
        rig.input.fail_start(true);
        let errors = manager.subscribe_errors();

        let err = manager.clear_priority().unwrap_err();
        assert_eq!(
            err,
            SoundDeviceError::RestoreFailed {
                device: "Mic1".to_string(),
                reason: "scripted failure".to_string(),
            }
        );
        assert!(!manager.is_priority_active());
        assert_eq!(manager.state(), ManagerState::Idle);
        assert_eq!(rig.counter.live(), 0);

        let event = errors.try_recv().unwrap();
        assert_eq!(event.message, "Error, can't restore: Mic1 (scripted failure)");
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_hook_runs_after_activation() {
        let (manager, _rig) = setup(&["Mic1"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        manager.register_activation_hook(move |device| log.lock().push(device.clone()));

        manager.select(&DeviceDescriptor::stub("Stub")).unwrap();
        manager.set_priority(&DeviceDescriptor::midi(0, "Keys")).unwrap();
        manager.clear_priority().unwrap();
        manager.select(&DeviceDescriptor::stub("Stub")).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                DeviceDescriptor::stub("Stub"),
                DeviceDescriptor::midi(0, "Keys"),
                DeviceDescriptor::stub("Stub"),
            ]
        );
    }

    #[test]
    fn test_hook_slot_holds_one_callback() {
        let (manager, _rig) = setup(&["Mic1"]);
        let first = Arc::new(AtomicU64::new(0));
        let second = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&first);
        manager.register_activation_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second);
        manager.register_activation_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.select(&DeviceDescriptor::stub("Stub")).unwrap();

        manager.clear_activation_hook();
        manager.select(&mic("Mic1")).unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_selection_is_not_retried() {
        let (manager, rig) = setup(&["Mic1"]);
        let manager = Arc::new(manager);
        let handle: Weak<SoundDeviceManager> = Arc::downgrade(&manager);
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&outcomes);

        manager.register_activation_hook(move |_| {
            if let Some(manager) = handle.upgrade() {
                let state = manager.state();
                let outcome = manager.select(&DeviceDescriptor::loopback("Speakers"));
                log.lock().push((state, outcome));
            }
        });

        manager.select(&DeviceDescriptor::stub("Stub")).unwrap();

        assert_eq!(
            *outcomes.lock(),
            vec![(ManagerState::Transitioning, Ok(Selection::Busy))]
        );
        assert_eq!(manager.current(), DeviceDescriptor::stub("Stub"));
        assert_eq!(rig.loopback.starts(), 0);
        assert!(rig.stub.is_active());
        assert_eq!(manager.state(), ManagerState::Active(DeviceKind::Stub));
    }

    #[test]
    fn test_buffers_reach_subscribers() {
        let (manager, rig) = setup(&["Mic1"]);
        let buffers = manager.subscribe_buffers();

        let sink = rig.input.sink().unwrap();
        let format = manager.active_format();
        sink.push_samples(&format, &[0.25, -0.25]);

        let buffer = buffers.try_recv().unwrap();
        assert_eq!(buffer.source, DeviceKind::InputCapture);
        assert_eq!(buffer.to_f32(), vec![0.25, -0.25]);
    }

    #[test]
    fn test_shutdown_stops_and_is_idempotent() {
        let (manager, rig) = setup(&["Mic1"]);
        manager.shutdown();
        manager.shutdown();

        assert_eq!(rig.counter.live(), 0);
        assert_eq!(rig.input.stops(), 1);
        assert_eq!(manager.state(), ManagerState::Idle);
    }

    #[test]
    fn test_drop_stops_sources() {
        let (manager, rig) = setup(&["Mic1"]);
        drop(manager);
        assert!(!rig.input.is_active());
    }

    #[test]
    fn test_manager_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SoundDeviceManager>();
    }
}
