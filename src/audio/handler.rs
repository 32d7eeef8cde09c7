//! Bridge between the player controller and the audio engine thread.
//!
//! The `EngineHandler` owns the engine thread for its whole lifetime. It
//! turns [`PlayerEvent`]s and [`SettingsChange`]s into [`EngineCommand`]s,
//! reduces [`EngineEvent`]s back into controller transitions, and keeps the
//! output backend selection in sync with the configured descriptor.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering::SeqCst},
    },
    thread::JoinHandle,
};

use {
    async_channel::{Receiver, Sender, unbounded},
    parking_lot::{Mutex, RwLock},
    tokio::{runtime::Handle, select, task::JoinHandle as TaskHandle},
    tracing::{debug, error, warn},
};

use crate::{
    audio::{
        decoder::DecoderFactory,
        engine::{EngineCommand, EngineEvent, PlaybackState, StateCause, TrackStatus, spawn_engine},
        output::{AudioOutputBuilder, DEFAULT_DEVICE, OutputDescriptor, OutputDevice},
        registry::OutputRegistry,
    },
    config::{SettingsChange, SettingsManager},
    error::AudioError,
    player::{PlayState, PlayerController, PlayerEvent},
};

/// Notifications published by [`EngineHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    /// A different backend was selected.
    OutputChanged(String),
    /// A different device was selected on the current backend.
    DeviceChanged(String),
    /// The engine reported a new track status.
    TrackStatusChanged(TrackStatus),
    /// The current track is about to end.
    TrackAboutToFinish,
}

/// State reachable from both the handler and its event loop task.
struct Shared {
    controller: Arc<PlayerController>,
    settings: Arc<SettingsManager>,
    commands: Sender<EngineCommand>,
    outputs: RwLock<OutputRegistry>,
    current_output: Mutex<OutputDescriptor>,
    subscribers: Mutex<Vec<Sender<HandlerEvent>>>,
}

impl Shared {
    fn send(&self, command: EngineCommand) {
        if let Err(e) = self.commands.try_send(command) {
            debug!("EngineHandler: Failed to send engine command: {e}");
        }
    }

    fn emit(&self, event: HandlerEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| !sender.is_closed());
        for sender in subscribers.iter() {
            if let Err(e) = sender.try_send(event.clone()) {
                debug!("EngineHandler: Failed to send event: {e}");
            }
        }
    }

    fn output_changed(&self, name: &str) {
        let Some(creator) = self.outputs.read().get(name) else {
            return;
        };

        debug!(output = name, "Switching audio output");
        self.send(EngineCommand::SetAudioOutput(creator));
        self.emit(HandlerEvent::OutputChanged(name.to_string()));
    }

    fn device_changed(&self, device: &str) {
        debug!(device, "Switching output device");
        self.send(EngineCommand::SetOutputDevice(device.to_string()));
        self.emit(HandlerEvent::DeviceChanged(device.to_string()));
    }

    fn change_output(&self, descriptor: &str) {
        let outputs = self.outputs.read();

        if descriptor.is_empty() {
            let mut current = self.current_output.lock();
            if !current.name.is_empty() {
                return;
            }
            let Some(first) = outputs.first() else {
                return;
            };

            *current = OutputDescriptor::new(first, DEFAULT_DEVICE);
            let selected = current.clone();
            drop(current);
            drop(outputs);

            self.output_changed(&selected.name);
            self.device_changed(&selected.device);
            return;
        }

        let Some(requested) = OutputDescriptor::parse(descriptor) else {
            return;
        };

        if outputs.is_empty() {
            warn!("No audio outputs available");
            return;
        }

        if !outputs.contains(&requested.name) {
            warn!(output = %requested.name, "Audio output not available");
            return;
        }
        drop(outputs);

        let mut current = self.current_output.lock();
        if current.name != requested.name {
            *current = requested.clone();
            drop(current);

            self.output_changed(&requested.name);
            self.device_changed(&requested.device);
        } else if current.device != requested.device {
            current.device.clone_from(&requested.device);
            drop(current);

            self.device_changed(&requested.device);
        }
    }

    fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::PositionChanged(position) => {
                self.controller.set_current_position(position);
            }
            // Requested changes echo what the controller already asked for,
            // and it may have moved on since.
            EngineEvent::StateChanged(_, StateCause::Requested) => {}
            EngineEvent::StateChanged(state, StateCause::Engine) => match state {
                PlaybackState::Playing => {}
                PlaybackState::Paused => self.controller.pause(),
                PlaybackState::Stopped | PlaybackState::Error => self.controller.stop(),
            },
            EngineEvent::TrackStatusChanged(status) => {
                match status {
                    TrackStatus::EndOfTrack => self.controller.next(),
                    TrackStatus::NoTrack => self.controller.stop(),
                    _ => {}
                }
                self.emit(HandlerEvent::TrackStatusChanged(status));
            }
            EngineEvent::TrackAboutToFinish => self.emit(HandlerEvent::TrackAboutToFinish),
        }
    }

    fn handle_player_event(&self, event: PlayerEvent) {
        match event {
            PlayerEvent::PlayStateChanged(PlayState::Playing) => self.send(EngineCommand::Play),
            PlayerEvent::PlayStateChanged(PlayState::Paused) => self.send(EngineCommand::Pause),
            PlayerEvent::PlayStateChanged(PlayState::Stopped) => self.send(EngineCommand::Stop),
            PlayerEvent::PositionMoved(position) => self.send(EngineCommand::Seek(position)),
            PlayerEvent::CurrentTrackChanged(track) => {
                self.send(EngineCommand::ChangeTrack(track));
            }
            PlayerEvent::PositionChanged(_) => {}
        }
    }

    fn handle_settings_change(&self, change: SettingsChange) {
        match change {
            SettingsChange::AudioOutput(descriptor) => self.change_output(&descriptor),
            SettingsChange::OutputVolume(volume) => self.send(EngineCommand::SetVolume(volume)),
            SettingsChange::Engine(config) => self.send(EngineCommand::SetConfig(config)),
        }
    }
}

/// Owner of the engine thread and the output registry.
///
/// Dropping the handler shuts the engine down, joins its thread and ends
/// the event loop task.
pub struct EngineHandler {
    shared: Arc<Shared>,
    engine_thread: Option<JoinHandle<()>>,
    engine_events: Receiver<EngineEvent>,
    player_events: Receiver<PlayerEvent>,
    settings_changes: Receiver<SettingsChange>,
    shutdown_tx: Option<Sender<()>>,
    shutdown_rx: Receiver<()>,
    loop_started: AtomicBool,
}

impl EngineHandler {
    /// Spawns the engine thread and subscribes to `controller` and
    /// `settings`.
    ///
    /// # Arguments
    ///
    /// * `controller` - Controller driven by and driving the engine
    /// * `settings` - Source of the output descriptor, volume and engine tunables
    /// * `decoder_factory` - Factory used by the engine to open tracks
    ///
    /// # Errors
    ///
    /// Returns `AudioError::EngineSpawn` if the engine thread cannot start.
    pub fn new(
        controller: Arc<PlayerController>,
        settings: Arc<SettingsManager>,
        decoder_factory: Arc<dyn DecoderFactory>,
    ) -> Result<Self, AudioError> {
        let engine = spawn_engine(settings.get_settings().engine_config(), decoder_factory)?;
        let player_events = controller.subscribe();
        let settings_changes = settings.subscribe();
        let (shutdown_tx, shutdown_rx) = unbounded();

        Ok(Self {
            shared: Arc::new(Shared {
                controller,
                settings,
                commands: engine.commands,
                outputs: RwLock::new(OutputRegistry::new()),
                current_output: Mutex::new(OutputDescriptor::default()),
                subscribers: Mutex::new(Vec::new()),
            }),
            engine_thread: Some(engine.handle),
            engine_events: engine.events,
            player_events,
            settings_changes,
            shutdown_tx: Some(shutdown_tx),
            shutdown_rx,
            loop_started: AtomicBool::new(false),
        })
    }

    /// Registers an output backend. Duplicate names are ignored.
    pub fn add_output(&self, output: AudioOutputBuilder) {
        self.shared.outputs.write().add(output);
    }

    /// Names of all registered backends.
    #[must_use]
    pub fn get_all_outputs(&self) -> Vec<String> {
        self.shared.outputs.read().names()
    }

    /// Devices offered by backend `name`.
    #[must_use]
    pub fn get_output_devices(&self, name: &str) -> Vec<OutputDevice> {
        self.shared.outputs.read().devices(name)
    }

    /// The currently selected backend and device.
    #[must_use]
    pub fn current_output(&self) -> OutputDescriptor {
        self.shared.current_output.lock().clone()
    }

    /// Registers a listener for handler events.
    pub fn subscribe(&self) -> Receiver<HandlerEvent> {
        let (sender, receiver) = unbounded();
        self.shared.subscribers.lock().push(sender);
        receiver
    }

    /// Applies the configured output and volume.
    ///
    /// Call after all backends have been added.
    pub fn setup(&self) {
        let (descriptor, volume) = {
            let settings = self.shared.settings.get_settings();
            (settings.audio_output.clone(), settings.output_volume)
        };

        self.shared.change_output(&descriptor);
        self.shared.send(EngineCommand::SetVolume(volume));
    }

    /// Selects the output described by `descriptor` (`name|device`).
    ///
    /// An empty descriptor selects the first backend unless one is already
    /// selected. Unknown backends and malformed descriptors are ignored.
    pub fn change_output(&self, descriptor: &str) {
        self.shared.change_output(descriptor);
    }

    /// Applies one engine event to the controller and subscribers.
    pub fn handle_engine_event(&self, event: EngineEvent) {
        self.shared.handle_engine_event(event);
    }

    /// Forwards one controller event to the engine.
    pub fn handle_player_event(&self, event: PlayerEvent) {
        self.shared.handle_player_event(event);
    }

    /// Starts the task that routes events between the controller, the
    /// settings and the engine.
    ///
    /// Returns `None` if the loop is already running or no tokio runtime is
    /// available.
    pub fn start_event_loop(&self) -> Option<TaskHandle<()>> {
        let Ok(runtime) = Handle::try_current() else {
            error!("EngineHandler: No tokio runtime to run the event loop on");
            return None;
        };

        if self.loop_started.swap(true, SeqCst) {
            debug!("EngineHandler: Event loop already running");
            return None;
        }

        let shared = self.shared.clone();
        let engine_events = self.engine_events.clone();
        let player_events = self.player_events.clone();
        let settings_changes = self.settings_changes.clone();
        let shutdown_rx = self.shutdown_rx.clone();

        Some(runtime.spawn(async move {
            loop {
                select! {
                    event = engine_events.recv() => match event {
                        Ok(event) => shared.handle_engine_event(event),
                        Err(_) => {
                            debug!("Engine event channel closed, exiting event loop");
                            break;
                        }
                    },
                    event = player_events.recv() => match event {
                        Ok(event) => shared.handle_player_event(event),
                        Err(_) => break,
                    },
                    change = settings_changes.recv() => match change {
                        Ok(change) => shared.handle_settings_change(change),
                        Err(_) => break,
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("EngineHandler event loop received shutdown signal");
                        break;
                    }
                }
            }
        }))
    }
}

impl Drop for EngineHandler {
    fn drop(&mut self) {
        debug!("Shutting down engine handler");

        self.shared.send(EngineCommand::Shutdown);
        if let Some(handle) = self.engine_thread.take()
            && handle.join().is_err()
        {
            error!("Audio engine thread panicked");
        }

        drop(self.shutdown_tx.take());
    }
}
