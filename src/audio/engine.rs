//! Audio playback engine.
//!
//! The engine owns the decoder, renderer and output of the current track and
//! is the single authority for [`PlaybackState`] and [`TrackStatus`]. It lives
//! on a dedicated thread started by [`spawn_engine`]; other threads talk to
//! it exclusively through [`EngineCommand`]s and observe it through
//! [`EngineEvent`]s, both carried over FIFO channels.

use std::{
    mem::replace,
    sync::Arc,
    thread::{Builder as ThreadBuilder, JoinHandle},
};

use {
    async_channel::{Receiver, Sender, unbounded},
    serde::{Deserialize, Serialize},
    tokio::{
        runtime::Builder,
        select,
        time::{Duration, MissedTickBehavior::Skip, interval},
    },
    tracing::{debug, error, warn},
};

use crate::{
    audio::{
        buffer::AudioFormat,
        decoder::{AudioDecoder, DecoderFactory},
        output::{OutputCreator, OutputError},
        renderer::{AudioRenderer, RenderStatus},
    },
    error::{AudioError, ErrorReporter},
    player::Track,
};

/// How often the engine decodes ahead and feeds the output.
const BUFFER_INTERVAL: Duration = Duration::from_millis(5);

/// How often position updates are published while playing.
const POSITION_INTERVAL: Duration = Duration::from_millis(50);

/// Transport state as observed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Nothing is being output.
    Stopped,
    /// Audio is being output.
    Playing,
    /// Output is suspended and can be resumed.
    Paused,
    /// Decoding or output failed.
    Error,
}

/// Lifecycle of the currently loaded track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    /// No track is loaded.
    NoTrack,
    /// The decoder is being opened.
    LoadingTrack,
    /// The decoder is open and the output is ready.
    LoadedTrack,
    /// Audio is being decoded ahead of the output.
    BufferedTrack,
    /// All audio has been played.
    EndOfTrack,
    /// The track could not be opened or decoded.
    InvalidTrack,
}

/// Origin of a [`PlaybackState`] change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCause {
    /// A `Play`, `Pause` or `Stop` command asked for it.
    Requested,
    /// The engine moved on its own after a lost device, a failure or a
    /// refused track.
    Engine,
}

/// Tunables for the buffering loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Milliseconds of audio decoded ahead of the output.
    pub buffer_length_ms: u64,
    /// Keep the output open across tracks with the same format.
    pub gapless_playback: bool,
    /// Lead time before the end of a track at which
    /// [`EngineEvent::TrackAboutToFinish`] fires.
    pub track_about_to_finish_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_length_ms: 4000,
            gapless_playback: true,
            track_about_to_finish_ms: 5000,
        }
    }
}

/// Commands executed on the engine thread, in the order they were sent.
pub enum EngineCommand {
    /// Load a new track, or unload with `None`.
    ChangeTrack(Option<Track>),
    /// Start or resume playback.
    Play,
    /// Pause playback.
    Pause,
    /// Stop playback and release the output.
    Stop,
    /// Seek to a position in milliseconds.
    Seek(u64),
    /// Set the volume in `[0.0, 1.0]`.
    SetVolume(f64),
    /// Swap the output backend.
    SetAudioOutput(OutputCreator),
    /// Select a device on the current backend.
    SetOutputDevice(String),
    /// Update the buffering configuration.
    SetConfig(EngineConfig),
    /// Exit the engine loop.
    Shutdown,
}

/// Notifications published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Playback position in milliseconds.
    PositionChanged(u64),
    /// Transport state changed.
    StateChanged(PlaybackState, StateCause),
    /// Track lifecycle changed.
    TrackStatusChanged(TrackStatus),
    /// The current track is about to end; the next one can be prepared.
    TrackAboutToFinish,
}

/// Running engine thread and its channels.
pub struct EngineThread {
    /// Command ingress.
    pub commands: Sender<EngineCommand>,
    /// Event egress.
    pub events: Receiver<EngineEvent>,
    /// Join handle for the engine thread.
    pub handle: JoinHandle<()>,
}

/// Starts the engine on its own thread.
///
/// # Errors
///
/// Returns `AudioError::EngineSpawn` if the thread cannot be created.
pub fn spawn_engine(
    config: EngineConfig,
    decoder_factory: Arc<dyn DecoderFactory>,
) -> Result<EngineThread, AudioError> {
    let (command_tx, command_rx) = unbounded();
    let (event_tx, event_rx) = unbounded();

    let handle = ThreadBuilder::new()
        .name(String::from("audio-engine"))
        .spawn(move || run_engine(config, decoder_factory, &command_rx, event_tx))
        .map_err(AudioError::EngineSpawn)?;

    Ok(EngineThread {
        commands: command_tx,
        events: event_rx,
        handle,
    })
}

/// Engine thread body.
fn run_engine(
    config: EngineConfig,
    decoder_factory: Arc<dyn DecoderFactory>,
    commands: &Receiver<EngineCommand>,
    events: Sender<EngineEvent>,
) {
    let runtime = match Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build audio engine runtime: {e}");
            return;
        }
    };

    runtime.block_on(async {
        let mut engine = AudioPlaybackEngine::new(config, decoder_factory, events);

        let mut buffer_ticker = interval(BUFFER_INTERVAL);
        buffer_ticker.set_missed_tick_behavior(Skip);
        let mut position_ticker = interval(POSITION_INTERVAL);
        position_ticker.set_missed_tick_behavior(Skip);

        loop {
            select! {
                biased;

                command = commands.recv() => match command {
                    Ok(EngineCommand::Shutdown) => {
                        debug!("Audio engine received shutdown command");
                        break;
                    }
                    Ok(command) => engine.handle_command(command),
                    Err(_) => {
                        debug!("Engine command channel closed, exiting engine loop");
                        break;
                    }
                },
                _ = buffer_ticker.tick(), if engine.is_playing() => engine.on_buffer_tick(),
                _ = position_ticker.tick(), if engine.is_playing() => engine.update_position(),
            }
        }
    });

    debug!("Audio engine thread finished");
}

/// Decode and output state machine.
///
/// Every method must be called from the thread that owns the engine.
pub struct AudioPlaybackEngine {
    config: EngineConfig,
    decoder_factory: Arc<dyn DecoderFactory>,
    events: Sender<EngineEvent>,
    state: PlaybackState,
    status: TrackStatus,
    decoder: Option<Box<dyn AudioDecoder>>,
    renderer: AudioRenderer,
    format: Option<AudioFormat>,
    duration_ms: u64,
    volume: f64,
    last_position: u64,
    /// The decoder hit end of stream for the current pass.
    decoding_finished: bool,
    /// `TrackAboutToFinish` was sent for the current pass.
    about_to_finish_sent: bool,
}

impl AudioPlaybackEngine {
    /// Creates an idle engine publishing to `events`.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        decoder_factory: Arc<dyn DecoderFactory>,
        events: Sender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            decoder_factory,
            events,
            state: PlaybackState::Stopped,
            status: TrackStatus::NoTrack,
            decoder: None,
            renderer: AudioRenderer::new(1.0),
            format: None,
            duration_ms: 0,
            volume: 1.0,
            last_position: 0,
            decoding_finished: false,
            about_to_finish_sent: false,
        }
    }

    /// Current transport state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Current track status.
    #[must_use]
    pub fn track_status(&self) -> TrackStatus {
        self.status
    }

    /// Last published position in milliseconds.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.last_position
    }

    /// Whether the buffering loop should run.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Dispatches a command. `Shutdown` is handled by the engine loop.
    pub fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::ChangeTrack(track) => self.change_track(track),
            EngineCommand::Play => self.play(),
            EngineCommand::Pause => self.pause(),
            EngineCommand::Stop => self.stop(),
            EngineCommand::Seek(position) => self.seek(position),
            EngineCommand::SetVolume(volume) => self.set_volume(volume),
            EngineCommand::SetAudioOutput(creator) => self.set_audio_output(&creator),
            EngineCommand::SetOutputDevice(device) => self.set_output_device(&device),
            EngineCommand::SetConfig(config) => self.set_config(config),
            EngineCommand::Shutdown => {}
        }
    }

    /// Loads `track`, replacing whatever was loaded before.
    pub fn change_track(&mut self, track: Option<Track>) {
        self.stop_workers(false);
        self.decoder = None;
        self.duration_ms = 0;

        self.last_position = 0;
        self.emit(EngineEvent::PositionChanged(0));

        let Some(track) = track else {
            self.change_track_status(TrackStatus::NoTrack);
            return;
        };

        if !track.is_valid() {
            debug!(path = ?track.filepath(), "Rejecting invalid track");
            self.reject_track();
            return;
        }

        self.change_track_status(TrackStatus::LoadingTrack);

        let decoder = match self.decoder_factory.create(&track) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!(path = ?track.filepath(), "Failed to open track: {e}");
                self.reject_track();
                return;
            }
        };

        let format = decoder.format();
        self.duration_ms = decoder.duration_ms().unwrap_or(track.duration_ms);
        self.decoder = Some(decoder);

        if let Err(e) = self.update_format(format) {
            warn!("Failed to initialise output for {format:?}: {e}");
            self.change_track_status(TrackStatus::NoTrack);
            return;
        }

        self.change_track_status(TrackStatus::LoadedTrack);

        if self.state == PlaybackState::Playing {
            self.renderer.start();
            self.change_track_status(TrackStatus::BufferedTrack);
        }
    }

    /// Starts or resumes playback of the loaded track.
    ///
    /// Playing an invalid track is refused with [`PlaybackState::Error`].
    pub fn play(&mut self) {
        match self.status {
            TrackStatus::NoTrack => {
                debug!("Ignoring play: no track loaded");
                return;
            }
            TrackStatus::InvalidTrack => {
                debug!("Refusing play: track is invalid");
                self.change_state(PlaybackState::Error, StateCause::Engine);
                return;
            }
            _ => {}
        }

        if self.status == TrackStatus::EndOfTrack && self.state == PlaybackState::Stopped {
            self.seek(0);
        }

        if self.set_state(PlaybackState::Playing, StateCause::Requested) {
            self.change_track_status(TrackStatus::BufferedTrack);
        }
    }

    /// Pauses playback of the loaded track.
    pub fn pause(&mut self) {
        self.suspend(StateCause::Requested);
    }

    /// Stops playback, releases the output and rewinds the track.
    pub fn stop(&mut self) {
        self.set_state(PlaybackState::Stopped, StateCause::Requested);

        if let Some(decoder) = self.decoder.as_mut()
            && decoder.is_seekable()
            && let Err(e) = decoder.seek(0)
        {
            warn!("Failed to rewind decoder: {e}");
        }

        self.last_position = 0;
        self.emit(EngineEvent::PositionChanged(0));
    }

    /// Moves playback to `position` milliseconds.
    ///
    /// Anything decoded for the old position is discarded, including a
    /// pending end of stream, so an about-to-finish notification sent before
    /// the seek cannot turn into an end of track.
    pub fn seek(&mut self, position: u64) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };

        if !decoder.is_seekable() {
            debug!("Ignoring seek: stream is not seekable");
            return;
        }

        let result = decoder.seek(position);
        self.renderer.reset();
        self.decoding_finished = false;
        self.about_to_finish_sent = false;

        if let Err(e) = result {
            self.fail(e.into());
            return;
        }

        if self.state == PlaybackState::Playing {
            self.change_track_status(TrackStatus::BufferedTrack);
        }

        self.last_position = position;
        self.emit(EngineEvent::PositionChanged(position));
    }

    /// Sets the volume, clamped to `[0.0, 1.0]`.
    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
        self.renderer.update_volume(self.volume);
    }

    /// Swaps the output backend, resuming playback on the new one.
    pub fn set_audio_output(&mut self, creator: &OutputCreator) {
        let active = self.is_active();
        if active {
            self.renderer.pause(true);
        }

        self.renderer.update_output(creator);

        if active {
            self.reinit_output();
        }
    }

    /// Points the current backend at `device`.
    pub fn set_output_device(&mut self, device: &str) {
        if device.is_empty() {
            return;
        }

        let active = self.is_active();
        if active {
            self.renderer.pause(true);
        }

        self.renderer.update_device(device);

        if active {
            self.reinit_output();
        }
    }

    /// Replaces the buffering configuration.
    pub fn set_config(&mut self, config: EngineConfig) {
        debug!(?config, "Engine configuration updated");
        self.config = config;
    }

    /// Decodes ahead, feeds the output and detects the end of the track.
    pub fn on_buffer_tick(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }

        if self.renderer.poll_disconnected() {
            self.suspend(StateCause::Engine);
            return;
        }

        self.read_next_buffer();
        if self.state != PlaybackState::Playing {
            return;
        }

        if self.renderer.write_next() == RenderStatus::Finished {
            self.on_renderer_finished();
            return;
        }

        self.check_about_to_finish();
    }

    /// Publishes the playback position if it moved.
    pub fn update_position(&mut self) {
        if self.state != PlaybackState::Playing || self.status == TrackStatus::EndOfTrack {
            return;
        }

        let Some(position) = self.renderer.position_ms() else {
            return;
        };

        if replace(&mut self.last_position, position) != position {
            self.emit(EngineEvent::PositionChanged(position));
        }
    }

    fn is_active(&self) -> bool {
        matches!(self.state, PlaybackState::Playing | PlaybackState::Paused)
    }

    fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("AudioEngine: Failed to send event: {e}");
        }
    }

    fn change_state(&mut self, state: PlaybackState, cause: StateCause) -> PlaybackState {
        let previous = replace(&mut self.state, state);
        if previous != state {
            self.emit(EngineEvent::StateChanged(state, cause));
        }
        previous
    }

    fn change_track_status(&mut self, status: TrackStatus) -> TrackStatus {
        let previous = replace(&mut self.status, status);
        if previous != status {
            self.emit(EngineEvent::TrackStatusChanged(status));
        }
        previous
    }

    /// Applies a state transition. Returns `false` if the transition failed.
    fn set_state(&mut self, state: PlaybackState, cause: StateCause) -> bool {
        match state {
            PlaybackState::Playing => {
                if !self.renderer.is_initialised() {
                    let result = match self.format {
                        Some(format) => self.renderer.init(format),
                        None => Err(OutputError::NoOutput),
                    };
                    if let Err(e) = result {
                        self.fail(e.into());
                        return false;
                    }
                }

                let previous = self.change_state(state, cause);
                self.renderer.start();
                if previous == PlaybackState::Paused {
                    self.renderer.pause(false);
                }
            }
            PlaybackState::Paused => {
                self.change_state(state, cause);
                self.renderer.pause(true);
            }
            PlaybackState::Stopped | PlaybackState::Error => {
                self.change_state(state, cause);
                self.stop_workers(true);
            }
        }
        true
    }

    /// Initialises the output for `format` unless gapless playback lets the
    /// current one carry on.
    fn update_format(&mut self, format: AudioFormat) -> Result<(), OutputError> {
        let previous = self.format.replace(format);

        if self.config.gapless_playback
            && previous == Some(format)
            && self.state != PlaybackState::Paused
            && self.renderer.is_initialised()
        {
            return Ok(());
        }

        if let Err(e) = self.renderer.init(format) {
            self.format = None;
            return Err(e);
        }

        Ok(())
    }

    fn suspend(&mut self, cause: StateCause) {
        if matches!(self.status, TrackStatus::NoTrack | TrackStatus::InvalidTrack) {
            debug!("Ignoring pause: no track loaded");
            return;
        }

        if self.status == TrackStatus::EndOfTrack && self.state == PlaybackState::Stopped {
            self.seek(0);
        }

        self.set_state(PlaybackState::Paused, cause);
        self.change_track_status(TrackStatus::BufferedTrack);
    }

    fn reinit_output(&mut self) {
        let Some(format) = self.format else {
            return;
        };

        if let Err(e) = self.renderer.init(format) {
            warn!("Failed to initialise new output: {e}");
            self.change_track_status(TrackStatus::NoTrack);
            return;
        }

        self.renderer.pause(self.state == PlaybackState::Paused);
    }

    fn read_next_buffer(&mut self) {
        if self.decoding_finished {
            return;
        }

        let queued = self.renderer.queued_duration();
        if queued >= self.config.buffer_length_ms {
            return;
        }

        let (Some(decoder), Some(format)) = (self.decoder.as_mut(), self.format) else {
            return;
        };

        let frames = format
            .frames_for_duration(self.config.buffer_length_ms - queued)
            .max(1);

        match decoder.read_buffer(frames) {
            Ok(Some(buffer)) => self.renderer.queue_buffer(buffer),
            Ok(None) => {
                self.decoding_finished = true;
                self.renderer.queue_end();
                self.notify_about_to_finish();
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn check_about_to_finish(&mut self) {
        if self.about_to_finish_sent || self.duration_ms == 0 {
            return;
        }

        let position = self.renderer.position_ms().unwrap_or(self.last_position);
        if position.saturating_add(self.config.track_about_to_finish_ms) >= self.duration_ms {
            self.notify_about_to_finish();
        }
    }

    fn notify_about_to_finish(&mut self) {
        if !replace(&mut self.about_to_finish_sent, true) {
            self.emit(EngineEvent::TrackAboutToFinish);
        }
    }

    fn on_renderer_finished(&mut self) {
        let end = self.renderer.position_ms().unwrap_or(self.duration_ms);
        if replace(&mut self.last_position, end) != end {
            self.emit(EngineEvent::PositionChanged(end));
        }

        self.change_track_status(TrackStatus::EndOfTrack);
    }

    fn reject_track(&mut self) {
        if self.state == PlaybackState::Playing {
            self.change_state(PlaybackState::Error, StateCause::Engine);
        }
        self.change_track_status(TrackStatus::InvalidTrack);
    }

    fn fail(&mut self, error: AudioError) {
        ErrorReporter::error(&error.into(), "Audio engine");
        self.stop_workers(true);
        self.change_track_status(TrackStatus::InvalidTrack);
        self.change_state(PlaybackState::Error, StateCause::Engine);
    }

    fn stop_workers(&mut self, full: bool) {
        self.renderer.stop();
        if full {
            self.renderer.close_output();
        }
        self.decoding_finished = false;
        self.about_to_finish_sent = false;
    }
}

impl Drop for AudioPlaybackEngine {
    fn drop(&mut self) {
        debug!("Destroying audio engine");
        self.stop_workers(false);
    }
}
