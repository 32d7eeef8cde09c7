//! Transport state and play queue seen by the rest of the application.
//!
//! `PlayerController` holds the commanded [`PlayState`]. It never talks to
//! the engine directly: every change is published as a [`PlayerEvent`] and
//! the engine handler turns those into engine commands.

use {
    async_channel::{Receiver, Sender, unbounded},
    parking_lot::{Mutex, RwLock},
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::player::track::Track;

/// Commanded transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayState {
    /// Playback requested.
    Playing,
    /// Pause requested.
    Paused,
    /// Nothing should play.
    #[default]
    Stopped,
}

/// Changes published by [`PlayerController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The commanded state changed.
    PlayStateChanged(PlayState),
    /// The user asked to seek to a position in milliseconds.
    PositionMoved(u64),
    /// The playback position reported by the engine changed.
    PositionChanged(u64),
    /// A different track became current.
    CurrentTrackChanged(Option<Track>),
}

#[derive(Debug, Default)]
struct ControllerState {
    play_state: PlayState,
    current_track: Option<Track>,
    position_ms: u64,
    queue: Vec<Track>,
    current_index: Option<usize>,
}

/// Transport controller with a simple play queue.
#[derive(Debug, Default)]
pub struct PlayerController {
    state: RwLock<ControllerState>,
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
}

impl PlayerController {
    /// Creates a stopped controller with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for controller events.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Current commanded state.
    #[must_use]
    pub fn play_state(&self) -> PlayState {
        self.state.read().play_state
    }

    /// Current track, if any.
    #[must_use]
    pub fn current_track(&self) -> Option<Track> {
        self.state.read().current_track.clone()
    }

    /// Last known position in milliseconds.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.state.read().position_ms
    }

    /// Tracks in the play queue.
    #[must_use]
    pub fn queue(&self) -> Vec<Track> {
        self.state.read().queue.clone()
    }

    /// Index of the current track within the queue.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.state.read().current_index
    }

    /// Replaces the play queue. The current track is left untouched.
    pub fn set_queue(&self, tracks: Vec<Track>) {
        debug!("PlayerController: Setting new queue with {} tracks", tracks.len());

        let mut state = self.state.write();
        let index = state
            .current_track
            .as_ref()
            .and_then(|current| tracks.iter().position(|track| track == current));
        state.current_index = index;
        state.queue = tracks;
    }

    /// Makes `track` current, resetting the position.
    pub fn change_current_track(&self, track: Option<Track>) {
        let mut state = self.state.write();
        let index = track
            .as_ref()
            .and_then(|track| state.queue.iter().position(|queued| queued == track));
        state.current_index = index;
        self.set_current(&mut state, track);
    }

    /// Requests playback, picking the first queued track if none is current.
    pub fn play(&self) {
        let mut state = self.state.write();

        if state.current_track.is_none() {
            let Some(first) = state.queue.first().cloned() else {
                debug!("PlayerController: Nothing to play");
                return;
            };
            state.current_index = Some(0);
            self.set_current(&mut state, Some(first));
        }

        self.set_play_state(&mut state, PlayState::Playing);
    }

    /// Requests a pause.
    pub fn pause(&self) {
        let mut state = self.state.write();
        self.set_play_state(&mut state, PlayState::Paused);
    }

    /// Requests a stop and rewinds the position.
    pub fn stop(&self) {
        let mut state = self.state.write();
        state.position_ms = 0;
        self.set_play_state(&mut state, PlayState::Stopped);
    }

    /// Toggles between playing and paused.
    pub fn play_pause(&self) {
        if self.play_state() == PlayState::Playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Advances to the next queued track, or stops at the end of the queue.
    pub fn next(&self) {
        let mut state = self.state.write();

        let next = state.current_index.map_or(0, |index| index + 1);
        let Some(track) = state.queue.get(next).cloned() else {
            debug!("PlayerController: At end of queue, stopping");
            state.position_ms = 0;
            self.set_play_state(&mut state, PlayState::Stopped);
            return;
        };

        state.current_index = Some(next);
        self.set_current(&mut state, Some(track));
    }

    /// Goes back one track, or rewinds when already at the start.
    pub fn previous(&self) {
        let mut state = self.state.write();
        let current = state.current_index;

        match current {
            Some(index) if index > 0 => {
                let track = state.queue.get(index - 1).cloned();
                state.current_index = Some(index - 1);
                self.set_current(&mut state, track);
            }
            _ => {
                drop(state);
                self.seek(0);
            }
        }
    }

    /// Requests a seek to `position_ms`.
    pub fn seek(&self, position_ms: u64) {
        let mut state = self.state.write();
        if state.current_track.is_none() {
            return;
        }
        state.position_ms = position_ms;
        self.emit(PlayerEvent::PositionMoved(position_ms));
    }

    /// Records the position reported by the engine.
    pub fn set_current_position(&self, position_ms: u64) {
        let mut state = self.state.write();
        if state.position_ms != position_ms {
            state.position_ms = position_ms;
            self.emit(PlayerEvent::PositionChanged(position_ms));
        }
    }

    fn set_current(&self, state: &mut ControllerState, track: Option<Track>) {
        state.current_track.clone_from(&track);
        state.position_ms = 0;
        self.emit(PlayerEvent::CurrentTrackChanged(track));
    }

    fn set_play_state(&self, state: &mut ControllerState, play_state: PlayState) {
        if state.play_state == play_state {
            return;
        }
        state.play_state = play_state;
        self.emit(PlayerEvent::PlayStateChanged(play_state));
    }

    fn emit(&self, event: PlayerEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| !sender.is_closed());
        for sender in subscribers.iter() {
            if let Err(e) = sender.try_send(event.clone()) {
                debug!("PlayerController: Failed to send event: {e}");
            }
        }
    }
}
