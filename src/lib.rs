//! Sonance - audio engine control for a desktop music player.
//!
//! Coordinates a transport controller with a decoding and output pipeline
//! running on a dedicated engine thread. State changes cross the thread
//! boundary only as messages, so the controller never blocks on audio work.

pub mod audio;
pub mod config;
pub mod error;
pub mod player;

// Re-export key types for convenience
pub use {
    audio::{
        cpal_output::cpal_outputs,
        decoder::SymphoniaDecoderFactory,
        engine::{EngineConfig, EngineEvent, PlaybackState, StateCause, TrackStatus},
        handler::{EngineHandler, HandlerEvent},
        output::{AudioOutput, AudioOutputBuilder, OutputDescriptor},
    },
    config::{SettingsManager, UserSettings},
    error::AudioError as Error,
    player::{PlayState, PlayerController, PlayerEvent, Track},
};
