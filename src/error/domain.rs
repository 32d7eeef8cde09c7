//! Domain-specific error types using `thiserror`.
//!
//! Module-level errors (`DecoderError`, `OutputError`, `SettingsError`) live
//! next to the code that raises them; this module aggregates the audio ones.

use std::io::Error as IoError;

use thiserror::Error;

use crate::audio::{decoder::DecoderError, output::OutputError};

/// Audio-related errors.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Decoder error from the audio decoder module.
    #[error("Decoder error: {0}")]
    DecoderError(#[from] DecoderError),
    /// Output error from the audio output module.
    #[error("Output error: {0}")]
    OutputError(#[from] OutputError),
    /// The engine thread could not be started.
    #[error("Failed to spawn audio engine thread: {0}")]
    EngineSpawn(IoError),
}
