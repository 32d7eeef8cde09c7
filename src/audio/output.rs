//! Audio output driver abstraction.
//!
//! Backends implement [`AudioOutput`] and are registered with the engine
//! handler through an [`AudioOutputBuilder`], which pairs a backend name with
//! a factory closure. Instances are created on the engine thread, so an
//! output does not need to be `Send`.

use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    sync::Arc,
};

use {cpal::SampleFormat, thiserror::Error};

use crate::audio::buffer::{AudioBuffer, AudioFormat};

/// Error type for audio output operations.
#[derive(Error, Debug)]
pub enum OutputError {
    /// Failed to build the output stream.
    #[error("Audio output error: {0}")]
    CpalError(#[from] cpal::BuildStreamError),
    /// Failed to start audio stream.
    #[error("Failed to start audio stream: {0}")]
    StreamStartError(#[from] cpal::PlayStreamError),
    /// No suitable audio device found.
    #[error("No suitable audio device found")]
    NoDeviceFound,
    /// Unsupported sample format.
    #[error("Unsupported sample format: {format:?}")]
    UnsupportedSampleFormat { format: SampleFormat },
    /// No output backend has been selected.
    #[error("No audio output selected")]
    NoOutput,
    /// The stream format cannot be used.
    #[error("Invalid audio format: {0:?}")]
    InvalidFormat(AudioFormat),
}

/// Snapshot of an output's buffer state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputState {
    /// Frames that can be written without blocking.
    pub free_frames: usize,
    /// Frames written but not yet played.
    pub queued_frames: usize,
    /// The device went away and the output must be re-initialised.
    pub disconnected: bool,
}

/// A physical or virtual sink offered by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDevice {
    /// Identifier passed back to [`AudioOutput::set_device`].
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

/// Device name that selects a backend's default device.
pub const DEFAULT_DEVICE: &str = "default";

/// A backend plus device selection, stored in settings as `name|device`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// Registered backend name.
    pub name: String,
    /// Device on that backend; empty means the default device.
    pub device: String,
}

impl OutputDescriptor {
    /// Creates a descriptor.
    pub fn new(name: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: device.into(),
        }
    }

    /// Parses `name|device`.
    ///
    /// Returns `None` when the separator is missing. Anything after a second
    /// separator is ignored.
    #[must_use]
    pub fn parse(descriptor: &str) -> Option<Self> {
        let mut parts = descriptor.split('|');
        let name = parts.next()?;
        let device = parts.next()?;
        Some(Self::new(name, device))
    }
}

impl Display for OutputDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}|{}", self.name, self.device)
    }
}

/// An audio output driver.
pub trait AudioOutput {
    /// Opens the output for `format`.
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if the device cannot be opened for the format.
    fn init(&mut self, format: &AudioFormat) -> Result<(), OutputError>;

    /// Releases the device, returning to the state before [`AudioOutput::init`].
    fn uninit(&mut self);

    /// Discards queued audio, keeping the output initialised.
    fn reset(&mut self);

    /// Starts consuming written audio.
    fn start(&mut self);

    /// Whether [`AudioOutput::init`] succeeded and has not been undone.
    fn initialised(&self) -> bool;

    /// Currently selected device.
    fn device(&self) -> String;

    /// Whether volume is applied by the output itself.
    ///
    /// When `false`, the renderer scales samples before writing them.
    fn can_handle_volume(&self) -> bool;

    /// Current buffer state.
    fn current_state(&self) -> OutputState;

    /// Size of the output buffer in frames.
    fn buffer_size(&self) -> usize;

    /// Devices offered by this backend.
    fn get_all_devices(&self) -> Vec<OutputDevice>;

    /// Writes `buffer`, returning the number of frames accepted.
    fn write(&mut self, buffer: &AudioBuffer) -> usize;

    /// Pauses or resumes consumption.
    fn set_paused(&mut self, paused: bool);

    /// Sets the output volume in `[0.0, 1.0]`.
    fn set_volume(&mut self, _volume: f64) {}

    /// Selects the device used by the next [`AudioOutput::init`].
    fn set_device(&mut self, device: &str);
}

/// Factory producing fresh output instances.
pub type OutputCreator = Arc<dyn Fn() -> Box<dyn AudioOutput> + Send + Sync>;

/// A named output backend ready for registration.
#[derive(Clone)]
pub struct AudioOutputBuilder {
    /// Unique backend name.
    pub name: String,
    /// Factory for backend instances.
    pub creator: OutputCreator,
}

impl AudioOutputBuilder {
    /// Pairs `name` with `creator`.
    pub fn new<F>(name: impl Into<String>, creator: F) -> Self
    where
        F: Fn() -> Box<dyn AudioOutput> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            creator: Arc::new(creator),
        }
    }
}

impl Debug for AudioOutputBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AudioOutputBuilder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
