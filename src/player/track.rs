//! Track value object passed between the controller and the engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A playable item.
///
/// Tracks are cheap value objects: the engine keeps its own clone for as long
/// as the track is current and drops it on the next track change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Track {
    /// Path to the audio file.
    pub path: PathBuf,
    /// Duration in milliseconds, or 0 if unknown until decoding.
    pub duration_ms: u64,
    /// Whether the track refers to something playable.
    pub valid: bool,
}

impl Track {
    /// Creates a valid track with a known duration.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P, duration_ms: u64) -> Self {
        Self {
            path: path.into(),
            duration_ms,
            valid: true,
        }
    }

    /// Creates a track from a path on disk.
    ///
    /// The track is valid if the path exists; the duration is left for the
    /// decoder to report.
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self {
            path: path.to_path_buf(),
            duration_ms: 0,
            valid: path.is_file(),
        }
    }

    /// Returns `true` if the track can be handed to a decoder.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid && !self.path.as_os_str().is_empty()
    }

    /// Path to the audio file.
    #[must_use]
    pub fn filepath(&self) -> &Path {
        &self.path
    }
}
