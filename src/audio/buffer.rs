//! Decoded audio buffers and their format description.
//!
//! Buffers carry interleaved `f32` samples together with the position of
//! their first frame in the track, which lets the renderer derive the
//! playback position from what it has written.

use serde::{Deserialize, Serialize};

/// Milliseconds per second.
pub const MS_PER_SEC: u64 = 1000;

/// Sample layout of a decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioFormat {
    /// Creates a new format description.
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Returns `true` if both the rate and channel count are non-zero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }

    /// Number of frames covering `duration_ms` milliseconds.
    #[must_use]
    pub fn frames_for_duration(&self, duration_ms: u64) -> usize {
        let frames = duration_ms.saturating_mul(u64::from(self.sample_rate)) / MS_PER_SEC;
        usize::try_from(frames).unwrap_or(usize::MAX)
    }

    /// Duration in milliseconds of `frames` frames.
    #[must_use]
    pub fn duration_for_frames(&self, frames: usize) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (frames as u64).saturating_mul(MS_PER_SEC) / u64::from(self.sample_rate)
    }
}

/// A chunk of decoded, interleaved audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    format: AudioFormat,
    start_time_ms: u64,
}

impl AudioBuffer {
    /// Creates a buffer from interleaved samples.
    ///
    /// Trailing samples that do not form a full frame are dropped.
    #[must_use]
    pub fn new(mut samples: Vec<f32>, format: AudioFormat, start_time_ms: u64) -> Self {
        let channels = usize::from(format.channels.max(1));
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);

        Self {
            samples,
            format,
            start_time_ms,
        }
    }

    /// Format of the samples.
    #[must_use]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Track position of the first frame, in milliseconds.
    #[must_use]
    pub fn start_time(&self) -> u64 {
        self.start_time_ms
    }

    /// Interleaved sample data.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of frames held.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.samples.len() / usize::from(self.format.channels.max(1))
    }

    /// Duration in milliseconds.
    #[must_use]
    pub fn duration(&self) -> u64 {
        self.format.duration_for_frames(self.frame_count())
    }

    /// Track position just past the last frame, in milliseconds.
    #[must_use]
    pub fn end_time(&self) -> u64 {
        self.start_time_ms + self.duration()
    }

    /// Returns a new buffer holding frames `[first, first + count)`.
    #[must_use]
    pub fn slice_frames(&self, first: usize, count: usize) -> Self {
        let channels = usize::from(self.format.channels.max(1));
        let start = (first * channels).min(self.samples.len());
        let end = ((first + count) * channels).min(self.samples.len());

        Self {
            samples: self.samples[start..end].to_vec(),
            format: self.format,
            start_time_ms: self.start_time_ms + self.format.duration_for_frames(first),
        }
    }

    /// Appends the frames of `other`, which must share this buffer's format.
    pub fn append(&mut self, other: &Self) {
        debug_assert_eq!(self.format, other.format);
        self.samples.extend_from_slice(&other.samples);
    }

    /// Scales every sample by `volume`.
    pub fn adjust_volume(&mut self, volume: f64) {
        if (volume - 1.0).abs() < f64::EPSILON {
            return;
        }

        #[allow(clippy::cast_possible_truncation)]
        let gain = volume.clamp(0.0, 1.0) as f32;
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }
}
