//! Feeds decoded buffers into the active output.
//!
//! The renderer is owned by the engine and driven from its thread: the
//! engine queues decoded buffers, and on every tick the renderer writes as
//! many frames as the output has room for. The playback position is derived
//! from the last frame written minus whatever the output still has queued.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::audio::{
    buffer::{AudioBuffer, AudioFormat},
    output::{AudioOutput, OutputCreator, OutputError},
};

/// Outcome of a single [`AudioRenderer::write_next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// Nothing was written.
    Idle,
    /// Frames were handed to the output.
    Written(usize),
    /// The end-of-stream marker was reached and the output has drained.
    Finished,
}

enum QueueItem {
    Buffer(AudioBuffer),
    EndOfStream,
}

/// Writes queued audio to an [`AudioOutput`].
pub struct AudioRenderer {
    output: Option<Box<dyn AudioOutput>>,
    format: Option<AudioFormat>,
    volume: f64,
    queue: VecDeque<QueueItem>,
    /// Frames of the front buffer already written.
    offset: usize,
    prefilled: bool,
    running: bool,
    written_position_ms: Option<u64>,
    reached_end: bool,
}

impl AudioRenderer {
    /// Creates a renderer with no output.
    #[must_use]
    pub fn new(volume: f64) -> Self {
        Self {
            output: None,
            format: None,
            volume,
            queue: VecDeque::new(),
            offset: 0,
            prefilled: false,
            running: false,
            written_position_ms: None,
            reached_end: false,
        }
    }

    /// Replaces the output with a fresh instance from `creator`.
    ///
    /// The previous output is released first. The cached volume is applied
    /// to the new instance straight away.
    pub fn update_output(&mut self, creator: &OutputCreator) {
        self.close_output();

        let mut output = creator();
        if output.can_handle_volume() {
            output.set_volume(self.volume);
        }

        self.output = Some(output);
        self.prefilled = false;
    }

    /// Re-targets the current output to `device`.
    ///
    /// An initialised output is released; it must be initialised again
    /// before further writes.
    pub fn update_device(&mut self, device: &str) {
        let Some(output) = self.output.as_mut() else {
            return;
        };

        self.prefilled = false;

        if output.initialised() {
            output.uninit();
        }
        output.set_device(device);
    }

    /// Sets the volume, applying it to the output if it handles volume.
    pub fn update_volume(&mut self, volume: f64) {
        self.volume = volume;

        if let Some(output) = self.output.as_mut()
            && output.can_handle_volume()
        {
            output.set_volume(volume);
        }
    }

    /// Whether the output is initialised.
    #[must_use]
    pub fn is_initialised(&self) -> bool {
        self.output.as_ref().is_some_and(|output| output.initialised())
    }

    /// (Re)initialises the output for `format`.
    ///
    /// # Errors
    ///
    /// Returns `OutputError::NoOutput` if no output has been set, or the
    /// output's own error if it cannot be opened.
    pub fn init(&mut self, format: AudioFormat) -> Result<(), OutputError> {
        self.format = Some(format);

        let Some(output) = self.output.as_mut() else {
            return Err(OutputError::NoOutput);
        };

        if output.initialised() {
            output.uninit();
        }

        output.init(&format)?;
        output.set_volume(self.volume);
        self.prefilled = false;

        debug!(
            device = %output.device(),
            buffer_size = output.buffer_size(),
            "Output initialised"
        );
        Ok(())
    }

    /// Starts writing queued audio.
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stops writing and discards queued audio.
    pub fn stop(&mut self) {
        self.running = false;
        self.reset_buffer();
    }

    /// Releases the output device.
    pub fn close_output(&mut self) {
        if let Some(output) = self.output.as_mut()
            && output.initialised()
        {
            output.uninit();
        }
    }

    /// Discards queued audio in both the renderer and the output.
    pub fn reset(&mut self) {
        if let Some(output) = self.output.as_mut()
            && output.initialised()
        {
            output.reset();
        }

        self.reset_buffer();
    }

    /// Pauses or resumes writing.
    pub fn pause(&mut self, paused: bool) {
        if let Some(output) = self.output.as_mut()
            && output.initialised()
        {
            output.set_paused(paused);
        }

        self.running = !paused;
    }

    /// Appends a decoded buffer.
    pub fn queue_buffer(&mut self, buffer: AudioBuffer) {
        if buffer.frame_count() > 0 {
            self.queue.push_back(QueueItem::Buffer(buffer));
        }
    }

    /// Marks the end of the stream.
    pub fn queue_end(&mut self) {
        self.queue.push_back(QueueItem::EndOfStream);
    }

    /// Milliseconds of audio queued but not yet written.
    #[must_use]
    pub fn queued_duration(&self) -> u64 {
        self.queue
            .iter()
            .enumerate()
            .map(|(index, item)| match item {
                QueueItem::Buffer(buffer) if index == 0 => buffer
                    .format()
                    .duration_for_frames(buffer.frame_count().saturating_sub(self.offset)),
                QueueItem::Buffer(buffer) => buffer.duration(),
                QueueItem::EndOfStream => 0,
            })
            .sum()
    }

    /// Current playback position, if anything has been written since the
    /// last reset.
    #[must_use]
    pub fn position_ms(&self) -> Option<u64> {
        let written = self.written_position_ms?;

        let delay = match (self.output.as_ref(), self.format) {
            (Some(output), Some(format)) if output.initialised() => {
                format.duration_for_frames(output.current_state().queued_frames)
            }
            _ => 0,
        };

        Some(written.saturating_sub(delay))
    }

    /// Checks whether the output lost its device.
    ///
    /// A disconnected output is released and `true` is returned.
    pub fn poll_disconnected(&mut self) -> bool {
        let Some(output) = self.output.as_mut() else {
            return false;
        };

        if output.initialised() && output.current_state().disconnected {
            warn!(device = %output.device(), "Audio output disconnected");
            output.uninit();
            self.prefilled = false;
            return true;
        }

        false
    }

    /// Writes as much queued audio as the output accepts.
    pub fn write_next(&mut self) -> RenderStatus {
        if !self.running {
            return RenderStatus::Idle;
        }

        let state = match self.output.as_ref() {
            Some(output) if output.initialised() => output.current_state(),
            _ => return RenderStatus::Idle,
        };

        if matches!(self.queue.front(), Some(QueueItem::EndOfStream)) {
            self.queue.pop_front();
            self.reached_end = true;
        }

        if self.reached_end {
            if state.queued_frames == 0 {
                self.reached_end = false;
                return RenderStatus::Finished;
            }
            return RenderStatus::Idle;
        }

        if self.queue.is_empty() || state.free_frames == 0 {
            return RenderStatus::Idle;
        }

        let Some(mut chunk) = self.collect(state.free_frames) else {
            return RenderStatus::Idle;
        };

        let Some(output) = self.output.as_mut() else {
            return RenderStatus::Idle;
        };

        if !output.can_handle_volume() {
            chunk.adjust_volume(self.volume);
        }

        let written = output.write(&chunk);
        if written > 0 && !self.prefilled {
            self.prefilled = true;
            output.start();
        }

        self.consume(written);

        RenderStatus::Written(written)
    }

    /// Gathers up to `max_frames` frames from the front of the queue without
    /// consuming them.
    fn collect(&self, max_frames: usize) -> Option<AudioBuffer> {
        let mut chunk: Option<AudioBuffer> = None;
        let mut frames = 0;

        for (index, item) in self.queue.iter().enumerate() {
            let QueueItem::Buffer(buffer) = item else {
                break;
            };

            let first = if index == 0 { self.offset } else { 0 };
            let count = (buffer.frame_count() - first).min(max_frames - frames);
            let part = buffer.slice_frames(first, count);
            frames += count;

            match chunk.as_mut() {
                Some(chunk) if chunk.format() == part.format() => chunk.append(&part),
                Some(_) => break,
                None => chunk = Some(part),
            }

            if frames >= max_frames {
                break;
            }
        }

        chunk.filter(|chunk| chunk.frame_count() > 0)
    }

    /// Drops `frames` frames from the front of the queue.
    fn consume(&mut self, mut frames: usize) {
        while frames > 0 {
            let Some(QueueItem::Buffer(buffer)) = self.queue.front() else {
                break;
            };

            let available = buffer.frame_count() - self.offset;
            let taken = available.min(frames);
            self.offset += taken;
            frames -= taken;

            self.written_position_ms =
                Some(buffer.start_time() + buffer.format().duration_for_frames(self.offset));

            if self.offset >= buffer.frame_count() {
                self.queue.pop_front();
                self.offset = 0;
            }
        }

        if matches!(self.queue.front(), Some(QueueItem::EndOfStream)) {
            self.queue.pop_front();
            self.reached_end = true;
        }
    }

    fn reset_buffer(&mut self) {
        self.queue.clear();
        self.offset = 0;
        self.prefilled = false;
        self.written_position_ms = None;
        self.reached_end = false;
    }
}

impl Drop for AudioRenderer {
    fn drop(&mut self) {
        self.close_output();
    }
}
