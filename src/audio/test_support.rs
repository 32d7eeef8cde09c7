//! In-memory decoder and output backends for tests.
//!
//! The fake decoder produces 1 kHz mono audio so one frame equals one
//! millisecond, which keeps position arithmetic in tests readable.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering::SeqCst},
};

use parking_lot::Mutex;

use crate::{
    audio::{
        buffer::{AudioBuffer, AudioFormat},
        decoder::{AudioDecoder, DecoderError, DecoderFactory},
        output::{AudioOutput, AudioOutputBuilder, OutputDevice, OutputError, OutputState},
    },
    player::Track,
};

/// Format produced by [`FakeDecoder`].
pub const FAKE_FORMAT: AudioFormat = AudioFormat {
    sample_rate: 1000,
    channels: 1,
};

#[derive(Debug)]
struct MonitorState {
    created: usize,
    init_calls: usize,
    uninit_calls: usize,
    start_calls: usize,
    reset_calls: usize,
    volumes: Vec<f64>,
    devices: Vec<String>,
    written_frames: usize,
    free_frames: usize,
    queued_frames: usize,
    fail_init: bool,
    disconnected: bool,
    paused: bool,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            created: 0,
            init_calls: 0,
            uninit_calls: 0,
            start_calls: 0,
            reset_calls: 0,
            volumes: Vec::new(),
            devices: Vec::new(),
            written_frames: 0,
            free_frames: 1 << 20,
            queued_frames: 0,
            fail_init: false,
            disconnected: false,
            paused: false,
        }
    }
}

/// Shared view into every [`FakeOutput`] created from one builder.
#[derive(Debug, Clone, Default)]
pub struct FakeOutputMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl FakeOutputMonitor {
    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    pub fn init_calls(&self) -> usize {
        self.state.lock().init_calls
    }

    pub fn uninit_calls(&self) -> usize {
        self.state.lock().uninit_calls
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().start_calls
    }

    pub fn reset_calls(&self) -> usize {
        self.state.lock().reset_calls
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.state.lock().volumes.clone()
    }

    pub fn devices(&self) -> Vec<String> {
        self.state.lock().devices.clone()
    }

    pub fn written_frames(&self) -> usize {
        self.state.lock().written_frames
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn set_free_frames(&self, frames: usize) {
        self.state.lock().free_frames = frames;
    }

    pub fn set_queued_frames(&self, frames: usize) {
        self.state.lock().queued_frames = frames;
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.state.lock().fail_init = fail;
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.state.lock().disconnected = disconnected;
    }
}

/// Output that accepts audio instantly and records every call.
pub struct FakeOutput {
    monitor: FakeOutputMonitor,
    initialised: bool,
    device: String,
}

impl FakeOutput {
    pub fn new(monitor: &FakeOutputMonitor) -> Self {
        monitor.state.lock().created += 1;
        Self {
            monitor: monitor.clone(),
            initialised: false,
            device: String::from("default"),
        }
    }

    pub fn builder(name: &str, monitor: &FakeOutputMonitor) -> AudioOutputBuilder {
        let monitor = monitor.clone();
        AudioOutputBuilder::new(name, move || {
            Box::new(FakeOutput::new(&monitor)) as Box<dyn AudioOutput>
        })
    }
}

impl AudioOutput for FakeOutput {
    fn init(&mut self, format: &AudioFormat) -> Result<(), OutputError> {
        let mut state = self.monitor.state.lock();
        state.init_calls += 1;
        if state.fail_init {
            return Err(OutputError::NoDeviceFound);
        }
        if !format.is_valid() {
            return Err(OutputError::InvalidFormat(*format));
        }
        state.disconnected = false;
        self.initialised = true;
        Ok(())
    }

    fn uninit(&mut self) {
        self.monitor.state.lock().uninit_calls += 1;
        self.initialised = false;
    }

    fn reset(&mut self) {
        self.monitor.state.lock().reset_calls += 1;
    }

    fn start(&mut self) {
        self.monitor.state.lock().start_calls += 1;
    }

    fn initialised(&self) -> bool {
        self.initialised
    }

    fn device(&self) -> String {
        self.device.clone()
    }

    fn can_handle_volume(&self) -> bool {
        true
    }

    fn current_state(&self) -> OutputState {
        let state = self.monitor.state.lock();
        OutputState {
            free_frames: state.free_frames,
            queued_frames: state.queued_frames,
            disconnected: state.disconnected,
        }
    }

    fn buffer_size(&self) -> usize {
        4096
    }

    fn get_all_devices(&self) -> Vec<OutputDevice> {
        vec![
            OutputDevice {
                name: String::from("default"),
                description: String::from("Default device"),
            },
            OutputDevice {
                name: String::from("hw:1"),
                description: String::from("USB DAC"),
            },
        ]
    }

    fn write(&mut self, buffer: &AudioBuffer) -> usize {
        let mut state = self.monitor.state.lock();
        let frames = buffer.frame_count().min(state.free_frames);
        state.written_frames += frames;
        frames
    }

    fn set_paused(&mut self, paused: bool) {
        self.monitor.state.lock().paused = paused;
    }

    fn set_volume(&mut self, volume: f64) {
        self.monitor.state.lock().volumes.push(volume);
    }

    fn set_device(&mut self, device: &str) {
        self.monitor.state.lock().devices.push(device.to_string());
        self.device = device.to_string();
    }
}

/// Decoder producing silence-free constant samples for `duration_ms`.
///
/// Tracks whose path contains `corrupt` fail on their second read.
pub struct FakeDecoder {
    duration_ms: u64,
    cursor_ms: u64,
    reads: usize,
    fail_after_first_read: bool,
}

impl AudioDecoder for FakeDecoder {
    fn format(&self) -> AudioFormat {
        FAKE_FORMAT
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(self.duration_ms)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn read_buffer(&mut self, max_frames: usize) -> Result<Option<AudioBuffer>, DecoderError> {
        self.reads += 1;
        if self.fail_after_first_read && self.reads > 1 {
            return Err(DecoderError::UnsupportedFormat);
        }
        if self.cursor_ms >= self.duration_ms || max_frames == 0 {
            return Ok(None);
        }

        let frames = (self.duration_ms - self.cursor_ms).min(max_frames as u64);
        let start = self.cursor_ms;
        self.cursor_ms += frames;

        Ok(Some(AudioBuffer::new(
            vec![0.25; usize::try_from(frames).unwrap_or(0)],
            FAKE_FORMAT,
            start,
        )))
    }

    fn seek(&mut self, position_ms: u64) -> Result<(), DecoderError> {
        self.cursor_ms = position_ms.min(self.duration_ms);
        Ok(())
    }
}

/// Creates [`FakeDecoder`]s; paths containing `broken` cannot be opened.
#[derive(Debug, Clone, Default)]
pub struct FakeDecoderFactory {
    created: Arc<AtomicUsize>,
}

impl FakeDecoderFactory {
    pub fn created(&self) -> usize {
        self.created.load(SeqCst)
    }
}

impl DecoderFactory for FakeDecoderFactory {
    fn create(&self, track: &Track) -> Result<Box<dyn AudioDecoder>, DecoderError> {
        let path = track.filepath().to_string_lossy();
        if path.contains("broken") {
            return Err(DecoderError::NoAudioTrack);
        }

        self.created.fetch_add(1, SeqCst);
        Ok(Box::new(FakeDecoder {
            duration_ms: track.duration_ms,
            cursor_ms: 0,
            reads: 0,
            fail_after_first_read: path.contains("corrupt"),
        }))
    }
}
