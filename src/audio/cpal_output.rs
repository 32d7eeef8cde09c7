//! Audio output through `cpal` hosts.
//!
//! Each available host (ALSA, JACK, PulseAudio, CoreAudio, WASAPI, ...)
//! becomes one registered backend. Samples travel from the engine thread to
//! the device callback through an `rtrb` ring buffer. Pause, start and
//! volume are signalled through atomics, and the callback only ever
//! `try_lock`s the consumer so it never blocks on the engine.

use std::{
    sync::{
        Arc,
        atomic::{
            AtomicBool, AtomicU32,
            Ordering::{Acquire, Relaxed, Release},
        },
    },
    time::Duration,
};

use {
    cpal::{
        BufferSize::Default as CpalDefault,
        Device, FromSample, Host, HostId, OutputCallbackInfo, Sample,
        SampleFormat::{F32, I16, U16},
        SizedSample, Stream, StreamConfig, StreamError, available_hosts, host_from_id,
        traits::{DeviceTrait, HostTrait, StreamTrait},
    },
    parking_lot::Mutex,
    rtrb::{Consumer, Producer, RingBuffer},
    tracing::{debug, error, warn},
};

use crate::audio::{
    buffer::{AudioBuffer, AudioFormat},
    output::{
        AudioOutput, AudioOutputBuilder, DEFAULT_DEVICE, OutputDevice, OutputError, OutputState,
    },
};

/// Milliseconds of audio the ring buffer holds.
const RING_BUFFER_MS: u64 = 500;

/// Callback timeout handed to `cpal`.
const STREAM_TIMEOUT: Duration = Duration::from_millis(50);

/// Builds one output backend per `cpal` host available on this system.
#[must_use]
pub fn cpal_outputs() -> Vec<AudioOutputBuilder> {
    available_hosts()
        .into_iter()
        .map(|host_id| {
            AudioOutputBuilder::new(host_id.name(), move || {
                Box::new(CpalOutput::new(host_id)) as Box<dyn AudioOutput>
            })
        })
        .collect()
}

/// State shared between the engine thread and the device callback.
struct StreamShared {
    consumer: Mutex<Consumer<f32>>,
    /// `f32` volume bits.
    volume: AtomicU32,
    paused: AtomicBool,
    started: AtomicBool,
    disconnected: AtomicBool,
}

impl StreamShared {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Relaxed))
    }

    fn is_silent(&self) -> bool {
        self.paused.load(Acquire) || !self.started.load(Acquire)
    }
}

/// Fills `data` from the ring buffer, padding underruns with silence.
fn fill_from_ring<T>(data: &mut [T], shared: &StreamShared)
where
    T: Sample + FromSample<f32>,
{
    let consumer = if shared.is_silent() {
        None
    } else {
        shared.consumer.try_lock()
    };

    let Some(mut consumer) = consumer else {
        data.fill(T::EQUILIBRIUM);
        return;
    };

    let volume = shared.volume();
    for sample in data.iter_mut() {
        *sample = match consumer.pop() {
            Ok(value) => T::from_sample((value * volume).clamp(-1.0, 1.0)),
            Err(_) => T::EQUILIBRIUM,
        };
    }
}

struct ActiveStream {
    stream: Stream,
    producer: Producer<f32>,
    shared: Arc<StreamShared>,
    format: AudioFormat,
    capacity: usize,
}

/// An output on one `cpal` host.
pub struct CpalOutput {
    host_id: HostId,
    host: Option<Host>,
    device_name: String,
    volume: f32,
    paused: bool,
    active: Option<ActiveStream>,
}

impl CpalOutput {
    /// Creates an uninitialised output on `host_id` targeting the default
    /// device.
    #[must_use]
    pub fn new(host_id: HostId) -> Self {
        let host = match host_from_id(host_id) {
            Ok(host) => Some(host),
            Err(e) => {
                warn!(host = host_id.name(), "Audio host unavailable: {e}");
                None
            }
        };

        Self::with_host(host_id, host)
    }

    fn with_host(host_id: HostId, host: Option<Host>) -> Self {
        Self {
            host_id,
            host,
            device_name: DEFAULT_DEVICE.to_string(),
            volume: 1.0,
            paused: false,
            active: None,
        }
    }

    fn find_device(&self) -> Result<Device, OutputError> {
        let host = self.host.as_ref().ok_or(OutputError::NoDeviceFound)?;

        if self.device_name.is_empty() || self.device_name == DEFAULT_DEVICE {
            return host.default_output_device().ok_or(OutputError::NoDeviceFound);
        }

        host.output_devices()
            .map_err(|_| OutputError::NoDeviceFound)?
            .find(|device| {
                device
                    .description()
                    .is_ok_and(|description| description.to_string() == self.device_name)
            })
            .ok_or(OutputError::NoDeviceFound)
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        shared: Arc<StreamShared>,
    ) -> Result<Stream, OutputError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let errors = shared.clone();
        let err_fn = move |err: StreamError| {
            if matches!(err, StreamError::DeviceNotAvailable) {
                errors.disconnected.store(true, Release);
            }
            error!("Audio stream error: {err}");
        };

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &OutputCallbackInfo| fill_from_ring(data, &shared),
            err_fn,
            Some(STREAM_TIMEOUT),
        )?;

        Ok(stream)
    }
}

impl AudioOutput for CpalOutput {
    fn init(&mut self, format: &AudioFormat) -> Result<(), OutputError> {
        if !format.is_valid() {
            return Err(OutputError::InvalidFormat(*format));
        }

        self.uninit();

        let device = self.find_device()?;
        let supported = device
            .supported_output_configs()
            .map_err(|_| OutputError::NoDeviceFound)?
            .find(|config| {
                config.channels() == format.channels
                    && config.min_sample_rate() <= format.sample_rate
                    && format.sample_rate <= config.max_sample_rate()
            })
            .ok_or(OutputError::InvalidFormat(*format))?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: CpalDefault,
        };

        let capacity = format.frames_for_duration(RING_BUFFER_MS) * usize::from(format.channels);
        let (producer, consumer) = RingBuffer::<f32>::new(capacity);

        let shared = Arc::new(StreamShared {
            consumer: Mutex::new(consumer),
            volume: AtomicU32::new(self.volume.to_bits()),
            paused: AtomicBool::new(self.paused),
            started: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        });

        let stream = match supported.sample_format() {
            F32 => Self::build_stream::<f32>(&device, &config, shared.clone())?,
            I16 => Self::build_stream::<i16>(&device, &config, shared.clone())?,
            U16 => Self::build_stream::<u16>(&device, &config, shared.clone())?,
            other => return Err(OutputError::UnsupportedSampleFormat { format: other }),
        };
        stream.play()?;

        debug!(
            host = self.host_id.name(),
            device = %self.device_name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Opened cpal output stream"
        );

        self.active = Some(ActiveStream {
            stream,
            producer,
            shared,
            format: *format,
            capacity,
        });
        Ok(())
    }

    fn uninit(&mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = active.stream.pause() {
                debug!("Failed to pause stream before closing: {e}");
            }
            debug!(host = self.host_id.name(), "Closed cpal output stream");
        }
    }

    fn reset(&mut self) {
        if let Some(active) = self.active.as_ref() {
            let mut consumer = active.shared.consumer.lock();
            while consumer.pop().is_ok() {}
        }
    }

    fn start(&mut self) {
        if let Some(active) = self.active.as_ref() {
            active.shared.started.store(true, Release);
        }
    }

    fn initialised(&self) -> bool {
        self.active.is_some()
    }

    fn device(&self) -> String {
        self.device_name.clone()
    }

    fn can_handle_volume(&self) -> bool {
        true
    }

    fn current_state(&self) -> OutputState {
        let Some(active) = self.active.as_ref() else {
            return OutputState::default();
        };

        let channels = usize::from(active.format.channels);
        let free = active.producer.slots();

        OutputState {
            free_frames: free / channels,
            queued_frames: active.capacity.saturating_sub(free) / channels,
            disconnected: active.shared.disconnected.load(Acquire),
        }
    }

    fn buffer_size(&self) -> usize {
        self.active
            .as_ref()
            .map_or(0, |active| active.capacity / usize::from(active.format.channels))
    }

    fn get_all_devices(&self) -> Vec<OutputDevice> {
        let Some(host) = self.host.as_ref() else {
            return Vec::new();
        };

        let mut devices = vec![OutputDevice {
            name: DEFAULT_DEVICE.to_string(),
            description: String::from("Default device"),
        }];

        match host.output_devices() {
            Ok(outputs) => devices.extend(outputs.filter_map(|device| {
                device.description().ok().map(|description| OutputDevice {
                    name: description.to_string(),
                    description: description.to_string(),
                })
            })),
            Err(e) => warn!(host = self.host_id.name(), "Failed to list devices: {e}"),
        }

        devices
    }

    fn write(&mut self, buffer: &AudioBuffer) -> usize {
        let Some(active) = self.active.as_mut() else {
            return 0;
        };

        let channels = usize::from(active.format.channels);
        let frames = buffer.frame_count().min(active.producer.slots() / channels);

        for &sample in &buffer.samples()[..frames * channels] {
            if active.producer.push(sample).is_err() {
                break;
            }
        }

        frames
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if let Some(active) = self.active.as_ref() {
            active.shared.paused.store(paused, Release);
        }
    }

    fn set_volume(&mut self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0) as f32;
        self.volume = volume;
        if let Some(active) = self.active.as_ref() {
            active.shared.volume.store(volume.to_bits(), Relaxed);
        }
    }

    fn set_device(&mut self, device: &str) {
        device.clone_into(&mut self.device_name);
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.uninit();
    }
}
