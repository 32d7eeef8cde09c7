//! Audio file decoding using the `symphonia` crate.
//!
//! The engine only talks to the [`AudioDecoder`] trait; decoders are created
//! per track through a [`DecoderFactory`] so the codec layer can be swapped
//! out (tests use an in-memory implementation).

use std::{
    fs::File,
    io::{Error as StdError, ErrorKind::UnexpectedEof},
};

use {
    symphonia::{
        core::{
            audio::SampleBuffer,
            codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions},
            errors::Error as SymphoniaError,
            formats::{FormatOptions, FormatReader, SeekMode::Accurate, SeekTo::Time},
            io::{MediaSourceStream, MediaSourceStreamOptions},
            meta::MetadataOptions,
            probe::Hint,
            units::{Time as SymphoniaTime, TimeBase},
        },
        default::{get_codecs, get_probe},
    },
    thiserror::Error,
    tracing::debug,
};

use crate::{
    audio::buffer::{AudioBuffer, AudioFormat, MS_PER_SEC},
    player::Track,
};

/// Error type for audio decoding operations.
#[derive(Error, Debug)]
pub enum DecoderError {
    /// Failed to open or read the audio file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Symphonia decoding error.
    #[error("Decoding error: {0}")]
    SymphoniaError(#[from] SymphoniaError),
    /// Unsupported audio format.
    #[error("Unsupported audio format")]
    UnsupportedFormat,
    /// No audio track found in file.
    #[error("No audio track found")]
    NoAudioTrack,
}

/// Source of decoded audio for a single track.
pub trait AudioDecoder {
    /// Format of the buffers produced by [`AudioDecoder::read_buffer`].
    fn format(&self) -> AudioFormat;

    /// Track duration in milliseconds, if known.
    fn duration_ms(&self) -> Option<u64>;

    /// Whether [`AudioDecoder::seek`] is supported.
    fn is_seekable(&self) -> bool;

    /// Decodes roughly `max_frames` frames.
    ///
    /// Returns `Ok(None)` once the end of the stream has been reached.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if the stream cannot be read or decoded.
    fn read_buffer(&mut self, max_frames: usize) -> Result<Option<AudioBuffer>, DecoderError>;

    /// Moves the decode cursor to `position_ms`.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if the stream cannot be repositioned.
    fn seek(&mut self, position_ms: u64) -> Result<(), DecoderError>;
}

/// Produces a decoder for a track.
pub trait DecoderFactory: Send + Sync {
    /// Opens `track` for decoding.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if the track cannot be opened.
    fn create(&self, track: &Track) -> Result<Box<dyn AudioDecoder>, DecoderError>;
}

/// Symphonia-backed decoder for files on disk.
pub struct SymphoniaDecoder {
    /// The underlying format reader.
    format_reader: Box<dyn FormatReader>,
    /// The active codec decoder.
    decoder: Box<dyn Decoder>,
    /// Id of the decoded track within the container.
    track_id: u32,
    /// Time base used to convert packet timestamps.
    time_base: Option<TimeBase>,
    /// Total frame count, if the container reports it.
    n_frames: Option<u64>,
    /// Output format.
    format: AudioFormat,
    /// Position of the next decoded frame in milliseconds.
    position_ms: u64,
}

impl SymphoniaDecoder {
    /// Opens the file behind `track`.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if:
    /// - The file cannot be opened or read
    /// - The file format is unsupported
    /// - No audio track is found in the file
    pub fn open(track: &Track) -> Result<Self, DecoderError> {
        let path = track.filepath();

        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoAudioTrack)?;

        let codec_params = &track.codec_params;
        let channels = codec_params
            .channels
            .ok_or(DecoderError::UnsupportedFormat)?
            .count();
        let format = AudioFormat::new(
            codec_params.sample_rate.ok_or(DecoderError::UnsupportedFormat)?,
            u16::try_from(channels).map_err(|_| DecoderError::UnsupportedFormat)?,
        );

        let decoder = get_codecs().make(codec_params, &DecoderOptions::default())?;
        let track_id = track.id;
        let time_base = codec_params.time_base;
        let n_frames = codec_params.n_frames;

        debug!(
            path = ?path,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Opened audio file"
        );

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            time_base,
            n_frames,
            format,
            position_ms: 0,
        })
    }

    fn timestamp_ms(&self, ts: u64) -> Option<u64> {
        self.time_base.map(|base| {
            let time = base.calc_time(ts);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let frac_ms = (time.frac * 1000.0) as u64;
            time.seconds * MS_PER_SEC + frac_ms
        })
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn duration_ms(&self) -> Option<u64> {
        self.n_frames.map(|frames| {
            let sample_rate = u64::from(self.format.sample_rate);
            (frames * MS_PER_SEC + sample_rate / 2) / sample_rate
        })
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn read_buffer(&mut self, max_frames: usize) -> Result<Option<AudioBuffer>, DecoderError> {
        let mut output: Option<AudioBuffer> = None;

        while output
            .as_ref()
            .is_none_or(|buffer| buffer.frame_count() < max_frames)
        {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let start_ms = self
                .timestamp_ms(packet.ts())
                .unwrap_or(self.position_ms);

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("Skipping corrupt packet: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            samples.copy_interleaved_ref(decoded);

            let chunk = AudioBuffer::new(samples.samples().to_vec(), self.format, start_ms);
            self.position_ms = chunk.end_time();

            match output.as_mut() {
                Some(buffer) => buffer.append(&chunk),
                None => output = Some(chunk),
            }
        }

        Ok(output)
    }

    fn seek(&mut self, position_ms: u64) -> Result<(), DecoderError> {
        let seconds = position_ms / MS_PER_SEC;
        #[allow(clippy::cast_precision_loss)]
        let frac = (position_ms % MS_PER_SEC) as f64 / 1000.0;

        let seeked = self.format_reader.seek(
            Accurate,
            Time {
                time: SymphoniaTime::new(seconds, frac),
                track_id: Some(self.track_id),
            },
        )?;
        self.decoder.reset();

        self.position_ms = self.timestamp_ms(seeked.actual_ts).unwrap_or(position_ms);
        Ok(())
    }
}

/// Creates [`SymphoniaDecoder`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoderFactory;

impl DecoderFactory for SymphoniaDecoderFactory {
    fn create(&self, track: &Track) -> Result<Box<dyn AudioDecoder>, DecoderError> {
        Ok(Box::new(SymphoniaDecoder::open(track)?))
    }
}
