//! Audio capture from microphone

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Source of recorded utterances
///
/// Not `Send`: audio streams are pinned to the thread that opened them.
#[async_trait(?Send)]
pub trait Microphone {
    /// Record for `window` and return WAV bytes
    async fn record(&mut self, window: Duration) -> Result<Vec<u8>>;

    /// Sample rate of the recorded WAV
    fn sample_rate(&self) -> u32;
}

/// RMS below this reads as silence on the level meter
const SILENCE_RMS: f32 = 0.002;

/// Loudness of a stretch of samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputLevel {
    pub rms: f32,
    pub peak: f32,
}

impl InputLevel {
    #[must_use]
    pub fn measure(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self { rms: 0.0, peak: 0.0 };
        }
        #[allow(clippy::cast_precision_loss)]
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        Self { rms, peak }
    }

    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.rms < SILENCE_RMS
    }

    /// Bar of `width` cells, full at an RMS of 0.5
    #[must_use]
    pub fn meter(&self, width: usize) -> String {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let filled = ((self.rms * 2.0).min(1.0) * width as f32).round() as usize;
        format!("{}{}", "#".repeat(filled), ".".repeat(width - filled))
    }
}

/// Default input device, opened for one recording window at a time
pub struct AudioCapture {
    device: cpal::Device,
    config: StreamConfig,
}

impl AudioCapture {
    /// Find a mono 16 kHz configuration on the default input device
    ///
    /// # Errors
    ///
    /// Returns error if there is no input device or it cannot record mono
    /// speech at [`SAMPLE_RATE`]
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| {
                Error::Audio(format!("input device cannot record mono at {SAMPLE_RATE} Hz"))
            })?
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "microphone ready"
        );

        Ok(Self { device, config })
    }

    #[must_use]
    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "unknown".to_string())
    }

    /// Capture raw samples for `window`
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be opened
    pub async fn capture(&self, window: Duration) -> Result<Vec<f32>> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| tracing::error!(error = %err, "microphone stream error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tokio::time::sleep(window).await;
        drop(stream);

        let samples = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        Ok(samples)
    }
}

#[async_trait(?Send)]
impl Microphone for AudioCapture {
    async fn record(&mut self, window: Duration) -> Result<Vec<u8>> {
        let samples = self.capture(window).await?;
        if samples.is_empty() {
            return Err(Error::Audio("no audio captured".to_string()));
        }

        tracing::debug!(
            samples = samples.len(),
            level = InputLevel::measure(&samples).rms,
            "recorded utterance"
        );
        samples_to_wav(&samples, SAMPLE_RATE)
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }

        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Format details read from a WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Samples per channel
    pub frames: u32,
}

impl WavInfo {
    /// Playback length
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(f64::from(self.frames) / f64::from(self.sample_rate))
    }
}

/// Read the format of a WAV buffer
///
/// # Errors
///
/// Returns error if the buffer is not a readable WAV file
pub fn inspect_wav(wav: &[u8]) -> Result<WavInfo> {
    let reader = hound::WavReader::new(std::io::Cursor::new(wav))?;
    let spec = reader.spec();

    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        frames: reader.duration(),
    })
}

/// Decode WAV bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the buffer is not a readable 16-bit or float WAV file
pub fn wav_to_samples(wav: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(std::io::Cursor::new(wav))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int if spec.bits_per_sample == 16 => reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            return Err(Error::Audio(format!(
                "unsupported WAV bit depth: {}",
                spec.bits_per_sample
            )));
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}
