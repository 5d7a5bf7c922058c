//! WAV reading and writing.
//!
//! Decodes any PCM or float WAV file into an interleaved `f32` buffer and
//! writes buffers back using the hound crate.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde_json::Value;

use crate::error::{DaemonError, ErrorCode, Result};

/// Interleaved audio samples in the range [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples, `frames * channels` long.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioBuffer {
    /// Creates a buffer from interleaved samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Creates `frames` frames of silence.
    pub fn silence(frames: usize, sample_rate: u32, channels: u16) -> Self {
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        samples_to_duration(self.frames(), self.sample_rate)
    }

    /// Number of frames closest to `seconds` at this buffer's rate.
    pub fn frames_for(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate as f64).round().max(0.0) as usize
    }

    /// Returns a copy with `channels` channels. Channel `c` of the result is
    /// channel `c % self.channels` of the source, so mono is duplicated.
    pub fn with_channels(&self, channels: u16) -> Self {
        if channels == self.channels || self.channels == 0 {
            return self.clone();
        }
        let src = self.channels as usize;
        let mut samples = Vec::with_capacity(self.frames() * channels as usize);
        for frame in self.samples.chunks_exact(src) {
            for c in 0..channels as usize {
                samples.push(frame[c % src]);
            }
        }
        Self::new(samples, self.sample_rate, channels)
    }

    /// Splits the interleaved samples into one vector per channel.
    pub fn deinterleave(&self) -> Vec<Vec<f32>> {
        let ch = self.channels as usize;
        let mut out = vec![Vec::with_capacity(self.frames()); ch];
        for frame in self.samples.chunks_exact(ch) {
            for (c, sample) in frame.iter().enumerate() {
                out[c].push(*sample);
            }
        }
        out
    }

    /// Builds a buffer from one vector per channel. Channels are truncated to
    /// the shortest one.
    pub fn interleave(channels: &[Vec<f32>], sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channels.len());
        for i in 0..frames {
            for channel in channels {
                samples.push(channel[i]);
            }
        }
        Self::new(samples, sample_rate, channels.len() as u16)
    }
}

/// Sample layout of a written WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavEncoding {
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
}

impl WavEncoding {
    /// 32-bit float, used for every intermediate file.
    pub fn intermediate() -> Self {
        Self {
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        }
    }

    /// Reads `bits_per_sample` and `sample_format` from `format_options`,
    /// falling back to `fallback` for absent keys.
    pub fn from_options(options: &Value, fallback: WavEncoding) -> Result<Self> {
        let sample_format = match options.get("sample_format") {
            None | Some(Value::Null) => fallback.sample_format,
            Some(Value::String(s)) if s == "int" => SampleFormat::Int,
            Some(Value::String(s)) if s == "float" => SampleFormat::Float,
            Some(other) => {
                return Err(DaemonError::unsupported_format(format!(
                    "'sample_format' must be 'int' or 'float' (got {})",
                    other
                )))
            }
        };
        let bits_per_sample = match options.get("bits_per_sample") {
            None | Some(Value::Null) if sample_format == SampleFormat::Float => 32,
            None | Some(Value::Null) if fallback.sample_format == SampleFormat::Int => fallback.bits_per_sample,
            None | Some(Value::Null) => 16,
            Some(value) => value
                .as_u64()
                .and_then(|b| u16::try_from(b).ok())
                .ok_or_else(|| {
                    DaemonError::unsupported_format(format!("'bits_per_sample' must be an integer (got {})", value))
                })?,
        };

        let valid = match sample_format {
            SampleFormat::Float => bits_per_sample == 32,
            SampleFormat::Int => matches!(bits_per_sample, 8 | 16 | 24 | 32),
        };
        if !valid {
            return Err(DaemonError::unsupported_format(format!(
                "Cannot write {}-bit {} WAV files",
                bits_per_sample,
                if sample_format == SampleFormat::Float { "float" } else { "int" }
            )));
        }
        Ok(Self {
            bits_per_sample,
            sample_format,
        })
    }
}

/// Reads a WAV file into an [`AudioBuffer`].
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    let mut reader = WavReader::open(path).map_err(|e| hound_error("open", path, e))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| hound_error("read", path, e))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| hound_error("read", path, e))?
        }
    };

    Ok(AudioBuffer::new(samples, spec.sample_rate, spec.channels))
}

/// Sample layout of an existing WAV file.
pub fn encoding_of(path: &Path) -> Result<WavEncoding> {
    let spec = WavReader::open(path).map_err(|e| hound_error("open", path, e))?.spec();
    Ok(WavEncoding {
        bits_per_sample: spec.bits_per_sample,
        sample_format: spec.sample_format,
    })
}

/// Writes an [`AudioBuffer`] to a WAV file.
pub fn write_wav(buffer: &AudioBuffer, path: &Path, encoding: WavEncoding) -> Result<()> {
    let spec = WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: encoding.bits_per_sample,
        sample_format: encoding.sample_format,
    };

    let mut writer = WavWriter::create(path, spec).map_err(|e| hound_error("create", path, e))?;

    match encoding.sample_format {
        SampleFormat::Float => {
            for sample in &buffer.samples {
                writer.write_sample(*sample).map_err(|e| hound_error("write", path, e))?;
            }
        }
        SampleFormat::Int => {
            let max = ((1u64 << (encoding.bits_per_sample - 1)) - 1) as f64;
            for sample in &buffer.samples {
                let value = (sample.clamp(-1.0, 1.0) as f64 * max).round() as i32;
                writer.write_sample(value).map_err(|e| hound_error("write", path, e))?;
            }
        }
    }

    writer.finalize().map_err(|e| hound_error("finalize", path, e))?;
    Ok(())
}

/// Calculates the duration of audio in seconds from a frame count.
pub fn samples_to_duration(frames: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / sample_rate as f64
}

fn hound_error(action: &str, path: &Path, error: hound::Error) -> DaemonError {
    match error {
        hound::Error::IoError(e) => DaemonError::io(action, path, e),
        other => DaemonError::with_source(
            ErrorCode::UnsupportedFormat,
            format!("Failed to {} WAV file '{}': {}", action, path.display(), other),
            other,
        ),
    }
}
