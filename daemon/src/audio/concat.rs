//! Concatenation of several sound files along time.

use std::path::{Path, PathBuf};

use crate::error::{DaemonError, Result};

use super::wav::{read_wav, AudioBuffer};

/// Reads and concatenates `files` in order.
///
/// All files must share one sample rate; the result has as many channels as
/// the widest input.
pub fn concatenate_files(files: &[PathBuf]) -> Result<AudioBuffer> {
    let buffers = files
        .iter()
        .map(|f| read_wav(f).map(|b| (f.as_path(), b)))
        .collect::<Result<Vec<_>>>()?;
    concatenate(&buffers)
}

/// Concatenates decoded buffers. Each buffer is paired with its file name for
/// error messages.
pub fn concatenate(parts: &[(&Path, AudioBuffer)]) -> Result<AudioBuffer> {
    let (_, first) = parts
        .first()
        .ok_or_else(|| DaemonError::invalid_request("Nothing to concatenate"))?;
    let sample_rate = first.sample_rate;

    if let Some((path, buffer)) = parts.iter().find(|(_, b)| b.sample_rate != sample_rate) {
        return Err(DaemonError::unsupported_format(format!(
            "File '{}' has a sample rate of {} Hz but {} Hz is expected; resample it explicitly",
            path.display(),
            buffer.sample_rate,
            sample_rate
        )));
    }

    let channels = parts.iter().map(|(_, b)| b.channels).max().unwrap_or(1);
    let total: usize = parts.iter().map(|(_, b)| b.frames()).sum();
    let mut samples = Vec::with_capacity(total * channels as usize);
    for (_, buffer) in parts {
        if buffer.channels == channels {
            samples.extend_from_slice(&buffer.samples);
        } else {
            samples.extend(buffer.with_channels(channels).samples);
        }
    }

    Ok(AudioBuffer::new(samples, sample_rate, channels))
}
