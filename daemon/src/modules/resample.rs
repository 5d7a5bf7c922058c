//! Explicit sample rate conversion.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::audio::{read_wav, write_wav, AudioBuffer, WavEncoding};
use crate::error::Result;

use super::params::{invalid, output_samples, positive_int};
use super::{Module, ModuleInput, ModuleOutput};

/// Frames fed to the resampler per call.
const CHUNK_SIZE: usize = 1024;

/// `resample`: `fs`, the target rate in Hz.
pub struct Resample;

impl Module for Resample {
    fn process(&self, input: &ModuleInput<'_>) -> Result<ModuleOutput> {
        if !input.params.contains_key("fs") {
            return Err(invalid("A target rate 'fs' is required"));
        }
        let fs = positive_int(input.params, "fs", 0)?;
        let fs = u32::try_from(fs).map_err(|_| invalid(format!("'fs' is out of range ({})", fs)))?;

        let buffer = read_wav(input.source)?;
        let resampled = resample(&buffer, fs)?;
        write_wav(&resampled, input.target, WavEncoding::intermediate())?;
        Ok(ModuleOutput::default())
    }
}

/// Resamples `buffer` to `rate` with a windowed sinc interpolator.
pub fn resample(buffer: &AudioBuffer, rate: u32) -> Result<AudioBuffer> {
    if buffer.sample_rate == rate || buffer.frames() == 0 {
        return Ok(AudioBuffer::new(buffer.samples.clone(), rate, buffer.channels));
    }

    let ratio = rate as f64 / buffer.sample_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ch = buffer.channels as usize;
    let frames = buffer.frames();
    let expected = (frames as f64 * ratio).round() as usize;
    // The interpolator allocates a full output chunk up front.
    let chunk_out = (CHUNK_SIZE as f64 * ratio).ceil() as usize;
    output_samples(expected.max(chunk_out), ch)?;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, ch)
        .map_err(|e| invalid(format!("Cannot resample to {} Hz: {}", rate, e)))?;

    let input = buffer.deinterleave();
    let delay = resampler.output_delay();
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); ch];
    let failed = |e: rubato::ResampleError| invalid(format!("Resampling failed: {}", e));

    let mut pos = 0;
    while pos + CHUNK_SIZE <= frames {
        let chunk: Vec<&[f32]> = input.iter().map(|c| &c[pos..pos + CHUNK_SIZE]).collect();
        append(&mut output, resampler.process(&chunk, None).map_err(failed)?);
        pos += CHUNK_SIZE;
    }
    if pos < frames {
        let rest: Vec<&[f32]> = input.iter().map(|c| &c[pos..]).collect();
        append(&mut output, resampler.process_partial(Some(rest.as_slice()), None).map_err(failed)?);
    }
    // Flush the interpolator's delay line.
    while output[0].len() < delay + expected {
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(failed)?;
        if tail[0].is_empty() {
            break;
        }
        append(&mut output, tail);
    }

    for channel in &mut output {
        channel.drain(..delay.min(channel.len()));
        channel.truncate(expected);
    }
    Ok(AudioBuffer::interleave(&output, rate))
}

fn append(output: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (out, chunk) in output.iter_mut().zip(produced) {
        out.extend(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::run;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn halves_frame_count() {
        let buffer = AudioBuffer::new(vec![0.1; 2 * 4410], 44100, 2);
        let out = resample(&buffer, 22050).unwrap();
        assert_eq!(out.sample_rate, 22050);
        assert_eq!(out.channels, 2);
        assert_eq!(out.frames(), 2205);
    }

    #[test]
    fn same_rate_is_identity() {
        let buffer = AudioBuffer::new(vec![0.1, 0.2], 100, 1);
        assert_eq!(resample(&buffer, 100).unwrap(), buffer);
    }

    #[test]
    fn module_requires_fs() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.wav");
        write_wav(&AudioBuffer::silence(100, 8000, 1), &source, WavEncoding::intermediate()).unwrap();
        assert!(run(&Resample, &source, json!({}), &dir.path().join("o.wav")).is_err());

        let target = dir.path().join("up.wav");
        run(&Resample, &source, json!({ "fs": 16000 }), &target).unwrap();
        let out = read_wav(&target).unwrap();
        assert_eq!(out.sample_rate, 16000);
        assert_eq!(out.frames(), 200);
    }

    #[test]
    fn huge_rate_is_refused() {
        let buffer = AudioBuffer::silence(100, 8000, 1);
        let err = resample(&buffer, u32::MAX).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ModuleFailed);
    }
}
