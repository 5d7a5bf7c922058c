//! Seeded Gaussian noise generator.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde_json::Value;

use crate::audio::{write_wav, AudioBuffer, WavEncoding};
use crate::error::Result;

use super::params::{db_to_gain, invalid, number, output_samples, positive_int, seconds};
use super::{Module, ModuleInput, ModuleKind, ModuleOutput};

/// `noise`: `seed` (required), `duration` in seconds, `fs`, `channels`, and
/// `level_db` (RMS, dBFS). The current source is ignored.
pub struct Noise;

impl Module for Noise {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Generator
    }

    fn process(&self, input: &ModuleInput<'_>) -> Result<ModuleOutput> {
        let seed = match input.params.get("seed") {
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| invalid(format!("'seed' must be a non-negative integer (got {})", n)))?,
            Some(other) => return Err(invalid(format!("'seed' must be an integer (got {})", other))),
            None => return Err(invalid("A 'seed' parameter needs to be provided")),
        };
        let duration = seconds(input.params, "duration", 1.0)?;
        let fs = positive_int(input.params, "fs", 44100)?;
        let channels = positive_int(input.params, "channels", 1)?;
        let level_db = number(input.params, "level_db", -20.0)?;
        let fs = u32::try_from(fs).map_err(|_| invalid(format!("'fs' is out of range ({})", fs)))?;
        let channels = u16::try_from(channels).map_err(|_| invalid(format!("'channels' is out of range ({})", channels)))?;

        let frames = (duration * fs as f64).round() as usize;
        output_samples(frames, channels as usize)?;

        let buffer = generate(seed, frames, fs, channels, db_to_gain(level_db));
        write_wav(&buffer, input.target, WavEncoding::intermediate())?;
        Ok(ModuleOutput::default())
    }
}

fn generate(seed: u64, frames: usize, fs: u32, channels: u16, gain: f32) -> AudioBuffer {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let samples: Vec<f32> = (0..frames * channels as usize)
        .map(|_| {
            let n: f32 = StandardNormal.sample(&mut rng);
            (n * gain).clamp(-1.0, 1.0)
        })
        .collect();
    AudioBuffer::new(samples, fs, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::read_wav;
    use crate::modules::testing::run;
    use serde_json::json;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn same_seed_same_noise() {
        let a = generate(7, 100, 1000, 2, 0.1);
        let b = generate(7, 100, 1000, 2, 0.1);
        let c = generate(8, 100, 1000, 2, 0.1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.frames(), 100);
    }

    #[test]
    fn writes_requested_shape() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("noise.wav");
        let out = run(
            &Noise,
            Path::new("/unused.wav"),
            json!({ "seed": 1, "duration": 0.5, "fs": 8000, "channels": 2 }),
            &target,
        )
        .unwrap();
        assert!(out.consumed_sources.is_empty());

        let buffer = read_wav(&target).unwrap();
        assert_eq!(buffer.sample_rate, 8000);
        assert_eq!(buffer.channels, 2);
        assert_eq!(buffer.frames(), 4000);
    }

    #[test]
    fn seed_is_required() {
        let dir = tempdir().unwrap();
        let err = run(&Noise, Path::new("/unused.wav"), json!({}), &dir.path().join("n.wav")).unwrap_err();
        assert!(err.message.contains("seed"));
    }

    #[test]
    fn huge_duration_is_refused() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("n.wav");
        let err = run(
            &Noise,
            Path::new("/unused.wav"),
            json!({ "seed": 1, "duration": 1e12, "fs": 4000000000u64, "channels": 65535 }),
            &target,
        )
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ModuleFailed);
        assert!(!target.exists());
    }
}
