//! Fades the source in and out.

use std::f64::consts::PI;

use serde_json::Value;

use crate::audio::{read_wav, write_wav, WavEncoding};
use crate::error::Result;

use super::params::{choice, invalid};
use super::{Module, ModuleInput, ModuleOutput};

const DEFAULT_DURATION: f64 = 0.01;

/// `ramp`: `duration` (seconds, or `[onset, offset]`) and `shape`
/// (`linear` or `cosine`).
pub struct Ramp;

impl Module for Ramp {
    fn process(&self, input: &ModuleInput<'_>) -> Result<ModuleOutput> {
        let (onset, offset) = durations(input.params.get("duration"))?;
        let shape = choice(input.params, "shape", &["linear", "cosine"])?;

        let mut buffer = read_wav(input.source)?;
        let frames = buffer.frames();
        let ch = buffer.channels as usize;
        let on = buffer.frames_for(onset).min(frames);
        let off = buffer.frames_for(offset).min(frames);

        for i in 0..on {
            let gain = envelope(i as f64 / on as f64, shape);
            for sample in &mut buffer.samples[i * ch..(i + 1) * ch] {
                *sample *= gain;
            }
        }
        for i in 0..off {
            let frame = frames - 1 - i;
            let gain = envelope(i as f64 / off as f64, shape);
            for sample in &mut buffer.samples[frame * ch..(frame + 1) * ch] {
                *sample *= gain;
            }
        }

        write_wav(&buffer, input.target, WavEncoding::intermediate())?;
        Ok(ModuleOutput::default())
    }
}

fn durations(value: Option<&Value>) -> Result<(f64, f64)> {
    let parse = |v: &Value| {
        v.as_f64()
            .filter(|d| *d >= 0.0 && d.is_finite())
            .ok_or_else(|| invalid(format!("'duration' must hold non-negative numbers (got {})", v)))
    };
    match value {
        None | Some(Value::Null) => Ok((DEFAULT_DURATION, DEFAULT_DURATION)),
        Some(Value::Array(pair)) if pair.len() == 2 => Ok((parse(&pair[0])?, parse(&pair[1])?)),
        Some(Value::Array(_)) => Err(invalid("'duration' must be a number or [onset, offset]")),
        Some(v) => parse(v).map(|d| (d, d)),
    }
}

/// Gain at relative position `x` in [0, 1) of a rising ramp.
fn envelope(x: f64, shape: &str) -> f32 {
    match shape {
        "cosine" => (0.5 - 0.5 * (PI * x).cos()) as f32,
        _ => x as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::modules::testing::run;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn linear_ramp_on_both_ends() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.wav");
        let target = dir.path().join("out.wav");
        write_wav(&AudioBuffer::new(vec![1.0; 100], 100, 1), &source, WavEncoding::intermediate()).unwrap();

        run(&Ramp, &source, json!({ "duration": [0.1, 0.2] }), &target).unwrap();

        let out = read_wav(&target).unwrap();
        assert_eq!(out.frames(), 100);
        assert_eq!(out.samples[0], 0.0);
        assert_eq!(out.samples[5], 0.5);
        assert_eq!(out.samples[50], 1.0);
        assert_eq!(out.samples[99], 0.0);
        assert_eq!(out.samples[89], 0.5);
    }

    #[test]
    fn cosine_envelope_bounds() {
        assert_eq!(envelope(0.0, "cosine"), 0.0);
        assert!((envelope(0.5, "cosine") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn bad_duration_fails() {
        assert!(durations(Some(&json!([0.1]))).is_err());
        assert!(durations(Some(&json!("long"))).is_err());
        assert_eq!(durations(Some(&json!(0.2))).unwrap(), (0.2, 0.2));
    }
}
