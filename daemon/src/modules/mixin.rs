//! Mixes another sound into the source.

use serde_json::Value;

use crate::audio::{read_wav, write_wav, AudioBuffer, WavEncoding};
use crate::error::Result;

use super::params::{choice, db_to_gain, invalid, output_samples};
use super::{Module, ModuleInput, ModuleOutput};

/// `mixin`: `file` (path, list or query), `levels` (`[source_db, file_db]`)
/// and `align` (`left`, `right` or `center`).
///
/// The output lasts as long as the longer of the two sounds.
pub struct Mixin;

impl Module for Mixin {
    fn process(&self, input: &ModuleInput<'_>) -> Result<ModuleOutput> {
        let file = input
            .params
            .get("file")
            .ok_or_else(|| invalid("A 'file' parameter is required"))?;
        let (source_db, file_db) = levels(input.params.get("levels"))?;
        let align = choice(input.params, "align", &["left", "right", "center"])?;

        let resolved = input.files.resolve_file(file)?;
        let source = read_wav(input.source)?;
        let other = read_wav(&resolved.path)?;
        if source.sample_rate != other.sample_rate {
            return Err(invalid(format!(
                "'{}' has a sample rate of {} Hz but the source has {} Hz",
                resolved.path.display(),
                other.sample_rate,
                source.sample_rate
            )));
        }

        let channels = source.channels.max(other.channels) as usize;
        output_samples(source.frames().max(other.frames()), channels)?;

        let mixed = mix(&source, &other, db_to_gain(source_db), db_to_gain(file_db), align);
        write_wav(&mixed, input.target, WavEncoding::intermediate())?;
        Ok(ModuleOutput {
            consumed_sources: resolved.sources,
        })
    }
}

fn levels(value: Option<&Value>) -> Result<(f64, f64)> {
    match value {
        None | Some(Value::Null) => Ok((0.0, 0.0)),
        Some(Value::Array(pair)) if pair.len() == 2 => {
            match (pair[0].as_f64(), pair[1].as_f64()) {
                (Some(a), Some(b)) => Ok((a, b)),
                _ => Err(invalid(format!("'levels' must hold two numbers (got {:?})", pair))),
            }
        }
        Some(other) => Err(invalid(format!("'levels' must be [source_db, file_db] (got {})", other))),
    }
}

fn mix(source: &AudioBuffer, other: &AudioBuffer, source_gain: f32, other_gain: f32, align: &str) -> AudioBuffer {
    let channels = source.channels.max(other.channels);
    let a = source.with_channels(channels);
    let b = other.with_channels(channels);
    let frames = a.frames().max(b.frames());
    let ch = channels as usize;

    let offset = |len: usize| match align {
        "right" => frames - len,
        "center" => (frames - len) / 2,
        _ => 0,
    };
    let (offset_a, offset_b) = (offset(a.frames()) * ch, offset(b.frames()) * ch);

    let mut samples = vec![0.0f32; frames * ch];
    for (i, s) in a.samples.iter().enumerate() {
        samples[offset_a + i] += s * source_gain;
    }
    for (i, s) in b.samples.iter().enumerate() {
        samples[offset_b + i] += s * other_gain;
    }
    AudioBuffer::new(samples, source.sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::run;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn mix_alignment() {
        let long = AudioBuffer::new(vec![1.0; 4], 10, 1);
        let short = AudioBuffer::new(vec![1.0; 2], 10, 1);

        assert_eq!(mix(&long, &short, 1.0, 1.0, "left").samples, vec![2.0, 2.0, 1.0, 1.0]);
        assert_eq!(mix(&long, &short, 1.0, 1.0, "right").samples, vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(mix(&long, &short, 1.0, 1.0, "center").samples, vec![1.0, 2.0, 2.0, 1.0]);
        assert_eq!(mix(&short, &long, 1.0, 0.5, "left").samples, vec![1.5, 1.5, 0.5, 0.5]);
    }

    #[test]
    fn mixes_file_and_reports_it() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.wav");
        let noise = dir.path().join("noise.wav");
        let target = dir.path().join("out.wav");
        write_wav(&AudioBuffer::new(vec![0.25; 4], 10, 1), &source, WavEncoding::intermediate()).unwrap();
        write_wav(&AudioBuffer::new(vec![0.25; 6], 10, 1), &noise, WavEncoding::intermediate()).unwrap();

        let out = run(
            &Mixin,
            &source,
            json!({ "file": noise.to_string_lossy(), "align": "left" }),
            &target,
        )
        .unwrap();

        assert_eq!(out.consumed_sources, vec![noise]);
        let mixed = read_wav(&target).unwrap();
        assert_eq!(mixed.samples, vec![0.5, 0.5, 0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn rate_mismatch_fails() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.wav");
        let other = dir.path().join("other.wav");
        write_wav(&AudioBuffer::silence(4, 10, 1), &source, WavEncoding::intermediate()).unwrap();
        write_wav(&AudioBuffer::silence(4, 20, 1), &other, WavEncoding::intermediate()).unwrap();

        let err = run(&Mixin, &source, json!({ "file": other.to_string_lossy() }), &dir.path().join("o.wav"))
            .unwrap_err();
        assert!(err.message.contains("sample rate"));
    }

    #[test]
    fn file_is_required() {
        assert!(levels(Some(&json!([0, "loud"]))).is_err());
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.wav");
        write_wav(&AudioBuffer::silence(4, 10, 1), &source, WavEncoding::intermediate()).unwrap();
        assert!(run(&Mixin, &source, json!({}), &dir.path().join("o.wav")).is_err());
    }
}
