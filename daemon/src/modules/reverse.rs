//! Plays the source backwards.

use crate::audio::{read_wav, write_wav, AudioBuffer, WavEncoding};
use crate::error::Result;

use super::{Module, ModuleInput, ModuleOutput};

/// `time-reverse`: no parameters.
pub struct TimeReverse;

impl Module for TimeReverse {
    fn process(&self, input: &ModuleInput<'_>) -> Result<ModuleOutput> {
        let buffer = read_wav(input.source)?;
        let ch = buffer.channels as usize;
        let samples: Vec<f32> = buffer
            .samples
            .chunks_exact(ch)
            .rev()
            .flatten()
            .copied()
            .collect();

        let reversed = AudioBuffer::new(samples, buffer.sample_rate, buffer.channels);
        write_wav(&reversed, input.target, WavEncoding::intermediate())?;
        Ok(ModuleOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::run;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn reverses_frames_not_channels() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in.wav");
        let target = dir.path().join("out.wav");
        let buffer = AudioBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 10, 2);
        write_wav(&buffer, &source, WavEncoding::intermediate()).unwrap();

        run(&TimeReverse, &source, json!({}), &target).unwrap();

        assert_eq!(read_wav(&target).unwrap().samples, vec![0.3, 0.4, 0.1, 0.2]);
    }
}
