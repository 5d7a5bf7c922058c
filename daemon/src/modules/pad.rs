//! Adds silence before and after the source.

use crate::audio::{read_wav, write_wav, AudioBuffer, WavEncoding};
use crate::error::Result;

use super::params::{output_samples, seconds};
use super::{Module, ModuleInput, ModuleOutput};

/// `pad`: `before` and `after`, in seconds.
pub struct Pad;

impl Module for Pad {
    fn process(&self, input: &ModuleInput<'_>) -> Result<ModuleOutput> {
        let before = seconds(input.params, "before", 0.0)?;
        let after = seconds(input.params, "after", 0.0)?;

        let buffer = read_wav(input.source)?;
        let ch = buffer.channels as usize;
        let (head, tail) = (buffer.frames_for(before), buffer.frames_for(after));
        let total = output_samples(head.saturating_add(buffer.frames()).saturating_add(tail), ch)?;
        let (head, tail) = (head * ch, tail * ch);

        let mut samples = Vec::with_capacity(total);
        samples.resize(head, 0.0);
        samples.extend_from_slice(&buffer.samples);
        samples.resize(samples.len() + tail, 0.0);

        let padded = AudioBuffer::new(samples, buffer.sample_rate, buffer.channels);
        write_wav(&padded, input.target, WavEncoding::intermediate())?;
        Ok(ModuleOutput::default())
    }
}
