//! Sound I/O.
//!
//! Provides WAV decoding and encoding, concatenation, and the external
//! encoder used for every other output format.

pub mod concat;
pub mod encoder;
pub mod wav;

// Re-export commonly used items
pub use concat::{concatenate, concatenate_files};
pub use encoder::Encoder;
pub use wav::{encoding_of, read_wav, samples_to_duration, write_wav, AudioBuffer, WavEncoding};
