//! External encoder process for formats hound cannot write.
//!
//! The encoder is any ffmpeg-compatible command line tool.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use serde_json::Value;
use tracing::debug;

use crate::error::{DaemonError, Result};

/// Runs an external encoder binary.
#[derive(Debug, Clone)]
pub struct Encoder {
    program: String,
}

impl Encoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Encodes `input` into `output`; the target format follows the output
    /// extension.
    pub fn encode(&self, input: &Path, output: &Path, options: &Value) -> Result<()> {
        let args = encoder_args(input, output, options);
        debug!(program = %self.program, ?args, "running encoder");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DaemonError::encoder_missing(&self.program, e))?;

        if !result.status.success() {
            return Err(DaemonError::encoder_failed(
                result.status,
                &String::from_utf8_lossy(&result.stderr),
            ));
        }
        Ok(())
    }
}

/// Command line for an ffmpeg-compatible encoder.
fn encoder_args(input: &Path, output: &Path, options: &Value) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-loglevel".into(), "error".into(), "-i".into(), input.into()];

    let option = |key: &str| match options.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    if let Some(codec) = option("codec") {
        args.extend(["-c:a".into(), codec.into()]);
    }
    if let Some(bitrate) = option("bitrate") {
        args.extend(["-b:a".into(), bitrate.into()]);
    }
    if let Some(quality) = option("quality") {
        args.extend(["-q:a".into(), quality.into()]);
    }

    args.push(output.into());
    args
}
