//! Parameter parsing helpers shared by the built-in modules.

use serde_json::{Map, Value};

use crate::error::{DaemonError, ErrorCode, Result};

/// Largest output a built-in module may produce, in samples over all
/// channels. About 46 minutes of 48 kHz stereo.
pub const MAX_OUTPUT_SAMPLES: usize = 1 << 28;

/// A module parameter error.
pub fn invalid(reason: impl Into<String>) -> DaemonError {
    DaemonError::new(ErrorCode::ModuleFailed, reason)
}

/// Reads an optional non-negative number of seconds.
pub fn seconds(params: &Map<String, Value>, key: &str, default: f64) -> Result<f64> {
    let value = number(params, key, default)?;
    if value < 0.0 {
        return Err(invalid(format!("'{}' cannot be negative (got {})", key, value)));
    }
    Ok(value)
}

/// Reads an optional finite number.
pub fn number(params: &Map<String, Value>, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(format!("'{}' must be a number (got {})", key, value))),
    }
}

/// Reads an optional positive integer.
pub fn positive_int(params: &Map<String, Value>, key: &str, default: u64) -> Result<u64> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .filter(|v| *v > 0)
            .ok_or_else(|| invalid(format!("'{}' must be a positive integer (got {})", key, value))),
    }
}

/// Reads an optional string among `choices`; the first choice is the default.
pub fn choice<'a>(params: &Map<String, Value>, key: &str, choices: &[&'a str]) -> Result<&'a str> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(choices[0]),
        Some(Value::String(s)) => choices
            .iter()
            .find(|c| **c == s.as_str())
            .copied()
            .ok_or_else(|| invalid(format!("'{}' must be one of {} (got '{}')", key, choices.join(", "), s))),
        Some(other) => Err(invalid(format!("'{}' must be a string (got {})", key, other))),
    }
}

/// Number of samples in `frames` frames of `channels` channels. Fails when
/// the output would exceed [`MAX_OUTPUT_SAMPLES`].
pub fn output_samples(frames: usize, channels: usize) -> Result<usize> {
    frames
        .checked_mul(channels)
        .filter(|n| *n <= MAX_OUTPUT_SAMPLES)
        .ok_or_else(|| {
            invalid(format!(
                "The output would be too long ({} frames of {} channels, at most {} samples)",
                frames, channels, MAX_OUTPUT_SAMPLES
            ))
        })
}

/// Converts decibels to a linear gain.
pub fn db_to_gain(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn seconds_defaults_and_rejects_negative() {
        let p = map(json!({ "before": 0.5, "after": -1, "text": "x" }));
        assert_eq!(seconds(&p, "before", 0.0).unwrap(), 0.5);
        assert_eq!(seconds(&p, "missing", 0.25).unwrap(), 0.25);
        assert!(seconds(&p, "after", 0.0).is_err());
        assert!(seconds(&p, "text", 0.0).is_err());
    }

    #[test]
    fn choice_validates() {
        let p = map(json!({ "shape": "cosine", "bad": "square" }));
        assert_eq!(choice(&p, "shape", &["linear", "cosine"]).unwrap(), "cosine");
        assert_eq!(choice(&p, "none", &["linear", "cosine"]).unwrap(), "linear");
        assert!(choice(&p, "bad", &["linear", "cosine"]).is_err());
    }

    #[test]
    fn output_size_is_bounded() {
        assert_eq!(output_samples(1000, 2).unwrap(), 2000);
        assert_eq!(output_samples(MAX_OUTPUT_SAMPLES, 1).unwrap(), MAX_OUTPUT_SAMPLES);
        assert!(output_samples(MAX_OUTPUT_SAMPLES, 2).is_err());
        assert!(output_samples(usize::MAX, 3).is_err());
    }

    #[test]
    fn gain_conversion() {
        assert_eq!(db_to_gain(0.0), 1.0);
        assert!((db_to_gain(-20.0) - 0.1).abs() < 1e-6);
    }
}
