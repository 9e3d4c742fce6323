//! Accessors over the untyped settings map sent by the controller.
//!
//! The controller is not consistent about value types: numbers and booleans
//! sometimes arrive as strings, so every accessor accepts both.

use serde_json::{Map, Value};
use std::time::Duration;

use super::CheckError;

pub(super) type Settings = Map<String, Value>;

/// Upper bound for any per-check timeout, in seconds
pub(super) const MAX_TIMEOUT_SECS: f64 = 10.0;

pub(super) fn required_str(settings: &Settings, field: &'static str) -> Result<String, CheckError> {
    optional_str(settings, field)?.ok_or_else(|| CheckError::invalid(field, "is required"))
}

pub(super) fn optional_str(settings: &Settings, field: &'static str) -> Result<Option<String>, CheckError> {
    match settings.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(CheckError::invalid(field, format!("expected a string, got {other}"))),
    }
}

pub(super) fn optional_f64(settings: &Settings, field: &'static str) -> Result<Option<f64>, CheckError> {
    match settings.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| CheckError::invalid(field, "is not a finite number")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Some)
            .ok_or_else(|| CheckError::invalid(field, format!("'{s}' is not a finite number"))),
        Some(other) => Err(CheckError::invalid(field, format!("expected a number, got {other}"))),
    }
}

pub(super) fn optional_u16(settings: &Settings, field: &'static str) -> Result<Option<u16>, CheckError> {
    match optional_f64(settings, field)? {
        None => Ok(None),
        Some(value) if value.fract() == 0.0 && (1.0..=f64::from(u16::MAX)).contains(&value) => {
            Ok(Some(value as u16))
        }
        Some(value) => Err(CheckError::invalid(field, format!("{value} is not a valid port"))),
    }
}

pub(super) fn optional_bool(settings: &Settings, field: &'static str) -> Result<Option<bool>, CheckError> {
    match settings.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(CheckError::invalid(field, format!("'{s}' is not a boolean"))),
        },
        Some(other) => Err(CheckError::invalid(field, format!("expected a boolean, got {other}"))),
    }
}

/// `timeout` in seconds, defaulting to `default` and bounded to (0, 10]
pub(super) fn timeout(settings: &Settings, default: f64) -> Result<Duration, CheckError> {
    let secs = optional_f64(settings, "timeout")?.unwrap_or(default);
    if !secs.is_finite() || secs <= 0.0 || secs > MAX_TIMEOUT_SECS {
        return Err(CheckError::invalid(
            "timeout",
            format!("{secs} is outside (0, {MAX_TIMEOUT_SECS}] seconds"),
        ));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| CheckError::invalid("timeout", e.to_string()))
}

/// Milliseconds with sub-millisecond precision
pub(super) fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
