//! `delay` step handler
//!
//! Sleeps for `seconds`, `milliseconds`, or a `duration` string such as
//! `1h30m`, `90s` or `250ms`. Result: `{delayed_ms}`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::engine::error::HandlerError;
use crate::engine::instance::{StepRuntime, WorkflowInstance};
use crate::engine::registry::StepHandler;

/// Parse a duration string (e.g. "1h30m", "5s", "250ms", "2d").
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek().copied() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }

        let mut unit = String::new();
        while let Some(c) = chars.peek().copied() {
            if c.is_ascii_alphabetic() {
                unit.push(c);
                chars.next();
            } else {
                break;
            }
        }

        if number.is_empty() {
            return Err(match chars.peek() {
                Some(c) if unit.is_empty() => format!("unexpected character '{}'", c),
                _ => format!("expected number before unit '{}'", unit),
            });
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number: {}", number))?;

        let secs = match unit.as_str() {
            "" | "s" => value,
            "ms" => value / 1000.0,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            "d" => value * 86400.0,
            other => return Err(format!("unknown unit '{}'", other)),
        };
        let part = Duration::try_from_secs_f64(secs)
            .map_err(|_| format!("duration out of range: {}{}", number, unit))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| "duration out of range".to_string())?;
    }

    Ok(total)
}

fn requested_delay(step: &StepRuntime) -> Result<Duration, HandlerError> {
    if let Some(text) = step.param_str("duration") {
        return parse_duration(text).map_err(|reason| HandlerError::invalid("duration", reason));
    }
    if let Some(ms) = step.param_f64("milliseconds") {
        if ms < 0.0 {
            return Err(HandlerError::invalid("milliseconds", "must not be negative"));
        }
        return Ok(Duration::from_micros((ms * 1000.0).round() as u64));
    }
    if let Some(secs) = step.param_f64("seconds") {
        if secs < 0.0 {
            return Err(HandlerError::invalid("seconds", "must not be negative"));
        }
        return Duration::try_from_secs_f64(secs)
            .map_err(|e| HandlerError::invalid("seconds", e.to_string()));
    }
    Err(HandlerError::MissingParameter(
        "delay step requires 'seconds', 'milliseconds' or 'duration'".to_string(),
    ))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DelayHandler;

#[async_trait]
impl StepHandler for DelayHandler {
    async fn execute(
        &self,
        _instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        let delay = requested_delay(step)?;
        debug!(step_id = %step.id, ?delay, "Sleeping");
        tokio::time::sleep(delay).await;
        Ok(json!({ "delayed_ms": delay.as_millis() as u64 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::handlers::test_support::instance_with;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("99999999999999999999999d").is_err());
        assert!(parse_duration("10000000000000000000s10000000000000000000s").is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_values_are_invalid() {
        for params in [
            json!({"seconds": 1e300}),
            json!({"duration": "99999999999999999999999h"}),
        ] {
            let (instance, step) = instance_with("delay", params, json!({}));
            assert!(matches!(
                DelayHandler.execute(&instance, &step).await,
                Err(HandlerError::InvalidParameter { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_sleeps_for_requested_time() {
        let (instance, step) = instance_with("delay", json!({"milliseconds": 50}), json!({}));
        let started = tokio::time::Instant::now();
        let result = DelayHandler.execute(&instance, &step).await.unwrap();
        assert_eq!(result["delayed_ms"], json!(50));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_requires_a_duration() {
        let (instance, step) = instance_with("delay", json!({}), json!({}));
        assert!(DelayHandler.execute(&instance, &step).await.is_err());

        let (instance, step) = instance_with("delay", json!({"duration": "soon"}), json!({}));
        assert!(matches!(
            DelayHandler.execute(&instance, &step).await,
            Err(HandlerError::InvalidParameter { .. })
        ));
    }
}
