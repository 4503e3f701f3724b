//! Retry/repeat loop configuration for a step.
//!
//! A loop repeats its step body up to `count` times, sleeping a fixed
//! `interval` or an exponential backoff bounded by `minInterval` and
//! `maxInterval` before each iteration, and stops early when the `until`
//! condition becomes true.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};

pub const DEFAULT_COUNT: usize = 3;
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loop {
    /// Count expression, evaluated once before the first iteration.
    pub count: Option<String>,
    pub interval: Option<Duration>,
    pub min_interval: Option<Duration>,
    pub max_interval: Option<Duration>,
    pub until: Option<String>,
}

impl Loop {
    /// Parse a `loop:` value: a bare integer is a pure repeat count, a
    /// mapping configures count/interval/backoff/until.
    pub fn parse(v: &Value) -> Result<Self> {
        match v {
            Value::Number(n) => {
                let count = n
                    .as_u64()
                    .ok_or_else(|| Error::Build(format!("invalid loop count: {n}")))?;
                Ok(Loop {
                    count: Some(count.to_string()),
                    ..Default::default()
                })
            }
            Value::Object(m) => {
                let mut lp = Loop::default();
                for (k, val) in m {
                    match k.as_str() {
                        "count" => {
                            lp.count = Some(match val {
                                Value::Number(n) => n.to_string(),
                                Value::String(s) => s.clone(),
                                other => {
                                    return Err(Error::Build(format!(
                                        "invalid loop count: {other}"
                                    )))
                                }
                            });
                        }
                        "interval" => lp.interval = Some(parse_duration(val)?),
                        "minInterval" => lp.min_interval = Some(parse_duration(val)?),
                        "maxInterval" => lp.max_interval = Some(parse_duration(val)?),
                        "until" => {
                            lp.until = Some(match val {
                                Value::String(s) => s.clone(),
                                other => {
                                    return Err(Error::Build(format!(
                                        "invalid loop until: {other}"
                                    )))
                                }
                            });
                        }
                        other => {
                            return Err(Error::Build(format!("unknown loop field: {other}")));
                        }
                    }
                }
                if lp.interval.is_some() && (lp.min_interval.is_some() || lp.max_interval.is_some())
                {
                    return Err(Error::Build(
                        "loop interval and minInterval/maxInterval are mutually exclusive".into(),
                    ));
                }
                Ok(lp)
            }
            other => Err(Error::Build(format!("invalid loop: {other}"))),
        }
    }

    /// Sleep before iteration `j` (0-indexed): the fixed interval when one
    /// is set, otherwise exponential backoff bounded by min/max. A pure
    /// count loop without `until` does not wait.
    pub fn delay(&self, iteration: usize) -> Duration {
        if let Some(d) = self.interval {
            return d;
        }
        if self.min_interval.is_none() && self.max_interval.is_none() && self.until.is_none() {
            return Duration::ZERO;
        }
        let min = self.min_interval.unwrap_or(DEFAULT_MIN_INTERVAL);
        let max = self.max_interval.unwrap_or(DEFAULT_MAX_INTERVAL);
        let exp = 2f64.powi(iteration.min(63) as i32);
        let backoff = min.as_secs_f64() * exp;
        if backoff >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(backoff)
        }
    }

    /// Human-readable schedule for error messages.
    pub fn schedule_desc(&self, count: usize) -> String {
        match self.interval {
            Some(d) => format!("count: {count}, interval: {}", humantime::format_duration(d)),
            None => format!(
                "count: {count}, minInterval: {}, maxInterval: {}",
                humantime::format_duration(self.min_interval.unwrap_or(DEFAULT_MIN_INTERVAL)),
                humantime::format_duration(self.max_interval.unwrap_or(DEFAULT_MAX_INTERVAL)),
            ),
        }
    }
}

fn parse_duration(v: &Value) -> Result<Duration> {
    match v {
        Value::Number(n) => {
            // Bare numbers are seconds.
            let secs = n
                .as_f64()
                .filter(|s| *s >= 0.0)
                .ok_or_else(|| Error::Build(format!("invalid duration: {n}")))?;
            Ok(Duration::from_secs_f64(secs))
        }
        Value::String(s) => humantime::parse_duration(s.trim())
            .map_err(|e| Error::Build(format!("invalid duration {s:?}: {e}"))),
        other => Err(Error::Build(format!("invalid duration: {other}"))),
    }
}

/// Cancellation-aware sleep; every wait in the engine goes through here.
pub async fn wait(d: Duration, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Canceled);
    }
    if d.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Canceled),
        _ = tokio::time::sleep(d) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_count() {
        let lp = Loop::parse(&json!(5)).unwrap();
        assert_eq!(lp.count.as_deref(), Some("5"));
        assert_eq!(lp.until, None);
        assert_eq!(lp.delay(0), Duration::ZERO);
    }

    #[test]
    fn parses_full_config() {
        let lp = Loop::parse(&json!({
            "count": "len(vars.attempts)",
            "minInterval": "100ms",
            "maxInterval": "2s",
            "until": "steps[0].res.status == 200",
        }))
        .unwrap();
        assert_eq!(lp.count.as_deref(), Some("len(vars.attempts)"));
        assert_eq!(lp.min_interval, Some(Duration::from_millis(100)));
        assert_eq!(lp.max_interval, Some(Duration::from_secs(2)));
        assert!(lp.until.is_some());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let lp = Loop::parse(&json!({
            "minInterval": "100ms",
            "maxInterval": "500ms",
            "until": "true",
        }))
        .unwrap();
        assert_eq!(lp.delay(0), Duration::from_millis(100));
        assert_eq!(lp.delay(1), Duration::from_millis(200));
        assert_eq!(lp.delay(2), Duration::from_millis(400));
        assert_eq!(lp.delay(3), Duration::from_millis(500));
        assert_eq!(lp.delay(10), Duration::from_millis(500));
    }

    #[test]
    fn fixed_interval_wins() {
        let lp = Loop::parse(&json!({"count": 3, "interval": "50ms"})).unwrap();
        assert_eq!(lp.delay(0), Duration::from_millis(50));
        assert_eq!(lp.delay(5), Duration::from_millis(50));
    }

    #[test]
    fn until_loop_defaults_to_backoff() {
        let lp = Loop::parse(&json!({"until": "true"})).unwrap();
        assert_eq!(lp.delay(0), DEFAULT_MIN_INTERVAL);
    }

    #[test]
    fn numeric_intervals_are_seconds() {
        let lp = Loop::parse(&json!({"count": 1, "interval": 2})).unwrap();
        assert_eq!(lp.interval, Some(Duration::from_secs(2)));
    }

    #[test]
    fn rejects_conflicting_intervals() {
        let v = json!({"interval": "1s", "minInterval": "1s"});
        assert!(Loop::parse(&v).is_err());
    }

    #[test]
    fn rejects_unknown_fields_and_shapes() {
        assert!(Loop::parse(&json!({"repeat": 3})).is_err());
        assert!(Loop::parse(&json!("three")).is_err());
        assert!(Loop::parse(&json!(-1)).is_err());
    }

    #[tokio::test]
    async fn wait_returns_canceled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = wait(Duration::from_secs(10), &cancel).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn wait_zero_is_immediate() {
        let cancel = CancellationToken::new();
        wait(Duration::ZERO, &cancel).await.unwrap();
    }
}
