//! Timestamp parsing and the clock-skew trust rules.
//!
//! Log timestamps come from whatever clock the agent saw. When a timestamp is
//! further than the configured tolerance from our own reference it is treated
//! as *untrustworthy*: admission then errs toward letting the event through,
//! and ranking falls back to file modification times.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::time::Duration;

/// Decides whether log timestamps can be compared against local time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampOracle {
    tolerance: Option<chrono::Duration>,
}

impl TimestampOracle {
    /// `None` (or zero) trusts every timestamp.
    pub fn new(tolerance: Option<Duration>) -> Self {
        Self {
            tolerance: tolerance
                .filter(|t| !t.is_zero())
                .map(crate::clock::chrono_duration),
        }
    }

    pub fn tolerance(&self) -> Option<chrono::Duration> {
        self.tolerance
    }

    /// `|ts - reference| <= tolerance`, or always true without a tolerance.
    pub fn trustworthy(&self, ts: DateTime<Utc>, reference: DateTime<Utc>) -> bool {
        match self.tolerance {
            None => true,
            Some(tolerance) => (ts - reference).abs() <= tolerance,
        }
    }

    /// Admission rule for an event timestamp against a start-time floor.
    ///
    /// No floor admits everything; a missing timestamp is rejected; an
    /// untrustworthy timestamp is admitted regardless of its value.
    pub fn admits(&self, ts: Option<DateTime<Utc>>, floor: Option<DateTime<Utc>>) -> bool {
        let Some(floor) = floor else {
            return true;
        };
        let Some(ts) = ts else {
            return false;
        };
        if !self.trustworthy(ts, floor) {
            return true;
        }
        ts >= floor
    }
}

/// Parse an ISO-8601 timestamp. Naive values are taken as UTC.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse a history-index `ts`: epoch seconds as a number or numeric string.
pub fn parse_epoch(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    from_epoch_secs(secs)
}

/// Fractional epoch seconds to a UTC timestamp.
pub fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_484_800 + secs, 0).unwrap()
    }

    #[test]
    fn test_no_tolerance_trusts_everything() {
        let oracle = TimestampOracle::new(None);
        assert!(oracle.trustworthy(at(0), at(86_400)));
        let zero = TimestampOracle::new(Some(Duration::ZERO));
        assert_eq!(zero.tolerance(), None);
    }

    #[test]
    fn test_tolerance_window() {
        let oracle = TimestampOracle::new(Some(Duration::from_secs(60)));
        assert!(oracle.trustworthy(at(60), at(0)));
        assert!(oracle.trustworthy(at(-60), at(0)));
        assert!(!oracle.trustworthy(at(61), at(0)));
    }

    #[test]
    fn test_admission() {
        let oracle = TimestampOracle::new(Some(Duration::from_secs(60)));
        let floor = Some(at(0));

        assert!(oracle.admits(None, None));
        assert!(!oracle.admits(None, floor));
        assert!(oracle.admits(Some(at(5)), floor));
        assert!(!oracle.admits(Some(at(-5)), floor));
        // Too far off to compare: admitted rather than dropped.
        assert!(oracle.admits(Some(at(-3600)), floor));
    }

    #[test]
    fn test_parse_iso() {
        let z = parse_iso("2026-01-04T00:00:00Z").unwrap();
        let offset = parse_iso("2026-01-04T01:00:00+01:00").unwrap();
        let naive = parse_iso("2026-01-04T00:00:00.250").unwrap();
        assert_eq!(z, offset);
        assert_eq!((naive - z).num_milliseconds(), 250);
        assert!(parse_iso("yesterday").is_none());
    }

    #[test]
    fn test_parse_epoch() {
        let expected = Utc.timestamp_opt(1_767_484_800, 500_000_000).unwrap();
        assert_eq!(parse_epoch(&json!(1_767_484_800.5)), Some(expected));
        assert_eq!(parse_epoch(&json!("1767484800.5")), Some(expected));
        assert_eq!(parse_epoch(&json!("soon")), None);
        assert_eq!(parse_epoch(&json!(null)), None);
    }
}
