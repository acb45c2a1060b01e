//! Start time metric handling
//!
//! When configured, cumulative points take their start time from a metric
//! the target reports about itself instead of from cross-scrape tracking.

use regex::Regex;

use crate::error::ReceiverResult;
use crate::model::MetricFamily;

/// Metric matched when no regex is configured
pub const DEFAULT_START_TIME_METRIC: &str = "process_start_time_seconds";

#[derive(Debug, Clone, Default)]
pub struct StartTimeMatcher {
    regex: Option<Regex>,
}

impl StartTimeMatcher {
    pub fn new(regex: Option<&str>) -> ReceiverResult<Self> {
        let regex = regex.map(Regex::new).transpose()?;
        Ok(Self { regex })
    }

    pub fn matches(&self, metric_name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(metric_name),
            None => metric_name == DEFAULT_START_TIME_METRIC,
        }
    }
}

/// Split float seconds since the epoch into whole seconds and nanoseconds
pub fn timestamp_from_secs_f64(ts: f64) -> (i64, i32) {
    let secs = ts.trunc() as i64;
    let nanos = ((ts - secs as f64) * 1e9) as i32;
    (secs, nanos)
}

/// Float seconds since the epoch as unix nanoseconds, clamped at zero
pub fn unix_nanos_from_secs_f64(ts: f64) -> u64 {
    let (secs, nanos) = timestamp_from_secs_f64(ts);
    if secs < 0 {
        return 0;
    }
    (secs as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(nanos.max(0) as u64)
}

/// Usable start time, if any. Absent, zero, negative and non-finite values
/// (including the stale marker) are rejected.
pub fn usable_start_time(start_time: Option<f64>) -> Option<f64> {
    start_time.filter(|t| t.is_finite() && *t > 0.0)
}

/// Stamp `start_time` (seconds since the epoch) onto every point of every
/// cumulative family
pub fn adjust_start_timestamp(start_time: f64, families: &mut [MetricFamily]) {
    let start_time_unix_nano = unix_nanos_from_secs_f64(start_time);
    for family in families {
        if !family.metric_type.is_cumulative() {
            continue;
        }
        for point in &mut family.points {
            point.start_time_unix_nano = start_time_unix_nano;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataPoint, Labels, MetricType, PointValue};

    fn family(name: &str, metric_type: MetricType) -> MetricFamily {
        MetricFamily {
            name: name.to_string(),
            metric_type,
            help: String::new(),
            unit: String::new(),
            points: vec![DataPoint {
                attributes: Labels::new(),
                start_time_unix_nano: 7,
                time_unix_nano: 9,
                value: PointValue::Number(1.0),
                stale: false,
            }],
        }
    }

    #[test]
    fn test_default_matcher() {
        let matcher = StartTimeMatcher::default();
        assert!(matcher.matches("process_start_time_seconds"));
        assert!(!matcher.matches("process_start_time_seconds_total"));
    }

    #[test]
    fn test_regex_matcher() {
        let matcher = StartTimeMatcher::new(Some("^(.+_)*process_start_time_seconds$")).unwrap();
        assert!(matcher.matches("app_process_start_time_seconds"));
        assert!(matcher.matches("process_start_time_seconds"));
        assert!(!matcher.matches("process_cpu_seconds_total"));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(StartTimeMatcher::new(Some("(")).is_err());
    }

    #[test]
    fn test_timestamp_from_secs_f64() {
        let (secs, nanos) = timestamp_from_secs_f64(1_600_000_000.25);
        assert_eq!(secs, 1_600_000_000);
        // float precision around 1.6e9 is ~2.4e-7s
        assert!((nanos - 250_000_000).abs() < 1_000);
        assert_eq!(timestamp_from_secs_f64(12.0), (12, 0));
    }

    #[test]
    fn test_usable_start_time() {
        assert_eq!(usable_start_time(Some(10.5)), Some(10.5));
        assert_eq!(usable_start_time(Some(0.0)), None);
        assert_eq!(usable_start_time(Some(f64::NAN)), None);
        assert_eq!(usable_start_time(None), None);
    }

    #[test]
    fn test_adjust_start_timestamp_skips_gauges() {
        let mut families = vec![
            family("requests", MetricType::Counter),
            family("temperature", MetricType::Gauge),
            family("mystery", MetricType::Untyped),
            family("latency", MetricType::Histogram),
            family("rpc", MetricType::Summary),
        ];

        adjust_start_timestamp(100.5, &mut families);

        assert_eq!(families[0].points[0].start_time_unix_nano, 100_500_000_000);
        assert_eq!(families[1].points[0].start_time_unix_nano, 7);
        assert_eq!(families[2].points[0].start_time_unix_nano, 7);
        assert_eq!(families[3].points[0].start_time_unix_nano, 100_500_000_000);
        assert_eq!(families[4].points[0].start_time_unix_nano, 100_500_000_000);
    }
}
