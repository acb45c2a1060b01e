//! Stale marker handling
//!
//! Prometheus writes a NaN with a reserved payload when a series disappears
//! from a target. Consumers must be able to tell that apart from a reported
//! value, so such points are flagged and their numeric fields cleared.

use crate::model::{MetricFamily, PointValue};

/// Prometheus stale marker - special NaN value indicating a stale sample
/// Bit pattern: 0x7ff0000000000002
pub const STALE_NAN_BITS: u64 = 0x7ff0_0000_0000_0002;

/// The stale marker as an f64. It is a NaN and never compares equal to itself.
pub const fn stale_nan() -> f64 {
    f64::from_bits(STALE_NAN_BITS)
}

/// Check if a sample value is a Prometheus stale marker
pub fn is_stale_nan(value: f64) -> bool {
    value.to_bits() == STALE_NAN_BITS
}

/// Whether a point value carries the stale marker. Histograms and summaries
/// are judged by their sum.
pub fn is_stale_value(value: &PointValue) -> bool {
    match value {
        PointValue::Number(v) => is_stale_nan(*v),
        PointValue::Histogram(h) => is_stale_nan(h.sum),
        PointValue::Summary(s) => is_stale_nan(s.sum),
    }
}

/// Flag every stale point of the batch and reset its numeric fields
pub fn fix_stale_metrics(families: &mut [MetricFamily]) {
    for family in families {
        for point in &mut family.points {
            if !is_stale_value(&point.value) {
                continue;
            }
            point.stale = true;
            match &mut point.value {
                PointValue::Number(v) => *v = 0.0,
                PointValue::Histogram(h) => {
                    h.count = 0;
                    h.sum = 0.0;
                    h.bounds.clear();
                    h.bucket_counts.clear();
                }
                PointValue::Summary(s) => {
                    s.count = 0;
                    s.sum = 0.0;
                    s.quantiles.clear();
                }
            }
        }
    }
}
