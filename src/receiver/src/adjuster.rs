//! Cross-scrape adjustment of cumulative series
//!
//! Prometheus counters restart from zero when the target process restarts.
//! The [`JobsMap`] remembers, for every `(job, instance)` and every series of
//! that target, the last raw value, when it was seen, the series' start time
//! and the total carried over from before earlier resets. The
//! [`MetricsAdjuster`] uses it to rebase cumulative values so that the
//! emitted series never decreases.

use std::collections::HashMap;
use std::sync::Arc;

use common::ResetPolicy;
use tokio::sync::Mutex;

use crate::model::{DataPoint, HistogramValue, Labels, MetricFamily, PointValue, SummaryValue};
use crate::staleness::is_stale_value;

/// Process-lifetime adjustment state, keyed by `(job, instance)`.
///
/// Entries are never expired here; whoever tracks target lifecycles calls
/// [`JobsMap::remove`] once a target is gone.
#[derive(Debug, Default)]
pub struct JobsMap {
    jobs: Mutex<HashMap<(String, String), Arc<Mutex<TimeseriesMap>>>>,
}

impl JobsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Series state of one target, created on first access
    pub async fn get(&self, job: &str, instance: &str) -> Arc<Mutex<TimeseriesMap>> {
        let mut jobs = self.jobs.lock().await;
        jobs.entry((job.to_string(), instance.to_string()))
            .or_default()
            .clone()
    }

    /// Forget a target. Returns whether it was known.
    pub async fn remove(&self, job: &str, instance: &str) -> bool {
        self.jobs
            .lock()
            .await
            .remove(&(job.to_string(), instance.to_string()))
            .is_some()
    }

    /// Number of targets with state
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

/// Per-series state of one target
#[derive(Debug, Default)]
pub struct TimeseriesMap {
    series: HashMap<String, TimeseriesInfo>,
}

impl TimeseriesMap {
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[derive(Debug, Clone)]
struct TimeseriesInfo {
    start_time_unix_nano: u64,
    last_time_unix_nano: u64,
    /// Last raw value as reported by the target
    previous: PointValue,
    /// Sum of the raw values reached before each detected reset
    carried: PointValue,
}

impl TimeseriesInfo {
    fn first_observation(point: &DataPoint) -> Self {
        let start_time_unix_nano = if point.start_time_unix_nano > 0 {
            point.start_time_unix_nano
        } else {
            point.time_unix_nano
        };
        Self {
            start_time_unix_nano,
            last_time_unix_nano: point.time_unix_nano,
            previous: point.value.clone(),
            carried: zero_like(&point.value),
        }
    }
}

/// Key identifying a series within a target: family name plus attributes
fn series_key(family_name: &str, attributes: &Labels) -> String {
    format!("{family_name}{{{}}}", attributes.key())
}

fn zero_like(value: &PointValue) -> PointValue {
    match value {
        PointValue::Number(_) => PointValue::Number(0.0),
        PointValue::Histogram(h) => PointValue::Histogram(HistogramValue {
            count: 0,
            sum: 0.0,
            bounds: h.bounds.clone(),
            bucket_counts: vec![0; h.bucket_counts.len()],
        }),
        PointValue::Summary(_) => PointValue::Summary(SummaryValue::default()),
    }
}

/// Whether carried values of `previous` can be applied to `current`
fn same_layout(previous: &PointValue, current: &PointValue) -> bool {
    match (previous, current) {
        (PointValue::Number(_), PointValue::Number(_)) => true,
        (PointValue::Histogram(p), PointValue::Histogram(c)) => {
            p.bounds == c.bounds && p.bucket_counts.len() == c.bucket_counts.len()
        }
        (PointValue::Summary(_), PointValue::Summary(_)) => true,
        _ => false,
    }
}

/// NaN and infinite raw values cannot serve as a baseline
fn is_finite_value(value: &PointValue) -> bool {
    match value {
        PointValue::Number(v) => v.is_finite(),
        PointValue::Histogram(h) => h.sum.is_finite(),
        PointValue::Summary(s) => s.sum.is_finite(),
    }
}

/// A lower count means the target restarted. A lower sum only counts when no
/// observation was added, since negative observations may lower it.
fn is_reset(previous: &PointValue, current: &PointValue) -> bool {
    match (previous, current) {
        (PointValue::Number(p), PointValue::Number(c)) => c < p,
        (PointValue::Histogram(p), PointValue::Histogram(c)) => {
            c.count < p.count || (c.count == p.count && c.sum < p.sum)
        }
        (PointValue::Summary(p), PointValue::Summary(c)) => {
            c.count < p.count || (c.count == p.count && c.sum < p.sum)
        }
        _ => false,
    }
}

/// Add the cumulative parts of `addend` to `target`. Quantiles are not
/// cumulative and are left alone.
fn add_cumulative(target: &mut PointValue, addend: &PointValue) {
    match (target, addend) {
        (PointValue::Number(t), PointValue::Number(a)) => *t += a,
        (PointValue::Histogram(t), PointValue::Histogram(a)) => {
            t.count = t.count.saturating_add(a.count);
            t.sum += a.sum;
            for (bucket, carried) in t.bucket_counts.iter_mut().zip(&a.bucket_counts) {
                *bucket = bucket.saturating_add(*carried);
            }
        }
        (PointValue::Summary(t), PointValue::Summary(a)) => {
            t.count = t.count.saturating_add(a.count);
            t.sum += a.sum;
        }
        _ => {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointAdjustment {
    Keep,
    Suppress,
}

/// Counts reported by [`MetricsAdjuster::adjust`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AdjustOutcome {
    /// Series whose raw value went down in this batch
    pub resets: usize,
    /// Transitional points removed under [`ResetPolicy::Suppress`]
    pub suppressed: usize,
}

/// Rewrites one target's batch against its series state
pub struct MetricsAdjuster<'a> {
    timeseries: &'a mut TimeseriesMap,
    policy: ResetPolicy,
}

impl<'a> MetricsAdjuster<'a> {
    pub fn new(timeseries: &'a mut TimeseriesMap, policy: ResetPolicy) -> Self {
        Self { timeseries, policy }
    }

    /// Adjust every cumulative point of the batch in place. Gauges and
    /// untyped families pass through. Stale and non-finite points pass
    /// through without touching the state. Families left without points are
    /// removed.
    pub fn adjust(&mut self, families: &mut Vec<MetricFamily>) -> AdjustOutcome {
        let mut outcome = AdjustOutcome::default();

        for family in families.iter_mut() {
            if !family.metric_type.is_cumulative() {
                continue;
            }
            let family_name = family.name.as_str();
            family.points.retain_mut(|point| {
                let adjustment = self.adjust_point(family_name, point, &mut outcome);
                adjustment == PointAdjustment::Keep
            });
        }

        families.retain(|family| !family.points.is_empty());
        outcome
    }

    fn adjust_point(
        &mut self,
        family_name: &str,
        point: &mut DataPoint,
        outcome: &mut AdjustOutcome,
    ) -> PointAdjustment {
        if is_stale_value(&point.value) || !is_finite_value(&point.value) {
            return PointAdjustment::Keep;
        }

        let key = series_key(family_name, &point.attributes);
        let Some(info) = self.timeseries.series.get_mut(&key) else {
            self.timeseries
                .series
                .insert(key, TimeseriesInfo::first_observation(point));
            return PointAdjustment::Keep;
        };

        if !same_layout(&info.previous, &point.value) {
            tracing::debug!(series = %key, "Series layout changed, restarting it");
            *info = TimeseriesInfo::first_observation(point);
            return PointAdjustment::Keep;
        }

        let reset = is_reset(&info.previous, &point.value);
        if reset {
            tracing::debug!(
                series = %key,
                last_seen = info.last_time_unix_nano,
                "Counter reset detected"
            );
            add_cumulative(&mut info.carried, &info.previous);
            outcome.resets += 1;
        }

        info.previous = point.value.clone();
        info.last_time_unix_nano = point.time_unix_nano;

        add_cumulative(&mut point.value, &info.carried);
        point.start_time_unix_nano = info.start_time_unix_nano;

        if reset && self.policy == ResetPolicy::Suppress {
            outcome.suppressed += 1;
            return PointAdjustment::Suppress;
        }
        PointAdjustment::Keep
    }
}
