use crate::monitoring::types::{chart_label, TelemetrySample, MAX_CHART_POINTS};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Latest known metric values for one order. Zero-valued until the first
/// sample arrives, so consumers can render unconditionally.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMetricsSnapshot {
    pub temperature: f64,
    pub caudal: f64,
    pub density: f64,
    pub accumulated_mass: f64,
    pub timestamp_ms: Option<i64>,
}

/// Bounded rolling history for one order's charts: five parallel sequences,
/// always equal in length, capped at [`MAX_CHART_POINTS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderChartSeries {
    pub labels: Vec<String>,
    pub accumulated_mass: Vec<f64>,
    pub caudal: Vec<f64>,
    pub temperature: Vec<f64>,
    pub density: Vec<f64>,
}

impl OrderChartSeries {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Default)]
struct ChartBuffers {
    labels: VecDeque<String>,
    accumulated_mass: VecDeque<f64>,
    caudal: VecDeque<f64>,
    temperature: VecDeque<f64>,
    density: VecDeque<f64>,
}

impl ChartBuffers {
    fn push(&mut self, sample: &TelemetrySample) {
        self.labels.push_back(chart_label(sample.timestamp_ms));
        self.accumulated_mass.push_back(sample.accumulated_mass);
        self.caudal.push_back(sample.caudal);
        self.temperature.push_back(sample.temperature);
        self.density.push_back(sample.density);

        while self.labels.len() > MAX_CHART_POINTS {
            self.labels.pop_front();
            self.accumulated_mass.pop_front();
            self.caudal.pop_front();
            self.temperature.pop_front();
            self.density.pop_front();
        }
    }

    fn to_series(&self) -> OrderChartSeries {
        OrderChartSeries {
            labels: self.labels.iter().cloned().collect(),
            accumulated_mass: self.accumulated_mass.iter().copied().collect(),
            caudal: self.caudal.iter().copied().collect(),
            temperature: self.temperature.iter().copied().collect(),
            density: self.density.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct AggregatorMaps {
    snapshots: HashMap<i64, OrderMetricsSnapshot>,
    series: HashMap<i64, ChartBuffers>,
}

/// In-memory telemetry aggregation, shared between the push pipeline and
/// whatever renders it. State is created lazily per order and bounded by
/// [`LoadAggregator::cleanup`].
#[derive(Debug, Default)]
pub struct LoadAggregator {
    inner: Mutex<AggregatorMaps>,
}

impl LoadAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sample(&self, order_id: i64, sample: &TelemetrySample) {
        let mut maps = self.inner.lock();

        let snapshot = maps.snapshots.entry(order_id).or_default();
        snapshot.temperature = sample.temperature;
        snapshot.caudal = sample.caudal;
        snapshot.density = sample.density;
        snapshot.accumulated_mass = sample.accumulated_mass;
        snapshot.timestamp_ms = Some(sample.timestamp_ms);

        maps.series.entry(order_id).or_default().push(sample);
    }

    /// Replays historical samples in the order given, typically after an
    /// order-history backfill fetch. Returns how many samples were applied.
    pub fn backfill(&self, order_id: i64, samples: &[TelemetrySample]) -> usize {
        for sample in samples {
            self.record_sample(order_id, sample);
        }
        samples.len()
    }

    pub fn snapshot(&self, order_id: i64) -> OrderMetricsSnapshot {
        self.inner
            .lock()
            .snapshots
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn series(&self, order_id: i64) -> OrderChartSeries {
        self.inner
            .lock()
            .series
            .entry(order_id)
            .or_default()
            .to_series()
    }

    pub fn has_series(&self, order_id: i64) -> bool {
        self.inner
            .lock()
            .series
            .get(&order_id)
            .is_some_and(|buffers| !buffers.labels.is_empty())
    }

    /// Drops all state for orders absent from `active_order_ids`. The caller
    /// is expected to invoke this on every order-list refresh; the aggregator
    /// has no independent notion of order lifecycle.
    pub fn cleanup(&self, active_order_ids: &[i64]) {
        let keep: HashSet<i64> = active_order_ids.iter().copied().collect();
        let mut maps = self.inner.lock();
        maps.snapshots.retain(|order_id, _| keep.contains(order_id));
        maps.series.retain(|order_id, _| keep.contains(order_id));
    }

    pub fn tracked_order_ids(&self) -> Vec<i64> {
        let maps = self.inner.lock();
        let mut ids: Vec<i64> = maps
            .snapshots
            .keys()
            .chain(maps.series.keys())
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp_ms: i64, accumulated_mass: f64, caudal: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp_ms,
            accumulated_mass,
            caudal,
            temperature: 18.0,
            density: 0.83,
        }
    }

    #[test]
    fn updates_snapshot_and_appends_series_points() {
        let aggregator = LoadAggregator::new();

        aggregator.record_sample(
            7,
            &TelemetrySample {
                timestamp_ms: 60_000,
                accumulated_mass: 100.0,
                caudal: 500.0,
                temperature: 18.0,
                density: 0.83,
            },
        );
        aggregator.record_sample(
            7,
            &TelemetrySample {
                timestamp_ms: 61_000,
                accumulated_mass: 150.0,
                caudal: 510.0,
                temperature: 18.2,
                density: 0.83,
            },
        );

        let snapshot = aggregator.snapshot(7);
        assert_eq!(snapshot.accumulated_mass, 150.0);
        assert_eq!(snapshot.caudal, 510.0);
        assert_eq!(snapshot.temperature, 18.2);
        assert_eq!(snapshot.timestamp_ms, Some(61_000));

        let series = aggregator.series(7);
        assert_eq!(series.accumulated_mass, vec![100.0, 150.0]);
        assert_eq!(series.caudal, vec![500.0, 510.0]);
        assert_eq!(series.temperature, vec![18.0, 18.2]);
        assert_eq!(series.labels.len(), 2);
    }

    #[test]
    fn caps_series_at_maximum_points_with_fifo_eviction() {
        let aggregator = LoadAggregator::new();

        for step in 0..(MAX_CHART_POINTS as i64 + 25) {
            aggregator.record_sample(1, &sample(step * 1_000, step as f64, 500.0));
        }

        let series = aggregator.series(1);
        assert_eq!(series.len(), MAX_CHART_POINTS);
        assert_eq!(series.accumulated_mass.len(), MAX_CHART_POINTS);
        assert_eq!(series.caudal.len(), MAX_CHART_POINTS);
        assert_eq!(series.temperature.len(), MAX_CHART_POINTS);
        assert_eq!(series.density.len(), MAX_CHART_POINTS);
        assert_eq!(series.labels.len(), MAX_CHART_POINTS);

        // Oldest points were evicted first; the tail is exactly the newest N.
        assert_eq!(series.accumulated_mass.first(), Some(&25.0));
        assert_eq!(series.accumulated_mass.last(), Some(&124.0));
    }

    #[test]
    fn snapshot_of_unknown_order_is_zero_valued() {
        let aggregator = LoadAggregator::new();
        let snapshot = aggregator.snapshot(99);

        assert_eq!(snapshot, OrderMetricsSnapshot::default());
        assert_eq!(snapshot.accumulated_mass, 0.0);
        assert_eq!(snapshot.timestamp_ms, None);
    }

    #[test]
    fn series_of_unknown_order_is_empty_but_well_formed() {
        let aggregator = LoadAggregator::new();
        let series = aggregator.series(99);

        assert!(series.is_empty());
        assert!(series.accumulated_mass.is_empty());
        assert!(series.density.is_empty());
        assert!(!aggregator.has_series(99));
    }

    #[test]
    fn cleanup_drops_inactive_orders_and_preserves_active_ones() {
        let aggregator = LoadAggregator::new();
        aggregator.record_sample(5, &sample(60_000, 10.0, 100.0));
        aggregator.record_sample(7, &sample(60_000, 100.0, 500.0));
        let preserved = aggregator.series(7);

        aggregator.cleanup(&[7]);

        assert!(!aggregator.has_series(5));
        assert_eq!(aggregator.snapshot(5), OrderMetricsSnapshot::default());
        assert_eq!(aggregator.series(7), preserved);
        assert_eq!(aggregator.snapshot(7).accumulated_mass, 100.0);
        assert_eq!(aggregator.tracked_order_ids(), vec![7]);
    }

    #[test]
    fn has_series_requires_at_least_one_sample() {
        let aggregator = LoadAggregator::new();
        assert!(!aggregator.has_series(3));

        // Reading lazily initializes the entry but records nothing.
        let _ = aggregator.series(3);
        assert!(!aggregator.has_series(3));

        aggregator.record_sample(3, &sample(60_000, 1.0, 1.0));
        assert!(aggregator.has_series(3));
    }

    #[test]
    fn backfill_replays_samples_in_order() {
        let aggregator = LoadAggregator::new();
        let history = vec![
            sample(60_000, 100.0, 500.0),
            sample(61_000, 150.0, 510.0),
            sample(62_000, 200.0, 505.0),
        ];

        let applied = aggregator.backfill(7, &history);

        assert_eq!(applied, 3);
        assert_eq!(aggregator.series(7).accumulated_mass, vec![100.0, 150.0, 200.0]);
        assert_eq!(aggregator.snapshot(7).accumulated_mass, 200.0);
    }
}
