//! Sized data buffers that downstream plotting reads from.
//!
//! [`SensorBuffers`] owns one sliding window per sensor plus two derived
//! tables: a radar entry and a gauge entry per sensor, recomputed on every
//! append from the updated window. The exact aggregate is a policy the
//! controller configures ([`AggregatePolicy`]), not fixed by the store.
//!
//! Invariant: the buffer shape always matches the committed sensor count and
//! window length of the active config. The controller guarantees any resize
//! completes before the sampling timer resumes, so [`SensorBuffers::append`]
//! treats a width mismatch as a contract violation rather than a runtime
//! condition.

use std::collections::VecDeque;

use crate::codec::Reading;
use crate::errors::BufferError;

/// How a derived per-sensor entry is computed from that sensor's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatePolicy {
    /// Most recent sample.
    Latest,
    /// Arithmetic mean over the window.
    WindowMean,
    /// Maximum over the window.
    WindowMax,
}

impl AggregatePolicy {
    fn apply(self, window: &VecDeque<f64>) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        match self {
            AggregatePolicy::Latest => *window.back().unwrap_or(&0.0),
            AggregatePolicy::WindowMean => {
                window.iter().sum::<f64>() / window.len() as f64
            }
            AggregatePolicy::WindowMax => {
                window.iter().copied().fold(f64::MIN, f64::max)
            }
        }
    }
}

/// Read-only copy of all tables, handed to the plotting layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSnapshot {
    /// Per-sensor windows, oldest sample first.
    pub windows: Vec<Vec<f64>>,
    pub radar: Vec<f64>,
    pub gauge: Vec<f64>,
    pub labels: Vec<String>,
    pub window_points: usize,
}

/// The sensor buffer store: per-sensor sliding windows, derived radar and
/// gauge tables, and one series label per sensor.
#[derive(Debug)]
pub struct SensorBuffers {
    windows: Vec<VecDeque<f64>>,
    radar: Vec<f64>,
    gauge: Vec<f64>,
    labels: Vec<String>,
    window_points: usize,
    radar_policy: AggregatePolicy,
    gauge_policy: AggregatePolicy,
    has_data: bool,
}

impl SensorBuffers {
    /// An empty store; call [`resize`](Self::resize) before appending.
    pub fn new(radar_policy: AggregatePolicy, gauge_policy: AggregatePolicy) -> Self {
        Self {
            windows: Vec::new(),
            radar: Vec::new(),
            gauge: Vec::new(),
            labels: Vec::new(),
            window_points: 0,
            radar_policy,
            gauge_policy,
            has_data: false,
        }
    }

    pub fn sensors(&self) -> usize {
        self.windows.len()
    }

    pub fn window_points(&self) -> usize {
        self.window_points
    }

    /// True until the first successful append since the last resize.
    pub fn is_empty(&self) -> bool {
        !self.has_data
    }

    /// Discard all contents and allocate tables for the given topology.
    ///
    /// Must run before any append after a topology change. Fails with
    /// [`BufferError::Allocation`] only on memory exhaustion, which is
    /// fatal upstream.
    pub fn resize(&mut self, sensors: usize, window_points: usize) -> Result<(), BufferError> {
        let exhausted = BufferError::Allocation {
            sensors,
            window_points,
        };

        let mut windows = Vec::new();
        windows
            .try_reserve_exact(sensors)
            .map_err(|_| exhausted.clone())?;
        for _ in 0..sensors {
            let mut w = VecDeque::new();
            w.try_reserve_exact(window_points)
                .map_err(|_| exhausted.clone())?;
            windows.push(w);
        }

        let mut radar = Vec::new();
        radar
            .try_reserve_exact(sensors)
            .map_err(|_| exhausted.clone())?;
        radar.resize(sensors, 0.0);

        let mut gauge = Vec::new();
        gauge
            .try_reserve_exact(sensors)
            .map_err(|_| exhausted.clone())?;
        gauge.resize(sensors, 0.0);

        let mut labels = Vec::new();
        labels.try_reserve_exact(sensors).map_err(|_| exhausted)?;
        labels.extend((0..sensors).map(|i| format!("Sensor #{i}")));

        self.windows = windows;
        self.radar = radar;
        self.gauge = gauge;
        self.labels = labels;
        self.window_points = window_points;
        self.has_data = false;
        Ok(())
    }

    /// Retarget the window length in place without discarding data.
    ///
    /// Used for display-window changes that need no reallocation: shrinking
    /// evicts the oldest samples and recomputes the derived tables.
    pub fn set_window_points(&mut self, window_points: usize) {
        self.window_points = window_points;
        for i in 0..self.windows.len() {
            while self.windows[i].len() > window_points {
                self.windows[i].pop_front();
            }
            self.radar[i] = self.radar_policy.apply(&self.windows[i]);
            self.gauge[i] = self.gauge_policy.apply(&self.windows[i]);
        }
    }

    /// Regenerate the series labels, e.g. after a locale change.
    pub fn relabel(&mut self, label_for: impl Fn(usize) -> String) {
        for (i, label) in self.labels.iter_mut().enumerate() {
            *label = label_for(i);
        }
    }

    /// Push one reading into every sensor window, evicting the oldest
    /// sample at capacity, and recompute the derived tables.
    ///
    /// Fails with [`BufferError::ShapeMismatch`] when the reading width
    /// does not match the committed sensor count; the buffers are left
    /// untouched in that case.
    pub fn append(&mut self, reading: &Reading) -> Result<(), BufferError> {
        if reading.values.len() != self.windows.len() {
            return Err(BufferError::ShapeMismatch {
                expected: self.windows.len(),
                got: reading.values.len(),
            });
        }
        if self.window_points == 0 {
            return Ok(());
        }

        for (i, &value) in reading.values.iter().enumerate() {
            let window = &mut self.windows[i];
            if window.len() == self.window_points {
                window.pop_front();
            }
            window.push_back(value);
            self.radar[i] = self.radar_policy.apply(window);
            self.gauge[i] = self.gauge_policy.apply(window);
        }
        self.has_data = true;
        Ok(())
    }

    /// Owned read-only view of all tables for plotting.
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            windows: self
                .windows
                .iter()
                .map(|w| w.iter().copied().collect())
                .collect(),
            radar: self.radar.clone(),
            gauge: self.gauge.clone(),
            labels: self.labels.clone(),
            window_points: self.window_points,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reading(values: &[f64]) -> Reading {
        Reading {
            values: values.to_vec(),
            timestamp: Duration::ZERO,
        }
    }

    fn store(sensors: usize, window: usize) -> SensorBuffers {
        let mut buffers =
            SensorBuffers::new(AggregatePolicy::Latest, AggregatePolicy::WindowMean);
        buffers.resize(sensors, window).unwrap();
        buffers
    }

    #[test]
    fn fresh_store_is_empty_with_correct_shape() {
        let buffers = store(3, 10);
        assert!(buffers.is_empty());
        assert_eq!(buffers.sensors(), 3);
        let snap = buffers.snapshot();
        assert_eq!(snap.windows.len(), 3);
        assert!(snap.windows.iter().all(|w| w.is_empty()));
        assert_eq!(snap.labels, vec!["Sensor #0", "Sensor #1", "Sensor #2"]);
    }

    #[test]
    fn fifo_eviction_keeps_last_window_points_in_order() {
        let mut buffers = store(2, 5);
        for k in 0..8 {
            buffers
                .append(&reading(&[k as f64, k as f64 * 10.0]))
                .unwrap();
        }
        let snap = buffers.snapshot();
        assert_eq!(snap.windows[0], vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(snap.windows[1], vec![30.0, 40.0, 50.0, 60.0, 70.0]);
    }

    #[test]
    fn shape_mismatch_leaves_buffers_unchanged() {
        let mut buffers = store(3, 4);
        buffers.append(&reading(&[1.0, 2.0, 3.0])).unwrap();
        let before = buffers.snapshot();

        let err = buffers.append(&reading(&[1.0, 2.0])).unwrap_err();
        assert_eq!(err, BufferError::ShapeMismatch { expected: 3, got: 2 });
        assert_eq!(buffers.snapshot(), before);
    }

    #[test]
    fn aggregates_follow_their_policies() {
        let mut buffers =
            SensorBuffers::new(AggregatePolicy::Latest, AggregatePolicy::WindowMean);
        buffers.resize(1, 4).unwrap();
        for v in [2.0, 4.0, 6.0] {
            buffers.append(&reading(&[v])).unwrap();
        }
        let snap = buffers.snapshot();
        assert_eq!(snap.radar[0], 6.0);
        assert_eq!(snap.gauge[0], 4.0);
    }

    #[test]
    fn window_max_policy() {
        let mut buffers =
            SensorBuffers::new(AggregatePolicy::WindowMax, AggregatePolicy::WindowMax);
        buffers.resize(1, 3).unwrap();
        for v in [5.0, 9.0, 1.0] {
            buffers.append(&reading(&[v])).unwrap();
        }
        assert_eq!(buffers.snapshot().radar[0], 9.0);
    }

    #[test]
    fn resize_discards_contents_and_regenerates_labels() {
        let mut buffers = store(2, 4);
        buffers.append(&reading(&[1.0, 2.0])).unwrap();
        assert!(!buffers.is_empty());

        buffers.resize(4, 6).unwrap();
        assert!(buffers.is_empty());
        let snap = buffers.snapshot();
        assert_eq!(snap.windows.len(), 4);
        assert!(snap.windows.iter().all(|w| w.is_empty()));
        assert_eq!(snap.labels.len(), 4);
        assert_eq!(snap.window_points, 6);
    }

    #[test]
    fn shrinking_window_evicts_oldest_and_recomputes() {
        let mut buffers = store(1, 6);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            buffers.append(&reading(&[v])).unwrap();
        }
        buffers.set_window_points(3);
        let snap = buffers.snapshot();
        assert_eq!(snap.windows[0], vec![3.0, 4.0, 5.0]);
        assert_eq!(snap.gauge[0], 4.0);
    }

    #[test]
    fn relabel_rewrites_every_label() {
        let mut buffers = store(2, 4);
        buffers.relabel(|i| format!("Sensor n.º {i}"));
        assert_eq!(
            buffers.snapshot().labels,
            vec!["Sensor n.º 0", "Sensor n.º 1"]
        );
    }
}
