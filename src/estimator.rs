//! Percentile estimation for one ramp step.
//!
//! The estimator is a fixed-size ring of latency samples behind a single
//! lock. Workers call [`PercentileEstimator::add`] concurrently; the driver
//! calls [`PercentileEstimator::compute`] once every worker has finished.

use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;

/// Summary statistics over the retained samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Samples ingested, including any overwritten by the ring.
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p75: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub p999: Duration,
}

impl Metrics {
    /// Spread between the slowest and fastest sample.
    pub fn range(&self) -> Duration {
        self.max.saturating_sub(self.min)
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} samples:", self.count)?;
        writeln!(f, "Avg.:\t\t{:?}", self.mean)?;
        writeln!(f, "p50: \t\t{:?}", self.p50)?;
        writeln!(f, "p75:\t\t{:?}", self.p75)?;
        writeln!(f, "p95:\t\t{:?}", self.p95)?;
        writeln!(f, "p99:\t\t{:?}", self.p99)?;
        writeln!(f, "p999:\t\t{:?}", self.p999)?;
        writeln!(f, "Max:\t\t{:?}", self.max)?;
        writeln!(f, "Min:\t\t{:?}", self.min)?;
        write!(f, "Range:\t\t{:?}", self.range())
    }
}

struct Samples {
    count: usize,
    buf: Vec<Duration>,
}

/// Thread-safe latency sample store for exactly one ramp step.
pub struct PercentileEstimator {
    capacity: usize,
    inner: Mutex<Samples>,
}

impl PercentileEstimator {
    /// Create an estimator retaining up to `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Samples {
                count: 0,
                buf: Vec::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record one sample. Once the ring is full the oldest slot is replaced.
    pub fn add(&self, sample: Duration) {
        let mut inner = self.inner.lock();
        if inner.buf.len() < self.capacity {
            inner.buf.push(sample);
        } else {
            let idx = inner.count % self.capacity;
            inner.buf[idx] = sample;
        }
        inner.count += 1;
    }

    /// Total samples ingested.
    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    /// Compute summary statistics. With no samples every field is zero.
    pub fn compute(&self) -> Metrics {
        let (count, mut sorted) = {
            let inner = self.inner.lock();
            (inner.count, inner.buf.clone())
        };
        if sorted.is_empty() {
            return Metrics::default();
        }
        sorted.sort_unstable();

        let total: Duration = sorted.iter().sum();
        Metrics {
            count,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean: total / sorted.len() as u32,
            p50: nearest_rank(&sorted, 500),
            p75: nearest_rank(&sorted, 750),
            p95: nearest_rank(&sorted, 950),
            p99: nearest_rank(&sorted, 990),
            p999: nearest_rank(&sorted, 999),
        }
    }
}

/// Nearest-rank percentile over ascending `sorted`, with the percentile
/// given in tenths of a percent: ordinal `ceil(permille / 1000 * len)`,
/// clamped to `[1, len]`.
fn nearest_rank(sorted: &[Duration], permille: usize) -> Duration {
    let len = sorted.len();
    let ordinal = (permille * len).div_ceil(1000).clamp(1, len);
    sorted[ordinal - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_empty_is_zero() {
        let est = PercentileEstimator::new(4);
        let m = est.compute();
        assert_eq!(m, Metrics::default());
        assert_eq!(m.p50, Duration::ZERO);
        assert_eq!(m.count, 0);
    }

    #[test]
    fn test_single_sample() {
        let est = PercentileEstimator::new(1);
        est.add(ms(42));
        let m = est.compute();
        assert_eq!(m.p50, ms(42));
        assert_eq!(m.p75, ms(42));
        assert_eq!(m.p95, ms(42));
        assert_eq!(m.min, ms(42));
        assert_eq!(m.max, ms(42));
    }

    #[test]
    fn test_nearest_rank_values() {
        let est = PercentileEstimator::new(10);
        // Insert out of order; compute must sort.
        for v in [7, 3, 10, 1, 5, 9, 2, 8, 4, 6] {
            est.add(ms(v));
        }
        let m = est.compute();
        assert_eq!(m.p50, ms(5));
        assert_eq!(m.p75, ms(8));
        assert_eq!(m.p95, ms(10));
        assert_eq!(m.mean, Duration::from_micros(5500));
        assert_eq!(m.range(), ms(9));
    }

    #[test]
    fn test_small_counts_clamp() {
        let est = PercentileEstimator::new(3);
        est.add(ms(1));
        est.add(ms(2));
        let m = est.compute();
        // ceil(0.5 * 2) = 1, ceil(0.75 * 2) = 2
        assert_eq!(m.p50, ms(1));
        assert_eq!(m.p75, ms(2));
        assert_eq!(m.p95, ms(2));
    }

    #[test]
    fn test_percentiles_are_ordered() {
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for len in 1..200 {
            let est = PercentileEstimator::new(len);
            for _ in 0..len {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                est.add(Duration::from_micros(seed % 1_000_000));
            }
            let m = est.compute();
            assert!(m.min <= m.p50, "len {len}");
            assert!(m.p50 <= m.p75, "len {len}");
            assert!(m.p75 <= m.p95, "len {len}");
            assert!(m.p95 <= m.p99, "len {len}");
            assert!(m.p999 <= m.max, "len {len}");
        }
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let est = PercentileEstimator::new(2);
        est.add(ms(100));
        est.add(ms(200));
        est.add(ms(1));
        assert_eq!(est.count(), 3);
        let m = est.compute();
        assert_eq!(m.min, ms(1));
        assert_eq!(m.max, ms(200));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let est = PercentileEstimator::new(0);
        assert_eq!(est.capacity(), 1);
        est.add(ms(3));
        assert_eq!(est.compute().p95, ms(3));
    }

    #[test]
    fn test_concurrent_adds_lose_nothing() {
        const PRODUCERS: usize = 2000;
        let est = Arc::new(PercentileEstimator::new(PRODUCERS));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|i| {
                let est = Arc::clone(&est);
                std::thread::spawn(move || est.add(Duration::from_micros(i as u64 + 1)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(est.count(), PRODUCERS);
        let m = est.compute();
        assert_eq!(m.count, PRODUCERS);
        assert_eq!(m.min, Duration::from_micros(1));
        assert_eq!(m.max, Duration::from_micros(PRODUCERS as u64));
        assert_eq!(m.p50, Duration::from_micros(1000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_tasks_lose_nothing() {
        const PRODUCERS: usize = 5000;
        let est = Arc::new(PercentileEstimator::new(PRODUCERS));

        let mut handles = Vec::with_capacity(PRODUCERS);
        for i in 0..PRODUCERS {
            let est = Arc::clone(&est);
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                est.add(Duration::from_nanos(i as u64));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(est.count(), PRODUCERS);
    }
}
