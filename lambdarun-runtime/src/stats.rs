//! Stream run statistics
//!
//! Timing figures come from valid samples only: invocations that timed out
//! or failed record a `-1` sentinel, which is stripped before computing
//! anything. Memory figures use every sample, since memory is measured
//! whether or not the handler succeeded.

use crate::sampler::ResourceSample;

/// Duration rounded up to the next 100ms, the platform's billing granularity
pub fn billing_bucket(ms: f64) -> i64 {
    ((ms / 100.0).ceil() * 100.0) as i64
}

fn is_valid_clock(ms: f64) -> bool {
    ms >= 0.0
}

/// Per-invocation samples collected over one run
///
/// `clock` and `rss` always have the same length; [`StatsAccumulator::append`]
/// is the only way in.
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    clock: Vec<f64>,
    rss: Vec<i64>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, sample: ResourceSample) {
        self.clock.push(sample.clock_ms);
        self.rss.push(sample.peak_rss_delta);
    }

    pub fn len(&self) -> usize {
        self.clock.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clock.is_empty()
    }

    pub fn clock(&self) -> &[f64] {
        &self.clock
    }

    pub fn rss(&self) -> &[i64] {
        &self.rss
    }

    pub fn summarize(&self) -> StreamSummary {
        let samples = self.clock.len();
        let mut valid: Vec<f64> = self.clock.iter().copied().filter(|&ms| is_valid_clock(ms)).collect();
        let sentinels_removed = valid.len() != samples;
        valid.sort_by(f64::total_cmp);

        StreamSummary {
            samples,
            valid_samples: valid.len(),
            sentinels_removed,
            clock: ClockStats::from_sorted(&valid),
            rss: RssStats::from_samples(&self.rss),
        }
    }
}

/// Timing statistics over valid samples
#[derive(Debug, Clone, PartialEq)]
pub struct ClockStats {
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub median_billing_bucket: i64,
    /// Sample standard deviation; `None` with fewer than two samples
    pub std_dev: Option<f64>,
}

impl ClockStats {
    fn from_sorted(sorted: &[f64]) -> Option<Self> {
        let (&min, &max) = (sorted.first()?, sorted.last()?);
        let median = sorted[sorted.len() / 2];

        let std_dev = if sorted.len() < 2 {
            None
        } else {
            let n = sorted.len() as f64;
            let mean = sorted.iter().sum::<f64>() / n;
            let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(variance.sqrt())
        };

        Some(Self {
            min,
            max,
            median,
            median_billing_bucket: billing_bucket(median),
            std_dev,
        })
    }

    /// Standard deviation rounded up to a whole millisecond
    pub fn rounded_std_dev(&self) -> Option<i64> {
        self.std_dev.map(|sd| sd.ceil() as i64)
    }
}

/// Peak RSS delta extremes over all samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssStats {
    pub min: i64,
    pub max: i64,
}

impl RssStats {
    fn from_samples(samples: &[i64]) -> Option<Self> {
        Some(Self {
            min: *samples.iter().min()?,
            max: *samples.iter().max()?,
        })
    }
}

/// End-of-run report
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    /// Invocations recorded, including failed ones
    pub samples: usize,
    /// Invocations with a valid timing sample
    pub valid_samples: usize,
    pub sentinels_removed: bool,
    /// `None` when no valid timing sample survived
    pub clock: Option<ClockStats>,
    pub rss: Option<RssStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulator(samples: &[(f64, i64)]) -> StatsAccumulator {
        let mut stats = StatsAccumulator::new();
        for &(clock, rss) in samples {
            stats.append(ResourceSample::new(clock, rss));
        }
        stats
    }

    #[test]
    fn test_billing_bucket() {
        assert_eq!(billing_bucket(199.0), 200);
        assert_eq!(billing_bucket(101.0), 200);
        assert_eq!(billing_bucket(99.0), 100);
        assert_eq!(billing_bucket(100.0), 100);
        assert_eq!(billing_bucket(0.0), 0);
        assert_eq!(billing_bucket(0.4), 100);
        assert_eq!(billing_bucket(-1.0), 0);
    }

    #[test]
    fn test_billing_bucket_monotonic() {
        let mut previous = billing_bucket(0.0);
        for tenth in 0..5_000 {
            let bucket = billing_bucket(f64::from(tenth) / 10.0);
            assert!(bucket >= previous);
            previous = bucket;
        }
    }

    #[test]
    fn test_append_keeps_lengths_equal() {
        let stats = accumulator(&[(10.0, 1), (-1.0, 2), (30.0, 3)]);
        assert_eq!(stats.len(), 3);
        assert_eq!(stats.clock().len(), stats.rss().len());
    }

    #[test]
    fn test_summary_without_errors() {
        let summary = accumulator(&[(120.0, 4096), (80.0, 8192), (250.0, 2048)]).summarize();

        assert_eq!(summary.samples, 3);
        assert!(!summary.sentinels_removed);
        let clock = summary.clock.unwrap();
        assert_eq!(clock.min, 80.0);
        assert_eq!(clock.max, 250.0);
        assert_eq!(clock.median, 120.0);
        assert_eq!(clock.median_billing_bucket, 200);
        // Sample standard deviation of [80, 120, 250] is ~88.88
        assert_eq!(clock.rounded_std_dev(), Some(89));
        assert_eq!(summary.rss, Some(RssStats { min: 2048, max: 8192 }));
    }

    #[test]
    fn test_summary_strips_sentinels() {
        let summary = accumulator(&[(50.0, 100), (-1.0, 900), (0.0, 300), (-1.0, 50)]).summarize();

        assert_eq!(summary.samples, 4);
        assert!(summary.sentinels_removed);
        assert_eq!(summary.valid_samples, 2);
        let clock = summary.clock.unwrap();
        // A legitimate 0ms run is kept.
        assert_eq!(clock.min, 0.0);
        assert_eq!(clock.max, 50.0);
        assert_eq!(clock.median, 50.0);
        // Memory extremes include the failed invocations.
        assert_eq!(summary.rss, Some(RssStats { min: 50, max: 900 }));
    }

    #[test]
    fn test_median_even_count_takes_upper_middle() {
        let summary = accumulator(&[(1.0, 0), (2.0, 0), (3.0, 0), (4.0, 0)]).summarize();
        assert_eq!(summary.clock.unwrap().median, 3.0);
    }

    #[test]
    fn test_summary_all_failed() {
        let summary = accumulator(&[(-1.0, 10), (-1.0, 20)]).summarize();

        assert_eq!(summary.samples, 2);
        assert_eq!(summary.valid_samples, 0);
        assert!(summary.clock.is_none());
        assert_eq!(summary.rss, Some(RssStats { min: 10, max: 20 }));
    }

    #[test]
    fn test_single_sample_has_no_std_dev() {
        let summary = accumulator(&[(42.0, 0)]).summarize();
        let clock = summary.clock.unwrap();
        assert_eq!(clock.std_dev, None);
        assert_eq!(clock.median, 42.0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = StatsAccumulator::new().summarize();
        assert_eq!(summary.samples, 0);
        assert!(!summary.sentinels_removed);
        assert!(summary.clock.is_none());
        assert!(summary.rss.is_none());
    }
}
