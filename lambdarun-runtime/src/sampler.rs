//! Peak resident-set-size sampling
//!
//! The OS peak RSS counter is a process-wide high-water mark: it only ever
//! rises and cannot be reset. A sample is therefore `peak now - peak at
//! baseline`, a cumulative approximation rather than the true peak of one
//! invocation. Once an earlier invocation has pushed the mark up, later
//! invocations that use less memory report the same delta.
//!
//! The counter is read from `/proc/self/status` (`VmHWM`) on Linux. Other
//! hosts report zero.

/// Timing and memory figures for one invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Handler wall-clock time, or `-1` when no valid timing exists
    pub clock_ms: f64,
    /// Peak RSS growth since the baseline, in bytes
    pub peak_rss_delta: i64,
}

impl ResourceSample {
    pub fn new(clock_ms: f64, peak_rss_delta: i64) -> Self {
        Self {
            clock_ms,
            peak_rss_delta,
        }
    }
}

/// Current process peak RSS in bytes, or 0 where unavailable
pub fn current_peak_rss() -> i64 {
    read_peak_rss().unwrap_or(0)
}

/// Peak RSS growth since `baseline`
pub fn sample_delta(baseline: i64) -> i64 {
    current_peak_rss() - baseline
}

#[cfg(target_os = "linux")]
fn read_peak_rss() -> Option<i64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_hwm(&status)
}

#[cfg(not(target_os = "linux"))]
fn read_peak_rss() -> Option<i64> {
    None
}

/// Extract `VmHWM` (reported in kB) from a `/proc/<pid>/status` document
fn parse_vm_hwm(status: &str) -> Option<i64> {
    status.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next()? != "VmHWM:" {
            return None;
        }
        let kb: i64 = parts.next()?.parse().ok()?;
        Some(kb * 1024)
    })
}

/// Brackets invocations with a baseline captured once at run start
#[derive(Debug, Clone, Copy)]
pub struct ResourceSampler {
    baseline: i64,
}

impl ResourceSampler {
    /// Capture the baseline now
    pub fn capture() -> Self {
        Self {
            baseline: current_peak_rss(),
        }
    }

    pub fn with_baseline(baseline: i64) -> Self {
        Self { baseline }
    }

    pub fn baseline(&self) -> i64 {
        self.baseline
    }

    pub fn sample_delta(&self) -> i64 {
        sample_delta(self.baseline)
    }
}
