//! Monotonic clock and calibrated busy-wait delay.
//!
//! `wait(d)` spins `d * K / M` iterations of [`TickSource::spin_once`] instead
//! of polling the tick counter, which keeps per-iteration overhead and
//! interrupt jitter out of the hot path. `(K, M)` comes from benchmarking the
//! uncalibrated loop against the tick counter once per boot.
//!
//! Recalibrating while a pulse train is running is not supported; readers may
//! observe `K` and `M` from different calibrations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use massdriver_traits::TickSource;
use tracing::{debug, info};

use crate::util::{mul_div, scale_constants};

/// Rational busy-loop scale: `iterations = requested_ns * k / m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCalibration {
    pub k: u64,
    pub m: u64,
}

impl Default for WaitCalibration {
    fn default() -> Self {
        Self { k: 1, m: 1 }
    }
}

impl WaitCalibration {
    /// Ratio for a loop where `requested` iterations took `actual` wall time.
    pub fn from_benchmark(requested: Duration, actual: Duration) -> Self {
        let (k, m) = scale_constants(duration_ns(actual), duration_ns(requested));
        Self { k, m }
    }

    #[inline]
    pub fn iterations(&self, d: Duration) -> u64 {
        mul_div(duration_ns(d), self.k, self.m)
    }
}

#[inline]
pub(crate) fn duration_ns(d: Duration) -> u64 {
    d.as_nanos().min(u128::from(u64::MAX)) as u64
}

/// Tick source plus the process-wide busy-loop calibration.
#[derive(Debug)]
pub struct CalibratedClock<T> {
    source: T,
    k: AtomicU64,
    m: AtomicU64,
}

impl<T: TickSource> CalibratedClock<T> {
    /// Uncalibrated clock (one loop iteration per requested nanosecond).
    pub fn new(source: T) -> Self {
        Self::with_calibration(source, WaitCalibration::default())
    }

    pub fn with_calibration(source: T, cal: WaitCalibration) -> Self {
        Self {
            source,
            k: AtomicU64::new(cal.k.max(1)),
            m: AtomicU64::new(cal.m.max(1)),
        }
    }

    pub fn source(&self) -> &T {
        &self.source
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.source.ticks()
    }

    /// Current tick count for a timestamp field; never 0, which marks "unset".
    #[inline]
    pub fn stamp(&self) -> u64 {
        self.source.ticks().max(1)
    }

    #[inline]
    pub fn to_duration(&self, ticks: u64) -> Duration {
        Duration::from_nanos(self.source.ticks_to_nanos(ticks))
    }

    /// Monotonic time since the tick source's epoch.
    #[inline]
    pub fn now(&self) -> Duration {
        self.to_duration(self.source.ticks())
    }

    pub fn calibration(&self) -> WaitCalibration {
        WaitCalibration {
            k: self.k.load(Ordering::Acquire),
            m: self.m.load(Ordering::Acquire),
        }
    }

    pub fn apply(&self, cal: WaitCalibration) {
        self.k.store(cal.k.max(1), Ordering::Release);
        self.m.store(cal.m.max(1), Ordering::Release);
        debug!(k = cal.k, m = cal.m, "wait calibration applied");
    }

    /// Store the ratio for a loop where `requested` iterations took `actual`.
    pub fn set_calibration(&self, requested: Duration, actual: Duration) -> WaitCalibration {
        let cal = WaitCalibration::from_benchmark(requested, actual);
        self.apply(cal);
        cal
    }

    /// Mean wall time of one uncalibrated `wait_raw(d as iterations)` over `n` calls.
    pub fn benchmark(&self, d: Duration, n: u32) -> Duration {
        let n = n.max(1);
        let iterations = duration_ns(d);
        let t1 = self.source.ticks();
        for _ in 0..n {
            self.wait_raw(iterations);
        }
        Duration::from_nanos(self.source.nanos_since(t1) / u64::from(n))
    }

    /// Benchmark the loop and store the resulting ratio.
    pub fn calibrate(&self, d: Duration, n: u32) -> WaitCalibration {
        let actual = self.benchmark(d, n);
        let cal = self.set_calibration(d, actual);
        info!(
            requested_ns = duration_ns(d),
            actual_ns = duration_ns(actual),
            k = cal.k,
            m = cal.m,
            "wait calibrated"
        );
        cal
    }

    /// Spin exactly `iterations` loop iterations.
    #[inline]
    pub fn wait_raw(&self, iterations: u64) {
        for _ in 0..iterations {
            self.source.spin_once();
        }
    }

    /// Calibrated busy wait.
    #[inline]
    pub fn wait(&self, d: Duration) {
        let k = self.k.load(Ordering::Relaxed);
        let m = self.m.load(Ordering::Relaxed);
        self.wait_raw(mul_div(duration_ns(d), k, m));
    }

    /// Busy wait polling the tick counter; exact but costs a tick read per iteration.
    pub fn wait_precise(&self, d: Duration) {
        let target = duration_ns(d);
        let t1 = self.source.ticks();
        while self.source.nanos_since(t1) < target {
            self.source.spin_once();
        }
    }
}
