use std::time::Instant;

/// Platform tick counter used for timestamps and busy-wait timing.
///
/// - ticks(): raw monotonic counter value
/// - ticks_to_nanos(): platform-defined tick → nanosecond conversion
/// - spin_once(): one iteration of the platform busy loop
///
/// Implementations must be cheap to call from interrupt context.
pub trait TickSource {
    fn ticks(&self) -> u64;
    fn ticks_to_nanos(&self, ticks: u64) -> u64;

    /// One busy-loop iteration. Calibrated delays are expressed as a count of these.
    #[inline]
    fn spin_once(&self) {
        std::hint::spin_loop();
    }

    /// Nanoseconds elapsed since `since` (a previous `ticks()` value), saturating at 0.
    fn nanos_since(&self, since: u64) -> u64 {
        self.ticks_to_nanos(self.ticks().saturating_sub(since))
    }
}

/// Host tick source backed by `std::time::Instant`; one tick is one nanosecond.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTicks {
    epoch: Instant,
}

impl Default for MonotonicTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicTicks {
    #[inline]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl TickSource for MonotonicTicks {
    #[inline]
    fn ticks(&self) -> u64 {
        let ns = self.epoch.elapsed().as_nanos();
        (ns.min(u128::from(u64::MAX))) as u64
    }

    #[inline]
    fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        ticks
    }
}
