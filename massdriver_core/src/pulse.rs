//! Shaped actuator pulse train.
//!
//! A shape is an even-length list of `(quiet, active)` duration pairs. `run`
//! replays it on an output pin with the calibrated busy wait; `abort` can be
//! called from another thread (typically an interrupt handler) and takes
//! effect at the next segment boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use massdriver_traits::{Pin, TickSource};

use crate::error::{DriverError, Result};
use crate::timing::CalibratedClock;

#[derive(Debug)]
pub struct PulseTrain {
    durations: RwLock<Vec<Duration>>,
    aborted: AtomicBool,
}

fn check_shape(shape: &[Duration]) -> Result<()> {
    if shape.len() < 2 || shape.len() % 2 != 0 {
        return Err(DriverError::InvalidPulseTrain(shape.len()));
    }
    Ok(())
}

impl PulseTrain {
    pub fn new(shape: &[Duration]) -> Result<Self> {
        check_shape(shape)?;
        Ok(Self {
            durations: RwLock::new(shape.to_vec()),
            aborted: AtomicBool::new(false),
        })
    }

    /// Shape already known to be well formed (named stage constructors).
    pub(crate) fn from_valid(shape: Vec<Duration>) -> Self {
        debug_assert!(shape.len() >= 2 && shape.len() % 2 == 0);
        Self {
            durations: RwLock::new(shape),
            aborted: AtomicBool::new(false),
        }
    }

    /// Replace the shape. Blocks while a run is in progress.
    pub fn set_shape(&self, shape: &[Duration]) -> Result<()> {
        check_shape(shape)?;
        let mut d = self
            .durations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        d.clear();
        d.extend_from_slice(shape);
        Ok(())
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.durations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_segment(&self, idx: usize, d: Duration) {
        let mut shape = self
            .durations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = shape.get_mut(idx) {
            *slot = d;
        }
    }

    /// Reject shapes whose longest active segment exceeds `max`.
    pub fn check_pulse_width(&self, max: Duration) -> Result<()> {
        let shape = self.durations.read().unwrap_or_else(PoisonError::into_inner);
        match shape.iter().skip(1).step_by(2).copied().max() {
            Some(widest) if widest > max => Err(DriverError::PulseWidthExceeded {
                width_us: widest.as_micros().min(u128::from(u64::MAX)) as u64,
                max_us: max.as_micros().min(u128::from(u64::MAX)) as u64,
            }),
            _ => Ok(()),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Play the shape on `pin`.
    ///
    /// Returns the tick stamp taken as the first active segment started, or 0
    /// if the train was aborted before reaching it. The pin is low on return.
    pub fn run<P, T>(&self, pin: &P, clock: &CalibratedClock<T>) -> u64
    where
        P: Pin + ?Sized,
        T: TickSource,
    {
        self.aborted.store(false, Ordering::Release);
        let shape = self.durations.read().unwrap_or_else(PoisonError::into_inner);
        let mut trigger_start = 0;

        for (i, d) in shape.iter().enumerate() {
            if self.aborted.load(Ordering::Acquire) {
                pin.low();
                return trigger_start;
            }
            if i % 2 == 0 {
                clock.wait(*d);
                continue;
            }
            if i == 1 {
                trigger_start = clock.stamp();
            }
            pin.high();
            clock.wait(*d);
            pin.low();
        }
        trigger_start
    }

    /// Force `pin` low and stop the current run at its next segment boundary.
    pub fn abort<P: Pin + ?Sized>(&self, pin: &P) {
        pin.low();
        self.aborted.store(true, Ordering::Release);
    }
}
