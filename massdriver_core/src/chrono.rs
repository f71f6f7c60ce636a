//! Two-gate chronograph.
//!
//! Gate A and gate B sit `distance_mm` apart. Each gate's handler records an
//! enter and an exit stamp (at most once per reset cycle); once both exits are
//! in, the velocity callback fires with the A→B speed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use massdriver_traits::{Pin, PinChange, PinMode, TickSource};

use crate::error::{DriverError, Result};
use crate::hw_error::hw;
use crate::stage::occupied_level;
use crate::timing::CalibratedClock;

pub type VelocityFn = Box<dyn Fn(f64) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    A,
    B,
}

#[derive(Default)]
struct GateStamps {
    enter: AtomicU64,
    exit: AtomicU64,
}

impl GateStamps {
    fn clear(&self) {
        self.enter.store(0, Ordering::Release);
        self.exit.store(0, Ordering::Release);
    }

    fn load(&self) -> (u64, u64) {
        (self.enter.load(Ordering::Acquire), self.exit.load(Ordering::Acquire))
    }
}

struct Shared<P, T> {
    a: P,
    b: P,
    clock: Arc<CalibratedClock<T>>,
    distance_mm: f64,
    stamps_a: GateStamps,
    stamps_b: GateStamps,
    occupied: AtomicBool,
    on_velocity: Option<VelocityFn>,
}

/// Raw chronograph stamps as durations since the clock epoch (zero = unset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChronoTimestamps {
    pub a_enter: Duration,
    pub a_exit: Duration,
    pub b_enter: Duration,
    pub b_exit: Duration,
}

impl ChronoTimestamps {
    /// All four set, or none: anything in between is a measurement in progress.
    pub fn is_valid(&self) -> bool {
        let set = [self.a_enter, self.a_exit, self.b_enter, self.b_exit]
            .iter()
            .filter(|d| !d.is_zero())
            .count();
        set == 0 || set == 4
    }
}

impl<P: Pin, T: TickSource> Shared<P, T> {
    fn gate(&self, g: Gate) -> &GateStamps {
        match g {
            Gate::A => &self.stamps_a,
            Gate::B => &self.stamps_b,
        }
    }

    fn on_edge(&self, g: Gate, level: bool) {
        let stamps = self.gate(g);
        let (enter, exit) = stamps.load();
        if enter != 0 && exit != 0 {
            return;
        }
        let slot = if level == self.occupied.load(Ordering::Acquire) {
            &stamps.enter
        } else {
            &stamps.exit
        };
        let _ = slot.compare_exchange(0, self.clock.stamp(), Ordering::AcqRel, Ordering::Acquire);

        let (_, exit_a) = self.stamps_a.load();
        let (_, exit_b) = self.stamps_b.load();
        if exit_a == 0 || exit_b == 0 {
            return;
        }
        if let Some(cb) = &self.on_velocity {
            cb(self.speed());
        }
    }

    fn speed(&self) -> f64 {
        let (a_enter, _) = self.stamps_a.load();
        let (b_enter, _) = self.stamps_b.load();
        if a_enter == 0 || b_enter <= a_enter {
            return 0.0;
        }
        let dt = self.clock.to_duration(b_enter - a_enter).as_secs_f64();
        if dt <= 0.0 {
            return 0.0;
        }
        (self.distance_mm / dt) * 0.001
    }

    fn dwell(&self, g: Gate) -> Duration {
        let (enter, exit) = self.gate(g).load();
        if enter == 0 || exit == 0 {
            return Duration::ZERO;
        }
        self.clock.to_duration(exit.saturating_sub(enter))
    }
}

pub struct Chronograph<P, T> {
    shared: Arc<Shared<P, T>>,
}

impl<P, T> Chronograph<P, T>
where
    P: Pin + 'static,
    T: TickSource + Send + Sync + 'static,
{
    pub fn new(a: P, b: P, distance_mm: f64, clock: Arc<CalibratedClock<T>>, on_velocity: Option<VelocityFn>) -> Self {
        Self {
            shared: Arc::new(Shared {
                a,
                b,
                clock,
                distance_mm,
                stamps_a: GateStamps::default(),
                stamps_b: GateStamps::default(),
                occupied: AtomicBool::new(false),
                on_velocity,
            }),
        }
    }

    /// Configure both gates and install their handlers.
    ///
    /// Fails with `SensePin` if either gate already reads occupied, since its
    /// enter edge could never be observed.
    pub fn configure(&self, mode: PinMode, change: PinChange) -> Result<()> {
        let occupied = occupied_level(mode, change)?;
        let s = &self.shared;
        s.a.configure(mode).map_err(hw)?;
        s.b.configure(mode).map_err(hw)?;

        if s.a.get() == occupied || s.b.get() == occupied {
            tracing::warn!("chronograph gate blocked at configure time");
            return Err(DriverError::SensePin);
        }
        s.occupied.store(occupied, Ordering::Release);

        for (pin, gate) in [(&s.a, Gate::A), (&s.b, Gate::B)] {
            let weak: Weak<Shared<P, T>> = Arc::downgrade(s);
            pin.set_interrupt(
                PinChange::Toggle,
                Box::new(move |level| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_edge(gate, level);
                    }
                }),
            )
            .map_err(hw)?;
        }
        tracing::debug!(distance_mm = s.distance_mm, "chronograph configured");
        Ok(())
    }

    /// Speed in m/s from the two enter stamps; 0.0 until both are in order.
    pub fn speed(&self) -> f64 {
        self.shared.speed()
    }

    /// Per-gate dwell time (A, B).
    pub fn durations(&self) -> (Duration, Duration) {
        (self.shared.dwell(Gate::A), self.shared.dwell(Gate::B))
    }

    pub fn is_valid(&self) -> bool {
        self.timestamps().is_valid()
    }

    pub fn timestamps(&self) -> ChronoTimestamps {
        let s = &self.shared;
        let (a_enter, a_exit) = s.stamps_a.load();
        let (b_enter, b_exit) = s.stamps_b.load();
        ChronoTimestamps {
            a_enter: s.clock.to_duration(a_enter),
            a_exit: s.clock.to_duration(a_exit),
            b_enter: s.clock.to_duration(b_enter),
            b_exit: s.clock.to_duration(b_exit),
        }
    }

    pub fn distance_mm(&self) -> f64 {
        self.shared.distance_mm
    }

    pub fn reset(&self) {
        self.shared.stamps_a.clear();
        self.shared.stamps_b.clear();
        tracing::debug!("chronograph reset");
    }
}
