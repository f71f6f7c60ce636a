//! Simulated platform: tick source, GPIO pins, ADC channels and a projectile
//! that crosses a row of optical gates.
//!
//! Every handle is a cheap clone over shared state so a test can keep one copy
//! while the component under test owns another.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use massdriver_traits::{AdcChannel, BoxError, InterruptHandler, Pin, PinChange, PinMode, TickSource};
use tracing::trace;

use crate::error::HwError;

// ── Ticks ────────────────────────────────────────────────────────────────────

/// Manually driven tick counter.
///
/// now = start + advances + spins * spin_cost
#[derive(Debug, Clone)]
pub struct SimTicks {
    now: Arc<AtomicU64>,
    spin_cost: u64,
    ns_per_tick: u64,
}

impl Default for SimTicks {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SimTicks {
    /// Start counting at `start` ticks; one tick per nanosecond, one tick per spin.
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
            spin_cost: 1,
            ns_per_tick: 1,
        }
    }

    /// Ticks consumed by one busy-loop iteration.
    pub fn with_spin_cost(mut self, ticks: u64) -> Self {
        self.spin_cost = ticks;
        self
    }

    /// Nanoseconds represented by one tick.
    pub fn with_tick_ns(mut self, ns: u64) -> Self {
        self.ns_per_tick = ns.max(1);
        self
    }

    pub fn advance(&self, ticks: u64) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn set(&self, ticks: u64) {
        self.now.store(ticks, Ordering::SeqCst);
    }
}

impl TickSource for SimTicks {
    fn ticks(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        ticks.saturating_mul(self.ns_per_tick)
    }

    fn spin_once(&self) {
        self.now.fetch_add(self.spin_cost, Ordering::SeqCst);
    }
}

// ── Pins ─────────────────────────────────────────────────────────────────────

type TraceClock = Box<dyn TickSource + Send + Sync>;

#[derive(Default)]
struct SimPinState {
    level: AtomicBool,
    faulty: AtomicBool,
    mode: Mutex<Option<PinMode>>,
    interrupt: RwLock<Option<(PinChange, InterruptHandler)>>,
    clock: Option<TraceClock>,
    writes: Mutex<Vec<(u64, bool)>>,
}

/// Simulated GPIO pin.
///
/// `set` models the firmware writing an output; `drive` models the outside
/// world changing an input and fires the installed interrupt handler.
#[derive(Clone, Default)]
pub struct SimPin {
    state: Arc<SimPinState>,
}

impl std::fmt::Debug for SimPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimPin")
            .field("level", &self.state.level.load(Ordering::SeqCst))
            .field("mode", &self.mode())
            .finish()
    }
}

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin that starts at `level`.
    pub fn with_level(level: bool) -> Self {
        let pin = Self::default();
        pin.state.level.store(level, Ordering::SeqCst);
        pin
    }

    /// Pin that timestamps every `set` with `clock` (see [`SimPin::writes`]).
    pub fn traced(clock: impl TickSource + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(SimPinState {
                clock: Some(Box::new(clock)),
                ..SimPinState::default()
            }),
        }
    }

    /// Pin whose `configure` and `set_interrupt` fail.
    pub fn faulty() -> Self {
        let pin = Self::default();
        pin.state.faulty.store(true, Ordering::SeqCst);
        pin
    }

    pub fn mode(&self) -> Option<PinMode> {
        *self
            .state
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_interrupt(&self) -> bool {
        self.state
            .interrupt
            .read()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }

    /// Every level written through `set`, with the tick it was written at
    /// (0 when the pin is not traced).
    pub fn writes(&self) -> Vec<(u64, bool)> {
        self.state
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_writes(&self) {
        self.state
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Change the input level from outside and deliver the matching edge.
    pub fn drive(&self, level: bool) {
        let previous = self.state.level.swap(level, Ordering::SeqCst);
        if previous == level {
            return;
        }
        let guard = self
            .state
            .interrupt
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((change, handler)) = guard.as_ref() {
            let fires = match change {
                PinChange::Toggle => true,
                PinChange::Rising => level,
                PinChange::Falling => !level,
            };
            if fires {
                handler(level);
            }
        }
    }
}

impl Pin for SimPin {
    fn configure(&self, mode: PinMode) -> Result<(), BoxError> {
        if self.state.faulty.load(Ordering::SeqCst) {
            return Err(Box::new(HwError::Gpio("simulated configure fault".into())));
        }
        *self
            .state
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(mode);
        if mode == PinMode::InputPullUp {
            self.state.level.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn get(&self) -> bool {
        self.state.level.load(Ordering::SeqCst)
    }

    fn set(&self, high: bool) {
        self.state.level.store(high, Ordering::SeqCst);
        let at = self.state.clock.as_ref().map_or(0, |c| c.ticks());
        self.state
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((at, high));
    }

    fn set_interrupt(&self, change: PinChange, handler: InterruptHandler) -> Result<(), BoxError> {
        if self.state.faulty.load(Ordering::SeqCst) {
            return Err(Box::new(HwError::Gpio("simulated interrupt fault".into())));
        }
        *self
            .state
            .interrupt
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some((change, handler));
        Ok(())
    }
}

// ── ADC ──────────────────────────────────────────────────────────────────────

/// Simulated ADC channel: a settable base code plus a cyclic offset pattern.
#[derive(Debug, Clone, Default)]
pub struct SimAdc {
    code: Arc<AtomicU16>,
    pattern: Arc<[i32]>,
    idx: Arc<AtomicUsize>,
    configured: Arc<AtomicBool>,
}

impl SimAdc {
    pub fn constant(code: u16) -> Self {
        Self {
            code: Arc::new(AtomicU16::new(code)),
            ..Self::default()
        }
    }

    /// Each read returns `code + pattern[i % len]`, clamped to the u16 range.
    pub fn with_pattern(code: u16, pattern: Vec<i32>) -> Self {
        Self {
            code: Arc::new(AtomicU16::new(code)),
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    pub fn set_code(&self, code: u16) {
        self.code.store(code, Ordering::Relaxed);
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Relaxed)
    }
}

impl AdcChannel for SimAdc {
    fn configure(&mut self) -> Result<(), BoxError> {
        self.configured.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn read(&mut self) -> Result<u16, BoxError> {
        let base = i32::from(self.code.load(Ordering::Relaxed));
        let offset = if self.pattern.is_empty() {
            0
        } else {
            let i = self.idx.fetch_add(1, Ordering::Relaxed);
            self.pattern[i % self.pattern.len()]
        };
        Ok((base + offset).clamp(0, i32::from(u16::MAX)) as u16)
    }
}

// ── Projectile ───────────────────────────────────────────────────────────────

/// One optical gate along the barrel.
#[derive(Debug, Clone)]
pub struct Gate {
    pub pin: SimPin,
    /// Distance of the gate from the launch point.
    pub position_mm: f64,
}

/// A projectile crossing gates at constant speed in real time.
#[derive(Debug, Clone)]
pub struct Flight {
    gates: Vec<Gate>,
    speed_m_s: f64,
    length_mm: f64,
    occupied_level: bool,
}

impl Flight {
    /// `occupied_level` is the level a gate reads while the projectile blocks it.
    pub fn new(gates: Vec<Gate>, speed_m_s: f64, length_mm: f64, occupied_level: bool) -> Self {
        Self {
            gates,
            speed_m_s,
            length_mm,
            occupied_level,
        }
    }

    /// Gate edge schedule as (offset from launch, gate index, occupied).
    pub fn schedule(&self) -> Vec<(Duration, usize, bool)> {
        // 1 m/s == 1 mm/ms
        let speed = self.speed_m_s.max(f64::MIN_POSITIVE);
        let at = |mm: f64| Duration::from_nanos((mm.max(0.0) / speed * 1e6).round() as u64);
        let mut events: Vec<(Duration, usize, bool)> = self
            .gates
            .iter()
            .enumerate()
            .flat_map(|(i, g)| {
                [
                    (at(g.position_mm), i, true),
                    (at(g.position_mm + self.length_mm), i, false),
                ]
            })
            .collect();
        events.sort_by_key(|e| e.0);
        events
    }

    /// Drive all gates through the schedule, blocking the calling thread.
    pub fn run(&self) {
        let start = Instant::now();
        for (offset, idx, occupied) in self.schedule() {
            let deadline = start + offset;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            let level = if occupied {
                self.occupied_level
            } else {
                !self.occupied_level
            };
            trace!(gate = idx, occupied, "sim gate edge");
            self.gates[idx].pin.drive(level);
        }
    }

    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || self.run())
    }
}
