//! Single accelerator stage: sense gate, actuator output and pulse worker.
//!
//! The sense pin's interrupt handler only touches atomics and a capacity-1
//! channel. A dedicated worker thread per stage consumes the signal, runs the
//! pulse train and reports completion. Stage state moves
//! Idle → Armed → Active → Done; `reset` returns it to Idle.
//!
//! Safety: each configured stage owns exactly one worker thread, which is shut
//! down and joined when the stage is dropped or reconfigured.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as xch;
use massdriver_traits::{Pin, PinChange, PinMode, TickSource};

use crate::error::{DriverError, Result};
use crate::hw_error::hw;
use crate::pulse::PulseTrain;
use crate::state::State;
use crate::timing::CalibratedClock;

/// Called by the worker once the pulse train finished, with the sense-enter time.
pub type CompletionFn = Box<dyn Fn(Duration) + Send + Sync + 'static>;

/// Capability set the driver sequences.
pub trait Stage: Send + Sync {
    fn arm(&self) -> Result<()>;
    fn reset(&self);
    /// Force the actuator low, cut the in-flight pulse train short and return
    /// to Idle without reporting completion.
    fn abort(&self);
    fn configure(&self, mode: PinMode, change: PinChange, on_complete: CompletionFn) -> Result<()>;
}

impl<S: Stage + ?Sized> Stage for Box<S> {
    fn arm(&self) -> Result<()> {
        (**self).arm()
    }

    fn reset(&self) {
        (**self).reset();
    }

    fn abort(&self) {
        (**self).abort();
    }

    fn configure(&self, mode: PinMode, change: PinChange, on_complete: CompletionFn) -> Result<()> {
        (**self).configure(mode, change, on_complete)
    }
}

pub trait DwellTimer {
    /// Time the projectile occluded the sense gate.
    fn dwell_time(&self) -> Duration;
}

pub trait ActiveTimer {
    /// Time from the first actuator pulse start to the end of the train.
    fn active_time(&self) -> Duration;
}

pub trait Shaper {
    fn shape(&self) -> Vec<Duration>;
    fn set_shape(&self, shape: &[Duration]) -> Result<()>;
}

/// Validate a sense input configuration and return the occupied level.
pub(crate) fn occupied_level(mode: PinMode, change: PinChange) -> Result<bool> {
    if !mode.is_input() {
        return Err(DriverError::InvalidPinMode);
    }
    match change {
        PinChange::Toggle => Err(DriverError::InvalidPinChange),
        PinChange::Rising => Ok(true),
        PinChange::Falling => Ok(false),
    }
}

/// Raw tick stamps of one stage cycle, converted to durations (zero = unset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageTimestamps {
    pub sense_enter: Duration,
    pub sense_exit: Duration,
    pub trigger_start: Duration,
    pub trigger_end: Duration,
}

struct Shared<P, T> {
    trigger: P,
    sense: P,
    clock: Arc<CalibratedClock<T>>,
    train: PulseTrain,
    sense_enter: AtomicU64,
    sense_exit: AtomicU64,
    trigger_start: AtomicU64,
    trigger_end: AtomicU64,
    state: AtomicU8,
    occupied: AtomicBool,
    tx: xch::Sender<()>,
    rx: xch::Receiver<()>,
}

impl<P: Pin, T: TickSource> Shared<P, T> {
    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: State) {
        self.state.store(s.as_u8(), Ordering::Release);
    }

    /// Record the enter stamp once per cycle and wake the worker.
    fn sensed_enter(&self) {
        let now = self.clock.stamp();
        if self
            .sense_enter
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // A full slot already holds a pending wake-up for this cycle.
            let _ = self.tx.try_send(());
        }
    }

    fn on_edge(&self, level: bool) {
        if !matches!(self.state(), State::Armed | State::Active | State::Done) {
            return;
        }
        let enter = self.sense_enter.load(Ordering::Acquire);
        if enter != 0 && self.sense_exit.load(Ordering::Acquire) != 0 {
            return;
        }
        if level == self.occupied.load(Ordering::Acquire) {
            self.sensed_enter();
        } else if enter != 0
            && self
                .sense_exit
                .compare_exchange(0, self.clock.stamp(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.train.abort(&self.trigger);
        }
    }

    fn elapsed(&self, from: &AtomicU64, to: &AtomicU64) -> Duration {
        let (a, b) = (from.load(Ordering::Acquire), to.load(Ordering::Acquire));
        if a == 0 || b == 0 {
            return Duration::ZERO;
        }
        self.clock.to_duration(b.saturating_sub(a))
    }

    fn stamp(&self, slot: &AtomicU64) -> Duration {
        self.clock.to_duration(slot.load(Ordering::Acquire))
    }
}

struct Worker {
    shutdown: Arc<AtomicBool>,
    /// Stops an in-flight train at its next segment boundary.
    cut: Box<dyn Fn() + Send + Sync>,
    handle: JoinHandle<()>,
}

/// Stage that plays an arbitrary pulse shape once the projectile enters the gate.
pub struct ShapedPulseStage<P, T> {
    shared: Arc<Shared<P, T>>,
    worker: Mutex<Option<Worker>>,
}

impl<P, T> ShapedPulseStage<P, T>
where
    P: Pin + 'static,
    T: TickSource + Send + Sync + 'static,
{
    pub fn new(trigger: P, sense: P, clock: Arc<CalibratedClock<T>>, shape: &[Duration]) -> Result<Self> {
        Ok(Self::with_train(trigger, sense, clock, PulseTrain::new(shape)?))
    }

    /// One pulse of `duration` after `delay`.
    pub fn simple(trigger: P, sense: P, clock: Arc<CalibratedClock<T>>, delay: Duration, duration: Duration) -> Self {
        Self::with_train(trigger, sense, clock, PulseTrain::from_valid(vec![delay, duration]))
    }

    /// Two delayed pulses.
    pub fn double_tap(
        trigger: P,
        sense: P,
        clock: Arc<CalibratedClock<T>>,
        first_delay: Duration,
        first_pulse: Duration,
        second_delay: Duration,
        second_pulse: Duration,
    ) -> Self {
        Self::with_train(
            trigger,
            sense,
            clock,
            PulseTrain::from_valid(vec![first_delay, first_pulse, second_delay, second_pulse]),
        )
    }

    fn with_train(trigger: P, sense: P, clock: Arc<CalibratedClock<T>>, train: PulseTrain) -> Self {
        let (tx, rx) = xch::bounded(1);
        Self {
            shared: Arc::new(Shared {
                trigger,
                sense,
                clock,
                train,
                sense_enter: AtomicU64::new(0),
                sense_exit: AtomicU64::new(0),
                trigger_start: AtomicU64::new(0),
                trigger_end: AtomicU64::new(0),
                state: AtomicU8::new(State::Idle.as_u8()),
                occupied: AtomicBool::new(false),
                tx,
                rx,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Quiet time before the first pulse.
    pub fn set_delay(&self, d: Duration) {
        self.shared.train.set_segment(0, d);
    }

    /// Width of the first pulse.
    pub fn set_duration(&self, d: Duration) {
        self.shared.train.set_segment(1, d);
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn timestamps(&self) -> StageTimestamps {
        let s = &self.shared;
        StageTimestamps {
            sense_enter: s.stamp(&s.sense_enter),
            sense_exit: s.stamp(&s.sense_exit),
            trigger_start: s.stamp(&s.trigger_start),
            trigger_end: s.stamp(&s.trigger_end),
        }
    }

    /// Reject shapes with an active segment wider than `max`.
    pub fn check_pulse_width(&self, max: Duration) -> Result<()> {
        self.shared.train.check_pulse_width(max)
    }

    pub fn trigger_pin(&self) -> &P {
        &self.shared.trigger
    }

    pub fn sense_pin(&self) -> &P {
        &self.shared.sense
    }

    pub fn is_configured(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn spawn_worker(&self, on_complete: CompletionFn) -> Worker {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let shared = self.shared.clone();
        let owner = self.shared.clone();
        let cut: Box<dyn Fn() + Send + Sync> = Box::new(move || owner.train.abort(&owner.trigger));

        let handle = std::thread::spawn(move || {
            tracing::trace!("stage worker started");
            while shared.rx.recv().is_ok() {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                if shared
                    .state
                    .compare_exchange(
                        State::Armed.as_u8(),
                        State::Active.as_u8(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    continue;
                }

                let start = shared.train.run(&shared.trigger, &shared.clock);
                let end = shared.clock.stamp();

                // Reset or abort while the train was running: the cycle is gone.
                if shared.state() != State::Active {
                    continue;
                }
                shared.trigger_start.store(start, Ordering::Release);
                shared.trigger_end.store(end, Ordering::Release);
                if shared.state() != State::Active {
                    // lost the race with reset; leave its zeros in place
                    let _ = shared
                        .trigger_start
                        .compare_exchange(start, 0, Ordering::AcqRel, Ordering::Acquire);
                    let _ = shared
                        .trigger_end
                        .compare_exchange(end, 0, Ordering::AcqRel, Ordering::Acquire);
                    continue;
                }
                on_complete(shared.stamp(&shared.sense_enter));

                // A reset from inside the completion callback wins.
                let _ = shared.state.compare_exchange(
                    State::Active.as_u8(),
                    State::Done.as_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
            tracing::trace!("stage worker exiting cleanly");
        });

        Worker {
            shutdown,
            cut,
            handle,
        }
    }

    fn stop_worker(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(w) = worker {
            w.shutdown.store(true, Ordering::Release);
            (w.cut)();
            // Either this wake-up or an already pending signal gets the worker to the flag check.
            let _ = self.shared.tx.try_send(());
            match w.handle.join() {
                Ok(()) => tracing::trace!("stage worker joined"),
                Err(e) => tracing::warn!(?e, "stage worker panicked during shutdown"),
            }
        }
    }
}

impl<P, T> Stage for ShapedPulseStage<P, T>
where
    P: Pin + 'static,
    T: TickSource + Send + Sync + 'static,
{
    fn arm(&self) -> Result<()> {
        if !self.is_configured() {
            return Err(DriverError::NotConfigured);
        }
        let s = &self.shared;
        s.set_state(State::Armed);
        if s.sense.get() == s.occupied.load(Ordering::Acquire) {
            // Projectile already in the gate: the edge happened before arming.
            s.sensed_enter();
        }
        tracing::debug!("stage armed");
        Ok(())
    }

    fn reset(&self) {
        let s = &self.shared;
        while s.rx.try_recv().is_ok() {}
        s.set_state(State::Idle);
        for slot in [&s.sense_enter, &s.sense_exit, &s.trigger_start, &s.trigger_end] {
            slot.store(0, Ordering::Release);
        }
        tracing::debug!("stage reset");
    }

    fn abort(&self) {
        let s = &self.shared;
        // Idle first, so the worker drops the cut-short train without reporting it.
        s.set_state(State::Idle);
        s.train.abort(&s.trigger);
        tracing::warn!("stage aborted");
    }

    fn configure(&self, mode: PinMode, change: PinChange, on_complete: CompletionFn) -> Result<()> {
        let occupied = occupied_level(mode, change)?;
        let s = &self.shared;

        s.sense.configure(mode).map_err(hw)?;
        s.trigger.configure(PinMode::Output).map_err(hw)?;
        s.trigger.low();

        self.stop_worker();
        let worker = self.spawn_worker(on_complete);
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);

        s.occupied.store(occupied, Ordering::Release);
        let weak: Weak<Shared<P, T>> = Arc::downgrade(s);
        s.sense
            .set_interrupt(
                PinChange::Toggle,
                Box::new(move |level| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_edge(level);
                    }
                }),
            )
            .map_err(hw)?;
        tracing::debug!(?mode, ?change, "stage configured");
        Ok(())
    }
}

impl<P, T> DwellTimer for ShapedPulseStage<P, T>
where
    P: Pin,
    T: TickSource,
{
    fn dwell_time(&self) -> Duration {
        let s = &self.shared;
        s.elapsed(&s.sense_enter, &s.sense_exit)
    }
}

impl<P, T> ActiveTimer for ShapedPulseStage<P, T>
where
    P: Pin,
    T: TickSource,
{
    fn active_time(&self) -> Duration {
        let s = &self.shared;
        s.elapsed(&s.trigger_start, &s.trigger_end)
    }
}

impl<P, T> Shaper for ShapedPulseStage<P, T> {
    fn shape(&self) -> Vec<Duration> {
        self.shared.train.durations()
    }

    fn set_shape(&self, shape: &[Duration]) -> Result<()> {
        self.shared.train.set_shape(shape)
    }
}

impl<P, T> Drop for ShapedPulseStage<P, T> {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(w) = worker {
            w.shutdown.store(true, Ordering::Release);
            let _ = self.shared.tx.try_send(());
            // Last owner released from inside the completion callback: the worker exits on its own.
            if w.handle.thread().id() == std::thread::current().id() {
                return;
            }
            (w.cut)();
            if let Err(e) = w.handle.join() {
                tracing::warn!(?e, "stage worker panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use massdriver_hardware::{SimPin, SimTicks};
    use rstest::rstest;

    fn stage(sense: SimPin) -> ShapedPulseStage<SimPin, SimTicks> {
        let clock = Arc::new(CalibratedClock::new(SimTicks::new(1)));
        ShapedPulseStage::simple(
            SimPin::new(),
            sense,
            clock,
            Duration::from_nanos(10),
            Duration::from_nanos(20),
        )
    }

    #[rstest]
    #[case(PinMode::Output, PinChange::Falling, DriverError::InvalidPinMode)]
    #[case(PinMode::Input, PinChange::Toggle, DriverError::InvalidPinChange)]
    fn configure_rejects(#[case] mode: PinMode, #[case] change: PinChange, #[case] err: DriverError) {
        let s = stage(SimPin::new());
        assert_eq!(s.configure(mode, change, Box::new(|_| {})).unwrap_err(), err);
        assert!(!s.is_configured());
    }

    #[test]
    fn configure_sets_pins_up() {
        let sense = SimPin::new();
        let s = stage(sense.clone());
        s.configure(PinMode::InputPullUp, PinChange::Falling, Box::new(|_| {}))
            .unwrap();
        assert_eq!(sense.mode(), Some(PinMode::InputPullUp));
        assert!(sense.has_interrupt());
        assert_eq!(s.trigger_pin().mode(), Some(PinMode::Output));
        assert!(!s.trigger_pin().get());
    }

    #[test]
    fn faulty_pin_maps_to_hardware_error() {
        let s = stage(SimPin::faulty());
        let err = s
            .configure(PinMode::Input, PinChange::Rising, Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, DriverError::Hardware(_)));
    }

    #[test]
    fn arm_requires_configure() {
        let s = stage(SimPin::new());
        assert_eq!(s.arm(), Err(DriverError::NotConfigured));
    }

    #[test]
    fn edges_ignored_while_idle() {
        let sense = SimPin::with_level(true);
        let s = stage(sense.clone());
        s.configure(PinMode::Input, PinChange::Falling, Box::new(|_| {}))
            .unwrap();
        sense.drive(false);
        assert_eq!(s.timestamps(), StageTimestamps::default());
    }

    #[test]
    fn vacate_before_enter_is_ignored() {
        let sense = SimPin::with_level(true);
        let s = stage(sense);
        s.configure(PinMode::Input, PinChange::Falling, Box::new(|_| {}))
            .unwrap();
        s.arm().unwrap();
        s.shared.on_edge(true);
        assert_eq!(s.timestamps().sense_exit, Duration::ZERO);
        assert_eq!(s.state(), State::Armed);
    }

    #[test]
    fn shape_setters_touch_first_pair() {
        let s = stage(SimPin::new());
        s.set_delay(Duration::from_nanos(1));
        s.set_duration(Duration::from_nanos(2));
        assert_eq!(s.shape(), vec![Duration::from_nanos(1), Duration::from_nanos(2)]);
        assert!(s.set_shape(&[Duration::ZERO]).is_err());
    }

    #[test]
    fn drop_unconfigured_stage() {
        drop(stage(SimPin::new()));
    }
}
