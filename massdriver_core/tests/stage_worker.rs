//! Stage worker threads driven through simulated pins.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use massdriver_core::{
    ActiveTimer, CalibratedClock, DwellTimer, MassDriver, ShapedPulseStage, Stage, State, WaitCalibration,
};
use massdriver_hardware::{Flight, Gate, SimPin, SimTicks};
use massdriver_traits::{MonotonicTicks, Pin, PinChange, PinMode, TickSource};

const TIMEOUT: Duration = Duration::from_secs(5);

fn ns(v: u64) -> Duration {
    Duration::from_nanos(v)
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

fn completion() -> (xch::Sender<Duration>, xch::Receiver<Duration>) {
    xch::unbounded()
}

#[test]
fn enter_edge_runs_train_once() {
    let ticks = SimTicks::new(1_000);
    let clock = Arc::new(CalibratedClock::new(ticks.clone()));
    let trigger = SimPin::traced(ticks.clone());
    let sense = SimPin::with_level(true);
    let stage = ShapedPulseStage::simple(trigger.clone(), sense.clone(), clock, ns(100), ns(200));

    let (tx, rx) = completion();
    stage
        .configure(
            PinMode::Input,
            PinChange::Falling,
            Box::new(move |at| {
                let _ = tx.send(at);
            }),
        )
        .unwrap();
    trigger.clear_writes();
    stage.arm().unwrap();

    sense.drive(false);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ns(1_000));
    assert!(wait_for(|| stage.state() == State::Done));
    assert_eq!(trigger.writes(), vec![(1_100, true), (1_300, false)]);

    // bouncing inside the gate does not start a second train
    sense.drive(true);
    sense.drive(false);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    let ts = stage.timestamps();
    assert_eq!(ts.sense_enter, ns(1_000));
    assert_eq!(ts.sense_exit, ns(1_300));
    assert_eq!(ts.trigger_start, ns(1_100));
    assert_eq!(ts.trigger_end, ns(1_300));
    assert_eq!(stage.dwell_time(), ns(300));
    assert_eq!(stage.active_time(), ns(200));
}

#[test]
fn occupied_gate_at_arm_triggers_immediately() {
    let ticks = SimTicks::new(50);
    let clock = Arc::new(CalibratedClock::new(ticks));
    // falling edge means low is occupied; SimPin starts low
    let sense = SimPin::new();
    let stage = ShapedPulseStage::simple(SimPin::new(), sense, clock, ns(5), ns(5));

    let (tx, rx) = completion();
    stage
        .configure(
            PinMode::Input,
            PinChange::Falling,
            Box::new(move |at| {
                let _ = tx.send(at);
            }),
        )
        .unwrap();
    stage.arm().unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ns(50));
}

#[test]
fn reset_clears_for_next_shot() {
    let ticks = SimTicks::new(10);
    let clock = Arc::new(CalibratedClock::new(ticks));
    let sense = SimPin::with_level(false);
    let stage = ShapedPulseStage::simple(SimPin::new(), sense.clone(), clock, ns(1), ns(1));

    let (tx, rx) = completion();
    stage
        .configure(
            PinMode::Input,
            PinChange::Rising,
            Box::new(move |at| {
                let _ = tx.send(at);
            }),
        )
        .unwrap();

    for _ in 0..3 {
        stage.arm().unwrap();
        sense.drive(true);
        rx.recv_timeout(TIMEOUT).unwrap();
        sense.drive(false);
        assert!(wait_for(|| stage.state() == State::Done));
        stage.reset();
        assert_eq!(stage.state(), State::Idle);
        assert_eq!(stage.timestamps().sense_enter, Duration::ZERO);
    }
}

/// Host ticks whose busy-loop iteration sleeps for a millisecond.
#[derive(Clone, Default)]
struct SleepyTicks(MonotonicTicks);

impl TickSource for SleepyTicks {
    fn ticks(&self) -> u64 {
        self.0.ticks()
    }
    fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        ticks
    }
    fn spin_once(&self) {
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn early_exit_cuts_the_train() {
    // one iteration per requested millisecond
    let clock = Arc::new(CalibratedClock::with_calibration(
        SleepyTicks::default(),
        WaitCalibration { k: 1, m: 1_000_000 },
    ));
    let trigger = SimPin::new();
    let sense = SimPin::with_level(true);
    let ms = Duration::from_millis;
    let stage = ShapedPulseStage::new(
        trigger.clone(),
        sense.clone(),
        clock,
        &[ms(1), ms(300), ms(1), ms(300)],
    )
    .unwrap();

    let (tx, rx) = completion();
    stage
        .configure(
            PinMode::Input,
            PinChange::Falling,
            Box::new(move |at| {
                let _ = tx.send(at);
            }),
        )
        .unwrap();
    trigger.clear_writes();
    stage.arm().unwrap();

    sense.drive(false);
    assert!(wait_for(|| trigger.get()));
    sense.drive(true);
    // forced low straight away, long before the pulse would have ended
    assert!(!trigger.get());

    rx.recv_timeout(TIMEOUT).unwrap();
    let highs = trigger.writes().iter().filter(|(_, level)| *level).count();
    assert_eq!(highs, 1);
    assert!(!trigger.get());
}

/// Stage on a millisecond-per-iteration clock, configured falling-edge, with
/// completions forwarded to the returned receiver.
fn slow_stage(
    shape_ms: &[u64],
) -> (
    ShapedPulseStage<SimPin, SleepyTicks>,
    SimPin,
    SimPin,
    xch::Receiver<Duration>,
) {
    let clock = Arc::new(CalibratedClock::with_calibration(
        SleepyTicks::default(),
        WaitCalibration { k: 1, m: 1_000_000 },
    ));
    let trigger = SimPin::new();
    let sense = SimPin::with_level(true);
    let shape: Vec<Duration> = shape_ms.iter().copied().map(Duration::from_millis).collect();
    let stage = ShapedPulseStage::new(trigger.clone(), sense.clone(), clock, &shape).unwrap();

    let (tx, rx) = completion();
    stage
        .configure(
            PinMode::Input,
            PinChange::Falling,
            Box::new(move |at| {
                let _ = tx.send(at);
            }),
        )
        .unwrap();
    (stage, trigger, sense, rx)
}

#[test]
fn reset_during_train_keeps_timestamps_clear() {
    let (stage, trigger, sense, rx) = slow_stage(&[1, 100]);
    stage.arm().unwrap();
    sense.drive(false);
    assert!(wait_for(|| trigger.get()));

    stage.reset();
    assert_eq!(stage.timestamps(), Default::default());

    // the train plays out to its end, then the worker must drop the cycle
    assert!(wait_for(|| !trigger.get()));
    std::thread::sleep(Duration::from_millis(200));
    assert!(rx.try_recv().is_err());
    assert_eq!(stage.state(), State::Idle);
    assert_eq!(stage.timestamps(), Default::default());
    assert_eq!(stage.active_time(), Duration::ZERO);
}

#[test]
fn direct_abort_suppresses_completion() {
    let (stage, trigger, sense, rx) = slow_stage(&[1, 50, 1, 50, 1, 50]);
    stage.arm().unwrap();
    sense.drive(false);
    assert!(wait_for(|| trigger.get()));

    stage.abort();
    assert!(!trigger.get());
    assert_eq!(stage.state(), State::Idle);

    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    assert_eq!(stage.state(), State::Idle);
    assert!(!trigger.get());
}

#[test]
fn drop_during_train_does_not_wait_for_it() {
    // about two seconds end to end if left alone
    let shape: Vec<u64> = std::iter::repeat_n([1, 50], 20).flatten().collect();
    let (stage, trigger, sense, _rx) = slow_stage(&shape);
    stage.arm().unwrap();
    sense.drive(false);
    assert!(wait_for(|| trigger.get()));

    let started = Instant::now();
    drop(stage);
    assert!(started.elapsed() < Duration::from_millis(800), "drop took {:?}", started.elapsed());
    assert!(!trigger.get());
}

#[test]
fn driver_sequences_real_stages_through_a_flight() {
    let ticks = SimTicks::new(1_000);
    let clock = Arc::new(CalibratedClock::new(ticks));
    let sense: Vec<SimPin> = (0..3).map(|_| SimPin::with_level(true)).collect();
    let stages: Vec<ShapedPulseStage<SimPin, SimTicks>> = sense
        .iter()
        .map(|s| ShapedPulseStage::simple(SimPin::new(), s.clone(), clock.clone(), ns(100), ns(200)))
        .collect();

    let (tx, rx) = xch::bounded::<Vec<Duration>>(1);
    let failures = Arc::new(AtomicU64::new(0));
    let f = failures.clone();
    let driver = MassDriver::builder()
        .with_stages(stages)
        .on_error(move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .on_complete(move |ts| {
            let _ = tx.try_send(ts.to_vec());
        })
        .build()
        .unwrap();
    driver.configure(PinMode::Input, PinChange::Falling).unwrap();
    driver.arm().unwrap();

    let gates = sense
        .iter()
        .enumerate()
        .map(|(i, pin)| Gate {
            pin: pin.clone(),
            position_mm: 50.0 * i as f64,
        })
        .collect();
    // 10 m/s: gates 5 ms apart, each blocked for 1 ms
    Flight::new(gates, 10.0, 10.0, false).spawn().join().unwrap();

    let ts = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(ts, vec![ns(1_000), ns(1_300), ns(1_600)]);
    assert_eq!(driver.state(), State::Done);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    for (_, stage) in driver.stages() {
        assert!(wait_for(|| stage.state() == State::Done));
    }
}
