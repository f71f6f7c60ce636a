use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as xch;
use massdriver_core::{CalibratedClock, Chronograph};
use massdriver_hardware::{Flight, Gate, SimPin};
use massdriver_traits::{MonotonicTicks, PinChange, PinMode};

#[test]
fn measures_a_simulated_flight() {
    let clock = Arc::new(CalibratedClock::new(MonotonicTicks::new()));
    let (a, b) = (SimPin::new(), SimPin::new());
    let (tx, rx) = xch::bounded(1);
    let chrono = Chronograph::new(
        a.clone(),
        b.clone(),
        100.0,
        clock,
        Some(Box::new(move |v| {
            let _ = tx.try_send(v);
        })),
    );
    // pull-ups hold both gates high until the projectile pulls them low
    chrono.configure(PinMode::InputPullUp, PinChange::Falling).unwrap();

    let gates = vec![
        Gate {
            pin: a,
            position_mm: 0.0,
        },
        Gate {
            pin: b,
            position_mm: 100.0,
        },
    ];
    Flight::new(gates, 10.0, 20.0, false).run();

    let v = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    // sleeps only ever run late, so the measured speed mostly comes out low
    assert!(v > 4.0 && v < 10.5, "measured {v} m/s");
    assert!((chrono.speed() - v).abs() < 1e-12);
    assert!(chrono.is_valid());

    let (dwell_a, dwell_b) = chrono.durations();
    assert!(dwell_a >= Duration::from_micros(1_500));
    assert!(dwell_b >= Duration::from_micros(1_500));

    chrono.reset();
    assert!(chrono.is_valid());
    assert_eq!(chrono.speed(), 0.0);
}
