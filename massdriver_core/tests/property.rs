use std::time::Duration;

use massdriver_core::{Approximator, CalibratedClock, Curve, Linear, Point};
use massdriver_hardware::SimTicks;
use massdriver_traits::TickSource;
use proptest::prelude::*;

proptest! {
    // After calibration a wait lands within one loop iteration of the request.
    #[test]
    fn calibrated_wait_within_one_iteration(
        cost in 1u64..=16,
        start in 1u64..1_000_000,
        bench_us in 1u64..200,
        reps in 1u32..4,
        target_ns in 0u64..100_000,
    ) {
        let ticks = SimTicks::new(start).with_spin_cost(cost);
        let clock = CalibratedClock::new(ticks.clone());
        clock.calibrate(Duration::from_micros(bench_us), reps);

        let t0 = ticks.ticks();
        clock.wait(Duration::from_nanos(target_ns));
        let elapsed = ticks.ticks() - t0;
        prop_assert!(elapsed <= target_ns);
        prop_assert!(target_ns - elapsed < cost);
    }

    #[test]
    fn quadratic_inverse_round_trips(code in 0u16..=4095) {
        let curve = Curve::fit(&[
            Point::new(0, 0.0),
            Point::new(2048, 5.0),
            Point::new(4095, 10.0),
        ])
        .unwrap();
        let back = curve.convert_inverse(curve.convert(code));
        prop_assert!((i32::from(back) - i32::from(code)).abs() <= 1, "{code} -> {back}");
    }

    #[test]
    fn linear_inverse_round_trips(
        code in 0u16..=u16::MAX,
        slope in 1e-4f64..10.0,
        intercept in -100.0f64..100.0,
    ) {
        let l = Linear::new(slope, intercept);
        let back = l.convert_inverse(l.convert(code));
        prop_assert!((i32::from(back) - i32::from(code)).abs() <= 1);
    }

    #[test]
    fn stamps_are_never_zero(start in 0u64..4) {
        let clock = CalibratedClock::new(SimTicks::new(start));
        prop_assert!(clock.stamp() >= 1);
    }
}
