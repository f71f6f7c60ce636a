//! Conversions bridging `massdriver_config` types to `massdriver_core` types.

use std::sync::Arc;
use std::time::Duration;

use massdriver_config::{CurvePoints, Edge, Limits, SenseMode, StageCfg, StageKind, TimingCfg};
use massdriver_traits::{Pin, PinChange, PinMode, TickSource};

use crate::approx::{Curve, Optoisolator, Point};
use crate::error::{DriverError, Result};
use crate::stage::ShapedPulseStage;
use crate::timing::{CalibratedClock, WaitCalibration};

// ── Sense inputs ─────────────────────────────────────────────────────────────

/// Input mode for a configured sense setting.
pub const fn pin_mode(m: SenseMode) -> PinMode {
    match m {
        SenseMode::Input => PinMode::Input,
        SenseMode::Pullup => PinMode::InputPullUp,
        SenseMode::Pulldown => PinMode::InputPullDown,
    }
}

/// Edge on which a gate counts as occupied.
pub const fn pin_change(e: Edge) -> PinChange {
    match e {
        Edge::Rising => PinChange::Rising,
        Edge::Falling => PinChange::Falling,
    }
}

// ── Curves ───────────────────────────────────────────────────────────────────

impl From<&massdriver_config::PointCfg> for Point {
    fn from(p: &massdriver_config::PointCfg) -> Self {
        Self::new(p.code, p.voltage)
    }
}

impl From<&massdriver_config::CalibrationRow> for Point {
    fn from(r: &massdriver_config::CalibrationRow) -> Self {
        Self::new(r.code, r.voltage)
    }
}

impl TryFrom<&CurvePoints> for Curve {
    type Error = DriverError;

    fn try_from(c: &CurvePoints) -> Result<Self> {
        match c {
            CurvePoints::Fit(points) => {
                let points: Vec<Point> = points.iter().map(Point::from).collect();
                Self::fit(&points)
            }
            CurvePoints::Optoisolator { mid, max } => {
                Optoisolator::new(mid.into(), max.into()).map(Self::Optoisolator)
            }
        }
    }
}

// ── Timing ───────────────────────────────────────────────────────────────────

/// Fixed wait calibration from config, if one is recorded.
pub fn wait_calibration(c: &TimingCfg) -> Option<WaitCalibration> {
    c.fixed().map(|(requested, actual)| {
        WaitCalibration::from_benchmark(Duration::from_nanos(requested), Duration::from_nanos(actual))
    })
}

// ── Stages ───────────────────────────────────────────────────────────────────

/// Build a stage from its config entry and check its pulses against `limits`.
pub fn build_stage<P, T>(
    cfg: &StageCfg,
    trigger: P,
    sense: P,
    clock: Arc<CalibratedClock<T>>,
    limits: &Limits,
) -> Result<ShapedPulseStage<P, T>>
where
    P: Pin + 'static,
    T: TickSource + Send + Sync + 'static,
{
    let us = Duration::from_micros;
    let stage = match &cfg.kind {
        StageKind::Simple {
            delay_us,
            duration_us,
        } => ShapedPulseStage::simple(trigger, sense, clock, us(*delay_us), us(*duration_us)),
        StageKind::DoubleTap {
            first_delay_us,
            first_pulse_us,
            second_delay_us,
            second_pulse_us,
        } => ShapedPulseStage::double_tap(
            trigger,
            sense,
            clock,
            us(*first_delay_us),
            us(*first_pulse_us),
            us(*second_delay_us),
            us(*second_pulse_us),
        ),
        StageKind::Shaped { shape_us } => {
            let shape: Vec<Duration> = shape_us.iter().copied().map(us).collect();
            ShapedPulseStage::new(trigger, sense, clock, &shape)?
        }
    };
    stage.check_pulse_width(us(limits.max_pulse_us))?;
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::Approximator;
    use crate::stage::Shaper;
    use massdriver_config::PointCfg;
    use massdriver_hardware::{SimPin, SimTicks};

    fn clock() -> Arc<CalibratedClock<SimTicks>> {
        Arc::new(CalibratedClock::new(SimTicks::new(1)))
    }

    #[test]
    fn sense_settings_map_to_pin_settings() {
        assert_eq!(pin_mode(SenseMode::Input), PinMode::Input);
        assert_eq!(pin_mode(SenseMode::Pullup), PinMode::InputPullUp);
        assert_eq!(pin_mode(SenseMode::Pulldown), PinMode::InputPullDown);
        assert_eq!(pin_change(Edge::Rising), PinChange::Rising);
        assert_eq!(pin_change(Edge::Falling), PinChange::Falling);
    }

    #[test]
    fn fit_points_become_curve() {
        let pts = CurvePoints::Fit(vec![
            PointCfg { code: 0, voltage: 0.0 },
            PointCfg { code: 100, voltage: 10.0 },
        ]);
        let c = Curve::try_from(&pts).unwrap();
        assert!((c.convert(50) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn fixed_timing_becomes_calibration() {
        let cfg = TimingCfg {
            requested_ns: Some(1000),
            actual_ns: Some(4000),
            ..TimingCfg::default()
        };
        let cal = wait_calibration(&cfg).unwrap();
        assert_eq!(cal.iterations(Duration::from_nanos(4000)), 1000);
        assert!(wait_calibration(&TimingCfg::default()).is_none());
    }

    #[test]
    fn stage_from_config_respects_limit() {
        let cfg = StageCfg {
            trigger: 1,
            sense: 2,
            kind: StageKind::DoubleTap {
                first_delay_us: 5,
                first_pulse_us: 10,
                second_delay_us: 15,
                second_pulse_us: 20,
            },
        };
        let s = build_stage(&cfg, SimPin::new(), SimPin::new(), clock(), &Limits::default()).unwrap();
        assert_eq!(
            s.shape(),
            [5, 10, 15, 20].map(Duration::from_micros).to_vec()
        );

        let tight = Limits { max_pulse_us: 15 };
        let err = build_stage(&cfg, SimPin::new(), SimPin::new(), clock(), &tight).err().unwrap();
        assert_eq!(
            err,
            DriverError::PulseWidthExceeded {
                width_us: 20,
                max_us: 15
            }
        );
    }
}
