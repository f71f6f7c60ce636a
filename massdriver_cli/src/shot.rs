//! Assemble the driver and chronograph from config and fire one projectile.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use massdriver_config::{Config, Edge};
use massdriver_core::conversions::{build_stage, pin_change, pin_mode, wait_calibration};
use massdriver_core::{
    ActiveTimer, CalibratedClock, Chronograph, DriverError, DwellTimer, MassDriver, ShapedPulseStage,
};
use massdriver_traits::{MonotonicTicks, Pin, TickSource};
use serde_json::json;
use thiserror::Error;

/// How often the wait loop looks at the shutdown flag.
const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ShotError {
    #[error("shot timed out after {ms} ms waiting on stage {stage}")]
    Timeout { ms: u64, stage: i8 },
    #[error("shot interrupted")]
    Interrupted,
    #[error("stage {stage} failed: {source}")]
    Failed { stage: i8, source: DriverError },
}

enum Outcome {
    Done(Vec<Duration>),
    Failed(i8, DriverError),
}

/// Pins for every stage (trigger, sense) and the optional chronograph gates.
pub struct PinSet<P> {
    pub stages: Vec<(P, P)>,
    pub gates: Option<(P, P)>,
}

pub struct Rig<P, T> {
    pub driver: MassDriver<ShapedPulseStage<P, T>>,
    pub chrono: Option<Chronograph<P, T>>,
    outcomes: xch::Receiver<Outcome>,
    velocity: xch::Receiver<f64>,
}

/// Host clock, calibrated from config or by benchmarking.
pub fn host_clock(cfg: &Config) -> Arc<CalibratedClock<MonotonicTicks>> {
    let ticks = MonotonicTicks::new();
    match wait_calibration(&cfg.timing) {
        Some(cal) => Arc::new(CalibratedClock::with_calibration(ticks, cal)),
        None => {
            let clock = CalibratedClock::new(ticks);
            clock.calibrate(
                Duration::from_micros(cfg.timing.calibrate_us),
                cfg.timing.calibrate_reps,
            );
            Arc::new(clock)
        }
    }
}

/// Build and configure every stage, the driver and the chronograph.
pub fn build_rig<P, T>(cfg: &Config, pins: PinSet<P>, clock: &Arc<CalibratedClock<T>>) -> eyre::Result<Rig<P, T>>
where
    P: Pin + 'static,
    T: TickSource + Send + Sync + 'static,
{
    if pins.stages.len() != cfg.stages.len() {
        eyre::bail!(
            "pin set has {} stages, config has {}",
            pins.stages.len(),
            cfg.stages.len()
        );
    }
    let stages = cfg
        .stages
        .iter()
        .zip(pins.stages)
        .map(|(s, (trigger, sense))| build_stage(s, trigger, sense, clock.clone(), &cfg.limits))
        .collect::<Result<Vec<_>, DriverError>>()?;

    let (tx, outcomes) = xch::bounded(1);
    let tx_err = tx.clone();
    let driver = MassDriver::builder()
        .with_stages(stages)
        .on_error(move |stage, e| {
            let _ = tx_err.try_send(Outcome::Failed(stage, e.clone()));
        })
        .on_complete(move |ts| {
            let _ = tx.try_send(Outcome::Done(ts.to_vec()));
        })
        .build()?;

    let mode = pin_mode(cfg.sense.mode);
    let change = pin_change(cfg.sense.edge);
    driver.configure(mode, change)?;

    let (vtx, velocity) = xch::bounded(1);
    let chrono = match (&cfg.chronograph, pins.gates) {
        (Some(c), Some((a, b))) => {
            let chrono = Chronograph::new(
                a,
                b,
                c.distance_mm,
                clock.clone(),
                Some(Box::new(move |v: f64| {
                    let _ = vtx.try_send(v);
                })),
            );
            chrono.configure(mode, change)?;
            Some(chrono)
        }
        _ => None,
    };

    tracing::info!(
        stages = driver.len(),
        chronograph = chrono.is_some(),
        "rig configured"
    );
    Ok(Rig {
        driver,
        chrono,
        outcomes,
        velocity,
    })
}

/// Result of one completed shot.
#[derive(Debug, Clone)]
pub struct ShotReport {
    /// Stage sense-enter times relative to stage 0.
    pub offsets: Vec<Duration>,
    pub dwell: Vec<Duration>,
    pub active: Vec<Duration>,
    pub speed_m_s: Option<f64>,
}

impl ShotReport {
    pub fn to_json(&self) -> serde_json::Value {
        let us = |d: &Duration| d.as_secs_f64() * 1e6;
        let stages: Vec<_> = (0..self.offsets.len())
            .map(|i| {
                json!({
                    "stage": i,
                    "offset_us": us(&self.offsets[i]),
                    "dwell_us": self.dwell.get(i).map(us),
                    "active_us": self.active.get(i).map(us),
                })
            })
            .collect();
        json!({ "status": "complete", "stages": stages, "speed_m_s": self.speed_m_s })
    }

    pub fn print_human(&self) {
        println!("shot complete: {} stages", self.offsets.len());
        for (i, off) in self.offsets.iter().enumerate() {
            let dwell = self.dwell.get(i).copied().unwrap_or_default();
            let active = self.active.get(i).copied().unwrap_or_default();
            println!("  stage {i}: +{off:?} dwell {dwell:?} active {active:?}");
        }
        match self.speed_m_s {
            Some(v) => println!("  chronograph: {v:.3} m/s"),
            None => println!("  chronograph: no reading"),
        }
    }
}

impl<P, T> Rig<P, T>
where
    P: Pin + 'static,
    T: TickSource + Send + Sync + 'static,
{
    /// Arm, call `launch`, and wait for the sequence to finish.
    pub fn fire(&self, timeout: Duration, shutdown: &AtomicBool, launch: impl FnOnce()) -> eyre::Result<ShotReport> {
        // stale reports from an earlier arm
        while self.outcomes.try_recv().is_ok() {}
        while self.velocity.try_recv().is_ok() {}
        if let Some(c) = &self.chrono {
            c.reset();
        }

        self.driver.arm()?;
        tracing::info!("armed");
        launch();

        let started = Instant::now();
        let deadline = started + timeout;
        let stamps = loop {
            if shutdown.load(Ordering::Acquire) {
                self.driver.abort();
                return Err(ShotError::Interrupted.into());
            }
            let now = Instant::now();
            if now >= deadline {
                let stage = self.driver.current_stage();
                self.driver.abort();
                return Err(ShotError::Timeout {
                    ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    stage,
                }
                .into());
            }
            match self.outcomes.recv_timeout((deadline - now).min(POLL)) {
                Ok(Outcome::Done(ts)) => break ts,
                Ok(Outcome::Failed(stage, source)) => {
                    self.driver.abort();
                    return Err(ShotError::Failed { stage, source }.into());
                }
                Err(xch::RecvTimeoutError::Timeout) => {}
                Err(xch::RecvTimeoutError::Disconnected) => eyre::bail!("driver callbacks dropped"),
            }
        };
        tracing::info!(elapsed_ms = started.elapsed().as_millis(), "sequence complete");

        let speed_m_s = if self.chrono.is_some() {
            let left = deadline.saturating_duration_since(Instant::now());
            self.velocity.recv_timeout(left).ok()
        } else {
            None
        };

        let first = stamps.first().copied().unwrap_or_default();
        let (dwell, active) = self
            .driver
            .stages()
            .map(|(_, s)| (s.dwell_time(), s.active_time()))
            .unzip();
        Ok(ShotReport {
            offsets: stamps.iter().map(|t| t.saturating_sub(first)).collect(),
            dwell,
            active,
            speed_m_s,
        })
    }
}

/// Level a sense pin reads while nothing blocks it.
pub fn idle_level(cfg: &Config) -> bool {
    cfg.sense.edge == Edge::Falling
}

// ── Simulated backend ────────────────────────────────────────────────────────

pub mod sim {
    use massdriver_hardware::{Flight, Gate, SimPin};

    use super::{Config, PinSet, idle_level};

    /// Simulated pins plus the projectile that will cross them.
    pub fn pins(cfg: &Config, speed_m_s: f64, length_mm: f64, spacing_mm: f64) -> (PinSet<SimPin>, Flight) {
        let idle = idle_level(cfg);
        let mut gates = Vec::new();
        let stages: Vec<(SimPin, SimPin)> = cfg
            .stages
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let sense = SimPin::with_level(idle);
                gates.push(Gate {
                    pin: sense.clone(),
                    position_mm: spacing_mm * i as f64,
                });
                (SimPin::new(), sense)
            })
            .collect();

        let chrono = cfg.chronograph.as_ref().map(|c| {
            let (a, b) = (SimPin::with_level(idle), SimPin::with_level(idle));
            let start = spacing_mm * cfg.stages.len() as f64;
            gates.push(Gate {
                pin: a.clone(),
                position_mm: start,
            });
            gates.push(Gate {
                pin: b.clone(),
                position_mm: start + c.distance_mm,
            });
            (a, b)
        });

        let flight = Flight::new(gates, speed_m_s, length_mm, !idle);
        (
            PinSet {
                stages,
                gates: chrono,
            },
            flight,
        )
    }
}

// ── Raspberry Pi backend ─────────────────────────────────────────────────────

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod hw {
    use eyre::WrapErr;
    use massdriver_hardware::rpi::{RppalPin, open_pins};

    use super::{Config, PinSet};

    pub fn pins(cfg: &Config) -> eyre::Result<PinSet<RppalPin>> {
        let mut numbers: Vec<u8> = cfg.stages.iter().flat_map(|s| [s.trigger, s.sense]).collect();
        if let Some(c) = &cfg.chronograph {
            numbers.extend([c.gate_a, c.gate_b]);
        }
        let mut opened = open_pins(&numbers)
            .wrap_err("open gpio pins")?
            .into_iter();
        let mut next = || opened.next().ok_or_else(|| eyre::eyre!("gpio pin count mismatch"));

        let mut stages = Vec::with_capacity(cfg.stages.len());
        for _ in &cfg.stages {
            stages.push((next()?, next()?));
        }
        let gates = match cfg.chronograph {
            Some(_) => Some((next()?, next()?)),
            None => None,
        };
        Ok(PinSet { stages, gates })
    }
}

/// `shot` subcommand.
pub fn run(
    cfg: &Config,
    speed_m_s: f64,
    length_mm: f64,
    spacing_mm: f64,
    timeout: Duration,
    shutdown: &AtomicBool,
    json: bool,
) -> eyre::Result<()> {
    let clock = host_clock(cfg);

    #[cfg(all(feature = "hardware", target_os = "linux"))]
    let report = {
        let _ = (speed_m_s, length_mm, spacing_mm);
        let rig = build_rig(cfg, hw::pins(cfg)?, &clock)?;
        rig.fire(timeout, shutdown, || tracing::info!("waiting for projectile"))?
    };

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    let report = {
        let (pins, flight) = sim::pins(cfg, speed_m_s, length_mm, spacing_mm);
        let rig = build_rig(cfg, pins, &clock)?;
        let mut handle = None;
        let report = rig.fire(timeout, shutdown, || handle = Some(flight.spawn()));
        if let Some(h) = handle
            && h.join().is_err()
        {
            tracing::warn!("simulated flight thread panicked");
        }
        report?
    };

    if json {
        println!("{}", report.to_json());
    } else {
        report.print_human();
    }
    Ok(())
}
