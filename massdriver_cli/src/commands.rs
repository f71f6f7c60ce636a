//! `calibrate`, `lcr` and `self-check` subcommands.

use std::time::Duration;

use eyre::WrapErr;
use massdriver_config::Config;
use massdriver_core::{CalibratedClock, CircuitParameters, Curve, VoltageMeter};
use massdriver_hardware::SimAdc;
use massdriver_traits::MonotonicTicks;
use serde_json::json;

use crate::shot::{self, build_rig};

pub fn calibrate(target_us: u64, reps: u32, json: bool) -> eyre::Result<()> {
    if target_us == 0 || reps == 0 {
        eyre::bail!("--target-us and --reps must be >= 1");
    }
    let clock = CalibratedClock::new(MonotonicTicks::new());
    let requested = Duration::from_micros(target_us);
    let actual = clock.benchmark(requested, reps);
    let cal = clock.set_calibration(requested, actual);

    // one calibrated wait to show what is left over
    let t0 = clock.now();
    clock.wait(requested);
    let took = clock.now().saturating_sub(t0);
    let residual_ns = i128::try_from(took.as_nanos()).unwrap_or(i128::MAX)
        - i128::try_from(requested.as_nanos()).unwrap_or(i128::MAX);

    let requested_ns = u64::try_from(requested.as_nanos()).unwrap_or(u64::MAX);
    let actual_ns = u64::try_from(actual.as_nanos()).unwrap_or(u64::MAX);
    if json {
        println!(
            "{}",
            json!({
                "k": cal.k,
                "m": cal.m,
                "requested_ns": requested_ns,
                "actual_ns": actual_ns,
                "residual_ns": residual_ns,
            })
        );
    } else {
        println!("wait calibration: k={} m={}", cal.k, cal.m);
        println!("  {reps} x {requested:?} took {actual:?} on average");
        println!("  calibrated wait residual: {residual_ns} ns");
        println!("config:");
        println!("  [timing]\n  requested_ns = {requested_ns}\n  actual_ns = {actual_ns}");
    }
    Ok(())
}

pub fn lcr(params: CircuitParameters, until_us: Option<f64>, json: bool) -> eyre::Result<()> {
    let period = params.period()?;
    let until = until_us.map_or(period.as_secs_f64(), |us| us * 1e-6);
    let closed = params.total_magnetic_energy(until)?;
    let simpson = params.total_magnetic_energy_integrated(until)?;
    let peak_current = params.peak_current()?;
    let peak_energy = params.peak_magnetic_energy()?;
    let peak_at = params.peak_current_time()?;
    let omega_d = params.damped_frequency()?;

    if json {
        println!(
            "{}",
            json!({
                "natural_frequency_rad_s": params.natural_frequency(),
                "damped_frequency_rad_s": omega_d,
                "damping_factor": params.damping_factor(),
                "critical_resistance_ohm": params.critical_resistance(),
                "time_constant_s": params.time_constant(),
                "period_us": period.as_secs_f64() * 1e6,
                "peak_current_a": peak_current,
                "peak_current_time_us": peak_at.as_secs_f64() * 1e6,
                "peak_magnetic_energy_j": peak_energy,
                "until_us": until * 1e6,
                "magnetic_energy_integral": closed,
                "magnetic_energy_integral_simpson": simpson,
            })
        );
    } else {
        println!("series LCR discharge");
        println!("  ω0 = {:.3} rad/s, ωd = {omega_d:.3} rad/s", params.natural_frequency());
        println!(
            "  α = {:.3} 1/s, τ = {:.3e} s, R_crit = {:.4} Ω",
            params.damping_factor(),
            params.time_constant(),
            params.critical_resistance()
        );
        println!("  period {period:?}");
        println!("  peak current {peak_current:.4} A at {peak_at:?}");
        println!("  peak coil energy {peak_energy:.6} J");
        println!(
            "  ∫½Li² dt over {:.3} µs: {closed:.6e} J·s (simpson {simpson:.6e})",
            until * 1e6
        );
    }
    Ok(())
}

/// Build every component from config against simulated hardware.
pub fn self_check(cfg: &Config, json: bool) -> eyre::Result<()> {
    let clock = std::sync::Arc::new(match massdriver_core::conversions::wait_calibration(&cfg.timing) {
        Some(cal) => CalibratedClock::with_calibration(MonotonicTicks::new(), cal),
        None => CalibratedClock::new(MonotonicTicks::new()),
    });
    let (pins, _flight) = shot::sim::pins(cfg, 1.0, 1.0, 1.0);
    let rig = build_rig(cfg, pins, &clock)?;

    let mut channels = 0;
    if let Some(v) = &cfg.voltmeter {
        let curves = v
            .channels
            .iter()
            .enumerate()
            .map(|(i, ch)| {
                let pts = ch.curve.points().wrap_err_with(|| format!("voltmeter.channels[{i}]"))?;
                Curve::try_from(&pts).wrap_err_with(|| format!("voltmeter.channels[{i}]"))
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        let adcs = v.channels.iter().map(|_| SimAdc::constant(0)).collect();
        let mut meter = VoltageMeter::new(v.samples, adcs, curves)?;
        meter.configure()?;
        meter.voltages()?;
        channels = meter.channels();
    }

    let stages = rig.driver.len();
    let chronograph = rig.chrono.is_some();
    tracing::info!(stages, chronograph, channels, "self-check ok");
    if json {
        println!(
            "{}",
            json!({ "status": "ok", "stages": stages, "chronograph": chronograph, "voltmeter_channels": channels })
        );
    } else {
        println!("self-check ok: {stages} stages, chronograph {chronograph}, {channels} voltmeter channels");
    }
    Ok(())
}
