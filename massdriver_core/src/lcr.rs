//! Underdamped series LCR discharge model for tuning stage pulse shapes.
//!
//! The capacitor starts charged to `initial_voltage` with no current flowing:
//! `i(t) = V0 / (ωd·L) · e^(−αt) · sin(ωd·t)`.
//! Not used on the interrupt or worker path.

use std::f64::consts::PI;
use std::time::Duration;

use crate::error::{DriverError, Result};

/// Sub-intervals for the Simpson's rule cross-check (even).
pub const SIMPSON_INTERVALS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitParameters {
    /// Henries.
    pub inductance: f64,
    /// Farads.
    pub capacitance: f64,
    /// Ohms.
    pub resistance: f64,
    /// Volts on the capacitor at t = 0.
    pub initial_voltage: f64,
}

impl CircuitParameters {
    pub fn new(inductance: f64, capacitance: f64, resistance: f64, initial_voltage: f64) -> Self {
        Self {
            inductance,
            capacitance,
            resistance,
            initial_voltage,
        }
    }

    /// ω₀ = 1/√(LC), rad/s.
    pub fn natural_frequency(&self) -> f64 {
        1.0 / (self.inductance * self.capacitance).sqrt()
    }

    /// α = R/(2L), 1/s.
    pub fn damping_factor(&self) -> f64 {
        self.resistance / (2.0 * self.inductance)
    }

    /// Resistance at which the circuit stops oscillating, 2·√(L/C).
    pub fn critical_resistance(&self) -> f64 {
        2.0 * (self.inductance / self.capacitance).sqrt()
    }

    /// ωd = √(ω₀² − α²); fails unless α < ω₀.
    pub fn damped_frequency(&self) -> Result<f64> {
        let omega0 = self.natural_frequency();
        let alpha = self.damping_factor();
        if alpha >= omega0 || alpha.is_nan() || omega0.is_nan() {
            return Err(DriverError::NotUnderdamped { alpha, omega0 });
        }
        Ok((omega0 * omega0 - alpha * alpha).sqrt())
    }

    pub fn period(&self) -> Result<Duration> {
        let omega_d = self.damped_frequency()?;
        Ok(Duration::from_secs_f64(2.0 * PI / omega_d))
    }

    /// τ = 1/α, seconds (infinite without resistance).
    pub fn time_constant(&self) -> f64 {
        1.0 / self.damping_factor()
    }

    /// Envelope amplitude of the current, V0/(ωd·L).
    pub fn peak_current(&self) -> Result<f64> {
        Ok(self.current_amplitude(self.damped_frequency()?))
    }

    /// ½·L·I_peak².
    pub fn peak_magnetic_energy(&self) -> Result<f64> {
        let i = self.peak_current()?;
        Ok(0.5 * self.inductance * i * i)
    }

    /// Time of the first current maximum, atan(ωd/α)/ωd.
    pub fn peak_current_time(&self) -> Result<Duration> {
        let omega_d = self.damped_frequency()?;
        let t = omega_d.atan2(self.damping_factor()) / omega_d;
        Ok(Duration::from_secs_f64(t))
    }

    fn current_amplitude(&self, omega_d: f64) -> f64 {
        self.initial_voltage / (omega_d * self.inductance)
    }

    pub fn current_at(&self, t: Duration) -> Result<f64> {
        let omega_d = self.damped_frequency()?;
        let s = t.as_secs_f64();
        Ok(self.current_amplitude(omega_d) * (-self.damping_factor() * s).exp() * (omega_d * s).sin())
    }

    /// Capacitor voltage at `t`.
    pub fn voltage_at(&self, t: Duration) -> Result<f64> {
        let omega_d = self.damped_frequency()?;
        let alpha = self.damping_factor();
        let s = t.as_secs_f64();
        Ok(self.initial_voltage
            * (-alpha * s).exp()
            * ((omega_d * s).cos() + (alpha / omega_d) * (omega_d * s).sin()))
    }

    /// Energy in the inductor at `t`, ½·L·i(t)².
    pub fn magnetic_energy_at(&self, t: Duration) -> Result<f64> {
        let i = self.current_at(t)?;
        Ok(0.5 * self.inductance * i * i)
    }

    /// ∫₀ᵀ ½·L·i(t)² dt in closed form (J·s). `until` in seconds.
    pub fn total_magnetic_energy(&self, until: f64) -> Result<f64> {
        let omega_d = self.damped_frequency()?;
        if until < 0.0 || until.is_nan() {
            return Err(DriverError::InvalidIntegrationTime);
        }
        let alpha = self.damping_factor();
        let b = self.current_amplitude(omega_d);

        // sin² = (1 − cos 2ωt)/2
        let decay = (-2.0 * alpha * until).exp();
        let plain = if alpha == 0.0 {
            until
        } else {
            (1.0 - decay) / (2.0 * alpha)
        };
        let w2 = 2.0 * omega_d;
        let a2 = 2.0 * alpha;
        let oscillating =
            (decay * (w2 * (w2 * until).sin() - a2 * (w2 * until).cos()) + a2) / (a2 * a2 + w2 * w2);

        Ok(0.5 * self.inductance * b * b * 0.5 * (plain - oscillating))
    }

    /// Same integral by Simpson's rule over [`SIMPSON_INTERVALS`] sub-intervals.
    pub fn total_magnetic_energy_integrated(&self, until: f64) -> Result<f64> {
        let omega_d = self.damped_frequency()?;
        if until <= 0.0 || until.is_nan() {
            return Err(DriverError::InvalidIntegrationTime);
        }
        let alpha = self.damping_factor();
        let b = self.current_amplitude(omega_d);
        let energy = |t: f64| {
            let i = b * (-alpha * t).exp() * (omega_d * t).sin();
            0.5 * self.inductance * i * i
        };

        let n = SIMPSON_INTERVALS;
        let h = until / f64::from(n);
        let sum: f64 = (0..=n)
            .map(|k| {
                let w = match k {
                    0 => 1.0,
                    k if k == n => 1.0,
                    k if k % 2 == 0 => 2.0,
                    _ => 4.0,
                };
                w * energy(f64::from(k) * h)
            })
            .sum();
        Ok(sum * h / 3.0)
    }
}
