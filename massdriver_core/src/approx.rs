//! ADC code ↔ voltage calibration curves.
//!
//! Curves are fitted once from two or three `(code, voltage)` points and are
//! immutable afterwards.

use crate::error::{DriverError, Result};

/// Forward mapping from a raw converter code to a physical value.
pub trait Approximator {
    fn convert(&self, code: u16) -> f64;
}

impl<A: Approximator + ?Sized> Approximator for Box<A> {
    fn convert(&self, code: u16) -> f64 {
        (**self).convert(code)
    }
}

/// One calibration point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub code: u16,
    pub voltage: f64,
}

impl Point {
    pub const fn new(code: u16, voltage: f64) -> Self {
        Self { code, voltage }
    }
}

impl From<(u16, f64)> for Point {
    fn from((code, voltage): (u16, f64)) -> Self {
        Self { code, voltage }
    }
}

/// Clamp a real-valued code into the u16 range and round to nearest.
fn to_code(x: f64) -> u16 {
    if x.is_nan() || x <= 0.0 {
        return 0;
    }
    if x >= f64::from(u16::MAX) {
        return u16::MAX;
    }
    x.round() as u16
}

// ── Linear ───────────────────────────────────────────────────────────────────

/// `v = slope * code + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    slope: f64,
    intercept: f64,
}

impl Linear {
    pub const fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    pub fn from_points(p1: Point, p2: Point) -> Result<Self> {
        if p1.code == p2.code {
            return Err(DriverError::InvalidCalibration("linear fit needs two distinct codes"));
        }
        let slope = (p2.voltage - p1.voltage) / (f64::from(p2.code) - f64::from(p1.code));
        Ok(Self {
            slope,
            intercept: p1.voltage - slope * f64::from(p1.code),
        })
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Code producing `target`, clamped to the code range.
    pub fn convert_inverse(&self, target: f64) -> u16 {
        if self.slope == 0.0 {
            return if target > self.intercept { u16::MAX } else { 0 };
        }
        to_code((target - self.intercept) / self.slope)
    }
}

impl Approximator for Linear {
    fn convert(&self, code: u16) -> f64 {
        self.slope * f64::from(code) + self.intercept
    }
}

// ── Quadratic ────────────────────────────────────────────────────────────────

/// `v = a * code² + b * code + c`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadratic {
    a: f64,
    b: f64,
    c: f64,
}

impl Quadratic {
    pub const fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    /// Exact fit through three points (Cramer's rule).
    pub fn from_points(p1: Point, p2: Point, p3: Point) -> Result<Self> {
        let (x1, x2, x3) = (f64::from(p1.code), f64::from(p2.code), f64::from(p3.code));
        let (y1, y2, y3) = (p1.voltage, p2.voltage, p3.voltage);

        let den = (x1 - x2) * (x1 - x3) * (x2 - x3);
        if den == 0.0 {
            return Err(DriverError::InvalidCalibration("quadratic fit needs three distinct codes"));
        }
        let a = (x3 * (y2 - y1) + x2 * (y1 - y3) + x1 * (y3 - y2)) / den;
        let b = (x3 * x3 * (y1 - y2) + x2 * x2 * (y3 - y1) + x1 * x1 * (y2 - y3)) / den;
        let c = (x2 * x3 * (x2 - x3) * y1 + x1 * x3 * (x3 - x1) * y2 + x1 * x2 * (x1 - x2) * y3) / den;
        Ok(Self { a, b, c })
    }

    pub fn coefficients(&self) -> (f64, f64, f64) {
        (self.a, self.b, self.c)
    }

    /// Code that produces `target`.
    ///
    /// Takes the smallest non-negative root, clamped to the code range. With
    /// no real root the result saturates: `u16::MAX` when the target lies above
    /// the curve, 0 when below.
    pub fn convert_inverse(&self, target: f64) -> u16 {
        let (a, b) = (self.a, self.b);
        let c = self.c - target;

        // Quadratic term negligible across the whole code range: solve linearly.
        if a == 0.0 || a.abs() * f64::from(u16::MAX) <= f64::EPSILON * b.abs() {
            if b == 0.0 {
                return if c < 0.0 { u16::MAX } else { 0 };
            }
            return to_code(-c / b);
        }

        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            return if c < 0.0 { u16::MAX } else { 0 };
        }

        // Stable form: avoids cancellation between -b and sqrt(disc).
        let q = -0.5 * (b + b.signum() * disc.sqrt());
        let (r1, r2) = if q == 0.0 { (0.0, 0.0) } else { (q / a, c / q) };

        let root = [r1, r2]
            .into_iter()
            .filter(|r| *r >= 0.0)
            .min_by(f64::total_cmp)
            .unwrap_or(0.0);
        to_code(root)
    }
}

impl Approximator for Quadratic {
    fn convert(&self, code: u16) -> f64 {
        let x = f64::from(code);
        self.a * x * x + self.b * x + self.c
    }
}

// ── Optoisolator CTR ─────────────────────────────────────────────────────────

/// Optoisolator current-transfer curve, fitted through the origin, a mid point
/// and the maximum working point. Only valid between 0 and `max_voltage`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optoisolator {
    curve: Quadratic,
    max_voltage: f64,
}

impl Optoisolator {
    pub fn new(mid: Point, max: Point) -> Result<Self> {
        Ok(Self {
            curve: Quadratic::from_points(Point::new(0, 0.0), mid, max)?,
            max_voltage: max.voltage,
        })
    }

    pub fn max_voltage(&self) -> f64 {
        self.max_voltage
    }

    pub fn curve(&self) -> &Quadratic {
        &self.curve
    }

    /// Like [`Quadratic::convert_inverse`], with the target clamped to `0..=max_voltage`.
    pub fn convert_inverse(&self, target: f64) -> u16 {
        if target <= 0.0 {
            return 0;
        }
        self.curve.convert_inverse(target.min(self.max_voltage))
    }
}

impl Approximator for Optoisolator {
    fn convert(&self, code: u16) -> f64 {
        self.curve.convert(code)
    }
}

// ── Closed set ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Curve {
    Linear(Linear),
    Quadratic(Quadratic),
    Optoisolator(Optoisolator),
}

impl Curve {
    /// Linear fit for two points, quadratic for three.
    pub fn fit(points: &[Point]) -> Result<Self> {
        match points {
            [p1, p2] => Linear::from_points(*p1, *p2).map(Self::Linear),
            [p1, p2, p3] => Quadratic::from_points(*p1, *p2, *p3).map(Self::Quadratic),
            _ => Err(DriverError::InvalidCalibration("need two or three calibration points")),
        }
    }

    pub fn convert_inverse(&self, target: f64) -> u16 {
        match self {
            Self::Linear(c) => c.convert_inverse(target),
            Self::Quadratic(c) => c.convert_inverse(target),
            Self::Optoisolator(c) => c.convert_inverse(target),
        }
    }
}

impl Approximator for Curve {
    fn convert(&self, code: u16) -> f64 {
        match self {
            Self::Linear(c) => c.convert(code),
            Self::Quadratic(c) => c.convert(code),
            Self::Optoisolator(c) => c.convert(code),
        }
    }
}

impl From<Linear> for Curve {
    fn from(c: Linear) -> Self {
        Self::Linear(c)
    }
}

impl From<Quadratic> for Curve {
    fn from(c: Quadratic) -> Self {
        Self::Quadratic(c)
    }
}

impl From<Optoisolator> for Curve {
    fn from(c: Optoisolator) -> Self {
        Self::Optoisolator(c)
    }
}
