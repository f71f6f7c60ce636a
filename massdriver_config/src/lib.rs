#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and calibration-point parsing for the mass driver.
//!
//! - `Config` and sub-structs are deserialized from TOML and checked by
//!   `Config::validate`.
//! - Curve calibration points may live in a CSV file with a `code,voltage`
//!   header; two rows fit a line, three rows a quadratic.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::Deserializer;

/// Stage count ceiling enforced by the driver.
pub const MAX_STAGES: usize = 8;

/// Calibration CSV schema.
///
/// Expected headers:
/// code,voltage
///
/// Example:
/// code,voltage
/// 0,0.0
/// 2048,5.0
/// 4095,10.0
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CalibrationRow {
    pub code: u16,
    pub voltage: f64,
}

// ── Timing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingCfg {
    /// Length of one benchmark wait (µs).
    pub calibrate_us: u64,
    /// Benchmark repetitions averaged into the ratio.
    pub calibrate_reps: u32,
    /// Fixed calibration from an earlier benchmark: loop of `requested_ns`
    /// iterations took `actual_ns`. Both or neither.
    pub requested_ns: Option<u64>,
    pub actual_ns: Option<u64>,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            calibrate_us: 2000,
            calibrate_reps: 50,
            requested_ns: None,
            actual_ns: None,
        }
    }
}

impl TimingCfg {
    /// `(requested_ns, actual_ns)` when a fixed calibration is configured.
    pub fn fixed(&self) -> Option<(u64, u64)> {
        self.requested_ns.zip(self.actual_ns)
    }
}

// ── Sense inputs ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenseMode {
    #[default]
    Input,
    Pullup,
    Pulldown,
}

/// Edge on which the projectile enters a gate.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Rising,
    #[default]
    Falling,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SenseCfg {
    pub mode: SenseMode,
    pub edge: Edge,
}

// ── Stages ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    Simple {
        delay_us: u64,
        duration_us: u64,
    },
    DoubleTap {
        first_delay_us: u64,
        first_pulse_us: u64,
        second_delay_us: u64,
        second_pulse_us: u64,
    },
    Shaped {
        shape_us: Vec<u64>,
    },
}

impl StageKind {
    /// Alternating quiet/active durations in µs.
    pub fn shape_us(&self) -> Vec<u64> {
        match self {
            Self::Simple {
                delay_us,
                duration_us,
            } => vec![*delay_us, *duration_us],
            Self::DoubleTap {
                first_delay_us,
                first_pulse_us,
                second_delay_us,
                second_pulse_us,
            } => vec![*first_delay_us, *first_pulse_us, *second_delay_us, *second_pulse_us],
            Self::Shaped { shape_us } => shape_us.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StageCfg {
    /// Actuator output pin (BCM number).
    pub trigger: u8,
    /// Sense gate input pin (BCM number).
    pub sense: u8,
    #[serde(flatten)]
    pub kind: StageKind,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Widest active segment allowed in any stage shape (µs).
    pub max_pulse_us: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_pulse_us: 2000 }
    }
}

// ── Chronograph ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone)]
pub struct ChronographCfg {
    pub gate_a: u8,
    pub gate_b: u8,
    /// Gate separation in millimetres.
    pub distance_mm: f64,
}

// ── Voltmeter ────────────────────────────────────────────────────────────────

/// Calibration point; accepts `[code, voltage]` or `{ code = .., voltage = .. }`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointCfg {
    pub code: u16,
    pub voltage: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PointToml {
    Tuple((u16, f64)),
    Table { code: u16, voltage: f64 },
}

impl<'de> Deserialize<'de> for PointCfg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match PointToml::deserialize(deserializer)? {
            PointToml::Tuple((code, voltage)) | PointToml::Table { code, voltage } => {
                Self { code, voltage }
            }
        })
    }
}

impl From<CalibrationRow> for PointCfg {
    fn from(r: CalibrationRow) -> Self {
        Self {
            code: r.code,
            voltage: r.voltage,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "curve", rename_all = "snake_case")]
pub enum CurveCfg {
    Linear { points: Vec<PointCfg> },
    Quadratic { points: Vec<PointCfg> },
    Optoisolator { mid: PointCfg, max: PointCfg },
    Csv { path: PathBuf },
}

/// Curve definition with any CSV reference resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum CurvePoints {
    /// Two points fit a line, three a quadratic.
    Fit(Vec<PointCfg>),
    Optoisolator { mid: PointCfg, max: PointCfg },
}

impl CurveCfg {
    /// Resolve the calibration points, reading the CSV when referenced.
    pub fn points(&self) -> eyre::Result<CurvePoints> {
        Ok(match self {
            Self::Linear { points } | Self::Quadratic { points } => CurvePoints::Fit(points.clone()),
            Self::Optoisolator { mid, max } => CurvePoints::Optoisolator {
                mid: *mid,
                max: *max,
            },
            Self::Csv { path } => CurvePoints::Fit(
                load_curve_csv(path)?
                    .into_iter()
                    .map(PointCfg::from)
                    .collect(),
            ),
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelCfg {
    /// ADC channel index.
    pub adc: u8,
    #[serde(flatten)]
    pub curve: CurveCfg,
}

#[derive(Debug, Deserialize)]
pub struct VoltmeterCfg {
    #[serde(default = "default_samples")]
    pub samples: u32,
    pub channels: Vec<ChannelCfg>,
}

fn default_samples() -> u32 {
    16
}

// ── Logging ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

// ── Root ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingCfg,
    #[serde(default)]
    pub sense: SenseCfg,
    pub stages: Vec<StageCfg>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub chronograph: Option<ChronographCfg>,
    #[serde(default)]
    pub voltmeter: Option<VoltmeterCfg>,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_curve_csv(path: &Path) -> eyre::Result<Vec<CalibrationRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open curve CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["code", "voltage"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "curve CSV must have headers 'code,voltage', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        }
    }
    let points: Vec<PointCfg> = rows.iter().copied().map(PointCfg::from).collect();
    check_fit_points(&points, "curve CSV")?;
    Ok(rows)
}

fn check_fit_points(points: &[PointCfg], what: &str) -> eyre::Result<()> {
    if !(2..=3).contains(&points.len()) {
        eyre::bail!("{what}: expected 2 or 3 calibration points, got {}", points.len());
    }
    check_points(points, what)
}

fn check_points(points: &[PointCfg], what: &str) -> eyre::Result<()> {
    let mut seen = HashSet::new();
    for p in points {
        if !p.voltage.is_finite() {
            eyre::bail!("{what}: voltage must be finite");
        }
        if !seen.insert(p.code) {
            eyre::bail!("{what}: duplicate calibration code {}", p.code);
        }
    }
    Ok(())
}

impl Config {
    /// Resolve relative curve CSV paths against `base` (the config file's directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        let Some(v) = self.voltmeter.as_mut() else {
            return;
        };
        for ch in &mut v.channels {
            if let CurveCfg::Csv { path } = &mut ch.curve
                && path.is_relative()
            {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Timing
        if self.timing.calibrate_us == 0 {
            eyre::bail!("timing.calibrate_us must be >= 1");
        }
        if self.timing.calibrate_reps == 0 {
            eyre::bail!("timing.calibrate_reps must be >= 1");
        }
        match (self.timing.requested_ns, self.timing.actual_ns) {
            (Some(0), _) | (_, Some(0)) => {
                eyre::bail!("timing.requested_ns and timing.actual_ns must be >= 1")
            }
            (Some(_), None) | (None, Some(_)) => {
                eyre::bail!("timing.requested_ns and timing.actual_ns must be set together")
            }
            _ => {}
        }

        // Limits
        if self.limits.max_pulse_us == 0 {
            eyre::bail!("limits.max_pulse_us must be >= 1");
        }

        // Stages
        if self.stages.is_empty() || self.stages.len() > MAX_STAGES {
            eyre::bail!(
                "stages: expected 1..={MAX_STAGES} entries, got {}",
                self.stages.len()
            );
        }
        let mut pins = HashSet::new();
        let mut claim = |pin: u8, what: &str| -> eyre::Result<()> {
            if !pins.insert(pin) {
                eyre::bail!("{what}: pin {pin} is already in use");
            }
            Ok(())
        };
        for (i, s) in self.stages.iter().enumerate() {
            claim(s.trigger, &format!("stages[{i}].trigger"))?;
            claim(s.sense, &format!("stages[{i}].sense"))?;
            let shape = s.kind.shape_us();
            if shape.len() < 2 || shape.len() % 2 != 0 {
                eyre::bail!(
                    "stages[{i}]: shape needs an even number of durations, at least two, got {}",
                    shape.len()
                );
            }
            if let Some(w) = shape
                .iter()
                .skip(1)
                .step_by(2)
                .find(|w| **w > self.limits.max_pulse_us)
            {
                eyre::bail!(
                    "stages[{i}]: pulse width {w}us exceeds limits.max_pulse_us ({})",
                    self.limits.max_pulse_us
                );
            }
        }

        // Chronograph
        if let Some(c) = &self.chronograph {
            if !c.distance_mm.is_finite() || c.distance_mm <= 0.0 {
                eyre::bail!("chronograph.distance_mm must be > 0");
            }
            claim(c.gate_a, "chronograph.gate_a")?;
            claim(c.gate_b, "chronograph.gate_b")?;
        }

        // Voltmeter
        if let Some(v) = &self.voltmeter {
            if v.samples == 0 {
                eyre::bail!("voltmeter.samples must be >= 1");
            }
            if v.channels.is_empty() {
                eyre::bail!("voltmeter.channels must not be empty");
            }
            for (i, ch) in v.channels.iter().enumerate() {
                let what = format!("voltmeter.channels[{i}]");
                match &ch.curve {
                    CurveCfg::Linear { points } => {
                        if points.len() != 2 {
                            eyre::bail!("{what}: linear curve needs 2 points, got {}", points.len());
                        }
                        check_points(points, &what)?;
                    }
                    CurveCfg::Quadratic { points } => {
                        if points.len() != 3 {
                            eyre::bail!("{what}: quadratic curve needs 3 points, got {}", points.len());
                        }
                        check_points(points, &what)?;
                    }
                    CurveCfg::Optoisolator { mid, max } => {
                        if mid.code == 0 || max.code == 0 {
                            eyre::bail!("{what}: optoisolator points must not use code 0");
                        }
                        check_points(&[*mid, *max], &what)?;
                        if max.voltage <= 0.0 {
                            eyre::bail!("{what}: optoisolator max voltage must be > 0");
                        }
                    }
                    // contents are checked when the file is loaded
                    CurveCfg::Csv { path } => {
                        if path.as_os_str().is_empty() {
                            eyre::bail!("{what}: csv path must not be empty");
                        }
                    }
                }
            }
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got {r:?}");
        }

        Ok(())
    }
}
