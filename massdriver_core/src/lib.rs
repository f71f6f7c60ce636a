#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Mass driver control core (hardware-agnostic).
//!
//! All hardware goes through `massdriver_traits::Pin`, `TickSource` and
//! `AdcChannel`; simulated backends live in `massdriver_hardware::sim`.
//!
//! ## Architecture
//!
//! - **Timing**: calibrated busy-wait clock (`timing`)
//! - **Pulses**: abortable actuator pulse trains (`pulse`)
//! - **Stages**: sense gate + actuator pairs with a worker thread (`stage`)
//! - **Sequencing**: the driver state machine across stages (`driver`)
//! - **Measurement**: two-gate chronograph (`chrono`), averaged voltmeter
//!   (`voltmeter`) with calibration curves (`approx`)
//! - **Modelling**: series LCR discharge (`lcr`)
//!
//! Edge callbacks run in interrupt context: they only stamp atomics and hand
//! work to a bounded channel. Pulses are played on stage worker threads.

pub mod approx;
pub mod chrono;
pub mod conversions;
pub mod driver;
pub mod error;
pub mod hw_error;
pub mod lcr;
pub mod mocks;
pub mod pulse;
pub mod stage;
pub mod state;
pub mod timing;
pub mod util;
pub mod voltmeter;

pub use approx::{Approximator, Curve, Linear, Optoisolator, Point, Quadratic};
pub use chrono::{ChronoTimestamps, Chronograph};
pub use driver::{MAX_STAGES, MassDriver, MassDriverBuilder};
pub use error::{DriverError, Result};
pub use lcr::CircuitParameters;
pub use pulse::PulseTrain;
pub use stage::{ActiveTimer, DwellTimer, ShapedPulseStage, Shaper, Stage, StageTimestamps};
pub use state::State;
pub use timing::{CalibratedClock, WaitCalibration};
pub use voltmeter::VoltageMeter;
