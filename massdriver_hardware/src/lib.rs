//! Platform backends for the mass driver core.
//!
//! - `sim`: simulated ticks, pins, ADC and projectile (always available)
//! - `rpi`: Raspberry Pi GPIO via `rppal` (feature `hardware`, Linux only)
pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod rpi;

pub use sim::{Flight, Gate, SimAdc, SimPin, SimTicks};
