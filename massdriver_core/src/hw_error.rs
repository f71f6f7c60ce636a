//! Maps `Box<dyn Error>` from trait boundaries to typed `DriverError`.
//!
//! The traits in `massdriver_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `massdriver_hardware::HwError` downcasting.

use crate::error::DriverError;

/// Map a trait-boundary error to a typed `DriverError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> DriverError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<massdriver_hardware::error::HwError>() {
            return match hw {
                massdriver_hardware::error::HwError::UnsupportedMode(_) => DriverError::InvalidPinMode,
                other => DriverError::Hardware(other.to_string()),
            };
        }
    }

    DriverError::Hardware(e.to_string())
}

/// Convenience for `map_err` at trait call sites.
pub(crate) fn hw(e: massdriver_traits::BoxError) -> DriverError {
    map_hw_error(e.as_ref())
}
