pub mod clock;
pub mod pin;

pub use clock::{MonotonicTicks, TickSource};
pub use pin::{AdcChannel, InterruptHandler, Pin, PinChange, PinMode};

/// Error type used at the platform boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
