use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("driver already active")]
    DriverBusy,
    #[error("invalid stage index {0}")]
    InvalidStage(i32),
    #[error("invalid stage count {0} (expected 1..={max})", max = crate::driver::MAX_STAGES)]
    StageCount(usize),
    #[error("invalid pulse train: need an even number of durations, at least two, got {0}")]
    InvalidPulseTrain(usize),
    #[error("pulse width {width_us}us exceeds maximum {max_us}us")]
    PulseWidthExceeded { width_us: u64, max_us: u64 },
    #[error("invalid pin mode")]
    InvalidPinMode,
    #[error("invalid pin change mode")]
    InvalidPinChange,
    #[error("invalid sense pin value: sensor already occupied")]
    SensePin,
    #[error("stage is not configured")]
    NotConfigured,
    #[error("stage {got} reported out of sequence (expected {expected})")]
    OutOfSequence { expected: i8, got: i8 },
    #[error("pin count {pins} does not match approximator count {curves}")]
    PinApproximatorMismatch { pins: usize, curves: usize },
    #[error("invalid sample count: must be >= 1")]
    InvalidSampleCount,
    #[error("invalid calibration: {0}")]
    InvalidCalibration(&'static str),
    #[error("circuit is not underdamped: alpha {alpha:.6} >= omega0 {omega0:.6}")]
    NotUnderdamped { alpha: f64, omega0: f64 },
    #[error("integration time must be positive")]
    InvalidIntegrationTime,
    #[error("hardware error: {0}")]
    Hardware(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
