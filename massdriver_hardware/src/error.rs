use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("pin {0} already configured")]
    AlreadyConfigured(u8),
    #[error("pin not configured for {0}")]
    NotConfigured(&'static str),
    #[error("unsupported pin mode: {0}")]
    UnsupportedMode(String),
}

pub type Result<T> = std::result::Result<T, HwError>;
