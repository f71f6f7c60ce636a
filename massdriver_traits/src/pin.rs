use crate::BoxError;

/// Electrical mode of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    InputPullUp,
    InputPullDown,
    Output,
}

impl PinMode {
    /// True for the modes a sense input may use.
    #[inline]
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputPullUp | Self::InputPullDown)
    }
}

/// Edge selection for pin interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinChange {
    Rising,
    Falling,
    Toggle,
}

/// Interrupt callback; receives the pin level observed when the edge fired.
///
/// Runs in interrupt (or interrupt-like) context: must not block or allocate.
pub type InterruptHandler = Box<dyn Fn(bool) + Send + Sync + 'static>;

/// Digital I/O pin. Shared between a worker thread and an interrupt handler,
/// so all operations take `&self`.
pub trait Pin: Send + Sync {
    fn configure(&self, mode: PinMode) -> Result<(), BoxError>;
    fn get(&self) -> bool;
    fn set(&self, high: bool);
    fn set_interrupt(&self, change: PinChange, handler: InterruptHandler) -> Result<(), BoxError>;

    #[inline]
    fn high(&self) {
        self.set(true);
    }

    #[inline]
    fn low(&self) {
        self.set(false);
    }
}

/// Analog input channel returning raw converter codes.
pub trait AdcChannel {
    fn configure(&mut self) -> Result<(), BoxError>;
    fn read(&mut self) -> Result<u16, BoxError>;
}
