//! Raspberry Pi GPIO backend.
//!
//! rppal delivers edge interrupts on its own polling thread, so handlers run
//! in thread context rather than a true ISR; the core treats them the same.

use std::sync::{Mutex, PoisonError};

use massdriver_traits::{BoxError, InterruptHandler, Pin, PinChange, PinMode};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use tracing::{debug, warn};

use crate::error::{HwError, Result};

enum PinState {
    Unconfigured(Option<rppal::gpio::Pin>),
    Input(InputPin),
    Output(OutputPin),
}

/// BCM-numbered GPIO line.
pub struct RppalPin {
    bcm: u8,
    state: Mutex<PinState>,
}

impl RppalPin {
    pub fn open(gpio: &Gpio, bcm: u8) -> Result<Self> {
        let pin = gpio
            .get(bcm)
            .map_err(|e| HwError::Gpio(format!("open pin {bcm}: {e}")))?;
        Ok(Self {
            bcm,
            state: Mutex::new(PinState::Unconfigured(Some(pin))),
        })
    }

    pub fn bcm(&self) -> u8 {
        self.bcm
    }

    fn configure_inner(&self, mode: PinMode) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let PinState::Unconfigured(slot) = &mut *state else {
            return Err(HwError::AlreadyConfigured(self.bcm));
        };
        let Some(pin) = slot.take() else {
            return Err(HwError::AlreadyConfigured(self.bcm));
        };
        *state = match mode {
            PinMode::Input => PinState::Input(pin.into_input()),
            PinMode::InputPullUp => PinState::Input(pin.into_input_pullup()),
            PinMode::InputPullDown => PinState::Input(pin.into_input_pulldown()),
            PinMode::Output => {
                let mut out = pin.into_output();
                out.set_low();
                PinState::Output(out)
            }
        };
        debug!(bcm = self.bcm, ?mode, "gpio configured");
        Ok(())
    }
}

impl Pin for RppalPin {
    fn configure(&self, mode: PinMode) -> std::result::Result<(), BoxError> {
        self.configure_inner(mode).map_err(Into::into)
    }

    fn get(&self) -> bool {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            PinState::Input(p) => p.is_high(),
            PinState::Output(p) => p.is_set_high(),
            PinState::Unconfigured(_) => false,
        }
    }

    fn set(&self, high: bool) {
        match &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            PinState::Output(p) => {
                if high {
                    p.set_high();
                } else {
                    p.set_low();
                }
            }
            _ => warn!(bcm = self.bcm, "write to non-output pin ignored"),
        }
    }

    fn set_interrupt(
        &self,
        change: PinChange,
        handler: InterruptHandler,
    ) -> std::result::Result<(), BoxError> {
        let trigger = match change {
            PinChange::Rising => Trigger::RisingEdge,
            PinChange::Falling => Trigger::FallingEdge,
            PinChange::Toggle => Trigger::Both,
        };
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let PinState::Input(pin) = &mut *state else {
            return Err(Box::new(HwError::NotConfigured("interrupt input")));
        };
        pin.set_async_interrupt(trigger, move |level: Level| handler(level == Level::High))
            .map_err(|e| HwError::Gpio(format!("interrupt on pin {}: {e}", self.bcm)))?;
        Ok(())
    }
}

/// Open every BCM line in `pins`.
pub fn open_pins(pins: &[u8]) -> Result<Vec<RppalPin>> {
    let gpio = Gpio::new().map_err(|e| HwError::Gpio(format!("open gpio: {e}")))?;
    pins.iter().map(|&bcm| RppalPin::open(&gpio, bcm)).collect()
}
