//! Test and helper mocks for massdriver_core

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use massdriver_traits::{PinChange, PinMode};

use crate::error::{DriverError, Result};
use crate::stage::{CompletionFn, Stage};

#[derive(Default)]
struct MockState {
    arms: AtomicUsize,
    resets: AtomicUsize,
    aborts: AtomicUsize,
    fail_arm: AtomicBool,
    on_complete: Mutex<Option<CompletionFn>>,
}

/// Stage without pins: records calls and lets the test fire completion by hand.
///
/// Clones share state, so a test can hand one copy to the driver and keep another.
#[derive(Clone, Default)]
pub struct MockStage {
    state: Arc<MockState>,
}

impl MockStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `arm` calls fail with a hardware error.
    pub fn fail_arm(&self, fail: bool) {
        self.state.fail_arm.store(fail, Ordering::SeqCst);
    }

    pub fn arms(&self) -> usize {
        self.state.arms.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.state.aborts.load(Ordering::SeqCst)
    }

    /// Invoke the completion callback installed by `configure`, as the worker would.
    /// Returns false when the stage was never configured.
    pub fn complete(&self, sense_enter: Duration) -> bool {
        let guard = self
            .state
            .on_complete
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(cb) => {
                cb(sense_enter);
                true
            }
            None => false,
        }
    }
}

impl Stage for MockStage {
    fn arm(&self) -> Result<()> {
        if self.state.fail_arm.load(Ordering::SeqCst) {
            return Err(DriverError::Hardware("mock arm failure".into()));
        }
        self.state.arms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&self) {
        self.state.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn abort(&self) {
        self.state.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn configure(&self, mode: PinMode, change: PinChange, on_complete: CompletionFn) -> Result<()> {
        crate::stage::occupied_level(mode, change)?;
        *self
            .state
            .on_complete
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(on_complete);
        Ok(())
    }
}
