//! Multi-stage sequencer.
//!
//! Stage `i + 1` is armed only from stage `i`'s completion callback, which
//! runs on that stage's worker thread. Every completion report is
//! cross-checked against the driver's (state, index) pair; a report from the
//! wrong stage or in the wrong state freezes the driver in `Failed` until
//! `reset`/`abort`.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use massdriver_traits::{PinChange, PinMode};

use crate::error::{DriverError, Result};
use crate::stage::{CompletionFn, Stage};
use crate::state::State;
use crate::timing::duration_ns;

/// Upper bound on stages per driver.
pub const MAX_STAGES: usize = 8;

/// Receives the failing stage index (-1 for the driver itself) and the error.
pub type ErrorFn = Box<dyn Fn(i8, &DriverError) + Send + Sync + 'static>;
/// Receives every stage's sense-enter time once the last stage completes.
pub type DoneFn = Box<dyn Fn(&[Duration]) + Send + Sync + 'static>;

// ── Packed status word ───────────────────────────────────────────────────────
// high byte: State, low byte: current stage index as i8

#[inline]
const fn pack(state: State, idx: i8) -> u16 {
    ((state.as_u8() as u16) << 8) | (idx as u8 as u16)
}

#[inline]
const fn unpack(word: u16) -> (State, i8) {
    (State::from_u8((word >> 8) as u8), (word & 0xff) as u8 as i8)
}

const IDLE: u16 = pack(State::Idle, -1);

struct Inner<S> {
    stages: Vec<S>,
    timestamps: Vec<AtomicU64>,
    status: AtomicU16,
    on_error: Option<ErrorFn>,
    on_done: Option<DoneFn>,
}

impl<S: Stage> Inner<S> {
    fn report(&self, idx: i8, err: &DriverError) {
        if let Some(cb) = &self.on_error {
            cb(idx, err);
        }
    }

    fn snapshot(&self) -> Vec<Duration> {
        self.timestamps
            .iter()
            .map(|t| Duration::from_nanos(t.load(Ordering::Acquire)))
            .collect()
    }

    fn clear_timestamps(&self) {
        for t in &self.timestamps {
            t.store(0, Ordering::Release);
        }
    }

    fn stage_triggered(&self, idx: i8, at: Duration) {
        let mut cur = self.status.load(Ordering::Acquire);
        loop {
            let (state, current) = unpack(cur);
            let in_order = current == idx
                && match state {
                    State::Armed => idx == 0,
                    State::Active => idx != 0,
                    _ => false,
                };

            if !in_order {
                match self.status.compare_exchange_weak(
                    cur,
                    pack(State::Failed, idx),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        tracing::warn!(expected = current, got = idx, %state, "stage reported out of sequence");
                        self.report(
                            idx,
                            &DriverError::OutOfSequence {
                                expected: current,
                                got: idx,
                            },
                        );
                        return;
                    }
                    Err(actual) => {
                        cur = actual;
                        continue;
                    }
                }
            }

            if let Some(slot) = usize::try_from(idx).ok().and_then(|i| self.timestamps.get(i)) {
                slot.store(duration_ns(at), Ordering::Release);
            }

            let next = idx.saturating_add(1);
            let last = usize::try_from(next).is_ok_and(|n| n >= self.stages.len());
            let target = if last {
                pack(State::Done, next)
            } else {
                pack(State::Active, next)
            };
            if let Err(actual) =
                self.status
                    .compare_exchange_weak(cur, target, Ordering::AcqRel, Ordering::Acquire)
            {
                cur = actual;
                continue;
            }

            if last {
                tracing::info!(stages = self.stages.len(), "sequence complete");
                if let Some(cb) = &self.on_done {
                    cb(&self.snapshot());
                }
                return;
            }

            tracing::debug!(stage = next, "arming next stage");
            let armed = usize::try_from(next)
                .ok()
                .and_then(|i| self.stages.get(i))
                .map_or(Ok(()), |s| s.arm());
            if let Err(e) = armed {
                self.status
                    .store(pack(State::Failed, next), Ordering::Release);
                tracing::warn!(stage = next, error = %e, "stage arm failed");
                self.report(next, &e);
            }
            return;
        }
    }
}

/// Ordered set of 1..=8 stages driven as one state machine.
pub struct MassDriver<S> {
    inner: Arc<Inner<S>>,
}

impl<S: Stage + 'static> MassDriver<S> {
    pub fn builder() -> MassDriverBuilder<S> {
        MassDriverBuilder::default()
    }

    /// Wire every stage's completion to the sequencer.
    pub fn configure(&self, mode: PinMode, change: PinChange) -> Result<()> {
        for (i, stage) in self.inner.stages.iter().enumerate() {
            let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
            // i < MAX_STAGES, so the cast is lossless
            let idx = i as i8;
            let on_complete: CompletionFn = Box::new(move |at| {
                if let Some(inner) = weak.upgrade() {
                    inner.stage_triggered(idx, at);
                }
            });
            stage.configure(mode, change, on_complete)?;
        }
        tracing::debug!(stages = self.inner.stages.len(), "driver configured");
        Ok(())
    }

    /// Reset all stages and arm the first one.
    pub fn arm(&self) -> Result<()> {
        let inner = &self.inner;
        let cur = inner.status.load(Ordering::Acquire);
        let (state, _) = unpack(cur);
        if state != State::Idle
            || inner
                .status
                .compare_exchange(cur, pack(State::Armed, 0), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            inner.report(-1, &DriverError::DriverBusy);
            return Err(DriverError::DriverBusy);
        }

        for stage in &inner.stages {
            stage.reset();
        }
        inner.clear_timestamps();

        if let Err(e) = inner.stages[0].arm() {
            inner.status.store(pack(State::Failed, 0), Ordering::Release);
            tracing::warn!(error = %e, "first stage failed to arm");
            inner.report(0, &e);
            return Err(e);
        }
        tracing::debug!("driver armed");
        Ok(())
    }

    /// Return to Idle, resetting every stage.
    pub fn reset(&self) {
        self.inner.status.store(IDLE, Ordering::Release);
        for stage in &self.inner.stages {
            stage.reset();
        }
        self.inner.clear_timestamps();
        tracing::debug!("driver reset");
    }

    /// Like `reset`, and also force every actuator low.
    pub fn abort(&self) {
        self.inner.status.store(IDLE, Ordering::Release);
        for stage in &self.inner.stages {
            stage.reset();
            stage.abort();
        }
        self.inner.clear_timestamps();
        tracing::warn!("driver aborted");
    }

    pub fn state(&self) -> State {
        unpack(self.inner.status.load(Ordering::Acquire)).0
    }

    /// Index of the stage expected to report next; -1 while idle.
    pub fn current_stage(&self) -> i8 {
        unpack(self.inner.status.load(Ordering::Acquire)).1
    }

    /// Consistent (state, index) pair.
    pub fn status(&self) -> (State, i8) {
        unpack(self.inner.status.load(Ordering::Acquire))
    }

    pub fn stage(&self, idx: i32) -> Result<&S> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.inner.stages.get(i))
            .ok_or(DriverError::InvalidStage(idx))
    }

    pub fn stages(&self) -> impl Iterator<Item = (usize, &S)> {
        self.inner.stages.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.inner.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.stages.is_empty()
    }

    /// Sense-enter time recorded per completed stage (zero if not reached).
    pub fn timestamps(&self) -> Vec<Duration> {
        self.inner.snapshot()
    }

    /// Feed a completion report directly, as a stage's callback would.
    pub fn stage_triggered(&self, idx: i8, at: Duration) {
        self.inner.stage_triggered(idx, at);
    }
}

impl<S> std::fmt::Debug for MassDriver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (state, idx) = unpack(self.inner.status.load(Ordering::Acquire));
        f.debug_struct("MassDriver")
            .field("stages", &self.inner.stages.len())
            .field("state", &state)
            .field("current", &idx)
            .finish()
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

pub struct MassDriverBuilder<S> {
    stages: Vec<S>,
    on_error: Option<ErrorFn>,
    on_done: Option<DoneFn>,
}

impl<S> Default for MassDriverBuilder<S> {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            on_error: None,
            on_done: None,
        }
    }
}

impl<S: Stage + 'static> MassDriverBuilder<S> {
    pub fn with_stage(mut self, stage: S) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_stages(mut self, stages: impl IntoIterator<Item = S>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn on_error(mut self, f: impl Fn(i8, &DriverError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&[Duration]) + Send + Sync + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<MassDriver<S>> {
        let n = self.stages.len();
        if !(1..=MAX_STAGES).contains(&n) {
            return Err(DriverError::StageCount(n));
        }
        Ok(MassDriver {
            inner: Arc::new(Inner {
                stages: self.stages,
                timestamps: (0..n).map(|_| AtomicU64::new(0)).collect(),
                status: AtomicU16::new(IDLE),
                on_error: self.on_error,
                on_done: self.on_done,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockStage;

    #[test]
    fn pack_roundtrip() {
        for (s, i) in [(State::Idle, -1), (State::Armed, 0), (State::Done, 8), (State::Failed, 3)] {
            assert_eq!(unpack(pack(s, i)), (s, i));
        }
    }

    #[test]
    fn stage_count_bounds() {
        assert_eq!(
            MassDriver::<MockStage>::builder().build().unwrap_err(),
            DriverError::StageCount(0)
        );
        let nine = (0..9).map(|_| MockStage::new());
        assert_eq!(
            MassDriver::builder().with_stages(nine).build().unwrap_err(),
            DriverError::StageCount(9)
        );
    }

    #[test]
    fn stage_lookup() {
        let d = MassDriver::builder()
            .with_stage(MockStage::new())
            .build()
            .unwrap();
        assert!(d.stage(0).is_ok());
        assert_eq!(d.stage(1).err(), Some(DriverError::InvalidStage(1)));
        assert_eq!(d.stage(-1).err(), Some(DriverError::InvalidStage(-1)));
        assert_eq!(d.status(), (State::Idle, -1));
    }
}
