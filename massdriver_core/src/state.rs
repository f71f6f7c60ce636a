//! Lifecycle states shared by stages and the driver.
//!
//! Stages only use `Idle..=Done`; `Failed` is the driver's desync state.

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Idle = 0,
    Armed = 1,
    Active = 2,
    Done = 3,
    Failed = 4,
}

impl State {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a stored state byte; unknown values read as `Failed`.
    #[inline]
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Armed,
            2 => Self::Active,
            3 => Self::Done,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Active => "active",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_roundtrip() {
        for s in [State::Idle, State::Armed, State::Active, State::Done, State::Failed] {
            assert_eq!(State::from_u8(s.as_u8()), s);
        }
        assert_eq!(State::from_u8(200), State::Failed);
    }
}
