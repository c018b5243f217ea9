//! Process-wide operating mode.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

/// What the decision engine does with each frame.
///
/// `Initializing` → `EnrollmentOnly` | `Recognizing`, and `EnrollmentOnly`
/// → `Recognizing` after a successful retrain. Nothing ever goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SystemState {
    Initializing,
    EnrollmentOnly,
    Recognizing,
}

impl SystemState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::EnrollmentOnly,
            2 => Self::Recognizing,
            _ => Self::Initializing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::EnrollmentOnly => "enrollment-only",
            Self::Recognizing => "recognizing",
        }
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder of the current [`SystemState`] that only accepts the
/// allowed forward transitions.
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(SystemState::Initializing as u8))
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SystemState {
        SystemState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: SystemState, to: SystemState) -> bool {
        let moved = self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            tracing::info!(from = %from, to = %to, "system state changed");
        }
        moved
    }

    /// Leave `Initializing` once startup knows whether a model is usable.
    pub fn finish_startup(&self, trained: bool) -> bool {
        let to = if trained {
            SystemState::Recognizing
        } else {
            SystemState::EnrollmentOnly
        };
        self.transition(SystemState::Initializing, to)
    }

    /// `EnrollmentOnly` → `Recognizing` after the first successful retrain.
    pub fn promote(&self) -> bool {
        self.transition(SystemState::EnrollmentOnly, SystemState::Recognizing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_initializing() {
        assert_eq!(StateCell::new().get(), SystemState::Initializing);
    }

    #[test]
    fn test_startup_untrained_then_promote() {
        let cell = StateCell::new();
        assert!(cell.finish_startup(false));
        assert_eq!(cell.get(), SystemState::EnrollmentOnly);
        assert!(cell.promote());
        assert_eq!(cell.get(), SystemState::Recognizing);
    }

    #[test]
    fn test_no_regression() {
        let cell = StateCell::new();
        cell.finish_startup(true);
        assert!(!cell.finish_startup(false));
        assert!(!cell.promote());
        assert_eq!(cell.get(), SystemState::Recognizing);
    }

    #[test]
    fn test_promote_ignored_while_initializing() {
        let cell = StateCell::new();
        assert!(!cell.promote());
        assert_eq!(cell.get(), SystemState::Initializing);
    }
}
