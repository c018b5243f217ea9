//! Debounces transient unknown faces into a stable "enrollable" signal.

use crate::types::Rect;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
enum TrackState {
    Unseen,
    Tracking { first_seen: Instant, last_region: Rect },
}

/// Single-slot tracker: unknown faces carry no label, so there is only one.
#[derive(Debug)]
pub struct UnknownFaceTracker {
    state: TrackState,
    stable_after: Duration,
    enrollable: bool,
}

impl UnknownFaceTracker {
    pub fn new(stable_after: Duration) -> Self {
        Self {
            state: TrackState::Unseen,
            stable_after,
            enrollable: false,
        }
    }

    /// Record an unknown face in the current frame. Returns true while the
    /// face has been in view longer than the stability window.
    pub fn observe(&mut self, region: Rect, now: Instant) -> bool {
        match &mut self.state {
            TrackState::Unseen => {
                self.state = TrackState::Tracking {
                    first_seen: now,
                    last_region: region,
                };
            }
            TrackState::Tracking {
                first_seen,
                last_region,
            } => {
                *last_region = region;
                if now.saturating_duration_since(*first_seen) > self.stable_after {
                    self.enrollable = true;
                }
            }
        }
        self.enrollable
    }

    /// A frame without any unknown face.
    pub fn reset(&mut self) {
        self.state = TrackState::Unseen;
        self.enrollable = false;
    }

    pub fn is_enrollable(&self) -> bool {
        self.enrollable
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, TrackState::Tracking { .. })
    }

    /// The region to enroll from, only once the face is stable.
    pub fn stable_region(&self) -> Option<Rect> {
        match self.state {
            TrackState::Tracking { last_region, .. } if self.enrollable => Some(last_region),
            _ => None,
        }
    }
}
