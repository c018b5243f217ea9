//! Per-label cooldown and pose-change bookkeeping.

use crate::types::Rect;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// When a label was last captured or logged, and where its face was.
#[derive(Debug, Clone, Copy)]
pub struct CaptureState {
    pub last_capture: Instant,
    pub last_face: Rect,
}

/// True when `current` moved by more than `threshold` of the previous
/// width, or its area changed by more than `threshold`.
pub fn pose_changed(previous: &Rect, current: &Rect, threshold: f64) -> bool {
    if previous.width <= 0 || previous.area() <= 0 {
        return true;
    }
    let (px, py) = previous.center();
    let (cx, cy) = current.center();
    let dx = (cx - px) as f64;
    let dy = (cy - py) as f64;
    let moved = (dx * dx + dy * dy).sqrt() / previous.width as f64;

    let prev_area = previous.area() as f64;
    let resized = (current.area() as f64 - prev_area).abs() / prev_area;

    moved > threshold || resized > threshold
}

/// Capture states for every label seen so far. Owned by the ingestion path.
pub struct CaptureTracker {
    states: HashMap<i64, CaptureState>,
    cooldown: Duration,
    pose_threshold: f64,
}

impl CaptureTracker {
    pub fn new(cooldown: Duration, pose_threshold: f64) -> Self {
        Self {
            states: HashMap::new(),
            cooldown,
            pose_threshold,
        }
    }

    fn cooled_down(&self, state: &CaptureState, now: Instant) -> bool {
        now.saturating_duration_since(state.last_capture) > self.cooldown
    }

    /// First sighting, or cooldown elapsed and the pose changed.
    pub fn should_capture(&self, label: i64, face: &Rect, now: Instant) -> bool {
        match self.states.get(&label) {
            None => true,
            Some(state) => {
                self.cooled_down(state, now) && pose_changed(&state.last_face, face, self.pose_threshold)
            }
        }
    }

    /// First sighting, or cooldown elapsed regardless of pose.
    pub fn should_log(&self, label: i64, now: Instant) -> bool {
        match self.states.get(&label) {
            None => true,
            Some(state) => self.cooled_down(state, now),
        }
    }

    pub fn record(&mut self, label: i64, face: Rect, now: Instant) {
        self.states.insert(
            label,
            CaptureState {
                last_capture: now,
                last_face: face,
            },
        );
    }

    pub fn get(&self, label: i64) -> Option<&CaptureState> {
        self.states.get(&label)
    }

    /// Drop states for labels no longer in `live`.
    pub fn retain_labels(&mut self, live: impl Fn(i64) -> bool) {
        self.states.retain(|label, _| live(*label));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: f64 = 0.15;

    #[test]
    fn test_unchanged_pose() {
        let r = Rect::new(100, 100, 100, 100);
        assert!(!pose_changed(&r, &r, T));
    }

    #[test]
    fn test_shift_beyond_fifteen_percent_of_width() {
        let prev = Rect::new(100, 100, 100, 100);
        assert!(pose_changed(&prev, &Rect::new(116, 100, 100, 100), T));
        assert!(!pose_changed(&prev, &Rect::new(114, 100, 100, 100), T));
    }

    #[test]
    fn test_area_change_beyond_fifteen_percent() {
        let prev = Rect::new(100, 100, 100, 100);
        // 108 * 108 = 11664, +16.6%; center moves by 4px only
        assert!(pose_changed(&prev, &Rect::new(100, 100, 108, 108), T));
        // 105 * 105 = 11025, +10.25%
        assert!(!pose_changed(&prev, &Rect::new(100, 100, 105, 105), T));
    }

    #[test]
    fn test_cooldown_blocks_second_capture() {
        let t0 = Instant::now();
        let face = Rect::new(0, 0, 50, 50);
        let mut tracker = CaptureTracker::new(Duration::from_secs(5), T);
        assert!(tracker.should_capture(1, &face, t0));
        tracker.record(1, face, t0);
        assert!(!tracker.should_capture(1, &face, t0 + Duration::from_secs(1)));
        assert!(!tracker.should_log(1, t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_capture_after_cooldown_needs_pose_change() {
        let t0 = Instant::now();
        let face = Rect::new(0, 0, 50, 50);
        let mut tracker = CaptureTracker::new(Duration::from_secs(5), T);
        tracker.record(1, face, t0);
        let later = t0 + Duration::from_secs(6);
        assert!(!tracker.should_capture(1, &face, later));
        assert!(tracker.should_log(1, later));
        assert!(tracker.should_capture(1, &Rect::new(20, 0, 50, 50), later));
    }

    #[test]
    fn test_cooldown_boundary_is_exclusive() {
        let t0 = Instant::now();
        let mut tracker = CaptureTracker::new(Duration::from_secs(5), T);
        tracker.record(1, Rect::new(0, 0, 50, 50), t0);
        assert!(!tracker.should_log(1, t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_retain_labels() {
        let t0 = Instant::now();
        let mut tracker = CaptureTracker::new(Duration::from_secs(5), T);
        tracker.record(1, Rect::new(0, 0, 1, 1), t0);
        tracker.record(2, Rect::new(0, 0, 1, 1), t0);
        tracker.retain_labels(|l| l == 2);
        assert!(tracker.get(1).is_none());
        assert!(tracker.get(2).is_some());
    }
}
