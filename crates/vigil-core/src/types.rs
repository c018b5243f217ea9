use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Label reported by the recognizer when no identity matched.
pub const NO_LABEL: i64 = -1;

/// Name returned for labels absent from the identity directory.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Axis-aligned region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Integer center, rounded toward the origin.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Half-open containment: the right and bottom edges are outside.
    pub fn contains(&self, (px, py): (i32, i32)) -> bool {
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }

    /// Intersect with a `width` x `height` image. Returns `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.x + self.width).min(width as i32);
        let y1 = (self.y + self.height).min(height as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// A known individual, as cached from the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub label: i64,
    pub name: String,
    pub role: String,
}

impl Identity {
    /// "Role: Name", the form shown next to a recognized face.
    pub fn display_name(&self) -> String {
        format!("{}: {}", self.role, self.name)
    }
}

/// One face recognized in one frame. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// [`NO_LABEL`] when the model produced no prediction.
    pub label: i64,
    pub name: String,
    /// Distance score, lower is a better match.
    pub confidence: f64,
    pub face_region: Rect,
}

/// A captured color frame. Cloning makes an owned deep copy.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64, captured_at: Instant) -> Self {
        Self {
            image,
            sequence,
            captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copy the pixels under `region`, clipped to the frame bounds.
    pub fn crop(&self, region: &Rect) -> Option<RgbImage> {
        let r = region.clamp_to(self.width(), self.height())?;
        Some(
            image::imageops::crop_imm(&self.image, r.x as u32, r.y as u32, r.width as u32, r.height as u32)
                .to_image(),
        )
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .finish()
    }
}
