//! ONNX region detectors for faces and bodies.
//!
//! Both detectors are single-output YOLO-style models: the input is a
//! letterboxed 640x640 RGB tensor scaled to [0, 1], the output one
//! `[1, 4 + classes, anchors]` tensor of center-size boxes followed by
//! per-class scores. Boxes are mapped back to frame pixels and thinned with
//! non-maximum suppression.

use crate::types::Rect;
use crate::vision::{Detector, VisionError};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const INPUT_SIZE: u32 = 640;
/// Gray letterbox fill, as used by the YOLO exporters.
const PAD_VALUE: f32 = 114.0 / 255.0;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
/// COCO class index of "person".
pub const PERSON_CLASS: usize = 0;

struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// One ONNX model producing axis-aligned regions.
pub struct OnnxRegionDetector {
    session: Session,
    /// Only this class counts; `None` takes the best class per anchor.
    class: Option<usize>,
    score_threshold: f32,
    nms_threshold: f32,
}

impl OnnxRegionDetector {
    pub fn load(model_path: &Path, class: Option<usize>) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name().to_string()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            ?class,
            "loaded region detector"
        );

        Ok(Self {
            session,
            class,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Regions sorted by descending score.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Rect>, VisionError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::InferenceFailed(format!("output tensor: {e}")))?;
        if shape.len() != 3 {
            return Err(VisionError::InferenceFailed(format!(
                "expected a rank-3 output, got shape {shape:?}"
            )));
        }

        let (rows, cols) = (shape[1] as usize, shape[2] as usize);
        // Some exports emit [1, anchors, 4 + classes] instead.
        let layout = if rows <= cols {
            Layout::ChannelsFirst { channels: rows, anchors: cols }
        } else {
            Layout::AnchorsFirst { anchors: rows, channels: cols }
        };

        let candidates = decode(data, layout, self.class, self.score_threshold);
        let kept = nms(candidates, self.nms_threshold);
        Ok(kept
            .into_iter()
            .filter_map(|d| unletterbox(&d, &letterbox, image.width(), image.height()))
            .collect())
    }
}

/// Face model plus optional body model behind the engine's [`Detector`] seam.
pub struct OnnxDetector {
    faces: OnnxRegionDetector,
    bodies: Option<OnnxRegionDetector>,
}

impl OnnxDetector {
    pub fn load(face_model: &Path, body_model: Option<&Path>) -> Result<Self, VisionError> {
        let faces = OnnxRegionDetector::load(face_model, None)?;
        let bodies = match body_model {
            Some(path) => Some(OnnxRegionDetector::load(path, Some(PERSON_CLASS))?),
            None => {
                tracing::info!("no body model configured; height matching disabled");
                None
            }
        };
        Ok(Self { faces, bodies })
    }
}

impl Detector for OnnxDetector {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<Rect>, VisionError> {
        self.faces.detect(image)
    }

    fn detect_bodies(&mut self, image: &RgbImage) -> Result<Vec<Rect>, VisionError> {
        match &mut self.bodies {
            Some(bodies) => bodies.detect(image),
            None => Ok(Vec::new()),
        }
    }
}

/// Letterbox into a 1x3x640x640 NCHW tensor.
fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = image.dimensions();
    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let pad_x = (INPUT_SIZE - new_w) / 2;
    let pad_y = (INPUT_SIZE - new_h) / 2;

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = pixel[c] as f32 / 255.0;
        }
    }

    (
        tensor,
        LetterboxInfo {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    ChannelsFirst { channels: usize, anchors: usize },
    AnchorsFirst { anchors: usize, channels: usize },
}

impl Layout {
    fn dims(self) -> (usize, usize) {
        match self {
            Self::ChannelsFirst { channels, anchors } | Self::AnchorsFirst { anchors, channels } => {
                (channels, anchors)
            }
        }
    }

    fn at(self, data: &[f32], channel: usize, anchor: usize) -> f32 {
        let idx = match self {
            Self::ChannelsFirst { anchors, .. } => channel * anchors + anchor,
            Self::AnchorsFirst { channels, .. } => anchor * channels + channel,
        };
        data.get(idx).copied().unwrap_or(0.0)
    }
}

fn decode(data: &[f32], layout: Layout, class: Option<usize>, threshold: f32) -> Vec<Scored> {
    let (channels, anchors) = layout.dims();
    if channels < 5 {
        return Vec::new();
    }
    let classes = channels - 4;

    let mut out = Vec::new();
    for i in 0..anchors {
        let score = match class {
            Some(c) if c < classes => layout.at(data, 4 + c, i),
            Some(_) => 0.0,
            None => (0..classes)
                .map(|c| layout.at(data, 4 + c, i))
                .fold(0.0f32, f32::max),
        };
        if score <= threshold {
            continue;
        }
        let cx = layout.at(data, 0, i);
        let cy = layout.at(data, 1, i);
        let w = layout.at(data, 2, i);
        let h = layout.at(data, 3, i);
        out.push(Scored {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            score,
        });
    }
    out
}

fn nms(mut detections: Vec<Scored>, iou_threshold: f32) -> Vec<Scored> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Scored> = Vec::new();
    for d in detections {
        if keep.iter().all(|k| iou(k, &d) <= iou_threshold) {
            keep.push(d);
        }
    }
    keep
}

fn iou(a: &Scored, b: &Scored) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Map a letterboxed box back into frame pixels, clamped to the frame.
fn unletterbox(d: &Scored, lb: &LetterboxInfo, width: u32, height: u32) -> Option<Rect> {
    let map = |v: f32, pad: f32, max: u32| ((v - pad) / lb.scale).round().clamp(0.0, max as f32) as i32;
    let x1 = map(d.x1, lb.pad_x, width);
    let y1 = map(d.y1, lb.pad_y, height);
    let x2 = map(d.x2, lb.pad_x, width);
    let y2 = map(d.y2, lb.pad_y, height);
    (x2 > x1 && y2 > y1).then(|| Rect::new(x1, y1, x2 - x1, y2 - y1))
}
