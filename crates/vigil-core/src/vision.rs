//! Detector and face-model boundary.
//!
//! Detection and recognition are opaque: a [`Detector`] finds face and body
//! regions, a [`FaceModel`] maps a normalized face crop to a label and a
//! distance. [`Recognizer`] composes the two with a swappable model slot so a
//! background retrain can replace the model without pausing the frame loop.

use crate::directory::IdentityDirectory;
use crate::types::{Frame, RecognitionResult, Rect, NO_LABEL};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Side length of the normalized face crop fed to the face model.
pub const FACE_SAMPLE_SIZE: u32 = 200;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("training failed: {0}")]
    TrainingFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds face and body regions in a frame. One caller at a time.
pub trait Detector: Send {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<Rect>, VisionError>;
    fn detect_bodies(&mut self, image: &RgbImage) -> Result<Vec<Rect>, VisionError>;
}

/// Builds fresh detector instances, so the retrain job never shares the
/// live loop's detector.
pub type DetectorFactory = Arc<dyn Fn() -> Result<Box<dyn Detector>, VisionError> + Send + Sync>;

/// Model output for one face crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i64,
    pub confidence: f64,
}

/// A trained face model. Immutable once built; retraining produces a new one.
pub trait FaceModel: Send + Sync {
    fn predict(&self, face: &GrayImage) -> Prediction;
    fn save(&self, path: &Path) -> Result<(), VisionError>;
}

/// A labeled, normalized face crop.
#[derive(Clone)]
pub struct TrainingSample {
    pub label: i64,
    pub face: GrayImage,
}

/// Builds and restores face models.
pub trait Trainer: Send + Sync {
    fn train(&self, samples: &[TrainingSample]) -> Result<Arc<dyn FaceModel>, VisionError>;
    fn load(&self, path: &Path) -> Result<Arc<dyn FaceModel>, VisionError>;
}

/// Grayscale + fixed-size crop of `region`, the input every face model sees.
pub fn normalize_face(image: &RgbImage, region: &Rect) -> Option<GrayImage> {
    let r = region.clamp_to(image.width(), image.height())?;
    let crop = image::imageops::crop_imm(image, r.x as u32, r.y as u32, r.width as u32, r.height as u32)
        .to_image();
    let gray = image::imageops::grayscale(&crop);
    Some(image::imageops::resize(
        &gray,
        FACE_SAMPLE_SIZE,
        FACE_SAMPLE_SIZE,
        FilterType::Triangle,
    ))
}

/// The currently served model. Readers clone the `Arc` and predict outside
/// the lock; a retrain swaps the whole model in one write.
#[derive(Default)]
pub struct ModelSlot {
    current: RwLock<Option<Arc<dyn FaceModel>>>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn FaceModel>> {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn replace(&self, model: Arc<dyn FaceModel>) {
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(model);
    }

    pub fn is_trained(&self) -> bool {
        self.get().is_some()
    }
}

/// Detector plus the served model: the engine's view of "recognize(frame)".
pub struct Recognizer {
    detector: Box<dyn Detector>,
    model: Arc<ModelSlot>,
    directory: Arc<IdentityDirectory>,
}

impl Recognizer {
    pub fn new(detector: Box<dyn Detector>, model: Arc<ModelSlot>, directory: Arc<IdentityDirectory>) -> Self {
        Self {
            detector,
            model,
            directory,
        }
    }

    pub fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<Rect>, VisionError> {
        self.detector.detect_faces(&frame.image)
    }

    pub fn detect_bodies(&mut self, frame: &Frame) -> Result<Vec<Rect>, VisionError> {
        self.detector.detect_bodies(&frame.image)
    }

    /// Detect faces and predict a label for each. Empty while untrained.
    pub fn recognize(&mut self, frame: &Frame) -> Result<Vec<RecognitionResult>, VisionError> {
        let Some(model) = self.model.get() else {
            return Ok(Vec::new());
        };
        let faces = self.detector.detect_faces(&frame.image)?;
        let mut results = Vec::with_capacity(faces.len());
        for region in faces {
            let Some(face) = normalize_face(&frame.image, &region) else {
                continue;
            };
            let prediction = model.predict(&face);
            let name = if prediction.label == NO_LABEL {
                crate::types::UNKNOWN_NAME.to_string()
            } else {
                self.directory.lookup(prediction.label)
            };
            results.push(RecognitionResult {
                label: prediction.label,
                name,
                confidence: prediction.confidence,
                face_region: region,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Scripted detector and model shared by the engine and retrain tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns the next scripted face/body lists, then empty lists.
    #[derive(Default)]
    pub struct ScriptedDetector {
        pub faces: VecDeque<Vec<Rect>>,
        pub bodies: VecDeque<Vec<Rect>>,
    }

    impl Detector for ScriptedDetector {
        fn detect_faces(&mut self, _image: &RgbImage) -> Result<Vec<Rect>, VisionError> {
            Ok(self.faces.pop_front().unwrap_or_default())
        }
        fn detect_bodies(&mut self, _image: &RgbImage) -> Result<Vec<Rect>, VisionError> {
            Ok(self.bodies.pop_front().unwrap_or_default())
        }
    }

    /// Predicts from a queue of scripted predictions, falling back to `NO_LABEL`.
    pub struct ScriptedModel {
        pub predictions: Mutex<VecDeque<Prediction>>,
    }

    impl ScriptedModel {
        pub fn new(predictions: Vec<Prediction>) -> Self {
            Self {
                predictions: Mutex::new(predictions.into()),
            }
        }
    }

    impl FaceModel for ScriptedModel {
        fn predict(&self, _face: &GrayImage) -> Prediction {
            self.predictions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Prediction { label: NO_LABEL, confidence: f64::MAX })
        }
        fn save(&self, _path: &Path) -> Result<(), VisionError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_normalize_face_size() {
        let img = RgbImage::new(640, 480);
        let face = normalize_face(&img, &Rect::new(100, 100, 80, 120)).unwrap();
        assert_eq!(face.dimensions(), (FACE_SAMPLE_SIZE, FACE_SAMPLE_SIZE));
    }

    #[test]
    fn test_normalize_face_outside_frame() {
        let img = RgbImage::new(64, 64);
        assert!(normalize_face(&img, &Rect::new(100, 100, 10, 10)).is_none());
    }

    #[test]
    fn test_recognize_untrained_is_empty() {
        let mut det = ScriptedDetector::default();
        det.faces.push_back(vec![Rect::new(0, 0, 10, 10)]);
        let mut rec = Recognizer::new(
            Box::new(det),
            Arc::new(ModelSlot::new()),
            Arc::new(IdentityDirectory::new()),
        );
        let frame = Frame::new(RgbImage::new(32, 32), 0, Instant::now());
        assert!(rec.recognize(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_recognize_resolves_names() {
        let mut det = ScriptedDetector::default();
        det.faces.push_back(vec![Rect::new(0, 0, 10, 10), Rect::new(10, 10, 10, 10)]);
        let slot = Arc::new(ModelSlot::new());
        slot.replace(Arc::new(ScriptedModel::new(vec![
            Prediction { label: 1, confidence: 30.0 },
            Prediction { label: 9, confidence: 40.0 },
        ])));
        let dir = Arc::new(IdentityDirectory::new());
        dir.replace(vec![crate::types::Identity { label: 1, name: "Ada".into(), role: "Owner".into() }]);
        let mut rec = Recognizer::new(Box::new(det), slot, dir);
        let frame = Frame::new(RgbImage::new(32, 32), 0, Instant::now());
        let results = rec.recognize(&frame).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Owner: Ada");
        assert_eq!(results[1].name, "Unknown");
    }
}
