//! Per-frame decision engine.
//!
//! For every frame the engine asks the recognizer for faces and bodies and
//! decides, per identity, whether to log a sighting, capture a new training
//! photo, raise the enrollable signal for an unknown face, match a faceless
//! body by height, or start a background retrain.
//!
//! Capture states, the unknown-face tracker and the photo counter are owned
//! here and only touched from the ingestion thread.

use crate::config::EngineConfig;
use crate::context::SharedContext;
use crate::events::{Event, EventKind, EventSink};
use crate::pose::CaptureTracker;
use crate::retrain::RetrainCoordinator;
use crate::state::SystemState;
use crate::store::{IdentityStore, RecognitionLog, StoreError, TrainingImageStore};
use crate::types::{Frame, Identity, RecognitionResult, Rect, NO_LABEL, UNKNOWN_NAME};
use crate::unknown::UnknownFaceTracker;
use crate::vision::{Recognizer, VisionError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no stable unknown face to enroll")]
    NoStableFace,
    #[error("no frame available")]
    NoFrame,
    #[error("name must not be empty")]
    InvalidName,
    #[error("{0:?} is already enrolled")]
    DuplicateName(String),
    #[error("store error: {0}")]
    Store(StoreError),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("model not ready (state: {0})")]
    NotReady(SystemState),
    #[error("no frame available")]
    NoFrame,
    #[error("no recognized person in view")]
    NoRecognizedFace,
    #[error("recognition failed: {0}")]
    Vision(#[from] VisionError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Persistence collaborators the engine writes through.
pub struct EngineStores {
    pub identities: Arc<dyn IdentityStore>,
    pub images: Arc<dyn TrainingImageStore>,
    pub log: Arc<dyn RecognitionLog>,
}

/// What one frame produced, for debug logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    pub faces: usize,
    pub bodies: usize,
    pub logged: usize,
    pub captured: usize,
    pub unknown: usize,
    pub height_matches: usize,
}

pub struct DecisionEngine {
    config: EngineConfig,
    ctx: Arc<SharedContext>,
    recognizer: Recognizer,
    stores: EngineStores,
    events: Arc<dyn EventSink>,
    retrain: RetrainCoordinator,
    captures: CaptureTracker,
    unknown: UnknownFaceTracker,
    new_photos: u32,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        ctx: Arc<SharedContext>,
        recognizer: Recognizer,
        stores: EngineStores,
        events: Arc<dyn EventSink>,
        retrain: RetrainCoordinator,
    ) -> Self {
        let captures = CaptureTracker::new(config.cooldown(), config.pose_change_threshold);
        let unknown = UnknownFaceTracker::new(config.unknown_stable());
        Self {
            config,
            ctx,
            recognizer,
            stores,
            events,
            retrain,
            captures,
            unknown,
            new_photos: 0,
        }
    }

    pub fn context(&self) -> &Arc<SharedContext> {
        &self.ctx
    }

    pub fn retrain(&self) -> &RetrainCoordinator {
        &self.retrain
    }

    /// Photos captured since the last retrain was requested.
    pub fn pending_photos(&self) -> u32 {
        self.new_photos
    }

    pub fn is_enrollable(&self) -> bool {
        self.unknown.is_enrollable()
    }

    /// Run the decision pipeline on one frame, timed by its capture instant.
    pub fn process(&mut self, frame: &Frame) -> Result<FrameSummary, VisionError> {
        match self.ctx.system_state() {
            SystemState::Initializing => Ok(FrameSummary::default()),
            SystemState::EnrollmentOnly => self.process_enrollment(frame),
            SystemState::Recognizing => self.process_recognition(frame),
        }
    }

    /// No model yet: every face is a candidate for enrollment.
    fn process_enrollment(&mut self, frame: &Frame) -> Result<FrameSummary, VisionError> {
        let faces = self.recognizer.detect_faces(frame)?;
        let mut summary = FrameSummary {
            faces: faces.len(),
            ..Default::default()
        };
        match faces.first() {
            Some(face) => {
                summary.unknown = 1;
                self.observe_unknown(*face, frame.captured_at);
            }
            None => self.clear_unknown(),
        }
        Ok(summary)
    }

    fn process_recognition(&mut self, frame: &Frame) -> Result<FrameSummary, VisionError> {
        let now = frame.captured_at;
        let bodies = self.recognizer.detect_bodies(frame)?;
        let results = self.recognizer.recognize(frame)?;

        let mut summary = FrameSummary {
            faces: results.len(),
            bodies: bodies.len(),
            ..Default::default()
        };
        let mut claimed = vec![false; bodies.len()];
        let mut unknown_seen = false;

        for result in &results {
            let identity = self.resolve(result);
            let Some(identity) = identity else {
                unknown_seen = true;
                summary.unknown += 1;
                self.observe_unknown(result.face_region, now);
                self.events
                    .publish(&Event::new(EventKind::Unknown).region(result.face_region));
                continue;
            };

            let center = result.face_region.center();
            if let Some(i) = bodies.iter().position(|b| b.contains(center)) {
                self.ctx
                    .heights
                    .add_sample(identity.label, bodies[i].height.max(0) as u32);
                claimed[i] = true;
            }

            if result.confidence < self.config.high_confidence_threshold
                && self.captures.should_capture(identity.label, &result.face_region, now)
            {
                if self.capture(frame, result, &identity, now) {
                    summary.captured += 1;
                } else {
                    summary.logged += 1;
                }
            } else if self.captures.should_log(identity.label, now) {
                self.log(result, now);
                summary.logged += 1;
            }
        }

        if !unknown_seen {
            self.clear_unknown();
        }

        for (body, _) in bodies.iter().zip(&claimed).filter(|(_, c)| !**c) {
            if self.match_body(body) {
                summary.height_matches += 1;
            }
        }

        tracing::debug!(seq = frame.sequence, ?summary, "frame processed");
        Ok(summary)
    }

    /// The identity behind an accepted recognition, or `None` for an unknown face.
    fn resolve(&self, result: &RecognitionResult) -> Option<Identity> {
        if result.label == NO_LABEL
            || result.confidence >= self.config.accept_threshold
            || result.name == UNKNOWN_NAME
        {
            return None;
        }
        self.ctx.directory.get(result.label)
    }

    /// Save a training photo and log the sighting. Falls back to a plain log
    /// entry when the photo cannot be written; returns whether it was saved.
    fn capture(&mut self, frame: &Frame, result: &RecognitionResult, identity: &Identity, now: Instant) -> bool {
        if let Err(e) = self.save_photo(frame, &result.face_region, identity) {
            tracing::warn!(name = %identity.name, error = %e, "failed to save training photo");
            self.log(result, now);
            return false;
        }
        tracing::info!(name = %identity.name, confidence = result.confidence, "captured new photo");
        self.write_log(result);
        self.captures.record(identity.label, result.face_region, now);
        self.events.publish(
            &Event::new(EventKind::Captured)
                .identity(identity.label, &result.name)
                .confidence(result.confidence)
                .region(result.face_region),
        );
        true
    }

    fn log(&mut self, result: &RecognitionResult, now: Instant) {
        self.write_log(result);
        self.captures.record(result.label, result.face_region, now);
        tracing::debug!(label = result.label, confidence = result.confidence, "logged recognition");
        self.events.publish(
            &Event::new(EventKind::Recognized)
                .identity(result.label, &result.name)
                .confidence(result.confidence)
                .region(result.face_region),
        );
    }

    fn write_log(&self, result: &RecognitionResult) {
        if let Err(e) = self.stores.log.log_recognition(result.label, result.confidence) {
            tracing::warn!(label = result.label, error = %e, "failed to write recognition log");
        }
    }

    /// Save the face crop and count it toward the next retrain.
    fn save_photo(&mut self, frame: &Frame, region: &Rect, identity: &Identity) -> Result<(), StoreError> {
        let crop = frame
            .crop(region)
            .ok_or_else(|| StoreError::Malformed(format!("face region {region:?} outside frame")))?;
        self.stores.images.save(&crop, identity)?;
        self.count_photo();
        Ok(())
    }

    fn count_photo(&mut self) {
        self.new_photos += 1;
        if self.new_photos >= self.config.retrain_threshold {
            tracing::info!(photos = self.new_photos, "retrain threshold reached");
            self.retrain.trigger();
            self.new_photos = 0;
        }
    }

    fn observe_unknown(&mut self, region: Rect, now: Instant) {
        if self.retrain.is_in_flight() {
            return;
        }
        let was_enrollable = self.unknown.is_enrollable();
        if self.unknown.observe(region, now) && !was_enrollable {
            tracing::info!("stable unknown face; ready to enroll");
            self.events
                .publish(&Event::new(EventKind::EnrollReady).region(region));
        }
    }

    fn clear_unknown(&mut self) {
        if self.unknown.is_enrollable() {
            self.events.publish(&Event::new(EventKind::EnrollCleared));
        }
        self.unknown.reset();
    }

    fn match_body(&self, body: &Rect) -> bool {
        let height = body.height.max(0) as u32;
        let Some(label) = self.ctx.heights.best_match(
            height,
            self.config.min_height_samples,
            self.config.height_tolerance,
        ) else {
            return false;
        };
        let Some(identity) = self.ctx.directory.get(label) else {
            return false;
        };
        tracing::debug!(label, height, "body matched by height");
        self.events.publish(
            &Event::new(EventKind::HeightMatch)
                .identity(label, identity.display_name())
                .region(*body),
        );
        true
    }

    /// Enroll the stable unknown face under `name` and `role`, then retrain.
    pub fn enroll(&mut self, name: &str, role: &str) -> Result<Identity, EnrollError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EnrollError::InvalidName);
        }
        let region = self.unknown.stable_region().ok_or(EnrollError::NoStableFace)?;
        let frame = self.ctx.current_frame().ok_or(EnrollError::NoFrame)?;
        let crop = frame.crop(&region).ok_or(EnrollError::NoStableFace)?;

        let label = self
            .stores
            .identities
            .add_identity(name, role)
            .map_err(|e| match e {
                StoreError::DuplicateName(n) => EnrollError::DuplicateName(n),
                other => EnrollError::Store(other),
            })?;
        let identity = Identity {
            label,
            name: name.to_string(),
            role: role.to_string(),
        };
        tracing::info!(label, name, role, "enrolling new identity");

        self.stores
            .images
            .save(&crop, &identity)
            .map_err(EnrollError::Store)?;
        self.events.publish(
            &Event::new(EventKind::Enrolled)
                .identity(label, identity.display_name())
                .region(region),
        );

        self.new_photos += 1;
        self.request_retrain();
        self.clear_unknown();
        Ok(identity)
    }

    /// Save a photo of the largest recognized face in the current frame.
    pub fn manual_capture(&mut self) -> Result<Identity, CaptureError> {
        let state = self.ctx.system_state();
        if state != SystemState::Recognizing {
            return Err(CaptureError::NotReady(state));
        }
        let frame = self.ctx.current_frame().ok_or(CaptureError::NoFrame)?;
        let results = self.recognizer.recognize(&frame)?;

        let (result, identity) = results
            .iter()
            .filter_map(|r| self.resolve(r).map(|id| (r, id)))
            .max_by_key(|(r, _)| r.face_region.area())
            .ok_or(CaptureError::NoRecognizedFace)?;

        self.save_photo(&frame, &result.face_region, &identity)?;
        tracing::info!(name = %identity.name, "manually captured photo");
        self.events.publish(
            &Event::new(EventKind::Captured)
                .identity(identity.label, &result.name)
                .confidence(result.confidence)
                .region(result.face_region),
        );
        Ok(identity)
    }

    /// Delete an identity and its photos, then retrain without it.
    pub fn remove_identity(&mut self, label: i64) -> Result<Identity, StoreError> {
        let identity = self
            .stores
            .identities
            .list_identities()?
            .into_iter()
            .find(|i| i.label == label)
            .ok_or(StoreError::NotFound(label))?;

        self.stores.identities.remove_identity(label)?;
        if let Err(e) = self.stores.images.delete_all(&identity) {
            tracing::warn!(name = %identity.name, error = %e, "failed to delete training photos");
        }
        self.ctx.directory.rebuild(self.stores.identities.as_ref())?;
        let directory = Arc::clone(&self.ctx.directory);
        self.captures.retain_labels(|l| directory.get(l).is_some());
        tracing::info!(label, name = %identity.name, "identity removed");

        self.retrain.trigger();
        Ok(identity)
    }

    /// Request a retrain outside the photo-count schedule.
    pub fn request_retrain(&mut self) -> bool {
        let started = self.retrain.trigger();
        if started {
            self.new_photos = 0;
        }
        started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fakes::MemoryIdentities;
    use crate::events::fakes::RecordingSink;
    use crate::retrain::{RetrainJob, RetrainOutcome};
    use crate::store::fakes::{MemoryImages, MemoryLog};
    use crate::vision::fakes::{ScriptedDetector, ScriptedModel};
    use crate::vision::{Detector, FaceModel, Prediction, TrainingSample, Trainer};
    use image::RgbImage;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    /// Counts calls; blocks on the gate when one is installed.
    #[derive(Default)]
    struct CountingTrainer {
        calls: AtomicUsize,
        gate: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl Trainer for CountingTrainer {
        fn train(&self, _samples: &[TrainingSample]) -> Result<Arc<dyn FaceModel>, VisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(rx) = self.gate.lock().unwrap().take() {
                let _ = rx.recv();
            }
            Ok(Arc::new(ScriptedModel::new(Vec::new())))
        }
        fn load(&self, path: &Path) -> Result<Arc<dyn FaceModel>, VisionError> {
            Err(VisionError::ModelNotFound(path.display().to_string()))
        }
    }

    struct WholeImageDetector;

    impl Detector for WholeImageDetector {
        fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<Rect>, VisionError> {
            Ok(vec![Rect::new(0, 0, image.width() as i32, image.height() as i32)])
        }
        fn detect_bodies(&mut self, _image: &RgbImage) -> Result<Vec<Rect>, VisionError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        engine: DecisionEngine,
        ctx: Arc<SharedContext>,
        identities: Arc<MemoryIdentities>,
        images: Arc<MemoryImages>,
        log: Arc<MemoryLog>,
        events: Arc<RecordingSink>,
        trainer: Arc<CountingTrainer>,
        t0: Instant,
    }

    impl Harness {
        fn frame_at(&self, ms: u64) -> Frame {
            Frame::new(RgbImage::new(640, 480), ms, self.t0 + Duration::from_millis(ms))
        }

        /// Ingest and process a frame at `ms` after start.
        fn step(&mut self, ms: u64) -> FrameSummary {
            let frame = self.frame_at(ms);
            self.ctx.ingest(&frame);
            self.engine.process(&frame).unwrap()
        }
    }

    fn harness(config: EngineConfig, detector: ScriptedDetector, predictions: Vec<Prediction>) -> Harness {
        build(config, detector, Some(predictions))
    }

    /// `predictions: None` starts without a model, in enrollment-only mode.
    fn build(config: EngineConfig, detector: ScriptedDetector, predictions: Option<Vec<Prediction>>) -> Harness {
        let ctx = Arc::new(SharedContext::new(config.buffer_capacity));
        let identities = Arc::new(MemoryIdentities::default());
        identities.add_identity("Ada", "Owner").unwrap();
        ctx.directory.rebuild(identities.as_ref()).unwrap();
        let trained = predictions.is_some();
        if let Some(predictions) = predictions {
            ctx.model.replace(Arc::new(ScriptedModel::new(predictions)));
        }
        ctx.state.finish_startup(trained);

        let images = Arc::new(MemoryImages::default());
        let log = Arc::new(MemoryLog::default());
        let events = Arc::new(RecordingSink::default());
        let trainer = Arc::new(CountingTrainer::default());

        let retrain = RetrainCoordinator::new(RetrainJob {
            ctx: Arc::clone(&ctx),
            identities: identities.clone(),
            images: images.clone(),
            trainer: trainer.clone(),
            detectors: Arc::new(|| -> Result<Box<dyn Detector>, VisionError> { Ok(Box::new(WholeImageDetector)) }),
            model_path: None,
            events: events.clone(),
        });
        let recognizer = Recognizer::new(Box::new(detector), Arc::clone(&ctx.model), Arc::clone(&ctx.directory));
        let engine = DecisionEngine::new(
            config,
            Arc::clone(&ctx),
            recognizer,
            EngineStores {
                identities: identities.clone(),
                images: images.clone(),
                log: log.clone(),
            },
            events.clone(),
            retrain,
        );
        Harness {
            engine,
            ctx,
            identities,
            images,
            log,
            events,
            trainer,
            t0: Instant::now(),
        }
    }

    fn faces(script: &[Rect]) -> ScriptedDetector {
        let mut det = ScriptedDetector::default();
        for face in script {
            det.faces.push_back(vec![*face]);
        }
        det
    }

    fn ada(confidence: f64) -> Prediction {
        Prediction { label: 1, confidence }
    }

    const FACE: Rect = Rect { x: 200, y: 100, width: 100, height: 100 };

    /// Image store whose writes always fail.
    struct FullDisk;

    impl TrainingImageStore for FullDisk {
        fn save(&self, _image: &RgbImage, _identity: &Identity) -> Result<std::path::PathBuf, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
        fn list_images(&self, _identity: &Identity) -> Result<Vec<std::path::PathBuf>, StoreError> {
            Ok(Vec::new())
        }
        fn load(&self, path: &Path) -> Result<RgbImage, StoreError> {
            Err(StoreError::Malformed(path.display().to_string()))
        }
        fn delete(&self, _path: &Path) -> Result<(), StoreError> {
            Ok(())
        }
        fn delete_all(&self, _identity: &Identity) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_photo_save_is_logged_not_captured() {
        let mut h = harness(EngineConfig::default(), faces(&[FACE]), vec![ada(30.0)]);
        h.engine.stores.images = Arc::new(FullDisk);

        let summary = h.step(0);
        assert_eq!((summary.captured, summary.logged), (0, 1));
        assert_eq!(h.events.count(EventKind::Captured), 0);
        assert_eq!(h.events.count(EventKind::Recognized), 1);
        assert_eq!(h.log.count_for(1), 1);
        assert_eq!(h.engine.pending_photos(), 0);
    }

    #[test]
    fn test_cooldown_blocks_second_capture() {
        let mut h = harness(EngineConfig::default(), faces(&[FACE, FACE]), vec![ada(30.0), ada(30.0)]);
        assert_eq!(h.step(0).captured, 1);
        let second = h.step(1000);
        assert_eq!((second.captured, second.logged), (0, 0));
        assert_eq!(h.images.count_for(1), 1);
        assert_eq!(h.log.count_for(1), 1);
        assert_eq!(h.engine.pending_photos(), 1);
    }

    #[test]
    fn test_pose_change_after_cooldown_captures() {
        let moved = Rect { x: 220, ..FACE };
        let mut h = harness(EngineConfig::default(), faces(&[FACE, moved]), vec![ada(30.0), ada(30.0)]);
        h.step(0);
        assert_eq!(h.step(6000).captured, 1);
        assert_eq!(h.images.count_for(1), 2);
        assert_eq!(h.events.count(EventKind::Captured), 2);
    }

    #[test]
    fn test_same_pose_after_cooldown_only_logs() {
        let mut h = harness(EngineConfig::default(), faces(&[FACE, FACE]), vec![ada(30.0), ada(30.0)]);
        h.step(0);
        let later = h.step(6000);
        assert_eq!((later.captured, later.logged), (0, 1));
        assert_eq!(h.images.count_for(1), 1);
        assert_eq!(h.log.count_for(1), 2);
    }

    #[test]
    fn test_medium_confidence_logs_without_capture() {
        let mut h = harness(EngineConfig::default(), faces(&[FACE, FACE]), vec![ada(65.0), ada(65.0)]);
        assert_eq!(h.step(0).logged, 1);
        assert_eq!(h.step(500).logged, 0);
        assert_eq!(h.images.count_for(1), 0);
        assert_eq!(h.events.count(EventKind::Recognized), 1);
    }

    #[test]
    fn test_retrain_triggered_at_threshold() {
        let config = EngineConfig {
            retrain_threshold: 2,
            ..Default::default()
        };
        let moved = Rect { x: 260, ..FACE };
        let mut h = harness(config, faces(&[FACE, moved]), vec![ada(20.0), ada(20.0)]);
        h.step(0);
        assert_eq!(h.engine.pending_photos(), 1);
        h.step(6000);
        assert_eq!(h.engine.pending_photos(), 0);
        let outcome = h.engine.retrain().join().expect("retrain was started");
        assert!(outcome.is_trained());
        assert_eq!(h.trainer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unrecognized_face_becomes_enrollable() {
        let mut h = harness(
            EngineConfig::default(),
            faces(&[FACE, FACE, FACE]),
            vec![ada(95.0), ada(95.0), ada(95.0)],
        );
        assert_eq!(h.step(0).unknown, 1);
        h.step(1000);
        assert!(!h.engine.is_enrollable());
        h.step(2500);
        assert!(h.engine.is_enrollable());
        assert_eq!(h.events.count(EventKind::EnrollReady), 1);
        assert_eq!(h.events.count(EventKind::Unknown), 3);
    }

    #[test]
    fn test_face_leaving_resets_enrollable() {
        let mut det = faces(&[FACE, FACE]);
        det.faces.push_back(Vec::new());
        let mut h = harness(EngineConfig::default(), det, vec![ada(95.0), ada(95.0)]);
        h.step(0);
        h.step(2500);
        assert!(h.engine.is_enrollable());
        h.step(2600);
        assert!(!h.engine.is_enrollable());
        assert_eq!(h.events.count(EventKind::EnrollCleared), 1);
    }

    #[test]
    fn test_label_missing_from_directory_is_unknown() {
        let mut h = harness(EngineConfig::default(), faces(&[FACE]), vec![Prediction { label: 7, confidence: 10.0 }]);
        let summary = h.step(0);
        assert_eq!((summary.unknown, summary.captured), (1, 0));
    }

    #[test]
    fn test_body_claimed_by_face_records_height() {
        let mut det = faces(&[FACE]);
        det.bodies.push_back(vec![Rect::new(150, 50, 200, 400), Rect::new(500, 0, 100, 300)]);
        let mut h = harness(EngineConfig::default(), det, vec![ada(30.0)]);
        let summary = h.step(0);
        assert_eq!(h.ctx.heights.sample_count(1), 1);
        assert_eq!(h.ctx.heights.snapshot()[&1], vec![400]);
        assert_eq!(summary.height_matches, 0);
    }

    #[test]
    fn test_unclaimed_body_matched_by_height() {
        let config = EngineConfig {
            min_height_samples: 3,
            ..Default::default()
        };
        let mut det = ScriptedDetector::default();
        det.bodies.push_back(vec![Rect::new(0, 0, 80, 175)]);
        let mut h = harness(config, det, Vec::new());
        for height in [170, 172, 168] {
            h.ctx.heights.add_sample(1, height);
        }
        assert_eq!(h.step(0).height_matches, 1);
        let events = h.events.events.lock().unwrap();
        let matched = events.iter().find(|e| e.kind == EventKind::HeightMatch).unwrap();
        assert_eq!(matched.label, Some(1));
        assert_eq!(matched.name.as_deref(), Some("Owner: Ada"));
    }

    #[test]
    fn test_enroll_requires_stable_face() {
        let mut h = harness(EngineConfig::default(), ScriptedDetector::default(), Vec::new());
        h.step(0);
        assert!(matches!(h.engine.enroll("Bob", "Visitor"), Err(EnrollError::NoStableFace)));
    }

    #[test]
    fn test_enroll_stable_face() {
        let mut h = harness(EngineConfig::default(), faces(&[FACE, FACE]), vec![ada(95.0), ada(95.0)]);
        h.step(0);
        h.step(2500);
        let bob = h.engine.enroll("Bob", "Visitor").unwrap();
        assert_eq!(bob.label, 2);
        assert_eq!(h.images.count_for(2), 1);
        assert!(!h.engine.is_enrollable());
        assert_eq!(h.events.count(EventKind::Enrolled), 1);
        let outcome = h.engine.retrain().join().expect("retrain was started");
        assert_eq!(outcome, RetrainOutcome::Trained { identities: 2, samples: 1, rejected: 0 });
        assert_eq!(h.ctx.directory.lookup(2), "Visitor: Bob");
    }

    #[test]
    fn test_enroll_duplicate_name_is_advisory() {
        let mut h = harness(EngineConfig::default(), faces(&[FACE, FACE]), vec![ada(95.0), ada(95.0)]);
        h.step(0);
        h.step(2500);
        assert!(matches!(h.engine.enroll("Ada", "Owner"), Err(EnrollError::DuplicateName(_))));
        assert!(h.engine.is_enrollable());
        assert_eq!(h.identities.list_identities().unwrap().len(), 1);
    }

    #[test]
    fn test_manual_capture_picks_largest_known_face() {
        let mut det = ScriptedDetector::default();
        det.faces.push_back(vec![Rect::new(0, 0, 40, 40), Rect::new(100, 100, 120, 120)]);
        let mut h = harness(EngineConfig::default(), det, vec![ada(70.0), ada(75.0)]);
        h.ctx.ingest(&h.frame_at(0));
        let who = h.engine.manual_capture().unwrap();
        assert_eq!(who.name, "Ada");
        assert_eq!(h.images.count_for(1), 1);
        assert_eq!(h.engine.pending_photos(), 1);
    }

    #[test]
    fn test_manual_capture_without_frame() {
        let mut h = harness(EngineConfig::default(), ScriptedDetector::default(), Vec::new());
        assert!(matches!(h.engine.manual_capture(), Err(CaptureError::NoFrame)));
    }

    #[test]
    fn test_enrollment_mode_tracks_first_face() {
        let mut det = faces(&[FACE]);
        det.faces.push_back(vec![FACE, Rect::new(0, 0, 30, 30)]);
        let mut h = build(EngineConfig::default(), det, None);
        assert_eq!(h.ctx.system_state(), SystemState::EnrollmentOnly);
        assert_eq!(h.step(0).unknown, 1);
        h.step(2500);
        assert!(h.engine.is_enrollable());
        assert_eq!(h.events.count(EventKind::EnrollReady), 1);
        assert_eq!(h.log.count_for(1), 0);
    }

    #[test]
    fn test_initializing_ignores_frames() {
        let mut h = harness(EngineConfig::default(), faces(&[FACE]), vec![ada(30.0)]);
        let ctx = Arc::new(SharedContext::new(4));
        h.engine.ctx = Arc::clone(&ctx);
        let frame = h.frame_at(0);
        assert_eq!(h.engine.process(&frame).unwrap(), FrameSummary::default());
        assert!(h.events.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_ignored_while_retraining() {
        let mut h = harness(
            EngineConfig::default(),
            faces(&[FACE, FACE, FACE]),
            vec![ada(95.0), ada(95.0), ada(95.0)],
        );
        let (release, gate) = mpsc::channel();
        *h.trainer.gate.lock().unwrap() = Some(gate);
        h.images.insert(&h.ctx.directory.get(1).unwrap(), RgbImage::new(40, 40));

        assert!(h.engine.request_retrain());
        h.step(0);
        h.step(2500);
        assert!(!h.engine.is_enrollable());

        release.send(()).unwrap();
        assert!(h.engine.retrain().join().unwrap().is_trained());
        h.step(2600);
        assert!(!h.engine.is_enrollable());
        assert_eq!(h.events.count(EventKind::Unknown), 3);
    }

    #[test]
    fn test_remove_identity() {
        let mut h = harness(EngineConfig::default(), faces(&[FACE]), vec![ada(30.0)]);
        h.step(0);
        let removed = h.engine.remove_identity(1).unwrap();
        assert_eq!(removed.name, "Ada");
        assert_eq!(h.images.count_for(1), 0);
        assert_eq!(h.ctx.directory.lookup(1), "Unknown");
        assert!(matches!(h.engine.remove_identity(1), Err(StoreError::NotFound(1))));
        h.engine.retrain().join();
    }
}
