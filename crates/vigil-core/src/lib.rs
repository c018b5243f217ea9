//! vigil-core: recognition and enrollment orchestration engine.
//!
//! Consumes a live frame stream, decides per tracked identity whether to
//! log, capture a training sample, promote an unknown face to enrollable
//! or retrain the face model in the background.

pub mod config;
pub mod context;
pub mod detector;
pub mod directory;
pub mod engine;
pub mod events;
pub mod height;
pub mod lbph;
pub mod pose;
pub mod retrain;
pub mod ring_buffer;
pub mod state;
pub mod store;
mod sync;
pub mod types;
pub mod unknown;
pub mod vision;

pub use config::EngineConfig;
pub use context::SharedContext;
pub use detector::OnnxDetector;
pub use engine::{CaptureError, DecisionEngine, EngineStores, EnrollError, FrameSummary};
pub use events::{BroadcastSink, Event, EventKind, EventSink, FanOut, LogSink};
pub use lbph::{LbphModel, LbphTrainer};
pub use retrain::{RetrainCoordinator, RetrainOutcome};
pub use state::SystemState;
pub use store::{HeightProfileStore, IdentityStore, RecognitionLog, StoreError, TrainingImageStore};
pub use types::{Frame, Identity, RecognitionResult, Rect};
pub use vision::{Detector, DetectorFactory, Recognizer, Trainer, VisionError};
