//! Single-flight background retraining.
//!
//! At most one job runs at a time: `trigger` claims an atomic flag with a
//! compare-and-set and returns immediately. The job rebuilds the identity
//! directory, re-derives face samples from every stored training photo,
//! trains a new model and swaps it into service. The flag is released last,
//! after any state transition.

use crate::context::SharedContext;
use crate::events::{Event, EventKind, EventSink};
use crate::store::{IdentityStore, TrainingImageStore};
use crate::vision::{normalize_face, DetectorFactory, TrainingSample, Trainer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// How a retrain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrainOutcome {
    Trained {
        identities: usize,
        samples: usize,
        rejected: usize,
    },
    /// No identities exist. The served model, if any, is left in place.
    NoIdentities,
    /// Identities exist but no photo yielded exactly one face.
    NoSamples { rejected: usize },
    /// Training or directory rebuild failed. The served model is kept.
    Failed(String),
    /// Another job was already in flight.
    AlreadyRunning,
}

impl RetrainOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, Self::Trained { .. })
    }
}

impl std::fmt::Display for RetrainOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trained {
                identities,
                samples,
                rejected,
            } => write!(f, "trained on {samples} photos for {identities} identities ({rejected} rejected)"),
            Self::NoIdentities => f.write_str("no identities enrolled"),
            Self::NoSamples { rejected } => write!(f, "no usable training photos ({rejected} rejected)"),
            Self::Failed(e) => write!(f, "retrain failed: {e}"),
            Self::AlreadyRunning => f.write_str("retrain already in progress"),
        }
    }
}

/// Everything a retrain job reads or writes.
pub struct RetrainJob {
    pub ctx: Arc<SharedContext>,
    pub identities: Arc<dyn IdentityStore>,
    pub images: Arc<dyn TrainingImageStore>,
    pub trainer: Arc<dyn Trainer>,
    pub detectors: DetectorFactory,
    /// Where a successfully trained model is persisted.
    pub model_path: Option<PathBuf>,
    pub events: Arc<dyn EventSink>,
}

/// Clears the in-flight flag when dropped, so a panicking job cannot wedge it.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Clone-safe handle that starts retrain jobs.
#[derive(Clone)]
pub struct RetrainCoordinator {
    job: Arc<RetrainJob>,
    in_flight: Arc<AtomicBool>,
    last: Arc<Mutex<Option<JoinHandle<RetrainOutcome>>>>,
}

impl RetrainCoordinator {
    pub fn new(job: RetrainJob) -> Self {
        Self {
            job: Arc::new(job),
            in_flight: Arc::new(AtomicBool::new(false)),
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn claim(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Start a background job unless one is already running. Returns false
    /// when the request collapsed into the in-flight job.
    pub fn trigger(&self) -> bool {
        if !self.claim() {
            tracing::debug!("retrain already in flight; request ignored");
            return false;
        }

        let job = Arc::clone(&self.job);
        let flag = Arc::clone(&self.in_flight);
        let spawned = std::thread::Builder::new()
            .name("vigil-retrain".into())
            .spawn(move || {
                let _guard = InFlight(&flag);
                job.run()
            });

        match spawned {
            Ok(handle) => {
                let previous = crate::sync::lock(&self.last).replace(handle);
                // A stored handle is always of a finished job, since only one runs.
                if let Some(done) = previous {
                    let _ = done.join();
                }
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn retrain thread");
                self.in_flight.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Run a job on the calling thread. Used during startup.
    pub fn run_blocking(&self) -> RetrainOutcome {
        if !self.claim() {
            return RetrainOutcome::AlreadyRunning;
        }
        let _guard = InFlight(&self.in_flight);
        self.job.run()
    }

    /// Wait for the most recently triggered job, if any, and return its outcome.
    pub fn join(&self) -> Option<RetrainOutcome> {
        let handle = crate::sync::lock(&self.last).take()?;
        match handle.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                tracing::error!("retrain thread panicked");
                Some(RetrainOutcome::Failed("retrain thread panicked".into()))
            }
        }
    }
}

impl RetrainJob {
    fn run(&self) -> RetrainOutcome {
        self.events.publish(&Event::new(EventKind::RetrainStarted));
        tracing::info!("retrain started");

        let outcome = self.train();
        match &outcome {
            RetrainOutcome::Trained { .. } => tracing::info!(%outcome, "retrain complete"),
            RetrainOutcome::Failed(_) => tracing::error!(%outcome, "retrain failed; keeping current model"),
            _ => tracing::warn!(%outcome, "retrain produced no model"),
        }

        self.events
            .publish(&Event::new(EventKind::RetrainFinished).detail(outcome.to_string()));
        outcome
    }

    fn train(&self) -> RetrainOutcome {
        if let Err(e) = self.ctx.directory.rebuild(self.identities.as_ref()) {
            return RetrainOutcome::Failed(format!("identity store: {e}"));
        }
        let identities = self.ctx.directory.identities();
        if identities.is_empty() {
            return RetrainOutcome::NoIdentities;
        }

        let mut detector = match (self.detectors)() {
            Ok(d) => d,
            Err(e) => return RetrainOutcome::Failed(format!("detector: {e}")),
        };

        let mut samples = Vec::new();
        let mut rejected = 0usize;

        for identity in &identities {
            let paths = match self.images.list_images(identity) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(name = %identity.name, error = %e, "cannot list training photos; skipping");
                    continue;
                }
            };
            if paths.is_empty() {
                tracing::warn!(name = %identity.name, "no training photos");
            }

            for path in paths {
                let image = match self.images.load(&path) {
                    Ok(img) => img,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "unreadable training photo; skipping");
                        continue;
                    }
                };
                let faces = match detector.detect_faces(&image) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "detection failed; skipping");
                        continue;
                    }
                };
                let face = match faces.as_slice() {
                    [only] => normalize_face(&image, only),
                    _ => None,
                };
                match face {
                    Some(face) => samples.push(TrainingSample {
                        label: identity.label,
                        face,
                    }),
                    None => {
                        tracing::warn!(
                            path = %path.display(),
                            faces = faces.len(),
                            "training photo does not contain exactly one face; deleting"
                        );
                        rejected += 1;
                        if let Err(e) = self.images.delete(&path) {
                            tracing::warn!(path = %path.display(), error = %e, "failed to delete rejected photo");
                        }
                    }
                }
            }
        }

        if samples.is_empty() {
            return RetrainOutcome::NoSamples { rejected };
        }

        let model = match self.trainer.train(&samples) {
            Ok(m) => m,
            Err(e) => return RetrainOutcome::Failed(e.to_string()),
        };
        self.ctx.model.replace(Arc::clone(&model));
        if let Some(path) = &self.model_path {
            if let Err(e) = model.save(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to persist model");
            }
        }
        self.ctx.state.promote();

        RetrainOutcome::Trained {
            identities: identities.len(),
            samples: samples.len(),
            rejected,
        }
    }
}
