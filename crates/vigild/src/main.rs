use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vigil_capture::{ClipRecorder, DirectorySource, FrameSource, V4l2Source};
use vigil_core::retrain::RetrainJob;
use vigil_core::{
    BroadcastSink, DecisionEngine, Detector, DetectorFactory, EngineStores, EventSink, FanOut,
    LbphTrainer, LogSink, OnnxDetector, Recognizer, RetrainCoordinator, SharedContext, Trainer,
    VisionError,
};
use vigil_store::{FsImageStore, JsonHeightProfiles, SqliteStore};

mod config;
mod dbus_interface;
mod engine;

/// Event channel depth; slow D-Bus consumers lose events past this.
const EVENT_CAPACITY: usize = 256;

fn open_source(kind: &config::SourceKind) -> Result<Box<dyn FrameSource>> {
    Ok(match kind {
        config::SourceKind::Camera(device) => Box::new(V4l2Source::open(device)?),
        config::SourceKind::Directory { dir, looped } => Box::new(DirectorySource::open(dir, *looped)?),
    })
}

fn detector_factory(face_model: PathBuf, body_model: Option<PathBuf>) -> DetectorFactory {
    Arc::new(move || -> Result<Box<dyn Detector>, VisionError> {
        Ok(Box::new(OnnxDetector::load(&face_model, body_model.as_deref())?))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");
    let config = config::Config::from_env()?;

    // Persistence
    let db = Arc::new(SqliteStore::open(&config.db_path).context("opening identity database")?);
    let images = Arc::new(FsImageStore::new(&config.training_dir));
    let profiles = JsonHeightProfiles::new(&config.height_profiles);

    // Shared state, restored from disk
    let ctx = Arc::new(SharedContext::new(config.engine.buffer_capacity));
    ctx.heights.load_from(&profiles);

    let trainer = Arc::new(LbphTrainer::default());
    if config.model_file.exists() {
        match trainer.load(&config.model_file) {
            Ok(model) => {
                ctx.model.replace(model);
                tracing::info!(path = %config.model_file.display(), "face model loaded");
            }
            Err(e) => tracing::warn!(error = %e, "saved face model unusable; retraining"),
        }
    }
    let identities = ctx.directory.rebuild(db.as_ref())?;
    tracing::info!(identities, "identity directory built");

    // Events
    let broadcast = Arc::new(BroadcastSink::new(EVENT_CAPACITY));
    let events: Arc<dyn EventSink> = Arc::new(
        FanOut::new()
            .with(broadcast.clone())
            .with(Arc::new(LogSink)),
    );

    // Detection and retraining; the live detector is loaded up front so a
    // missing model fails startup.
    let detectors = detector_factory(config.face_model.clone(), config.body_model.clone());
    let live_detector = detectors().context("loading detector models")?;

    let retrain = RetrainCoordinator::new(RetrainJob {
        ctx: Arc::clone(&ctx),
        identities: db.clone(),
        images: images.clone(),
        trainer,
        detectors,
        model_path: Some(config.model_file.clone()),
        events: Arc::clone(&events),
    });

    if !ctx.model.is_trained() {
        let outcome = retrain.run_blocking();
        tracing::info!(%outcome, "startup training finished");
    }
    ctx.state.finish_startup(ctx.model.is_trained());

    // Ingestion
    let source = open_source(&config.source).context("opening frame source")?;
    let recognizer = Recognizer::new(live_detector, Arc::clone(&ctx.model), Arc::clone(&ctx.directory));
    let decision = DecisionEngine::new(
        config.engine.clone(),
        Arc::clone(&ctx),
        recognizer,
        EngineStores {
            identities: db.clone(),
            images,
            log: db.clone(),
        },
        Arc::clone(&events),
        retrain.clone(),
    );
    let (handle, mut ingestion) = engine::spawn_engine(decision, source, config.frame_interval())
        .context("spawning engine thread")?;

    // Control surface
    let service = dbus_interface::VigilService {
        engine: handle,
        ctx: Arc::clone(&ctx),
        db,
        clips: ClipRecorder::new(&config.recordings_dir),
        retrain: retrain.clone(),
        events,
    };
    let conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on the session bus")?;
    tokio::spawn(dbus_interface::forward_events(conn.clone(), broadcast.subscribe()));

    tracing::info!(state = %ctx.system_state(), "vigild ready");

    let ingestion_done = tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            false
        }
        _ = &mut ingestion.exited => true,
    };
    tracing::info!(ingestion_done, "vigild shutting down");

    // Stop frames first, then free them, then persist.
    let result = tokio::task::spawn_blocking(move || ingestion.stop()).await?;
    ctx.release_frames();
    if let Err(e) = ctx.heights.save_to(&profiles) {
        tracing::error!(error = %e, "failed to save height profiles");
    }
    if let Some(outcome) = tokio::task::spawn_blocking(move || retrain.join()).await? {
        tracing::info!(%outcome, "pending retrain finished");
    }
    drop(conn);

    let frames = result?;
    tracing::info!(frames, "vigild stopped");
    Ok(())
}
