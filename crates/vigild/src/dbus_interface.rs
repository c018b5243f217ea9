use crate::engine::{EngineError, EngineHandle};
use std::sync::Arc;
use tokio::sync::broadcast;
use vigil_capture::{ClipError, ClipRecorder};
use vigil_core::{Event, EventSink, IdentityStore, RetrainCoordinator, SharedContext};
use vigil_store::SqliteStore;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.vigil.Daemon1";
pub const OBJECT_PATH: &str = "/org/vigil/Daemon1";

/// Rows returned by `History` when the caller passes 0.
const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// D-Bus interface for the Vigil daemon.
///
/// Bus name: org.vigil.Daemon1
/// Object path: /org/vigil/Daemon1
///
/// Every reply is JSON text. Engine events are re-published as the `Event`
/// signal.
pub struct VigilService {
    pub engine: EngineHandle,
    pub ctx: Arc<SharedContext>,
    pub db: Arc<SqliteStore>,
    pub clips: ClipRecorder,
    pub retrain: RetrainCoordinator,
    pub events: Arc<dyn EventSink>,
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn engine_err(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::ChannelClosed | EngineError::Panicked => {
            zbus::fdo::Error::Failed("engine is not running".into())
        }
        other => failed(other),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

#[interface(name = "org.vigil.Daemon1")]
impl VigilService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": self.ctx.system_state().as_str(),
            "identities": self.ctx.directory.len(),
            "model_trained": self.ctx.model.is_trained(),
            "retraining": self.retrain.is_in_flight(),
            "recording": self.clips.is_recording(),
            "buffered_frames": self.ctx.buffer.len(),
            "buffer_capacity": self.ctx.buffer.capacity(),
        })
        .to_string())
    }

    /// Enroll the stable unknown face in view under `name` and `role`.
    async fn enroll(&self, name: &str, role: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, role, "enroll requested");
        let identity = self
            .engine
            .enroll(name.to_string(), role.to_string())
            .await
            .map_err(engine_err)?;
        to_json(&identity)
    }

    /// Save a training photo of the largest recognized face in view.
    async fn capture(&self) -> zbus::fdo::Result<String> {
        tracing::info!("manual capture requested");
        let identity = self.engine.capture().await.map_err(engine_err)?;
        to_json(&identity)
    }

    /// Export the buffered frames as a clip. Returns the clip directory.
    async fn record_clip(&self) -> zbus::fdo::Result<String> {
        tracing::info!(buffered = self.ctx.buffer.len(), "clip requested");
        match self.clips.record(&self.ctx.buffer, Arc::clone(&self.events)) {
            Ok(job) => Ok(job.dir.display().to_string()),
            Err(e @ (ClipError::AlreadyRecording | ClipError::EmptyBuffer)) => {
                tracing::info!(error = %e, "clip not started");
                Err(failed(e))
            }
            Err(e) => {
                tracing::error!(error = %e, "clip export failed to start");
                Err(failed(e))
            }
        }
    }

    /// Start a background retrain. False when one was already running.
    async fn retrain(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("retrain requested");
        self.engine.retrain().await.map_err(engine_err)
    }

    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self.db.list_identities().map_err(failed)?;
        to_json(&identities)
    }

    /// Remove an identity, its photos and its log, then retrain.
    async fn remove_identity(&self, label: i64) -> zbus::fdo::Result<String> {
        tracing::info!(label, "remove_identity requested");
        let identity = self
            .engine
            .remove_identity(label)
            .await
            .map_err(engine_err)?;
        to_json(&identity)
    }

    /// Most recent recognitions, newest first.
    async fn history(&self, limit: u32) -> zbus::fdo::Result<String> {
        let limit = if limit == 0 { DEFAULT_HISTORY_LIMIT } else { limit };
        let rows = self.db.history(limit as usize).map_err(failed)?;
        to_json(&rows)
    }

    /// An engine event: its kind and the full event as JSON.
    #[zbus(signal)]
    async fn event(emitter: &SignalEmitter<'_>, kind: &str, payload: &str) -> zbus::Result<()>;
}

/// Re-publish engine events as D-Bus signals until the channel closes.
pub async fn forward_events(conn: zbus::Connection, mut rx: broadcast::Receiver<Event>) {
    let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "cannot emit D-Bus signals");
            return;
        }
    };
    loop {
        match rx.recv().await {
            Ok(event) => {
                let payload = match serde_json::to_string(&event) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "unencodable event dropped");
                        continue;
                    }
                };
                if let Err(e) = VigilService::event(&emitter, event.kind.as_str(), &payload).await {
                    tracing::warn!(error = %e, "failed to emit event signal");
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
