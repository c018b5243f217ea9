use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use vigil_capture::{FrameSource, SourceError};
use vigil_core::{CaptureError, DecisionEngine, EnrollError, Frame, Identity, StoreError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("frame source: {0}")]
    Source(#[from] SourceError),
    #[error("{0}")]
    Enroll(#[from] EnrollError),
    #[error("{0}")]
    Capture(#[from] CaptureError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("engine thread panicked")]
    Panicked,
}

/// Messages sent from D-Bus handlers to the ingestion thread, which owns the
/// decision engine.
enum EngineRequest {
    Enroll {
        name: String,
        role: String,
        reply: oneshot::Sender<Result<Identity, EnrollError>>,
    },
    Capture {
        reply: oneshot::Sender<Result<Identity, CaptureError>>,
    },
    Retrain {
        reply: oneshot::Sender<bool>,
    },
    Remove {
        label: i64,
        reply: oneshot::Sender<Result<Identity, StoreError>>,
    },
}

/// Clone-safe handle to the ingestion thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T, E>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, E>>) -> EngineRequest,
    ) -> Result<T, EngineError>
    where
        EngineError: From<E>,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Enroll the currently stable unknown face.
    pub async fn enroll(&self, name: String, role: String) -> Result<Identity, EngineError> {
        self.request(|reply| EngineRequest::Enroll { name, role, reply })
            .await
    }

    /// Save a training photo of the largest recognized face in view.
    pub async fn capture(&self) -> Result<Identity, EngineError> {
        self.request(|reply| EngineRequest::Capture { reply }).await
    }

    pub async fn remove_identity(&self, label: i64) -> Result<Identity, EngineError> {
        self.request(|reply| EngineRequest::Remove { label, reply })
            .await
    }

    /// Returns false when a retrain was already running.
    pub async fn retrain(&self) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Retrain { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// The running ingestion thread.
pub struct Ingestion {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<u64, EngineError>>,
    /// Resolves when the thread has exited, for whatever reason.
    pub exited: oneshot::Receiver<()>,
}

impl Ingestion {
    /// Stop reading frames and wait for the thread. Returns the number of
    /// frames ingested.
    pub fn stop(self) -> Result<u64, EngineError> {
        self.stop.store(true, Ordering::Release);
        self.thread.join().map_err(|_| EngineError::Panicked)?
    }
}

/// Spawn the ingestion loop on a dedicated OS thread.
///
/// The thread pulls frames from `source` at most once per `interval`, feeds
/// each through the ring buffer and the decision engine, and serves control
/// requests between frames. A source error ends the loop and is returned
/// from [`Ingestion::stop`].
pub fn spawn_engine(
    engine: DecisionEngine,
    source: Box<dyn FrameSource>,
    interval: Duration,
) -> std::io::Result<(EngineHandle, Ingestion)> {
    let (tx, rx) = mpsc::channel::<EngineRequest>(8);
    let (exited_tx, exited_rx) = oneshot::channel();
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);

    let thread = std::thread::Builder::new()
        .name("vigil-engine".into())
        .spawn(move || {
            tracing::info!(source = %source.describe(), "engine thread started");
            let result = run(engine, source, rx, &flag, interval);
            match &result {
                Ok(frames) => tracing::info!(frames, "engine thread exiting"),
                Err(e) => tracing::error!(error = %e, "engine thread failed"),
            }
            let _ = exited_tx.send(());
            result
        })?;

    Ok((
        EngineHandle { tx },
        Ingestion {
            stop,
            thread,
            exited: exited_rx,
        },
    ))
}

fn run(
    mut engine: DecisionEngine,
    mut source: Box<dyn FrameSource>,
    mut rx: mpsc::Receiver<EngineRequest>,
    stop: &AtomicBool,
    interval: Duration,
) -> Result<u64, EngineError> {
    let mut sequence = 0u64;

    while !stop.load(Ordering::Acquire) {
        serve_requests(&mut engine, &mut rx);

        let started = Instant::now();
        let Some(image) = source.next_frame()? else {
            tracing::info!("frame source ended");
            break;
        };
        sequence += 1;

        let frame = Frame::new(image, sequence, started);
        engine.context().ingest(&frame);
        if let Err(e) = engine.process(&frame) {
            tracing::warn!(seq = sequence, error = %e, "frame skipped");
        }
        drop(frame);

        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    Ok(sequence)
}

fn serve_requests(engine: &mut DecisionEngine, rx: &mut mpsc::Receiver<EngineRequest>) {
    while let Ok(req) = rx.try_recv() {
        match req {
            EngineRequest::Enroll { name, role, reply } => {
                let result = engine.enroll(&name, &role);
                if let Err(e) = &result {
                    tracing::info!(name = %name, error = %e, "enroll rejected");
                }
                let _ = reply.send(result);
            }
            EngineRequest::Capture { reply } => {
                let _ = reply.send(engine.manual_capture());
            }
            EngineRequest::Retrain { reply } => {
                let _ = reply.send(engine.request_retrain());
            }
            EngineRequest::Remove { label, reply } => {
                let _ = reply.send(engine.remove_identity(label));
            }
        }
    }
}
