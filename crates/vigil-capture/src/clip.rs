//! Clip export: writes a snapshot of the frame ring buffer to disk as a
//! numbered JPEG sequence with a `clip.json` manifest.

use chrono::{DateTime, Local, Utc};
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use vigil_core::ring_buffer::FrameRingBuffer;
use vigil_core::{Event, EventKind, EventSink, Frame};

const DEFAULT_JPEG_QUALITY: u8 = 85;
const MANIFEST_NAME: &str = "clip.json";

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("a clip is already being recorded")]
    AlreadyRecording,
    #[error("frame buffer is empty")]
    EmptyBuffer,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding: {0}")]
    Image(#[from] image::ImageError),
    #[error("manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipManifest {
    pub created_at: DateTime<Utc>,
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    pub first_sequence: u64,
    pub last_sequence: u64,
    /// Wall time covered by the clip, from the first to the last frame.
    pub duration_ms: u64,
    pub files: Vec<String>,
}

/// A clip being written in the background.
pub struct ClipJob {
    pub dir: PathBuf,
    handle: JoinHandle<Result<ClipManifest, ClipError>>,
}

impl ClipJob {
    pub fn join(self) -> Result<ClipManifest, ClipError> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(ClipError::Io(std::io::Error::other("clip writer panicked"))))
    }
}

struct Recording(Arc<AtomicBool>);

impl Drop for Recording {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Exports clips under `root/clip_<timestamp>/`, one at a time.
#[derive(Clone)]
pub struct ClipRecorder {
    root: PathBuf,
    quality: u8,
    recording: Arc<AtomicBool>,
}

impl ClipRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quality: DEFAULT_JPEG_QUALITY,
            recording: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Start writing the contents of `buffer` on a background thread. Fails
    /// immediately if another clip is in progress or there is nothing to
    /// write. The buffer is only read once the recording slot is claimed.
    pub fn record(&self, buffer: &FrameRingBuffer, events: Arc<dyn EventSink>) -> Result<ClipJob, ClipError> {
        if self
            .recording
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ClipError::AlreadyRecording);
        }
        let guard = Recording(Arc::clone(&self.recording));

        let frames = buffer.shared_snapshot();
        if frames.is_empty() {
            return Err(ClipError::EmptyBuffer);
        }
        let dir = self.create_clip_dir()?;
        tracing::info!(dir = %dir.display(), frames = frames.len(), "recording clip");

        let quality = self.quality;
        let target = dir.clone();
        let handle = std::thread::Builder::new()
            .name("vigil-clip".into())
            .spawn(move || {
                let _guard = guard;
                let result = write_clip(&target, &frames, quality);
                match &result {
                    Ok(manifest) => {
                        tracing::info!(dir = %target.display(), frames = manifest.frames, "clip saved");
                        events.publish(&Event::new(EventKind::ClipSaved).detail(target.display().to_string()));
                    }
                    Err(e) => tracing::error!(dir = %target.display(), error = %e, "clip export failed"),
                }
                result
            })?;

        Ok(ClipJob { dir, handle })
    }

    fn create_clip_dir(&self) -> Result<PathBuf, ClipError> {
        std::fs::create_dir_all(&self.root)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut dir = self.root.join(format!("clip_{stamp}"));
        let mut n = 1;
        while dir.exists() {
            dir = self.root.join(format!("clip_{stamp}_{n}"));
            n += 1;
        }
        std::fs::create_dir(&dir)?;
        Ok(dir)
    }
}

fn write_clip(dir: &Path, frames: &[Arc<Frame>], quality: u8) -> Result<ClipManifest, ClipError> {
    let mut files = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        let name = format!("frame_{i:05}.jpg");
        let writer = BufWriter::new(File::create(dir.join(&name))?);
        frame
            .image
            .write_with_encoder(JpegEncoder::new_with_quality(writer, quality))?;
        files.push(name);
    }

    let (first, last) = match (frames.first(), frames.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return Err(ClipError::EmptyBuffer),
    };
    let manifest = ClipManifest {
        created_at: Utc::now(),
        frames: frames.len(),
        width: first.width(),
        height: first.height(),
        first_sequence: first.sequence,
        last_sequence: last.sequence,
        duration_ms: last
            .captured_at
            .saturating_duration_since(first.captured_at)
            .as_millis() as u64,
        files,
    };
    let writer = BufWriter::new(File::create(dir.join(MANIFEST_NAME))?);
    serde_json::to_writer_pretty(writer, &manifest)?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Collect(Mutex<Vec<Event>>);

    impl EventSink for Collect {
        fn publish(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn frames(n: u64) -> FrameRingBuffer {
        let t0 = Instant::now();
        let buffer = FrameRingBuffer::new(16);
        for i in 0..n {
            buffer.push(&Frame::new(RgbImage::new(16, 12), 100 + i, t0 + Duration::from_millis(i * 33)));
        }
        buffer
    }

    #[test]
    fn test_writes_sequence_and_manifest() {
        let root = tempfile::tempdir().unwrap();
        let events = Arc::new(Collect::default());
        let recorder = ClipRecorder::new(root.path().join("recordings"));

        let job = recorder.record(&frames(3), events.clone()).unwrap();
        let dir = job.dir.clone();
        let manifest = job.join().unwrap();

        assert_eq!(manifest.frames, 3);
        assert_eq!((manifest.first_sequence, manifest.last_sequence), (100, 102));
        assert_eq!(manifest.duration_ms, 66);
        assert!(dir.file_name().unwrap().to_string_lossy().starts_with("clip_"));
        assert!(dir.join("frame_00002.jpg").is_file());

        let on_disk: ClipManifest =
            serde_json::from_reader(File::open(dir.join(MANIFEST_NAME)).unwrap()).unwrap();
        assert_eq!(on_disk.files.len(), 3);

        let saved = events.0.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].kind, EventKind::ClipSaved);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_empty_buffer_is_rejected_and_releases_flag() {
        let root = tempfile::tempdir().unwrap();
        let recorder = ClipRecorder::new(root.path());
        assert!(matches!(
            recorder.record(&frames(0), Arc::new(Collect::default())),
            Err(ClipError::EmptyBuffer)
        ));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_second_request_while_recording_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let recorder = ClipRecorder::new(root.path());
        recorder.recording.store(true, Ordering::Release);
        assert!(matches!(
            recorder.record(&frames(1), Arc::new(Collect::default())),
            Err(ClipError::AlreadyRecording)
        ));
        recorder.recording.store(false, Ordering::Release);

        let a = recorder.record(&frames(2), Arc::new(Collect::default())).unwrap();
        let a_dir = a.dir.clone();
        a.join().unwrap();
        let b = recorder.record(&frames(2), Arc::new(Collect::default())).unwrap();
        assert_ne!(a_dir, b.dir);
        b.join().unwrap();
    }

    #[test]
    fn test_busy_recorder_rejects_before_reading_buffer() {
        let root = tempfile::tempdir().unwrap();
        let recorder = ClipRecorder::new(root.path());
        recorder.recording.store(true, Ordering::Release);
        assert!(matches!(
            recorder.record(&frames(0), Arc::new(Collect::default())),
            Err(ClipError::AlreadyRecording)
        ));
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_later_pushes_do_not_change_a_clip_in_progress() {
        let root = tempfile::tempdir().unwrap();
        let recorder = ClipRecorder::new(root.path());
        let buffer = frames(2);
        let job = recorder.record(&buffer, Arc::new(Collect::default())).unwrap();
        buffer.push(&Frame::new(RgbImage::new(16, 12), 500, Instant::now()));
        let manifest = job.join().unwrap();
        assert_eq!((manifest.frames, manifest.last_sequence), (2, 101));
    }
}
