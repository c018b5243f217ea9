//! vigil-capture: frame sources feeding the engine and clip export from the
//! frame ring buffer.
//!
//! Frames come live from a V4L2 camera or are replayed from a directory of
//! still images, which is also how the engine is exercised offline.

pub mod camera;
pub mod clip;
pub mod source;

pub use camera::V4l2Source;
pub use clip::{ClipError, ClipManifest, ClipRecorder};
pub use source::{DirectorySource, FrameSource, SourceError};
