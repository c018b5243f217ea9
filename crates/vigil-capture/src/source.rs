//! Frame sources.

use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "ppm"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source not found: {0}")]
    NotFound(String),
    #[error("no images in {0}")]
    Empty(String),
    #[error("every frame in {0} failed to decode")]
    Unreadable(String),
    #[error("capture device: {0}")]
    Device(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stream of RGB frames. `Ok(None)` means the stream ended normally; an
/// error is fatal to the ingestion loop.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;
    fn describe(&self) -> String;
}

/// Replays the still images of a directory in file-name order.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    looped: bool,
}

impl DirectorySource {
    /// Scan `dir` for images. With `looped`, playback restarts at the first
    /// file instead of ending.
    pub fn open(dir: &Path, looped: bool) -> Result<Self, SourceError> {
        if !dir.is_dir() {
            return Err(SourceError::NotFound(dir.display().to_string()));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(SourceError::Empty(dir.display().to_string()));
        }

        tracing::info!(dir = %dir.display(), frames = files.len(), looped, "opened directory source");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            position: 0,
            looped,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        // A full pass of undecodable files is fatal.
        for _ in 0..self.files.len() {
            if self.position >= self.files.len() {
                if !self.looped {
                    return Ok(None);
                }
                self.position = 0;
            }
            let path = &self.files[self.position];
            self.position += 1;

            match image::open(path) {
                Ok(img) => return Ok(Some(img.to_rgb8())),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable frame"),
            }
        }
        if self.position >= self.files.len() && !self.looped {
            return Ok(None);
        }
        Err(SourceError::Unreadable(self.dir.display().to_string()))
    }

    fn describe(&self) -> String {
        format!("{} ({} frames)", self.dir.display(), self.files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_frame(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(8, 6, image::Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    fn shade(img: &RgbImage) -> u8 {
        img.get_pixel(0, 0)[0]
    }

    #[test]
    fn test_plays_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "b.png", 20);
        write_frame(dir.path(), "a.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut src = DirectorySource::open(dir.path(), false).unwrap();
        assert_eq!(src.len(), 2);
        assert_eq!(shade(&src.next_frame().unwrap().unwrap()), 10);
        assert_eq!(shade(&src.next_frame().unwrap().unwrap()), 20);
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_looped_restarts() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "only.png", 42);
        let mut src = DirectorySource::open(dir.path(), true).unwrap();
        for _ in 0..3 {
            assert_eq!(shade(&src.next_frame().unwrap().unwrap()), 42);
        }
    }

    #[test]
    fn test_unreadable_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"garbage").unwrap();
        write_frame(dir.path(), "b.png", 7);
        let mut src = DirectorySource::open(dir.path(), false).unwrap();
        assert_eq!(shade(&src.next_frame().unwrap().unwrap()), 7);
    }

    #[test]
    fn test_all_unreadable_is_fatal_when_looped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"garbage").unwrap();
        let mut src = DirectorySource::open(dir.path(), true).unwrap();
        assert!(matches!(src.next_frame(), Err(SourceError::Unreadable(_))));
    }

    #[test]
    fn test_open_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DirectorySource::open(dir.path(), false),
            Err(SourceError::Empty(_))
        ));
        assert!(matches!(
            DirectorySource::open(&dir.path().join("missing"), false),
            Err(SourceError::NotFound(_))
        ));
    }
}
