//! Training photos on the filesystem: `<root>/<role>/<name>/<name>_<millis>.jpg`.

use image::RgbImage;
use std::path::{Path, PathBuf};
use vigil_core::{Identity, StoreError, TrainingImageStore};

const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn identity_dir(&self, identity: &Identity) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join(path_component(&identity.role)?)
            .join(path_component(&identity.name)?))
    }

    /// Refuse paths outside the store root.
    fn owned(&self, path: &Path) -> Result<(), StoreError> {
        if path.starts_with(&self.root) {
            Ok(())
        } else {
            Err(StoreError::Malformed(format!(
                "{} is outside {}",
                path.display(),
                self.root.display()
            )))
        }
    }
}

/// A name or role as a single directory name.
fn path_component(s: &str) -> Result<String, StoreError> {
    let cleaned: String = s
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(StoreError::Malformed(format!("unusable path component {s:?}")));
    }
    Ok(cleaned)
}

impl TrainingImageStore for FsImageStore {
    fn save(&self, image: &RgbImage, identity: &Identity) -> Result<PathBuf, StoreError> {
        let dir = self.identity_dir(identity)?;
        std::fs::create_dir_all(&dir)?;

        let stem = path_component(&identity.name)?;
        let millis = chrono::Utc::now().timestamp_millis();
        let mut path = dir.join(format!("{stem}_{millis}.jpg"));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{stem}_{millis}_{n}.jpg"));
            n += 1;
        }

        image.save(&path)?;
        tracing::debug!(path = %path.display(), "training photo saved");
        Ok(path)
    }

    fn list_images(&self, identity: &Identity) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.identity_dir(identity)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                        .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn load(&self, path: &Path) -> Result<RgbImage, StoreError> {
        Ok(image::open(path)?.to_rgb8())
    }

    fn delete(&self, path: &Path) -> Result<(), StoreError> {
        self.owned(path)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_all(&self, identity: &Identity) -> Result<(), StoreError> {
        let dir = self.identity_dir(identity)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(dir = %dir.display(), "training photos deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ada() -> Identity {
        Identity {
            label: 1,
            name: "Ada".into(),
            role: "Owner".into(),
        }
    }

    #[test]
    fn test_save_list_load_delete() {
        let root = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(root.path().join("training-data"));

        let img = RgbImage::from_pixel(20, 20, image::Rgb([200, 10, 10]));
        let a = store.save(&img, &ada()).unwrap();
        let b = store.save(&img, &ada()).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(root.path().join("training-data").join("Owner").join("Ada")));
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("Ada_"));

        assert_eq!(store.list_images(&ada()).unwrap().len(), 2);
        assert_eq!(store.load(&a).unwrap().dimensions(), (20, 20));

        store.delete(&a).unwrap();
        store.delete(&a).unwrap();
        assert_eq!(store.list_images(&ada()).unwrap(), vec![b]);
    }

    #[test]
    fn test_delete_all_and_missing_identity() {
        let root = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(root.path());
        store.save(&RgbImage::new(8, 8), &ada()).unwrap();
        store.delete_all(&ada()).unwrap();
        assert!(store.list_images(&ada()).unwrap().is_empty());
        store.delete_all(&ada()).unwrap();
    }

    #[test]
    fn test_rejects_paths_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(root.path().join("a"));
        assert!(store.delete(&root.path().join("b.jpg")).is_err());

        let sneaky = Identity {
            label: 2,
            name: "..".into(),
            role: "Owner".into(),
        };
        assert!(store.save(&RgbImage::new(4, 4), &sneaky).is_err());
    }
}
