//! Persistence collaborators. The engine only sees these traits; the
//! concrete SQLite and filesystem implementations live in `vigil-store`.

use crate::types::Identity;
use image::RgbImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity named {0:?} already exists")]
    DuplicateName(String),
    #[error("identity {0} not found")]
    NotFound(i64),
    #[error("database error: {0}")]
    Database(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("malformed data: {0}")]
    Malformed(String),
}

/// Relational store of known identities.
pub trait IdentityStore: Send + Sync {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;
    /// Returns the new label. Fails with [`StoreError::DuplicateName`] if taken.
    fn add_identity(&self, name: &str, role: &str) -> Result<i64, StoreError>;
    fn remove_identity(&self, label: i64) -> Result<(), StoreError>;
}

/// Append-only log of recognition events.
pub trait RecognitionLog: Send + Sync {
    fn log_recognition(&self, label: i64, confidence: f64) -> Result<(), StoreError>;
}

/// Training photos, grouped per identity.
pub trait TrainingImageStore: Send + Sync {
    fn save(&self, image: &RgbImage, identity: &Identity) -> Result<PathBuf, StoreError>;
    fn list_images(&self, identity: &Identity) -> Result<Vec<PathBuf>, StoreError>;
    fn load(&self, path: &Path) -> Result<RgbImage, StoreError>;
    fn delete(&self, path: &Path) -> Result<(), StoreError>;
    /// Remove every photo of `identity`.
    fn delete_all(&self, identity: &Identity) -> Result<(), StoreError>;
}

/// Durable per-label height samples.
pub trait HeightProfileStore: Send + Sync {
    fn load(&self) -> Result<BTreeMap<i64, Vec<u32>>, StoreError>;
    fn save(&self, profiles: &BTreeMap<i64, Vec<u32>>) -> Result<(), StoreError>;
}
