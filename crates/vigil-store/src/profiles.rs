//! Height profiles persisted as a JSON object of label to samples.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use vigil_core::{HeightProfileStore, StoreError};

pub struct JsonHeightProfiles {
    path: PathBuf,
}

impl JsonHeightProfiles {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HeightProfileStore for JsonHeightProfiles {
    /// A missing file is an empty profile set.
    fn load(&self) -> Result<BTreeMap<i64, Vec<u32>>, StoreError> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "no height profiles yet");
            return Ok(BTreeMap::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        serde_json::from_reader(reader)
            .map_err(|e| StoreError::Malformed(format!("{}: {e}", self.path.display())))
    }

    /// Written to a sibling temp file first, then renamed over the old one.
    fn save(&self, profiles: &BTreeMap<i64, Vec<u32>>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, profiles)
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        tracing::info!(path = %self.path.display(), labels = profiles.len(), "height profiles saved");
        Ok(())
    }
}
