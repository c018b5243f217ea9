//! Body-height profiles: a fallback matcher for bodies whose face was not
//! recognized in the same frame.

use crate::store::{HeightProfileStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Per-label history of observed body heights, in pixels.
#[derive(Default)]
pub struct HeightProfiles {
    samples: Mutex<BTreeMap<i64, Vec<u32>>>,
}

impl HeightProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(&self, label: i64, height: u32) {
        self.lock().entry(label).or_default().push(height);
    }

    /// Label whose mean height deviates least from `observed`, provided it
    /// has at least `min_samples` samples and the relative deviation
    /// `|observed - mean| / max(1, mean)` is strictly below `tolerance`.
    pub fn best_match(&self, observed: u32, min_samples: usize, tolerance: f64) -> Option<i64> {
        let samples = self.lock();
        let mut best: Option<(i64, f64)> = None;
        for (&label, heights) in samples.iter() {
            if heights.is_empty() || heights.len() < min_samples {
                continue;
            }
            let mean = heights.iter().map(|&h| h as f64).sum::<f64>() / heights.len() as f64;
            let deviation = (observed as f64 - mean).abs() / mean.max(1.0);
            if deviation < tolerance && best.map_or(true, |(_, d)| deviation < d) {
                best = Some((label, deviation));
            }
        }
        best.map(|(label, _)| label)
    }

    pub fn sample_count(&self, label: i64) -> usize {
        self.lock().get(&label).map_or(0, Vec::len)
    }

    /// Copy of every profile, for persisting.
    pub fn snapshot(&self) -> BTreeMap<i64, Vec<u32>> {
        self.lock().clone()
    }

    /// Replace all profiles with what `store` holds. A missing or unreadable
    /// file leaves the profiles empty.
    pub fn load_from(&self, store: &dyn HeightProfileStore) {
        match store.load() {
            Ok(loaded) => {
                tracing::info!(labels = loaded.len(), "height profiles loaded");
                *self.lock() = loaded;
            }
            Err(e) => tracing::warn!(error = %e, "failed to load height profiles; starting fresh"),
        }
    }

    pub fn save_to(&self, store: &dyn HeightProfileStore) -> Result<(), StoreError> {
        store.save(&self.snapshot())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<i64, Vec<u32>>> {
        crate::sync::lock(&self.samples)
    }
}
