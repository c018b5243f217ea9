//! Read-through cache of label → identity.

use crate::store::{IdentityStore, StoreError};
use crate::types::{Identity, UNKNOWN_NAME};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Snapshot of the identity store, rebuilt wholesale and swapped in one write.
///
/// Readers clone the inner `Arc`, so a rebuild never exposes a half-filled map.
#[derive(Default)]
pub struct IdentityDirectory {
    map: RwLock<Arc<HashMap<i64, Identity>>>,
}

impl IdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read the whole store and replace the cached mapping.
    pub fn rebuild(&self, store: &dyn IdentityStore) -> Result<usize, StoreError> {
        let identities = store.list_identities()?;
        let count = self.replace(identities);
        tracing::info!(identities = count, "identity directory rebuilt");
        Ok(count)
    }

    /// Swap in a fresh mapping built from `identities`.
    pub fn replace(&self, identities: Vec<Identity>) -> usize {
        let fresh: HashMap<i64, Identity> = identities.into_iter().map(|i| (i.label, i)).collect();
        let count = fresh.len();
        *self.map.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(fresh);
        count
    }

    fn snapshot(&self) -> Arc<HashMap<i64, Identity>> {
        Arc::clone(&self.map.read().unwrap_or_else(|p| p.into_inner()))
    }

    /// Display name for `label`, or "Unknown" when the label is not cached.
    pub fn lookup(&self, label: i64) -> String {
        self.snapshot()
            .get(&label)
            .map(Identity::display_name)
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    pub fn get(&self, label: i64) -> Option<Identity> {
        self.snapshot().get(&label).cloned()
    }

    /// All cached identities, ordered by label.
    pub fn identities(&self) -> Vec<Identity> {
        let mut all: Vec<Identity> = self.snapshot().values().cloned().collect();
        all.sort_by_key(|i| i.label);
        all
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// In-memory identity store with sequential labels.
    #[derive(Default)]
    pub struct MemoryIdentities {
        pub rows: Mutex<Vec<Identity>>,
    }

    impl IdentityStore for MemoryIdentities {
        fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
            Ok(self.rows.lock().unwrap().clone())
        }

        fn add_identity(&self, name: &str, role: &str) -> Result<i64, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            if rows.iter().any(|i| i.name == name) {
                return Err(StoreError::DuplicateName(name.to_string()));
            }
            let label = rows.iter().map(|i| i.label).max().unwrap_or(0) + 1;
            rows.push(Identity { label, name: name.into(), role: role.into() });
            Ok(label)
        }

        fn remove_identity(&self, label: i64) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|i| i.label != label);
            if rows.len() == before {
                return Err(StoreError::NotFound(label));
            }
            Ok(())
        }
    }
}
