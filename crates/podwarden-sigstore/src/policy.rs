//! Skip-list and subject allow-list owned by an attestation pipeline

use parking_lot::RwLock;
use std::collections::HashSet;

use crate::errors::{Result, SigstoreError};

/// Image IDs exempt from signature verification
#[derive(Debug, Default)]
pub struct SkipList {
    images: RwLock<HashSet<String>>,
}

impl SkipList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I, S>(&self, images: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self.images.write();
        guard.extend(images.into_iter().map(Into::into));
    }

    pub fn clear(&self) {
        self.images.write().clear();
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.images.read().contains(image_id)
    }

    /// Whether `image_id` is exempt. An empty ID is an error, an unknown one is not.
    pub fn should_skip(&self, image_id: &str) -> Result<bool> {
        if image_id.is_empty() {
            return Err(SigstoreError::EmptyImageId);
        }
        Ok(self.contains(image_id))
    }

    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Signer subjects accepted when the list is enabled
#[derive(Debug, Default)]
pub struct AllowList {
    state: RwLock<AllowListState>,
}

#[derive(Debug, Default)]
struct AllowListState {
    enabled: bool,
    subjects: HashSet<String>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.write().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    pub fn add(&self, subject: impl Into<String>) {
        self.state.write().subjects.insert(subject.into());
    }

    pub fn clear(&self) {
        self.state.write().subjects.clear();
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.state.read().subjects.contains(subject)
    }

    /// Disabled lists permit everything; enabled lists require a listed, non-empty subject.
    pub fn permits(&self, subject: &str) -> bool {
        let state = self.state.read();
        if !state.enabled {
            return true;
        }
        !subject.is_empty() && state.subjects.contains(subject)
    }
}
