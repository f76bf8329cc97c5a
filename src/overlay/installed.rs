//! Persisted record of overlays materialized on disk.
//!
//! Stored as TOML, one `[[overlay]]` table per entry in installation order:
//!
//! ```toml
//! [[overlay]]
//! name = "foo"
//! local_path = "/var/lib/overlayman/foo"
//! priority = 50
//! installed_at = "2024-10-01T10:00:00Z"
//! last_sync = "2024-10-02T08:30:00Z"
//!
//! [overlay.selected_source]
//! type = "git"
//! url = "https://example.org/foo.git"
//!
//! [overlay.definition]
//! name = "foo"
//! ...
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::fs::write_atomic;
use crate::overlay::error::{OverlayError, OverlayResult};
use crate::overlay::types::{Overlay, Source};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledOverlay {
    pub name: String,
    pub local_path: PathBuf,
    pub priority: u8,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Failure note from the most recent sync, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub selected_source: Source,
    /// Catalog definition as it was when the overlay was added
    pub definition: Overlay,
}

impl InstalledOverlay {
    pub fn new(definition: Overlay, source: Source, local_path: PathBuf, priority: u8) -> Self {
        Self {
            name: definition.name.clone(),
            local_path,
            priority,
            installed_at: Utc::now(),
            last_sync: None,
            last_error: None,
            selected_source: source,
            definition,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default, rename = "overlay")]
    overlays: Vec<InstalledOverlay>,
}

#[derive(Debug)]
pub struct InstalledStore {
    path: PathBuf,
    entries: Vec<InstalledOverlay>,
}

impl InstalledStore {
    /// Read the store; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading installed overlays from {}", path.display()))?;
            let file: StoreFile = toml::from_str(&text)
                .with_context(|| format!("parsing installed overlays in {}", path.display()))?;
            file.overlays
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the store file atomically.
    pub fn save(&self) -> OverlayResult<()> {
        let fail = |message: String| OverlayError::StoreWrite {
            path: self.path.clone(),
            message,
        };
        let file = StoreFile {
            overlays: self.entries.clone(),
        };
        let text = toml::to_string_pretty(&file).map_err(|e| fail(e.to_string()))?;
        write_atomic(&self.path, text.as_bytes()).map_err(|e| fail(e.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&InstalledOverlay> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut InstalledOverlay> {
        self.entries.iter_mut().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn insert(&mut self, entry: InstalledOverlay) {
        self.entries.push(entry);
    }

    /// Remove an entry, returning it with its position for [`Self::restore`].
    pub fn remove(&mut self, name: &str) -> Option<(usize, InstalledOverlay)> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        Some((index, self.entries.remove(index)))
    }

    /// Put back an entry taken out by [`Self::remove`].
    pub fn restore(&mut self, index: usize, entry: InstalledOverlay) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, entry);
    }

    /// Entries in installation order
    pub fn iter(&self) -> impl Iterator<Item = &InstalledOverlay> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ascending by priority; equal priorities keep installation order.
    pub fn by_priority(&self) -> Vec<&InstalledOverlay> {
        let mut sorted: Vec<&InstalledOverlay> = self.entries.iter().collect();
        sorted.sort_by_key(|e| e.priority);
        sorted
    }
}
