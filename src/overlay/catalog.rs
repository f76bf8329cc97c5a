use std::collections::BTreeMap;

use crate::overlay::types::Overlay;

/// Overlay definitions keyed by name.
///
/// Merging is last-wins: an entry merged later replaces any earlier entry
/// with the same name, whole (fields are never combined).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    overlays: BTreeMap<String, Overlay>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one definition, returning the one it replaced.
    pub fn merge_overlay(&mut self, overlay: Overlay) -> Option<Overlay> {
        self.overlays.insert(overlay.name.clone(), overlay)
    }

    /// Merge every entry of `later` into `self`; `later` wins on conflicts.
    pub fn merge(&mut self, later: Catalog) {
        self.overlays.extend(later.overlays);
    }

    pub fn get(&self, name: &str) -> Option<&Overlay> {
        self.overlays.get(name)
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    /// Entries ordered by name
    pub fn iter(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays.values()
    }
}

impl FromIterator<Overlay> for Catalog {
    fn from_iter<I: IntoIterator<Item = Overlay>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        for overlay in iter {
            catalog.merge_overlay(overlay);
        }
        catalog
    }
}

impl IntoIterator for Catalog {
    type Item = Overlay;
    type IntoIter = std::collections::btree_map::IntoValues<String, Overlay>;

    fn into_iter(self) -> Self::IntoIter {
        self.overlays.into_values()
    }
}
