use std::collections::BTreeMap;

use crate::overlay::catalog::Catalog;
use crate::overlay::error::{OverlayError, OverlayResult};
use crate::overlay::types::{Overlay, SourceType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    Visible,
    /// None of the entry's source types has an installed tool
    Hidden(Vec<SourceType>),
    /// Required metadata is missing
    Rejected(Vec<&'static str>),
}

/// A catalog with a validation verdict for every entry.
#[derive(Debug, Default)]
pub struct ValidatedCatalog {
    catalog: Catalog,
    status: BTreeMap<String, EntryStatus>,
}

fn missing_fields(overlay: &Overlay) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if overlay.description.is_none() {
        missing.push("a description");
    }
    if overlay.owner.contact.is_none() {
        missing.push("an owner contact");
    }
    missing
}

/// Classify every entry. In permissive mode everything is visible.
pub fn validate(catalog: Catalog, strict: bool, available: impl Fn(SourceType) -> bool) -> ValidatedCatalog {
    let mut status = BTreeMap::new();
    for overlay in catalog.iter() {
        let verdict = if !strict {
            EntryStatus::Visible
        } else {
            let missing = missing_fields(overlay);
            if !missing.is_empty() {
                EntryStatus::Rejected(missing)
            } else {
                let kinds = overlay.source_types();
                if kinds.iter().any(|k| available(*k)) {
                    EntryStatus::Visible
                } else {
                    EntryStatus::Hidden(kinds)
                }
            }
        };
        status.insert(overlay.name.clone(), verdict);
    }
    ValidatedCatalog { catalog, status }
}

impl ValidatedCatalog {
    /// Entries shown in listings, ordered by name.
    pub fn visible(&self) -> impl Iterator<Item = &Overlay> {
        self.catalog
            .iter()
            .filter(|o| matches!(self.status.get(&o.name), Some(EntryStatus::Visible)))
    }

    pub fn hidden(&self) -> impl Iterator<Item = (&Overlay, &[SourceType])> {
        self.catalog.iter().filter_map(|o| match self.status.get(&o.name) {
            Some(EntryStatus::Hidden(kinds)) => Some((o, kinds.as_slice())),
            _ => None,
        })
    }

    pub fn rejected(&self) -> impl Iterator<Item = OverlayError> + '_ {
        self.status.iter().filter_map(|(name, status)| match status {
            EntryStatus::Rejected(missing) => Some(OverlayError::IncompleteEntry {
                name: name.clone(),
                missing: missing.clone(),
            }),
            _ => None,
        })
    }

    pub fn status(&self, name: &str) -> Option<&EntryStatus> {
        self.status.get(name)
    }

    /// Look up an entry the user named explicitly. Hidden entries resolve;
    /// rejected ones report what they lack.
    pub fn resolve(&self, name: &str) -> OverlayResult<&Overlay> {
        let overlay = self
            .catalog
            .get(name)
            .ok_or_else(|| OverlayError::UnknownOverlay(name.to_string()))?;
        match self.status.get(name) {
            Some(EntryStatus::Rejected(missing)) => Err(OverlayError::IncompleteEntry {
                name: name.to_string(),
                missing: missing.clone(),
            }),
            _ => Ok(overlay),
        }
    }

    /// Every entry regardless of verdict.
    pub fn all(&self) -> &Catalog {
        &self.catalog
    }
}
