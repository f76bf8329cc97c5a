//! Add, sync and delete against the backend registry.
//!
//! Every mutation follows the same order: change the in-memory store, save
//! it, then patch the build configuration. When a save fails the in-memory
//! change is reverted so memory and disk never disagree.

use chrono::Utc;
use serde_json::json;
use std::path::Path;

use crate::common::paths::ensure_dir;
use crate::overlay::backend::runner::CommandRunner;
use crate::overlay::backend::{Backend, BackendRegistry, Invocation, command_for, remove_tree};
use crate::overlay::config::Config;
use crate::overlay::error::{BackendError, OverlayError, OverlayResult, SourceFailure};
use crate::overlay::installed::{InstalledOverlay, InstalledStore};
use crate::overlay::interrupt;
use crate::overlay::makeconf::ConfigPatcher;
use crate::overlay::report::{BatchReport, ItemStatus};
use crate::overlay::types::{MAX_PRIORITY, Source, SourceType};
use crate::overlay::validate::ValidatedCatalog;
use crate::ui::prelude::*;

pub struct OverlayManager<'a> {
    config: &'a Config,
    registry: &'a BackendRegistry,
    runner: &'a dyn CommandRunner,
    catalog: Option<ValidatedCatalog>,
    store: InstalledStore,
}

impl<'a> OverlayManager<'a> {
    pub fn new(
        config: &'a Config,
        registry: &'a BackendRegistry,
        runner: &'a dyn CommandRunner,
        catalog: Option<ValidatedCatalog>,
        store: InstalledStore,
    ) -> Self {
        Self {
            config,
            registry,
            runner,
            catalog,
            store,
        }
    }

    pub fn store(&self) -> &InstalledStore {
        &self.store
    }

    pub fn catalog(&self) -> Option<&ValidatedCatalog> {
        self.catalog.as_ref()
    }

    fn invocation(&self) -> Invocation<'a> {
        Invocation::new(self.runner, self.config)
    }

    fn backend(&self, name: &str, kind: SourceType) -> OverlayResult<&'a dyn Backend> {
        self.registry
            .get(kind)
            .ok_or_else(|| OverlayError::BackendUnavailable {
                name: name.to_string(),
                kinds: vec![kind],
            })
    }

    /// Rewrite the managed variable from the current store.
    pub fn patch_config(&self) -> OverlayResult<()> {
        let patcher = ConfigPatcher::new(&self.config.make_conf, &self.config.conf_var, &self.config.storage);
        if patcher.apply(&self.store)? {
            emit(
                Level::Debug,
                "overlay.config.patched",
                &format!(
                    "Updated {} in {}",
                    self.config.conf_var,
                    self.config.make_conf.display()
                ),
                None,
            );
        }
        Ok(())
    }

    /// Write an in-memory store change to the config file and then to the
    /// store file. On failure `undo` reverts the change and both files keep
    /// their last committed content.
    fn commit(&mut self, action: &str, undo: impl FnOnce(&mut InstalledStore)) -> OverlayResult<()> {
        if let Err(e) = self.patch_config() {
            undo(&mut self.store);
            return Err(e);
        }
        if let Err(e) = self.store.save() {
            undo(&mut self.store);
            if let Err(restore) = self.patch_config() {
                emit(
                    Level::Warn,
                    &format!("overlay.{action}.rollback_failed"),
                    &format!("Could not restore {}: {restore}", self.config.make_conf.display()),
                    None,
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn abort_interrupted(&self, name: &str, backend: &dyn Backend, target: &Path, remove: bool) -> OverlayError {
        let inv = self.invocation();
        if let Err(e) = backend.cleanup(&inv, target) {
            emit(
                Level::Warn,
                "overlay.interrupt.cleanup_failed",
                &format!("Cleanup of {} failed: {e}", target.display()),
                None,
            );
        }
        if remove && let Err(e) = remove_tree(target) {
            emit(Level::Warn, "overlay.interrupt.remove_failed", &e.to_string(), None);
        }
        OverlayError::Interrupted(name.to_string())
    }

    fn run_post_hook(&self, name: &str, backend: &dyn Backend, target: &Path) -> Vec<String> {
        match backend.post_hook(&self.invocation(), target) {
            Ok(_) => Vec::new(),
            Err(e) => {
                let warning = format!("post-sync hook failed: {e}");
                emit(
                    Level::Warn,
                    "overlay.hook.failed",
                    &format!("Overlay {name}: {warning}"),
                    None,
                );
                vec![warning]
            }
        }
    }

    /// Install one overlay from the catalog. Sources are tried in declared
    /// order and the first success wins. Returns warnings for a partial
    /// success.
    pub fn add(&mut self, name: &str, priority: Option<u8>) -> OverlayResult<Vec<String>> {
        if self.store.contains(name) {
            return Err(OverlayError::AlreadyInstalled(name.to_string()));
        }
        if let Some(p) = priority
            && p > MAX_PRIORITY
        {
            return Err(OverlayError::InvalidPriority(u16::from(p)));
        }
        let overlay = self
            .catalog
            .as_ref()
            .ok_or_else(|| OverlayError::UnknownOverlay(name.to_string()))?
            .resolve(name)?
            .clone();
        let priority = priority
            .or(overlay.priority)
            .unwrap_or(self.config.priority);

        let target = self.config.storage.join(&overlay.name);
        if target.exists() {
            return Err(OverlayError::BackendCommand {
                name: name.to_string(),
                error: BackendError::filesystem(
                    &target,
                    "path already exists but is not a recorded overlay; move it away first",
                ),
            });
        }
        ensure_dir(&self.config.storage).map_err(|e| OverlayError::BackendCommand {
            name: name.to_string(),
            error: BackendError::filesystem(&self.config.storage, format!("{e:#}")),
        })?;

        let inv = self.invocation();
        let mut failures: Vec<SourceFailure> = Vec::new();
        let mut selected: Option<(Source, &dyn Backend)> = None;

        for source in &overlay.sources {
            let options = self.config.backend_options(source.kind);
            let backend = match self.registry.get(source.kind) {
                Some(b) if b.is_available(options) => b,
                found => {
                    let command = match found {
                        Some(b) => command_for(options, b.default_command()),
                        None => source.kind.tag().to_string(),
                    };
                    let error = BackendError::Unavailable {
                        kind: source.kind,
                        command,
                    };
                    emit(
                        Level::Warn,
                        "overlay.add.source_unavailable",
                        &format!("Skipping {source}: {error}"),
                        None,
                    );
                    failures.push(SourceFailure {
                        source: source.clone(),
                        error,
                    });
                    continue;
                }
            };

            emit(
                Level::Info,
                "overlay.add.source",
                &format!("Adding overlay {name} from {source}"),
                Some(json!({ "overlay": name, "type": source.kind.tag(), "url": source.url })),
            );
            let result = backend.add(&inv, &overlay, &source.url, &target);

            if interrupt::triggered() {
                return Err(self.abort_interrupted(name, backend, &target, true));
            }

            match result {
                Ok(()) => {
                    selected = Some((source.clone(), backend));
                    break;
                }
                Err(error) => {
                    emit(
                        Level::Warn,
                        "overlay.add.source_failed",
                        &format!("Overlay {name}: source {source} failed: {error}"),
                        None,
                    );
                    if let Err(e) = remove_tree(&target) {
                        emit(Level::Warn, "overlay.add.cleanup_failed", &e.to_string(), None);
                    }
                    failures.push(SourceFailure {
                        source: source.clone(),
                        error,
                    });
                }
            }
        }

        let Some((source, backend)) = selected else {
            let all_unavailable = failures
                .iter()
                .all(|f| matches!(f.error, BackendError::Unavailable { .. }));
            if all_unavailable {
                return Err(OverlayError::BackendUnavailable {
                    name: name.to_string(),
                    kinds: overlay.source_types(),
                });
            }
            return Err(OverlayError::AllSourcesFailed {
                name: name.to_string(),
                failures,
            });
        };

        self.store.insert(InstalledOverlay::new(
            overlay.clone(),
            source.clone(),
            target.clone(),
            priority,
        ));
        if let Err(e) = self.commit("add", |store| {
            store.remove(name);
        }) {
            if let Err(cleanup) = backend.delete(&target) {
                emit(Level::Warn, "overlay.add.cleanup_failed", &cleanup.to_string(), None);
            }
            return Err(e);
        }

        let warnings = self.run_post_hook(name, backend, &target);
        if interrupt::triggered() {
            return Err(OverlayError::Interrupted(name.to_string()));
        }

        emit(
            Level::Success,
            "overlay.add.done",
            &format!("Added overlay {name} ({source}) at priority {priority}"),
            Some(json!({
                "overlay": name,
                "source": source.url,
                "type": source.kind.tag(),
                "priority": priority,
                "path": target,
            })),
        );
        Ok(warnings)
    }

    /// Warnings about an installed overlay whose catalog entry moved on.
    fn catalog_drift(&self, entry: &InstalledOverlay) -> Vec<String> {
        let Some(catalog) = &self.catalog else {
            return Vec::new();
        };
        match catalog.all().get(&entry.name) {
            None => vec![format!(
                "overlay {} is no longer listed in any catalog; it stays installed until deleted",
                entry.name
            )],
            Some(current) if !current.sources.contains(&entry.selected_source) => {
                let available: Vec<String> = current.sources.iter().map(|s| s.to_string()).collect();
                vec![format!(
                    "the source of overlay {} changed (installed from {}, now {}); delete and re-add it to switch",
                    entry.name,
                    entry.selected_source,
                    available.join(", ")
                )]
            }
            Some(_) => Vec::new(),
        }
    }

    fn note_sync_failure(&mut self, name: &str, message: String) {
        if let Some(entry) = self.store.get_mut(name) {
            entry.last_error = Some(message);
        }
        if let Err(e) = self.store.save() {
            emit(Level::Warn, "overlay.sync.note_failed", &e.to_string(), None);
        }
    }

    /// Update an installed overlay's working copy. A failure is recorded on
    /// the entry but never uninstalls it.
    pub fn sync(&mut self, name: &str) -> OverlayResult<Vec<String>> {
        let entry = self
            .store
            .get(name)
            .cloned()
            .ok_or_else(|| OverlayError::UnknownOverlay(name.to_string()))?;

        let mut warnings = self.catalog_drift(&entry);
        for w in &warnings {
            emit(Level::Warn, "overlay.sync.catalog_drift", w, None);
        }

        let kind = entry.selected_source.kind;
        let backend = self.backend(name, kind)?;
        if !backend.is_available(self.config.backend_options(kind)) {
            let err = OverlayError::BackendUnavailable {
                name: name.to_string(),
                kinds: vec![kind],
            };
            self.note_sync_failure(name, err.to_string());
            return Err(err);
        }
        if !entry.local_path.is_dir() {
            let err = OverlayError::MissingWorkingCopy {
                name: name.to_string(),
                path: entry.local_path.clone(),
            };
            self.note_sync_failure(name, err.to_string());
            return Err(err);
        }

        emit(
            Level::Info,
            "overlay.sync.start",
            &format!("Syncing overlay {name}"),
            Some(json!({ "overlay": name, "type": kind.tag() })),
        );
        let result = backend.sync(
            &self.invocation(),
            &entry.definition,
            &entry.selected_source.url,
            &entry.local_path,
        );

        if interrupt::triggered() {
            return Err(self.abort_interrupted(name, backend, &entry.local_path, false));
        }

        if let Err(error) = result {
            self.note_sync_failure(name, error.to_string());
            return Err(OverlayError::BackendCommand {
                name: name.to_string(),
                error,
            });
        }

        let previous = entry.clone();
        if let Some(stored) = self.store.get_mut(name) {
            stored.last_sync = Some(Utc::now());
            stored.last_error = None;
        }
        if let Err(e) = self.store.save() {
            if let Some(stored) = self.store.get_mut(name) {
                *stored = previous;
            }
            return Err(e);
        }

        warnings.extend(self.run_post_hook(name, backend, &entry.local_path));
        if interrupt::triggered() {
            return Err(OverlayError::Interrupted(name.to_string()));
        }

        emit(
            Level::Success,
            "overlay.sync.done",
            &format!("Synced overlay {name}"),
            None,
        );
        Ok(warnings)
    }

    /// Remove an installed overlay. Once the store and config no longer list
    /// it, the working copy is removed; a failure there is only a warning.
    pub fn delete(&mut self, name: &str) -> OverlayResult<Vec<String>> {
        let Some((index, entry)) = self.store.remove(name) else {
            return Err(OverlayError::UnknownOverlay(name.to_string()));
        };
        let local_path = entry.local_path.clone();
        let kind = entry.selected_source.kind;
        self.commit("delete", move |store| store.restore(index, entry))?;

        let removal = match self.registry.get(kind) {
            Some(backend) => backend.delete(&local_path),
            None => remove_tree(&local_path),
        };
        let mut warnings = Vec::new();
        if let Err(e) = removal {
            emit(Level::Warn, "overlay.delete.remove_failed", &e.to_string(), None);
            warnings.push(e.to_string());
        }

        emit(
            Level::Success,
            "overlay.delete.done",
            &format!("Deleted overlay {name}"),
            Some(json!({ "overlay": name, "path": local_path })),
        );
        Ok(warnings)
    }

    pub fn set_priority(&mut self, name: &str, priority: u8) -> OverlayResult<()> {
        if priority > MAX_PRIORITY {
            return Err(OverlayError::InvalidPriority(u16::from(priority)));
        }
        let entry = self
            .store
            .get_mut(name)
            .ok_or_else(|| OverlayError::UnknownOverlay(name.to_string()))?;
        let old = entry.priority;
        entry.priority = priority;

        self.commit("priority", |store| {
            if let Some(entry) = store.get_mut(name) {
                entry.priority = old;
            }
        })?;

        emit(
            Level::Success,
            "overlay.priority.done",
            &format!("Priority of {name} changed from {old} to {priority}"),
            None,
        );
        Ok(())
    }

    fn run_batch<F>(&mut self, action: &'static str, names: Vec<String>, mut op: F) -> BatchReport
    where
        F: FnMut(&mut Self, &str) -> OverlayResult<Vec<String>>,
    {
        let mut report = BatchReport::new(action);
        for name in names {
            if interrupt::triggered() {
                report.interrupted = true;
                break;
            }
            let status = ItemStatus::from_result(op(self, &name));
            let stop = matches!(&status, ItemStatus::Failed(e) if e.is_interrupt());
            if let ItemStatus::Failed(e) = &status
                && !stop
            {
                emit(
                    Level::Error,
                    &format!("overlay.{action}.failed"),
                    &e.to_string(),
                    Some(json!({ "overlay": name })),
                );
            }
            report.record(name, status);
            if stop {
                report.interrupted = true;
                break;
            }
        }
        report
    }

    pub fn add_each(&mut self, names: Vec<String>, priority: Option<u8>) -> BatchReport {
        self.run_batch("add", names, |m, name| m.add(name, priority))
    }

    /// Add every listed overlay that is not installed yet.
    pub fn add_all(&mut self, priority: Option<u8>) -> BatchReport {
        let names = self
            .catalog
            .as_ref()
            .map(|c| {
                c.visible()
                    .filter(|o| !self.store.contains(&o.name))
                    .map(|o| o.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        self.add_each(names, priority)
    }

    pub fn sync_each(&mut self, names: Vec<String>) -> BatchReport {
        self.run_batch("sync", names, |m, name| m.sync(name))
    }

    /// Sync every installed overlay in installation order.
    pub fn sync_all(&mut self) -> BatchReport {
        let names = self.store.names();
        self.sync_each(names)
    }

    pub fn delete_each(&mut self, names: Vec<String>) -> BatchReport {
        self.run_batch("delete", names, |m, name| m.delete(name))
    }

    pub fn delete_all(&mut self) -> BatchReport {
        let names = self.store.names();
        self.delete_each(names)
    }
}
