use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::Subcommand;
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;

use super::backend::BackendRegistry;
use super::backend::runner::DuctRunner;
use super::config::{Config, ConfigOverrides};
use super::error::{OverlayError, OverlayResult};
use super::fetch::CatalogFetcher;
use super::installed::{InstalledOverlay, InstalledStore};
use super::interrupt;
use super::manager::OverlayManager;
use super::report::BatchReport;
use super::signature::GpgVerifier;
use super::transport::HttpTransport;
use super::types::Overlay;
use super::validate::{ValidatedCatalog, validate};
use crate::ui::prelude::*;

/// Literal name selecting every applicable overlay.
pub const ALL: &str = "ALL";

#[derive(Subcommand, Debug)]
pub enum OverlayCommands {
    /// Install overlays from the catalog (ALL installs every listed overlay)
    Add {
        #[arg(required = true)]
        names: Vec<String>,
        /// Position in the build configuration; lower comes first (0-100)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        priority: Option<u8>,
    },
    /// Remove installed overlays (ALL removes every installed overlay)
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Update installed overlays (ALL updates every installed overlay)
    Sync {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Update every installed overlay
    SyncAll,
    /// Show the catalog record of overlays
    Info {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// List overlays available in the catalog
    List,
    /// List installed overlays in priority order
    ListLocal,
    /// Refresh the cached catalogs
    Fetch,
    /// Change the priority of an installed overlay
    SetPriority {
        name: String,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        priority: u8,
    },
}

/// Command-line settings shared by every action.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub overrides: ConfigOverrides,
    pub nofetch: bool,
}

/// How the process should exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Interrupted,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure => 1,
            Outcome::Interrupted => 130,
        }
    }

    fn from_report(report: &BatchReport) -> Self {
        if report.interrupted {
            Outcome::Interrupted
        } else if report.is_success() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

fn is_all(names: &[String]) -> bool {
    names.iter().any(|n| n == ALL)
}

/// Close out a batch: single items already reported themselves.
fn finish(report: BatchReport) -> Outcome {
    if report.items.len() != 1 || report.interrupted {
        report.emit_summary();
    }
    Outcome::from_report(&report)
}

fn load_catalog(config: &Config, registry: &BackendRegistry, refresh: bool) -> OverlayResult<ValidatedCatalog> {
    let transport = HttpTransport::new(config.effective_proxy().as_deref())
        .map_err(|e| OverlayError::Config(format!("{e:#}")))?;
    let verifier = GpgVerifier::new(config.gpg_command.clone(), config.gpg_homedir.clone());
    let report = CatalogFetcher::new(config, &transport, &verifier).fetch(refresh)?;

    for failure in &report.failures {
        emit(
            Level::Warn,
            "overlay.catalog.location_failed",
            &format!("Catalog {failure}"),
            None,
        );
    }

    let validated = validate(report.catalog, !config.nocheck, |kind| {
        registry.is_available(kind, config)
    });
    for rejected in validated.rejected() {
        emit(Level::Debug, "overlay.catalog.rejected", &rejected.to_string(), None);
    }
    Ok(validated)
}

pub fn handle_overlay_command(command: &OverlayCommands, options: &RunOptions) -> Result<Outcome> {
    let config = Config::load(options.config_path.as_deref())?.with_overrides(options.overrides.clone());
    crate::ui::set_quiet_mode(config.quiet);
    interrupt::install()?;

    let registry = BackendRegistry::standard();
    let runner = DuctRunner;
    let store = InstalledStore::load(&config.installed)?;
    let refresh = !options.nofetch;

    let outcome = match command {
        OverlayCommands::Add { names, priority } => {
            let catalog = load_catalog(&config, &registry, refresh)?;
            let mut manager = OverlayManager::new(&config, &registry, &runner, Some(catalog), store);
            let report = if is_all(names) {
                manager.add_all(*priority)
            } else {
                manager.add_each(names.clone(), *priority)
            };
            finish(report)
        }
        OverlayCommands::Delete { names } => {
            let mut manager = OverlayManager::new(&config, &registry, &runner, None, store);
            let report = if is_all(names) {
                manager.delete_all()
            } else {
                manager.delete_each(names.clone())
            };
            finish(report)
        }
        OverlayCommands::Sync { names } if is_all(names) => sync(&config, &registry, &runner, store, None, refresh),
        OverlayCommands::Sync { names } => {
            sync(&config, &registry, &runner, store, Some(names.clone()), refresh)
        }
        OverlayCommands::SyncAll => sync(&config, &registry, &runner, store, None, refresh),
        OverlayCommands::Info { names } => {
            let catalog = load_catalog(&config, &registry, refresh)?;
            info(&catalog, &store, names)
        }
        OverlayCommands::List => {
            let catalog = load_catalog(&config, &registry, refresh)?;
            list(&catalog, &store, &config, &registry);
            Outcome::Success
        }
        OverlayCommands::ListLocal => {
            list_local(&store);
            Outcome::Success
        }
        OverlayCommands::Fetch => {
            let catalog = load_catalog(&config, &registry, true)?;
            emit(
                Level::Success,
                "overlay.fetch.done",
                &format!("Fetched catalog with {} overlays", catalog.all().len()),
                Some(json!({ "overlays": catalog.all().len() })),
            );
            Outcome::Success
        }
        OverlayCommands::SetPriority { name, priority } => {
            let mut manager = OverlayManager::new(&config, &registry, &runner, None, store);
            manager
                .set_priority(name, *priority)
                .with_context(|| format!("changing priority of {name}"))?;
            Outcome::Success
        }
    };
    Ok(outcome)
}

fn sync(
    config: &Config,
    registry: &BackendRegistry,
    runner: &DuctRunner,
    store: InstalledStore,
    names: Option<Vec<String>>,
    refresh: bool,
) -> Outcome {
    if store.is_empty() && names.is_none() {
        emit(Level::Info, "overlay.sync.nothing", "No overlays are installed", None);
        return Outcome::Success;
    }
    let catalog = match load_catalog(config, registry, refresh) {
        Ok(catalog) => Some(catalog),
        Err(e) => {
            emit(
                Level::Warn,
                "overlay.sync.no_catalog",
                &format!("Syncing without catalog checks: {e}"),
                None,
            );
            None
        }
    };
    let mut manager = OverlayManager::new(config, registry, runner, catalog, store);
    let report = match names {
        Some(names) => manager.sync_each(names),
        None => manager.sync_all(),
    };
    finish(report)
}

fn or_unknown(value: Option<&str>) -> &str {
    value.unwrap_or("unknown")
}

/// Detailed multi-line record of one catalog entry.
pub fn describe(overlay: &Overlay, installed: Option<&InstalledOverlay>) -> Vec<String> {
    let mut lines = Vec::new();
    let title = if installed.is_some() {
        format!("{} [installed]", overlay.name)
    } else {
        overlay.name.clone()
    };
    lines.push(title.bold().to_string());
    lines.push("~".repeat(overlay.name.len().max(8)));

    for (i, source) in overlay.sources.iter().enumerate() {
        let label = if i == 0 { "Source  :" } else { "         " };
        lines.push(format!("{label} {}", source.url));
    }
    let contact = or_unknown(overlay.owner.contact.as_deref());
    match &overlay.owner.name {
        Some(owner) => lines.push(format!("Contact : {owner} <{contact}>")),
        None => lines.push(format!("Contact : {contact}")),
    }
    let types: Vec<&str> = overlay.source_types().iter().map(|t| t.display_name()).collect();
    lines.push(format!(
        "Type    : {}; Priority: {}",
        types.join(", "),
        installed.map_or(overlay.effective_priority(), |i| i.priority)
    ));
    lines.push(format!("Quality : {}", overlay.quality.as_str()));
    if let Some(status) = &overlay.status {
        lines.push(format!("Status  : {status}"));
    }
    if let Some(branch) = &overlay.branch {
        lines.push(format!("Branch  : {branch}"));
    }
    lines.push(String::new());
    lines.push("Description:".to_string());
    lines.push(format!("  {}", or_unknown(overlay.description.as_deref())));
    if let Some(homepage) = &overlay.homepage {
        lines.push(String::new());
        lines.push(format!("Link: {homepage}"));
    }
    if let Some(irc) = &overlay.irc {
        lines.push(format!("IRC : {irc}"));
    }
    for feed in &overlay.feeds {
        lines.push(format!("Feed: {feed}"));
    }
    lines
}

fn info(catalog: &ValidatedCatalog, store: &InstalledStore, names: &[String]) -> Outcome {
    let mut outcome = Outcome::Success;
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            separator();
        }
        match catalog.resolve(name) {
            Ok(overlay) => {
                let installed = store.get(name);
                emit(
                    Level::Info,
                    "overlay.info",
                    &describe(overlay, installed).join("\n"),
                    Some(json!({
                        "overlay": overlay,
                        "installed": installed.is_some(),
                    })),
                );
            }
            Err(e) => {
                emit(Level::Error, "overlay.info.failed", &e.to_string(), None);
                outcome = Outcome::Failure;
            }
        }
    }
    outcome
}

/// One-line summary used by `list`.
pub fn list_line(overlay: &Overlay, supported: bool, installed: bool) -> String {
    let marker = if !supported {
        "!".red().to_string()
    } else if overlay.is_official() {
        "*".green().to_string()
    } else {
        "*".yellow().to_string()
    };
    let types: Vec<&str> = overlay.source_types().iter().map(|t| t.tag()).collect();
    let location = overlay
        .homepage
        .as_deref()
        .or_else(|| overlay.sources.first().map(|s| s.url.as_str()))
        .unwrap_or("");
    let installed = if installed { " (installed)" } else { "" };
    format!(
        "{marker} {:<30} [{:<10}] ({location}){installed}",
        overlay.name,
        types.join(",")
    )
}

fn list(catalog: &ValidatedCatalog, store: &InstalledStore, config: &Config, registry: &BackendRegistry) {
    let mut entries: Vec<&Overlay> = catalog.visible().collect();
    entries.sort_by_key(|o| o.name.to_lowercase());
    if entries.is_empty() {
        emit(Level::Info, "overlay.list.empty", "No overlays are available", None);
        return;
    }
    for overlay in entries {
        let supported = overlay
            .source_types()
            .into_iter()
            .any(|k| registry.is_available(k, config));
        emit(
            Level::Info,
            "overlay.list.item",
            &list_line(overlay, supported, store.contains(&overlay.name)),
            Some(json!({
                "overlay": overlay.name,
                "official": overlay.is_official(),
                "supported": supported,
                "installed": store.contains(&overlay.name),
                "types": overlay.source_types(),
            })),
        );
    }
    let hidden = catalog.hidden().count();
    if hidden > 0 {
        emit(
            Level::Debug,
            "overlay.list.hidden",
            &format!("{hidden} overlays hidden because their tools are not installed"),
            None,
        );
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

pub fn list_local_line(entry: &InstalledOverlay) -> String {
    let mut line = format!(
        "{:>3} {:<30} {} (synced: {})",
        entry.priority,
        entry.name,
        entry.local_path.display(),
        format_time(entry.last_sync)
    );
    if let Some(error) = &entry.last_error {
        line.push_str(&format!("\n      {} {}", "last sync failed:".red(), error.lines().next().unwrap_or("")));
    }
    line
}

fn list_local(store: &InstalledStore) {
    if store.is_empty() {
        emit(Level::Info, "overlay.list_local.empty", "No overlays are installed", None);
        return;
    }
    for entry in store.by_priority() {
        emit(
            Level::Info,
            "overlay.list_local.item",
            &list_local_line(entry),
            Some(json!({
                "overlay": entry.name,
                "priority": entry.priority,
                "path": entry.local_path,
                "source": entry.selected_source,
                "installed_at": entry.installed_at,
                "last_sync": entry.last_sync,
                "last_error": entry.last_error,
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::types::{Source, SourceType};

    fn sample() -> Overlay {
        let mut o = Overlay::new(
            "wrobel",
            vec![
                Source {
                    kind: SourceType::Svn,
                    url: "https://svn.example.org/wrobel".into(),
                },
                Source {
                    kind: SourceType::Git,
                    url: "https://git.example.org/wrobel.git".into(),
                },
            ],
        );
        o.description = Some("Test overlay".into());
        o.owner.contact = Some("nobody@example.org".into());
        o.homepage = Some("https://example.org/wrobel".into());
        o.feeds = vec!["https://example.org/wrobel/feed".into()];
        o.status = Some("official".into());
        o
    }

    #[test]
    fn describe_lists_sources_contact_and_feeds() {
        colored::control::set_override(false);
        let text = describe(&sample(), None).join("\n");
        assert!(text.starts_with("wrobel\n"));
        assert!(text.contains("Source  : https://svn.example.org/wrobel\n          https://git.example.org/wrobel.git"));
        assert!(text.contains("Contact : nobody@example.org"));
        assert!(text.contains("Type    : Subversion, Git; Priority: 50"));
        assert!(text.contains("Quality : experimental"));
        assert!(text.contains("Link: https://example.org/wrobel"));
        assert!(text.contains("Feed: https://example.org/wrobel/feed"));
    }

    #[test]
    fn list_line_marks_official_and_unsupported() {
        colored::control::set_override(false);
        let line = list_line(&sample(), true, true);
        assert!(line.starts_with("* wrobel"));
        assert!(line.contains("[svn,git"));
        assert!(line.ends_with("(https://example.org/wrobel) (installed)"));
        assert!(list_line(&sample(), false, false).starts_with("! wrobel"));
    }

    #[test]
    fn list_local_line_shows_failure_note() {
        colored::control::set_override(false);
        let overlay = sample();
        let mut entry = InstalledOverlay::new(
            overlay.clone(),
            overlay.sources[1].clone(),
            PathBuf::from("/var/lib/overlayman/wrobel"),
            20,
        );
        assert_eq!(
            list_local_line(&entry),
            " 20 wrobel                         /var/lib/overlayman/wrobel (synced: never)"
        );
        entry.last_error = Some("git pull failed\nmore".into());
        assert!(list_local_line(&entry).ends_with("last sync failed: git pull failed"));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Outcome::Success.exit_code(), 0);
        assert_eq!(Outcome::Failure.exit_code(), 1);
        assert_eq!(Outcome::Interrupted.exit_code(), 130);
        assert!(is_all(&["ALL".to_string()]));
        assert!(!is_all(&["all".to_string()]));
    }
}
