use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::paths;
use crate::overlay::error::OverlayError;
use crate::overlay::hook::HookTemplate;
use crate::overlay::types::{DEFAULT_PRIORITY, MAX_PRIORITY, SourceType};

/// Per-type command configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOptions {
    /// Replacement for the default tool name or path
    pub command: Option<String>,
    /// Extra arguments appended when adding
    pub addopts: Vec<String>,
    /// Extra arguments appended when syncing
    pub syncopts: Vec<String>,
    /// Command run in the working copy after a successful add or sync
    pub postsync: Option<HookTemplate>,
}

static NO_OPTIONS: BackendOptions = BackendOptions {
    command: None,
    addopts: Vec::new(),
    syncopts: Vec::new(),
    postsync: None,
};

/// Fully resolved configuration. Loaded once at startup and then only read.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: PathBuf,
    pub cache: PathBuf,
    pub installed: PathBuf,
    pub make_conf: PathBuf,
    pub conf_var: String,
    pub overlays: Vec<String>,
    pub gpg_signed_lists: Vec<String>,
    pub gpg_detached_lists: Vec<(String, String)>,
    pub nocheck: bool,
    pub quiet: bool,
    pub proxy: Option<String>,
    pub priority: u8,
    pub git_user: Option<String>,
    pub git_email: Option<String>,
    pub gpg_command: String,
    pub gpg_homedir: Option<PathBuf>,
    pub backends: BTreeMap<SourceType, BackendOptions>,
}

/// Values given on the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub extra_overlays: Vec<String>,
    pub nocheck: Option<bool>,
    pub quiet: Option<bool>,
}

#[derive(Deserialize)]
struct RawConfig {
    storage: String,
    cache: String,
    installed: String,
    make_conf: String,
    conf_var: String,
    #[serde(default)]
    overlays: StringList,
    #[serde(default)]
    gpg_signed_lists: StringList,
    #[serde(default)]
    gpg_detached_lists: StringList,
    #[serde(deserialize_with = "deserialize_flag")]
    nocheck: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    quiet: bool,
    proxy: Option<String>,
    priority: i64,
    git_user: Option<String>,
    git_email: Option<String>,
    gpg_command: String,
    gpg_homedir: Option<String>,
}

/// Catalog lists may be written as a TOML array or as one string with an
/// entry per line.
#[derive(Deserialize, Default)]
#[serde(untagged)]
enum StringList {
    #[default]
    Empty,
    One(String),
    Many(Vec<String>),
}

impl StringList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringList::Empty => Vec::new(),
            StringList::One(s) => s.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect(),
            StringList::Many(v) => v.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        }
    }
}

/// Accept `true`/`false` as well as the `yes`/`no` strings older config files use.
fn deserialize_flag<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }
    match Flag::deserialize(d)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Ok(true),
            "no" | "false" | "off" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("expected yes/no, got \"{other}\""))),
        },
    }
}

fn default_table() -> toml::Table {
    let mut t = toml::Table::new();
    let storage = paths::default_storage_dir();
    t.insert("storage".into(), storage.to_string_lossy().into_owned().into());
    t.insert("cache".into(), "%(storage)s/cache".into());
    t.insert("installed".into(), "%(storage)s/installed.toml".into());
    t.insert("make_conf".into(), "%(storage)s/make.conf".into());
    t.insert("conf_var".into(), "PORTDIR_OVERLAY".into());
    t.insert("nocheck".into(), false.into());
    t.insert("priority".into(), i64::from(DEFAULT_PRIORITY).into());
    t.insert("gpg_command".into(), "gpg".into());
    t
}

impl Config {
    /// Load the configuration. An explicit path must exist; a missing file at
    /// the default location just yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let (cfg_path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (paths::default_config_file()?, false),
        };
        if !cfg_path.exists() {
            if required {
                bail!("config file {} does not exist", cfg_path.display());
            }
            return Self::from_table(toml::Table::new());
        }
        let s = fs::read_to_string(&cfg_path)
            .with_context(|| format!("reading config {}", cfg_path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("loading config {}", cfg_path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Config> {
        let table: toml::Table = toml::from_str(s).context("parsing config toml")?;
        Self::from_table(table)
    }

    fn from_table(user: toml::Table) -> Result<Config> {
        let mut table = default_table();
        table.extend(user);
        interpolate_table(&mut table)?;

        let mut backends = BTreeMap::new();
        for kind in SourceType::ALL {
            backends.insert(kind, take_backend_options(&mut table, kind)?);
        }

        let raw: RawConfig = toml::Value::Table(table)
            .try_into()
            .context("invalid configuration value")?;

        let priority = u8::try_from(raw.priority)
            .ok()
            .filter(|p| *p <= MAX_PRIORITY)
            .ok_or_else(|| anyhow!("priority {} is out of range (0-100)", raw.priority))?;

        let mut detached = Vec::new();
        for entry in raw.gpg_detached_lists.into_vec() {
            let mut parts = entry.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(list), Some(sig), None) => detached.push((list.to_string(), sig.to_string())),
                _ => bail!("gpg_detached_lists entries must be \"<list-url> <signature-url>\", got \"{entry}\""),
            }
        }

        Ok(Config {
            storage: paths::expand_path(&raw.storage),
            cache: paths::expand_path(&raw.cache),
            installed: paths::expand_path(&raw.installed),
            make_conf: paths::expand_path(&raw.make_conf),
            conf_var: raw.conf_var,
            overlays: raw.overlays.into_vec(),
            gpg_signed_lists: raw.gpg_signed_lists.into_vec(),
            gpg_detached_lists: detached,
            nocheck: raw.nocheck,
            quiet: raw.quiet,
            proxy: raw.proxy.filter(|p| !p.is_empty()),
            priority,
            git_user: raw.git_user.filter(|s| !s.is_empty()),
            git_email: raw.git_email.filter(|s| !s.is_empty()),
            gpg_command: raw.gpg_command,
            gpg_homedir: raw.gpg_homedir.map(|h| paths::expand_path(&h)),
            backends,
        })
    }

    /// Merge command-line overrides. This is the only mutation after loading.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Config {
        for url in overrides.extra_overlays {
            if !self.overlays.contains(&url) {
                self.overlays.push(url);
            }
        }
        if let Some(nocheck) = overrides.nocheck {
            self.nocheck = nocheck;
        }
        if let Some(quiet) = overrides.quiet {
            self.quiet = quiet;
        }
        self
    }

    pub fn backend_options(&self, kind: SourceType) -> &BackendOptions {
        self.backends.get(&kind).unwrap_or(&NO_OPTIONS)
    }

    /// Proxy for catalog downloads: config first, then the environment.
    pub fn effective_proxy(&self) -> Option<String> {
        self.proxy.clone().or_else(|| {
            ["http_proxy", "HTTP_PROXY"]
                .iter()
                .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        })
    }

    /// A configuration rooted in `storage`, with defaults everywhere else.
    #[cfg(test)]
    pub fn with_storage(storage: &Path) -> Config {
        let mut table = toml::Table::new();
        table.insert("storage".into(), storage.to_string_lossy().into_owned().into());
        Self::from_table(table).unwrap_or_else(|e| panic!("default configuration is invalid: {e:#}"))
    }
}

fn take_backend_options(table: &mut toml::Table, kind: SourceType) -> Result<BackendOptions> {
    let prefix = kind.config_prefix();
    let mut take = |suffix: &str| -> Result<Option<String>> {
        let key = format!("{prefix}_{suffix}");
        match table.remove(&key) {
            None => Ok(None),
            Some(toml::Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s)),
            Some(other) => bail!("{key} must be a string, got {}", other.type_str()),
        }
    };

    let command = take("command")?;
    let addopts = split_opts(take("addopts")?, &format!("{prefix}_addopts"))?;
    let syncopts = split_opts(take("syncopts")?, &format!("{prefix}_syncopts"))?;
    let postsync = match take("postsync")? {
        Some(s) => Some(
            HookTemplate::parse(&s).map_err(|source| OverlayError::HookTemplate {
                key: format!("{prefix}_postsync"),
                source,
            })?,
        ),
        None => None,
    };

    Ok(BackendOptions {
        command: command.map(|c| paths::expand_path(&c).to_string_lossy().into_owned()),
        addopts,
        syncopts,
        postsync,
    })
}

fn split_opts(value: Option<String>, key: &str) -> Result<Vec<String>> {
    match value {
        Some(v) => shell_words::split(&v).with_context(|| format!("cannot parse {key}")),
        None => Ok(Vec::new()),
    }
}

const MAX_INTERPOLATION_DEPTH: usize = 16;

/// Resolve `%(key)s` references in every string value against the
/// top-level string values of the same table.
fn interpolate_table(table: &mut toml::Table) -> Result<()> {
    let vars: HashMap<String, String> = table
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();

    for (key, value) in table.iter_mut() {
        match value {
            toml::Value::String(s) => {
                *s = interpolate(s, &vars, 0).with_context(|| format!("resolving {key}"))?;
            }
            toml::Value::Array(items) => {
                for item in items.iter_mut() {
                    if let toml::Value::String(s) = item {
                        *s = interpolate(s, &vars, 0).with_context(|| format!("resolving {key}"))?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn interpolate(value: &str, vars: &HashMap<String, String>, depth: usize) -> Result<String> {
    lazy_static::lazy_static! {
        static ref REFERENCE: Regex = Regex::new(r"%\(([A-Za-z0-9_]+)\)s").expect("valid regex");
    }
    if depth > MAX_INTERPOLATION_DEPTH {
        bail!("interpolation is nested too deeply (circular reference?) in \"{value}\"");
    }

    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for caps in REFERENCE.captures_iter(value) {
        let whole = caps.get(0).expect("match has group 0");
        let name = &caps[1];
        let replacement = vars
            .get(name)
            .ok_or_else(|| anyhow!("unknown variable %({name})s"))?;
        out.push_str(&value[last..whole.start()]);
        out.push_str(&interpolate(replacement, vars, depth + 1)?);
        last = whole.end();
    }
    out.push_str(&value[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_from_storage() {
        let cfg = Config::from_toml_str("storage = \"/var/lib/overlays\"").unwrap();
        assert_eq!(cfg.cache, PathBuf::from("/var/lib/overlays/cache"));
        assert_eq!(cfg.installed, PathBuf::from("/var/lib/overlays/installed.toml"));
        assert_eq!(cfg.make_conf, PathBuf::from("/var/lib/overlays/make.conf"));
        assert_eq!(cfg.conf_var, "PORTDIR_OVERLAY");
        assert_eq!(cfg.priority, 50);
        assert!(!cfg.nocheck);
    }

    #[test]
    fn interpolation_follows_chained_references() {
        let cfg = Config::from_toml_str(
            r#"
            root = "/srv"
            storage = "%(root)s/overlays"
            overlays = ["file://%(storage)s/local.xml"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.storage, PathBuf::from("/srv/overlays"));
        assert_eq!(cfg.overlays, vec!["file:///srv/overlays/local.xml".to_string()]);
    }

    #[test]
    fn unknown_and_circular_references_are_rejected() {
        let unknown = Config::from_toml_str("storage = \"%(nope)s/x\"").unwrap_err();
        assert!(format!("{unknown:#}").contains("unknown variable %(nope)s"));

        let circular = Config::from_toml_str("a = \"%(b)s\"\nb = \"%(a)s\"").unwrap_err();
        assert!(format!("{circular:#}").contains("circular"));
    }

    #[test]
    fn backend_options_are_collected_per_type() {
        let cfg = Config::from_toml_str(
            r#"
            storage = "/tmp/ov"
            git_command = "/opt/git/bin/git"
            git_addopts = "--depth 1 --config 'core.autocrlf=false'"
            svn_syncopts = "--ignore-externals"
            g_common_postsync = "touch {path}/.synced"
            "#,
        )
        .unwrap();
        let git = cfg.backend_options(SourceType::Git);
        assert_eq!(git.command.as_deref(), Some("/opt/git/bin/git"));
        assert_eq!(git.addopts, vec!["--depth", "1", "--config", "core.autocrlf=false"]);
        assert_eq!(cfg.backend_options(SourceType::Svn).syncopts, vec!["--ignore-externals"]);
        assert!(cfg.backend_options(SourceType::GCommon).postsync.is_some());
        assert_eq!(cfg.backend_options(SourceType::Rsync), &BackendOptions::default());
    }

    #[test]
    fn invalid_postsync_placeholder_fails_loading() {
        let err = Config::from_toml_str("git_postsync = \"run {overlay}\"").unwrap_err();
        assert!(format!("{err:#}").contains("git_postsync"));
    }

    #[test]
    fn yes_no_flags_and_string_lists() {
        let cfg = Config::from_toml_str(
            r#"
            storage = "/tmp/ov"
            nocheck = "yes"
            overlays = """
                https://example.org/repositories.xml
                file:///etc/overlays/local.xml
            """
            gpg_detached_lists = ["https://example.org/r.xml https://example.org/r.xml.asc"]
            "#,
        )
        .unwrap();
        assert!(cfg.nocheck);
        assert_eq!(cfg.overlays.len(), 2);
        assert_eq!(
            cfg.gpg_detached_lists,
            vec![(
                "https://example.org/r.xml".to_string(),
                "https://example.org/r.xml.asc".to_string()
            )]
        );
    }

    #[test]
    fn priority_out_of_range_is_an_error() {
        assert!(Config::from_toml_str("priority = 101").is_err());
        assert!(Config::from_toml_str("priority = -1").is_err());
    }

    #[test]
    fn overrides_append_catalogs_and_flip_flags() {
        let cfg = Config::with_storage(Path::new("/tmp/ov")).with_overrides(ConfigOverrides {
            extra_overlays: vec!["file:///tmp/extra.xml".into()],
            nocheck: Some(true),
            quiet: None,
        });
        assert_eq!(cfg.overlays, vec!["file:///tmp/extra.xml".to_string()]);
        assert!(cfg.nocheck);
    }
}
