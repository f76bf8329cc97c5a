//! Version-control backends, one per source type, dispatched through
//! [`BackendRegistry`].

pub mod dvcs;
pub mod git;
pub mod rsync;
pub mod runner;
pub mod script;
pub mod svn;
pub mod tar;

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::overlay::config::{BackendOptions, Config};
use crate::overlay::error::BackendError;
use crate::overlay::types::{Overlay, SourceType};
use runner::{CommandRunner, CommandSpec};

/// Context handed to every backend call.
pub struct Invocation<'a> {
    pub runner: &'a dyn CommandRunner,
    pub config: &'a Config,
}

impl<'a> Invocation<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a Config) -> Self {
        Self { runner, config }
    }

    pub fn options(&self, kind: SourceType) -> &'a BackendOptions {
        self.config.backend_options(kind)
    }

    pub fn quiet(&self) -> bool {
        self.config.quiet
    }

    pub fn run(&self, kind: SourceType, spec: CommandSpec) -> Result<String, BackendError> {
        self.runner.run(kind, &spec)
    }
}

/// Tool named by the `<type>_command` option, else `default`.
pub fn command_for(options: &BackendOptions, default: &str) -> String {
    options
        .command
        .clone()
        .unwrap_or_else(|| default.to_string())
}

/// Remove a working copy. A missing path counts as removed.
pub fn remove_tree(target: &Path) -> Result<(), BackendError> {
    let result = match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(target),
        Ok(_) => fs::remove_file(target),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackendError::filesystem(target, e)),
    }
}

/// Create the directory that will hold `target`.
pub fn prepare_parent(target: &Path) -> Result<(), BackendError> {
    match target.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| BackendError::filesystem(parent, e)),
        None => Ok(()),
    }
}

pub trait Backend {
    fn kind(&self) -> SourceType;

    /// Tool used when no `<type>_command` override is configured.
    fn default_command(&self) -> &'static str;

    /// Every executable the backend needs.
    fn required_tools(&self, options: &BackendOptions) -> Vec<String> {
        vec![command_for(options, self.default_command())]
    }

    fn is_available(&self, options: &BackendOptions) -> bool {
        self.required_tools(options)
            .iter()
            .all(|tool| which::which(tool).is_ok())
    }

    /// Create a working copy of `url` at `target`.
    fn add(&self, inv: &Invocation, overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError>;

    /// Bring the working copy at `target` up to date with `url`.
    fn sync(&self, inv: &Invocation, overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError>;

    fn delete(&self, target: &Path) -> Result<(), BackendError> {
        remove_tree(target)
    }

    /// Recovery after an interrupted add or sync.
    fn cleanup(&self, _inv: &Invocation, _target: &Path) -> Result<(), BackendError> {
        Ok(())
    }

    /// Run the configured `<type>_postsync` command inside `target`.
    /// Returns whether a hook was configured.
    fn post_hook(&self, inv: &Invocation, target: &Path) -> Result<bool, BackendError> {
        let Some(hook) = &inv.options(self.kind()).postsync else {
            return Ok(false);
        };
        let (program, args) = hook.render(target);
        inv.run(
            self.kind(),
            CommandSpec::new(program).args(args).current_dir(target),
        )?;
        Ok(true)
    }
}

/// Lookup table of backends keyed by source type.
pub struct BackendRegistry {
    backends: HashMap<SourceType, Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Every supported type with its real implementation.
    pub fn standard() -> Self {
        Self::empty()
            .with(Box::new(rsync::Rsync))
            .with(Box::new(dvcs::cvs()))
            .with(Box::new(svn::Svn))
            .with(Box::new(dvcs::bzr()))
            .with(Box::new(dvcs::darcs()))
            .with(Box::new(git::Git))
            .with(Box::new(dvcs::mercurial()))
            .with(Box::new(tar::Tar))
            .with(Box::new(script::GCommon))
    }

    /// Register or replace the backend for its type.
    pub fn with(mut self, backend: Box<dyn Backend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn get(&self, kind: SourceType) -> Option<&dyn Backend> {
        self.backends.get(&kind).map(|b| b.as_ref())
    }

    pub fn is_available(&self, kind: SourceType, config: &Config) -> bool {
        self.get(kind)
            .is_some_and(|b| b.is_available(config.backend_options(kind)))
    }
}
