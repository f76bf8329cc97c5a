use std::fs;
use std::path::Path;

use super::runner::CommandSpec;
use super::{Backend, Invocation, command_for};
use crate::overlay::error::BackendError;
use crate::overlay::types::{Overlay, SourceType};

const BASE_ARGS: [&str; 8] = [
    "-rlptDvz",
    "--progress",
    "--delete",
    "--delete-after",
    "--timeout=180",
    "--exclude=distfiles/*",
    "--exclude=local/*",
    "--exclude=packages/*",
];

pub struct Rsync;

impl Rsync {
    fn transfer(&self, inv: &Invocation, extra: &[String], url: &str, target: &Path) -> Result<(), BackendError> {
        let mut spec = CommandSpec::new(command_for(inv.options(SourceType::Rsync), self.default_command()));
        if inv.quiet() {
            spec = spec.arg("-q");
        }
        let source = if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{url}/")
        };
        spec = spec
            .args(BASE_ARGS)
            .args(extra.iter().cloned())
            .arg("--")
            .arg(source)
            .path_arg(target);
        inv.run(SourceType::Rsync, spec)?;
        Ok(())
    }
}

impl Backend for Rsync {
    fn kind(&self) -> SourceType {
        SourceType::Rsync
    }

    fn default_command(&self) -> &'static str {
        "rsync"
    }

    fn add(&self, inv: &Invocation, _overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        fs::create_dir_all(target).map_err(|e| BackendError::filesystem(target, e))?;
        self.transfer(inv, &inv.options(SourceType::Rsync).addopts, url, target)
    }

    fn sync(&self, inv: &Invocation, _overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        self.transfer(inv, &inv.options(SourceType::Rsync).syncopts, url, target)
    }
}
