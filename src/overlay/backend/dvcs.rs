//! Backends that differ only in their command lines: cvs, bzr, darcs and
//! mercurial.

use std::path::Path;

use super::runner::CommandSpec;
use super::{Backend, Invocation, command_for};
use crate::overlay::error::BackendError;
use crate::overlay::types::{Overlay, SourceType};

/// Placeholders in the argument templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arg {
    Lit(&'static str),
    /// `-q` when running quietly
    Quiet,
    /// `<type>_addopts` or `<type>_syncopts`
    Opts,
    Url,
    Target,
    /// Final path component of the target
    TargetName,
    /// The overlay's `subpath`, else its name
    Module,
}

pub struct CommandLineBackend {
    kind: SourceType,
    program: &'static str,
    add: &'static [Arg],
    sync: &'static [Arg],
    /// Whether `add` runs from the parent directory instead of the target
    add_in_parent: bool,
}

use Arg::*;

pub fn cvs() -> CommandLineBackend {
    CommandLineBackend {
        kind: SourceType::Cvs,
        program: "cvs",
        add: &[Quiet, Lit("-d"), Url, Lit("checkout"), Opts, Lit("-d"), TargetName, Module],
        sync: &[Quiet, Lit("update"), Lit("-d"), Opts],
        add_in_parent: true,
    }
}

pub fn bzr() -> CommandLineBackend {
    CommandLineBackend {
        kind: SourceType::Bzr,
        program: "bzr",
        add: &[Lit("branch"), Quiet, Opts, Url, Target],
        sync: &[Lit("pull"), Quiet, Opts, Lit("--overwrite"), Url],
        add_in_parent: false,
    }
}

pub fn darcs() -> CommandLineBackend {
    CommandLineBackend {
        kind: SourceType::Darcs,
        program: "darcs",
        add: &[Lit("get"), Lit("--partial"), Opts, Url, Target],
        sync: &[Lit("pull"), Lit("--all"), Opts, Url],
        add_in_parent: false,
    }
}

pub fn mercurial() -> CommandLineBackend {
    CommandLineBackend {
        kind: SourceType::Mercurial,
        program: "hg",
        add: &[Lit("clone"), Quiet, Opts, Url, Target],
        sync: &[Lit("pull"), Quiet, Lit("-u"), Opts, Url],
        add_in_parent: false,
    }
}

impl CommandLineBackend {
    fn build(
        &self,
        inv: &Invocation,
        template: &[Arg],
        opts: &[String],
        overlay: &Overlay,
        url: &str,
        target: &Path,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(command_for(inv.options(self.kind), self.program));
        for arg in template {
            spec = match *arg {
                Lit(s) => spec.arg(s),
                Quiet if inv.quiet() => spec.arg("-q"),
                Quiet => spec,
                Opts => spec.args(opts.iter().cloned()),
                Url => spec.arg(url),
                Target => spec.path_arg(target),
                TargetName => spec.arg(
                    target
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| overlay.name.clone()),
                ),
                Module => spec.arg(overlay.subpath.clone().unwrap_or_else(|| overlay.name.clone())),
            };
        }
        spec
    }
}

impl Backend for CommandLineBackend {
    fn kind(&self) -> SourceType {
        self.kind
    }

    fn default_command(&self) -> &'static str {
        self.program
    }

    fn add(&self, inv: &Invocation, overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        let opts = &inv.options(self.kind).addopts;
        let mut spec = self.build(inv, self.add, opts, overlay, url, target);
        if self.add_in_parent
            && let Some(parent) = target.parent()
        {
            spec = spec.current_dir(parent);
        }
        inv.run(self.kind, spec)?;
        Ok(())
    }

    fn sync(&self, inv: &Invocation, overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        let opts = &inv.options(self.kind).syncopts;
        let spec = self
            .build(inv, self.sync, opts, overlay, url, target)
            .current_dir(target);
        inv.run(self.kind, spec)?;
        Ok(())
    }
}
