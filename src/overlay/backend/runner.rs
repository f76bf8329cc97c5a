//! External process execution for backends.

use duct::cmd;
use std::path::{Path, PathBuf};

use crate::common::progress;
use crate::common::shell::command_line;
use crate::overlay::error::BackendError;
use crate::overlay::types::SourceType;
use crate::ui::prelude::*;

/// A single tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    pub fn display(&self) -> String {
        command_line(&self.program, &self.args)
    }
}

/// Runs tool invocations synchronously. Success is exit status zero; the
/// combined stdout/stderr is returned either way.
pub trait CommandRunner {
    fn run(&self, kind: SourceType, spec: &CommandSpec) -> Result<String, BackendError>;
}

/// Runner backed by `duct`. Standard input is closed so prompts fail fast.
pub struct DuctRunner;

impl CommandRunner for DuctRunner {
    fn run(&self, kind: SourceType, spec: &CommandSpec) -> Result<String, BackendError> {
        let rendered = spec.display();
        emit(Level::Debug, "overlay.backend.exec", &format!("Running {rendered}"), None);

        let mut expression = cmd(&spec.program, &spec.args)
            .stdin_null()
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked();
        if let Some(dir) = &spec.dir {
            expression = expression.dir(dir);
        }

        let pb = progress::create_spinner(format!("{}: {rendered}", kind.display_name()));
        let result = expression.run();
        progress::finish_spinner(pb);

        let output = result.map_err(|e| BackendError::Spawn {
            kind,
            command: rendered.clone(),
            message: e.to_string(),
        })?;
        let text = String::from_utf8_lossy(&output.stdout).into_owned();

        if output.status.success() {
            if !text.trim().is_empty() {
                emit(Level::Debug, "overlay.backend.output", text.trim_end(), None);
            }
            Ok(text)
        } else {
            Err(BackendError::Command {
                kind,
                command: rendered,
                exit_code: output.status.code(),
                output: text,
            })
        }
    }
}
